// Tests for stream/circuit correlation

use onionbench_core::correlate::{self, CircuitSource, normalize_host, stream_target_host};
use onionbench_core::country::CountryMap;
use onionbench_core::relay::{Country, RelayRecord};
use onionbench_scanner::ScanError;
use onionbench_scanner::control::{PathHop, StreamEntry, StreamStatus};
use onionbench_scanner::error::Result;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::Duration;

/// Serves one stream snapshot per call, repeating the last one when the
/// queue runs dry.
#[derive(Default)]
struct FakeSource {
    snapshots: VecDeque<Result<Vec<StreamEntry>>>,
    last: Vec<StreamEntry>,
    circuits: HashMap<String, Vec<PathHop>>,
    addresses: HashMap<String, IpAddr>,
    stream_calls: usize,
}

impl CircuitSource for FakeSource {
    async fn streams(&mut self) -> Result<Vec<StreamEntry>> {
        self.stream_calls += 1;
        match self.snapshots.pop_front() {
            Some(Ok(streams)) => {
                self.last = streams.clone();
                Ok(streams)
            }
            Some(Err(e)) => Err(e),
            None => Ok(self.last.clone()),
        }
    }

    async fn circuit_path(&mut self, circuit_id: &str) -> Result<Option<Vec<PathHop>>> {
        Ok(self.circuits.get(circuit_id).cloned())
    }

    async fn relay_address(&mut self, fingerprint: &str) -> Result<IpAddr> {
        self.addresses
            .get(fingerprint)
            .copied()
            .ok_or_else(|| ScanError::ControlError {
                code: 552,
                message: format!("Unrecognized key \"ns/id/{}\"", fingerprint),
            })
    }
}

fn stream(id: &str, status: StreamStatus, circuit: &str, target: &str) -> StreamEntry {
    StreamEntry {
        id: id.to_string(),
        status,
        circuit_id: circuit.to_string(),
        target: target.to_string(),
    }
}

fn hop(fp: &str, nick: &str) -> PathHop {
    PathHop {
        fingerprint: fp.to_string(),
        nickname: Some(nick.to_string()),
    }
}

const ONION_URL: &str = "http://abcdefghijklmnop.onion/index.html";

// ============================================================================
// Host normalization
// ============================================================================

#[test]
fn test_normalize_host() {
    assert_eq!(normalize_host("WWW.Example.COM"), "example.com");
    assert_eq!(normalize_host("www.www.example.com"), "www.example.com");
    assert_eq!(stream_target_host("www.abc.onion:443"), "abc.onion");
    assert_eq!(stream_target_host("abc.onion"), "abc.onion");
}

// ============================================================================
// Circuit lookup
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_match_on_first_attempt() {
    let mut source = FakeSource::default();
    source.snapshots.push_back(Ok(vec![
        stream("1", StreamStatus::Succeeded, "7", "other.onion:80"),
        stream("2", StreamStatus::Succeeded, "9", "abcdefghijklmnop.onion:80"),
    ]));

    let start = tokio::time::Instant::now();
    let circuit =
        correlate::find_circuit_for_url(&mut source, ONION_URL, 5, Duration::from_millis(500)).await;

    assert_eq!(circuit.as_deref(), Some("9"));
    assert_eq!(source.stream_calls, 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_first_match_in_control_port_order_wins() {
    let mut source = FakeSource::default();
    source.snapshots.push_back(Ok(vec![
        stream("3", StreamStatus::New, "4", "abcdefghijklmnop.onion:80"),
        stream("5", StreamStatus::Succeeded, "6", "abcdefghijklmnop.onion:80"),
    ]));

    let circuit =
        correlate::find_circuit_for_url(&mut source, ONION_URL, 5, Duration::from_millis(500)).await;
    assert_eq!(circuit.as_deref(), Some("4"));
}

#[tokio::test(start_paused = true)]
async fn test_ignores_streams_in_other_states() {
    let mut source = FakeSource::default();
    source.snapshots.push_back(Ok(vec![
        stream("1", StreamStatus::Closed, "2", "abcdefghijklmnop.onion:80"),
        stream("3", StreamStatus::SentConnect, "4", "abcdefghijklmnop.onion:80"),
    ]));

    let circuit =
        correlate::find_circuit_for_url(&mut source, ONION_URL, 3, Duration::from_millis(500)).await;
    assert_eq!(circuit, None);
}

#[tokio::test(start_paused = true)]
async fn test_match_on_later_attempt() {
    let mut source = FakeSource::default();
    source.snapshots.push_back(Ok(vec![]));
    source.snapshots.push_back(Err(ScanError::Other("connection reset".into())));
    source.snapshots.push_back(Ok(vec![stream(
        "8",
        StreamStatus::Succeeded,
        "12",
        "www.abcdefghijklmnop.onion:443",
    )]));

    let start = tokio::time::Instant::now();
    let circuit =
        correlate::find_circuit_for_url(&mut source, ONION_URL, 5, Duration::from_millis(500)).await;

    assert_eq!(circuit.as_deref(), Some("12"));
    assert_eq!(source.stream_calls, 3);
    assert_eq!(start.elapsed(), Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn test_no_match_exhausts_full_budget() {
    let mut source = FakeSource::default();
    source.snapshots.push_back(Ok(vec![stream(
        "1",
        StreamStatus::Succeeded,
        "2",
        "unrelated.onion:80",
    )]));

    let start = tokio::time::Instant::now();
    let circuit =
        correlate::find_circuit_for_url(&mut source, ONION_URL, 5, Duration::from_millis(500)).await;

    assert_eq!(circuit, None);
    assert_eq!(source.stream_calls, 5);
    // Sleeps only between attempts
    assert_eq!(start.elapsed(), Duration::from_millis(2000));
}

#[tokio::test(start_paused = true)]
async fn test_url_without_host() {
    let mut source = FakeSource::default();
    let circuit =
        correlate::find_circuit_for_url(&mut source, "not a url", 5, Duration::from_millis(500)).await;
    assert_eq!(circuit, None);
    assert_eq!(source.stream_calls, 0);
}

// ============================================================================
// Circuit expansion
// ============================================================================

#[tokio::test]
async fn test_circuit_relays_in_path_order() {
    let mut source = FakeSource::default();
    source.circuits.insert(
        "9".into(),
        vec![hop("AAAA", "guard"), hop("BBBB", "middle"), hop("CCCC", "rend")],
    );
    source.addresses.insert("AAAA".into(), "1.2.3.4".parse().unwrap());
    source.addresses.insert("BBBB".into(), "5.6.7.8".parse().unwrap());

    let known = vec![RelayRecord::new("X", "x", Some("1.2.3.4".into()), Country::Known("DE".into())).unwrap()];
    let mut resolver = CountryMap::build(&known);

    let relays = correlate::circuit_relays(&mut source, &mut resolver, "9").await;

    assert_eq!(relays.len(), 3);
    assert_eq!(relays[0].fingerprint(), "AAAA");
    assert_eq!(relays[0].country().code(), Some("DE"));
    assert_eq!(relays[1].ip(), Some("5.6.7.8"));
    assert_eq!(relays[1].country(), &Country::Unresolved);
    // Address lookup failed for the last hop
    assert_eq!(relays[2].nickname(), "rend");
    assert_eq!(relays[2].ip(), None);
}

#[tokio::test]
async fn test_circuit_relays_missing_circuit() {
    let mut source = FakeSource::default();
    let mut resolver = CountryMap::new();
    let relays = correlate::circuit_relays(&mut source, &mut resolver, "404").await;
    assert!(relays.is_empty());
}
