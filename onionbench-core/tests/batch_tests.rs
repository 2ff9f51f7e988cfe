// End-to-end tests for the measurement batch with fake browser sessions

use onionbench_core::batch::{BatchOptions, execute_batch};
use onionbench_core::correlate::CircuitSource;
use onionbench_core::country::CountryMap;
use onionbench_core::table::{self, ComparisonWriter, DomainPair, Variant};
use onionbench_scanner::control::{PathHop, StreamEntry, StreamStatus};
use onionbench_scanner::error::Result;
use onionbench_scanner::{BrowserSession, NavigationTiming, ProxyMode, ScanError, SessionFactory};
use std::cell::{Cell, RefCell};
use std::net::IpAddr;
use std::rc::Rc;
use std::time::Duration;
use tempfile::TempDir;

struct FakeSession {
    fail: bool,
}

impl BrowserSession for FakeSession {
    async fn load(&mut self, url: &str) -> Result<()> {
        if self.fail {
            Err(ScanError::timeout(format!("loading {}", url), Duration::from_secs(120)))
        } else {
            Ok(())
        }
    }

    async fn navigation_timing(&mut self) -> Result<NavigationTiming> {
        Ok(NavigationTiming {
            navigation_start: 1000,
            domain_lookup_start: 1000,
            domain_lookup_end: 1050,
            connect_start: 1050,
            connect_end: 1080,
            request_start: 1085,
            response_start: 1090,
            dom_content_loaded_event_end: 1300,
            load_event_end: 1400,
        })
    }

    async fn close(self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct FakeFactory {
    fail_onion: bool,
    opened: RefCell<Vec<ProxyMode>>,
}

impl SessionFactory for FakeFactory {
    type Session = FakeSession;

    async fn open(&self, mode: ProxyMode) -> Result<FakeSession> {
        self.opened.borrow_mut().push(mode);
        Ok(FakeSession {
            fail: self.fail_onion && matches!(mode, ProxyMode::Tor { .. }),
        })
    }
}

/// Control plane that reports every onion load on circuit 5.
struct FakeControl;

impl CircuitSource for FakeControl {
    async fn streams(&mut self) -> Result<Vec<StreamEntry>> {
        Ok(vec![StreamEntry {
            id: "1".into(),
            status: StreamStatus::Succeeded,
            circuit_id: "5".into(),
            target: "abcdefghijklmnop.onion:80".into(),
        }])
    }

    async fn circuit_path(&mut self, _circuit_id: &str) -> Result<Option<Vec<PathHop>>> {
        Ok(Some(vec![
            PathHop {
                fingerprint: "AAAA".into(),
                nickname: Some("guard".into()),
            },
            PathHop {
                fingerprint: "BBBB".into(),
                nickname: Some("middle".into()),
            },
        ]))
    }

    async fn relay_address(&mut self, fingerprint: &str) -> Result<IpAddr> {
        match fingerprint {
            "AAAA" => Ok("1.2.3.4".parse().unwrap()),
            _ => Err(ScanError::Other("no descriptor".into())),
        }
    }
}

fn pairs() -> Vec<DomainPair> {
    vec![DomainPair {
        clear_domain: "example.com".into(),
        onion_address: "http://abcdefghijklmnop.onion/?utm=1#top".into(),
    }]
}

fn options(runs: usize) -> BatchOptions {
    let mut options = BatchOptions::new(pairs());
    options.runs = runs;
    options.settle = Duration::ZERO;
    options.run_delay = Duration::from_secs(600);
    options.correlation_delay = Duration::from_millis(10);
    options
}

fn read_all(path: &std::path::Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let header = reader.headers().unwrap().iter().map(str::to_string).collect();
    let rows = reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect();
    (header, rows)
}

#[tokio::test(start_paused = true)]
async fn test_batch_without_tor_controller() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out.csv");
    let factory = FakeFactory::default();
    let mut resolver = CountryMap::new();
    let mut writer = ComparisonWriter::create(&output, true).unwrap();

    let summary = execute_batch(options(1), &factory, None::<&mut FakeControl>, &mut resolver, &mut writer)
        .await
        .unwrap();
    drop(writer);

    assert_eq!(summary.rows_written, 2);
    assert_eq!(summary.failed_measurements, 0);

    let (header, rows) = read_all(&output);
    assert_eq!(header.len(), 10);
    assert_eq!(header[9], table::COL_RELAYS);
    assert_eq!(rows.len(), 2);

    assert_eq!(rows[0][0], "example.com");
    assert_eq!(rows[0][1], "onion");
    assert_eq!(rows[0][2], "http://abcdefghijklmnop.onion/");
    assert_eq!(rows[0][3], "50");
    assert_eq!(rows[0][4], "30");
    // No TLS over a plain http onion URL
    assert_eq!(rows[0][5], "");
    assert_eq!(rows[0][8], "400");
    assert_eq!(rows[0][9], "");

    assert_eq!(rows[1][1], "clear");
    assert_eq!(rows[1][2], "https://example.com");
    assert_eq!(rows[1][5], "5");
    assert_eq!(rows[1][9], "");

    assert_eq!(
        *factory.opened.borrow(),
        vec![ProxyMode::Tor { socks_port: 9150 }, ProxyMode::Direct]
    );
}

#[tokio::test(start_paused = true)]
async fn test_batch_annotates_onion_rows() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out.csv");
    let factory = FakeFactory::default();
    let mut control = FakeControl;
    let mut resolver = CountryMap::new();
    let mut writer = ComparisonWriter::create(&output, true).unwrap();

    let summary = execute_batch(options(1), &factory, Some(&mut control), &mut resolver, &mut writer)
        .await
        .unwrap();
    drop(writer);

    assert_eq!(summary.annotated_circuits, 1);

    let rows = table::read_comparison_rows(&output).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].variant, Variant::Onion);
    let relays = rows[0].relays.as_ref().unwrap();
    assert_eq!(relays.len(), 2);
    assert_eq!(relays[0].ip(), Some("1.2.3.4"));
    assert_eq!(relays[1].nickname(), "middle");
    assert_eq!(relays[1].ip(), None);
    assert_eq!(rows[1].relays, None);
}

#[tokio::test(start_paused = true)]
async fn test_failed_measurement_writes_no_row() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out.csv");
    let factory = FakeFactory {
        fail_onion: true,
        ..Default::default()
    };
    let mut resolver = CountryMap::new();
    let mut writer = ComparisonWriter::create(&output, false).unwrap();

    let summary = execute_batch(options(1), &factory, None::<&mut FakeControl>, &mut resolver, &mut writer)
        .await
        .unwrap();
    drop(writer);

    assert_eq!(summary.rows_written, 1);
    assert_eq!(summary.failed_measurements, 1);

    let (header, rows) = read_all(&output);
    assert_eq!(header.len(), 9);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][1], "clear");
}

#[tokio::test(start_paused = true)]
async fn test_delay_only_between_runs() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out.csv");
    let factory = FakeFactory::default();
    let mut resolver = CountryMap::new();
    let mut writer = ComparisonWriter::create(&output, false).unwrap();

    let start = tokio::time::Instant::now();
    let summary = execute_batch(options(3), &factory, None::<&mut FakeControl>, &mut resolver, &mut writer)
        .await
        .unwrap();

    assert_eq!(summary.rows_written, 6);
    assert_eq!(start.elapsed(), Duration::from_secs(1200));
}

/// Session whose Tor streams exist only between open and close.
struct LiveSession {
    live: Rc<Cell<bool>>,
}

impl BrowserSession for LiveSession {
    async fn load(&mut self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn navigation_timing(&mut self) -> Result<NavigationTiming> {
        FakeSession { fail: false }.navigation_timing().await
    }

    async fn close(self) -> Result<()> {
        self.live.set(false);
        Ok(())
    }
}

struct LiveFactory {
    live: Rc<Cell<bool>>,
}

impl SessionFactory for LiveFactory {
    type Session = LiveSession;

    async fn open(&self, mode: ProxyMode) -> Result<LiveSession> {
        if matches!(mode, ProxyMode::Tor { .. }) {
            self.live.set(true);
        }
        Ok(LiveSession { live: self.live.clone() })
    }
}

struct LiveControl {
    live: Rc<Cell<bool>>,
}

impl CircuitSource for LiveControl {
    async fn streams(&mut self) -> Result<Vec<StreamEntry>> {
        if self.live.get() {
            FakeControl.streams().await
        } else {
            Ok(Vec::new())
        }
    }

    async fn circuit_path(&mut self, circuit_id: &str) -> Result<Option<Vec<PathHop>>> {
        FakeControl.circuit_path(circuit_id).await
    }

    async fn relay_address(&mut self, fingerprint: &str) -> Result<IpAddr> {
        FakeControl.relay_address(fingerprint).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_circuit_found_while_tor_session_open() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out.csv");
    let live = Rc::new(Cell::new(false));
    let factory = LiveFactory { live: live.clone() };
    let mut control = LiveControl { live: live.clone() };
    let mut resolver = CountryMap::new();
    let mut writer = ComparisonWriter::create(&output, true).unwrap();

    let summary = execute_batch(options(1), &factory, Some(&mut control), &mut resolver, &mut writer)
        .await
        .unwrap();
    drop(writer);

    assert_eq!(summary.annotated_circuits, 1);
    assert!(!live.get());

    let rows = table::read_comparison_rows(&output).unwrap();
    assert_eq!(rows[0].variant, Variant::Onion);
    assert_eq!(rows[0].relays.as_ref().map(Vec::len), Some(2));
}
