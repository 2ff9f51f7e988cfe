// Map a page load to the Tor circuit that carried it

use crate::country::CountryResolver;
use crate::relay::{Country, RelayRecord};
use onionbench_scanner::TorController;
use onionbench_scanner::control::{PathHop, StreamEntry, StreamStatus};
use onionbench_scanner::error::Result as ScanResult;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

pub const DEFAULT_RETRIES: usize = 5;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// The parts of the Tor control plane the correlator needs.
#[allow(async_fn_in_trait)]
pub trait CircuitSource {
    /// Fresh snapshot of the streams Tor currently knows about.
    async fn streams(&mut self) -> ScanResult<Vec<StreamEntry>>;

    /// Hops of `circuit_id`, entry first, or `None` if the circuit is gone.
    async fn circuit_path(&mut self, circuit_id: &str) -> ScanResult<Option<Vec<PathHop>>>;

    async fn relay_address(&mut self, fingerprint: &str) -> ScanResult<IpAddr>;
}

impl CircuitSource for TorController {
    async fn streams(&mut self) -> ScanResult<Vec<StreamEntry>> {
        TorController::streams(self).await
    }

    async fn circuit_path(&mut self, circuit_id: &str) -> ScanResult<Option<Vec<PathHop>>> {
        Ok(self.circuit(circuit_id).await?.map(|c| c.path))
    }

    async fn relay_address(&mut self, fingerprint: &str) -> ScanResult<IpAddr> {
        TorController::relay_address(self, fingerprint).await
    }
}

/// Lowercase host with one leading `www.` removed.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().to_lowercase();
    host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
}

/// Host part of a stream target (`host:port`), normalized.
pub fn stream_target_host(target: &str) -> String {
    normalize_host(target.split(':').next().unwrap_or_default())
}

/// Poll `source` for a stream to `target_url`'s host and return the id of the
/// circuit carrying it.
///
/// The browser registers streams asynchronously to the page load, so up to
/// `retries` snapshots are taken, `delay` apart. Only `NEW` and `SUCCEEDED`
/// streams count; when several match, the first in control-port order wins.
pub async fn find_circuit_for_url<S: CircuitSource>(
    source: &mut S,
    target_url: &str,
    retries: usize,
    delay: Duration,
) -> Option<String> {
    let Some(hostname) = Url::parse(target_url)
        .ok()
        .and_then(|u| u.host_str().map(normalize_host))
    else {
        warn!("Cannot correlate {}: no hostname", target_url);
        return None;
    };

    for attempt in 1..=retries {
        match source.streams().await {
            Ok(streams) => {
                info!(
                    "Attempt {}/{}: checking {} streams for hostname '{}'",
                    attempt,
                    retries,
                    streams.len(),
                    hostname
                );
                for stream in &streams {
                    debug!(
                        "Stream {}: status {:?}, target {}, circuit {}",
                        stream.id, stream.status, stream.target, stream.circuit_id
                    );
                    if matches!(stream.status, StreamStatus::New | StreamStatus::Succeeded)
                        && !stream.target.is_empty()
                        && stream_target_host(&stream.target) == hostname
                    {
                        info!("Matched stream {} with circuit {}", stream.id, stream.circuit_id);
                        return Some(stream.circuit_id.clone());
                    }
                }
            }
            Err(e) => warn!("Attempt {}/{}: failed to list streams: {}", attempt, retries, e),
        }

        if attempt < retries {
            debug!("No matching stream on attempt {}, retrying in {:?}", attempt, delay);
            tokio::time::sleep(delay).await;
        }
    }

    warn!("Could not find circuit for {} after {} attempts", target_url, retries);
    None
}

/// Expand a circuit into relay records, resolving each hop's address through
/// the control port and its country through `resolver`.
///
/// Per-hop failures degrade that hop to an unknown address or country; a
/// failure to read the circuit itself yields an empty list.
pub async fn circuit_relays<S: CircuitSource, R: CountryResolver>(
    source: &mut S,
    resolver: &mut R,
    circuit_id: &str,
) -> Vec<RelayRecord> {
    let path = match source.circuit_path(circuit_id).await {
        Ok(Some(path)) => path,
        Ok(None) => {
            warn!("Circuit {} no longer exists", circuit_id);
            return Vec::new();
        }
        Err(e) => {
            error!("Error getting circuit relays for {}: {}", circuit_id, e);
            return Vec::new();
        }
    };

    let mut relays = Vec::with_capacity(path.len());
    for hop in path {
        let (ip, country) = match source.relay_address(&hop.fingerprint).await {
            Ok(ip) => {
                let ip = ip.to_string();
                let country = resolver.resolve(&ip).await;
                (Some(ip), country)
            }
            Err(e) => {
                warn!("Failed to get address for {}: {}", hop.fingerprint, e);
                (None, Country::Unresolved)
            }
        };

        match RelayRecord::new(
            hop.fingerprint.clone(),
            hop.nickname.clone().unwrap_or_default(),
            ip,
            country,
        ) {
            Ok(record) => relays.push(record),
            Err(e) => warn!("Skipping relay {}: {}", hop.fingerprint, e),
        }
    }
    relays
}
