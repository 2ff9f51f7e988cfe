use crate::relay::{Country, RelayRecord};
use onionbench_scanner::GeoLocator;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Anything that can put a country on an IP address.
#[allow(async_fn_in_trait)]
pub trait CountryResolver {
    async fn resolve(&mut self, ip: &str) -> Country;
}

/// IP → country learned from relays whose country is already known.
///
/// The first known country seen for an address wins. The map is only used
/// to fill forward; source records are never mutated.
#[derive(Debug, Clone, Default)]
pub struct CountryMap {
    by_ip: HashMap<String, String>,
}

impl CountryMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build<'a>(relays: impl IntoIterator<Item = &'a RelayRecord>) -> Self {
        let mut map = Self::new();
        for relay in relays {
            map.observe(relay);
        }
        map
    }

    pub fn observe(&mut self, relay: &RelayRecord) {
        if let (Some(ip), Country::Known(code)) = (relay.ip(), relay.country()) {
            self.by_ip
                .entry(ip.to_string())
                .or_insert_with(|| code.clone());
        }
    }

    pub fn get(&self, ip: &str) -> Option<&str> {
        self.by_ip.get(ip).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_ip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ip.is_empty()
    }

    /// Copies of `relays` with unresolved countries filled from the map
    /// where the address is known.
    pub fn fill(&self, relays: &[RelayRecord]) -> Vec<RelayRecord> {
        relays
            .iter()
            .map(|relay| match (relay.country(), relay.ip().and_then(|ip| self.get(ip))) {
                (Country::Unresolved, Some(code)) => relay
                    .with_country(Country::Known(code.to_string()))
                    .unwrap_or_else(|_| relay.clone()),
                _ => relay.clone(),
            })
            .collect()
    }
}

impl CountryResolver for CountryMap {
    async fn resolve(&mut self, ip: &str) -> Country {
        self.get(ip)
            .map(|code| Country::Known(code.to_string()))
            .unwrap_or(Country::Unresolved)
    }
}

impl CountryResolver for GeoLocator {
    async fn resolve(&mut self, ip: &str) -> Country {
        match self.lookup(ip).await {
            Some(code) => Country::from_field(&code),
            None => Country::Unresolved,
        }
    }
}

/// Resolve every relay that has an address but no country through
/// `resolver`. Relays the resolver cannot place stay unresolved.
pub async fn resolve_unresolved<R: CountryResolver>(
    resolver: &mut R,
    relays: &[RelayRecord],
) -> Vec<RelayRecord> {
    let mut resolved = Vec::with_capacity(relays.len());
    for relay in relays {
        let Some(ip) = relay.ip().filter(|_| !relay.country().is_known()) else {
            resolved.push(relay.clone());
            continue;
        };

        let country = resolver.resolve(ip).await;
        debug!("Resolved {} to {}", ip, country);
        match relay.with_country(country) {
            Ok(updated) => resolved.push(updated),
            Err(e) => {
                warn!("Discarding country for {}: {}", ip, e);
                resolved.push(relay.clone());
            }
        }
    }
    resolved
}
