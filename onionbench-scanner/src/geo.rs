//! Online IP geolocation.
//!
//! Lookups go to an ipinfo-style service, one request at a time, separated
//! by a flat rate-limit sleep. Answers are cached for the lifetime of the
//! locator so a relay seen on several circuits costs one request.

use crate::error::{Result, ScanError};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_GEO_URL: &str = "https://ipinfo.io";

/// Response shape served by the geolocation endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeoFormat {
    /// `<base>/<ip>/json`, a JSON object with a `country` field
    #[default]
    Json,
    /// `<base>/<ip>/country`, the bare country code
    PlainText,
}

impl FromStr for GeoFormat {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(GeoFormat::Json),
            "text" | "plain" | "country" => Ok(GeoFormat::PlainText),
            _ => Err(ScanError::ParseError(format!("unknown geolocation format '{}'", s))),
        }
    }
}

impl GeoFormat {

    fn path_suffix(&self) -> &'static str {
        match self {
            GeoFormat::Json => "json",
            GeoFormat::PlainText => "country",
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeoJson {
    country: Option<String>,
}

pub struct GeoLocator {
    client: Client,
    base_url: String,
    format: GeoFormat,
    interval: Duration,
    cache: HashMap<String, String>,
    requests_sent: usize,
}

impl GeoLocator {
    pub fn new() -> Result<Self> {
        Self::with_endpoint(DEFAULT_GEO_URL, GeoFormat::Json)
    }

    pub fn with_endpoint(base_url: &str, format: GeoFormat) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("onionbench/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(2))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            format,
            interval: Duration::from_secs(1),
            cache: HashMap::new(),
            requests_sent: 0,
        })
    }

    /// Minimum gap between two network lookups.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = Client::builder()
            .user_agent(concat!("onionbench/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(self)
    }

    pub fn requests_sent(&self) -> usize {
        self.requests_sent
    }

    /// Country code for `ip`, or `None` when the lookup failed for any reason.
    /// Failures are logged and never retried.
    pub async fn lookup(&mut self, ip: &str) -> Option<String> {
        match self.try_lookup(ip).await {
            Ok(country) => Some(country),
            Err(e) => {
                warn!("Country lookup for {} failed: {}", ip, e);
                None
            }
        }
    }

    pub async fn try_lookup(&mut self, ip: &str) -> Result<String> {
        if let Some(country) = self.cache.get(ip) {
            debug!("Country for {} served from cache: {}", ip, country);
            return Ok(country.clone());
        }

        if self.requests_sent > 0 {
            tokio::time::sleep(self.interval).await;
        }
        self.requests_sent += 1;

        let url = format!("{}/{}/{}", self.base_url, ip, self.format.path_suffix());
        debug!("Looking up country for {} at {}", ip, url);

        let response = self.client.get(&url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(ScanError::Other(format!(
                "geolocation service returned {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        let country = match self.format {
            GeoFormat::PlainText => body.trim().to_string(),
            GeoFormat::Json => serde_json::from_str::<GeoJson>(&body)
                .map_err(|e| ScanError::ParseError(format!("geolocation JSON: {}", e)))?
                .country
                .unwrap_or_default()
                .trim()
                .to_string(),
        };

        if country.is_empty() {
            return Err(ScanError::Other("empty country in response".to_string()));
        }

        self.cache.insert(ip.to_string(), country.clone());
        Ok(country)
    }
}
