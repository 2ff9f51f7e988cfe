use crate::error::{Result, ScanError};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

pub const ONION_LOCATION_HEADER: &str = "Onion-Location";

/// Looks up the `Onion-Location` header a clearnet site advertises.
pub struct OnionProbe {
    client: Client,
}

impl OnionProbe {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(10))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("onionbench/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self { client })
    }

    /// Probe `https://<domain>`.
    pub async fn check_domain(&self, domain: &str) -> Result<Option<String>> {
        let domain = domain.trim();
        if domain.is_empty() {
            return Err(ScanError::InvalidUrl("empty domain".to_string()));
        }
        self.check_url(&format!("https://{}", domain)).await
    }

    /// Fetch `url` (following redirects) and return the advertised onion
    /// address, if the final response carries one that mentions `.onion`.
    pub async fn check_url(&self, url: &str) -> Result<Option<String>> {
        debug!("Probing {} for {}", url, ONION_LOCATION_HEADER);

        let response = self.client.get(url).send().await?;
        let onion = response
            .headers()
            .get(ONION_LOCATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| s.contains(".onion"));

        Ok(onion)
    }
}
