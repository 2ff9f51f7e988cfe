use crate::error::{Result, ScanError};
use crate::result::NavigationTiming;
use std::future::Future;
use std::time::Duration;
use thirtyfour::common::capabilities::firefox::{FirefoxCapabilities, FirefoxPreferences};
use thirtyfour::prelude::*;
use tracing::debug;

pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:4444";
pub const DEFAULT_SOCKS_PORT: u16 = 9150;

const NAVIGATION_TIMING_SCRIPT: &str = "return window.performance.timing.toJSON();";

/// How a browser session reaches the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    /// SOCKS5 through a local Tor client, DNS resolved by the proxy
    Tor { socks_port: u16 },
    Direct,
}

impl ProxyMode {
    pub fn tor() -> Self {
        ProxyMode::Tor {
            socks_port: DEFAULT_SOCKS_PORT,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProxyMode::Tor { .. } => "tor",
            ProxyMode::Direct => "direct",
        }
    }
}

/// One browser session, used for a single measurement and then closed.
#[allow(async_fn_in_trait)]
pub trait BrowserSession {
    async fn load(&mut self, url: &str) -> Result<()>;

    async fn navigation_timing(&mut self) -> Result<NavigationTiming>;

    async fn close(self) -> Result<()>;
}

/// Opens browser sessions configured for a proxy mode.
#[allow(async_fn_in_trait)]
pub trait SessionFactory {
    type Session: BrowserSession;

    async fn open(&self, mode: ProxyMode) -> Result<Self::Session>;
}

/// Headless Firefox driven through a WebDriver endpoint (geckodriver).
#[derive(Debug, Clone)]
pub struct FirefoxFactory {
    webdriver_url: String,
    headless: bool,
    command_timeout: Duration,
}

impl FirefoxFactory {
    pub fn new(webdriver_url: &str) -> Self {
        Self {
            webdriver_url: webdriver_url.to_string(),
            headless: true,
            command_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Upper bound for every individual WebDriver command.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    fn capabilities(&self, mode: ProxyMode) -> Result<FirefoxCapabilities> {
        let mut caps = DesiredCapabilities::firefox();
        if self.headless {
            caps.set_headless()?;
        }

        if let ProxyMode::Tor { socks_port } = mode {
            let mut prefs = FirefoxPreferences::new();
            prefs.set("network.proxy.type", 1)?;
            prefs.set("network.proxy.socks", "127.0.0.1")?;
            prefs.set("network.proxy.socks_port", socks_port)?;
            prefs.set("network.proxy.socks_version", 5)?;
            prefs.set("network.proxy.socks_remote_dns", true)?;
            caps.set_preferences(prefs)?;
        }

        Ok(caps)
    }
}

impl SessionFactory for FirefoxFactory {
    type Session = FirefoxSession;

    async fn open(&self, mode: ProxyMode) -> Result<FirefoxSession> {
        debug!("Opening {} browser session via {}", mode.label(), self.webdriver_url);
        let caps = self.capabilities(mode)?;
        let driver = with_timeout(
            "starting browser session",
            self.command_timeout,
            WebDriver::new(self.webdriver_url.as_str(), caps),
        )
        .await??;

        Ok(FirefoxSession {
            driver,
            command_timeout: self.command_timeout,
        })
    }
}

pub struct FirefoxSession {
    driver: WebDriver,
    command_timeout: Duration,
}

impl BrowserSession for FirefoxSession {
    async fn load(&mut self, url: &str) -> Result<()> {
        with_timeout(
            format!("loading {}", url),
            self.command_timeout,
            self.driver.goto(url),
        )
        .await??;
        Ok(())
    }

    async fn navigation_timing(&mut self) -> Result<NavigationTiming> {
        let ret = with_timeout(
            "reading navigation timing",
            self.command_timeout,
            self.driver.execute(NAVIGATION_TIMING_SCRIPT, Vec::new()),
        )
        .await??;

        serde_json::from_value(ret.json().clone())
            .map_err(|e| ScanError::ParseError(format!("navigation timing: {}", e)))
    }

    async fn close(self) -> Result<()> {
        with_timeout("closing browser session", self.command_timeout, self.driver.quit()).await??;
        Ok(())
    }
}

/// Bound a browser command by `limit`, turning an elapsed deadline into
/// [`ScanError::Timeout`].
pub async fn with_timeout<F, T>(operation: impl Into<String>, limit: Duration, future: F) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| ScanError::timeout(operation, limit))
}
