use crate::browser::BrowserSession;
use crate::error::Result;
use crate::result::TimingResult;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// Load `url`, wait `settle` for in-flight resources and stream bookkeeping,
/// then derive timing intervals from the browser's navigation timing.
///
/// The session is consumed and closed on every path. Any failure while
/// loading or reading the timing is logged and yields `None`; there are no
/// partial results.
pub async fn measure<S: BrowserSession>(mut session: S, url: &str, settle: Duration) -> Option<TimingResult> {
    let outcome = measure_open(&mut session, url, settle).await;
    close_session(session, url).await;
    outcome
}

/// Like [`measure`] but leaves the session open, so its network streams
/// stay visible to the Tor controller. The caller closes it with
/// [`close_session`].
pub async fn measure_open<S: BrowserSession>(session: &mut S, url: &str, settle: Duration) -> Option<TimingResult> {
    match measure_inner(session, url, settle).await {
        Ok(timing) => Some(timing),
        Err(e) => {
            warn!("Error measuring {}: {}", url, e);
            None
        }
    }
}

/// Close a session, logging rather than returning any failure.
pub async fn close_session<S: BrowserSession>(session: S, url: &str) {
    if let Err(e) = session.close().await {
        warn!("Failed to close browser session after {}: {}", url, e);
    }
}

async fn measure_inner<S: BrowserSession>(session: &mut S, url: &str, settle: Duration) -> Result<TimingResult> {
    session.load(url).await?;
    tokio::time::sleep(settle).await;
    let navigation = session.navigation_timing().await?;
    debug!("Navigation timing for {}: {:?}", url, navigation);

    Ok(TimingResult::from_navigation(&navigation, is_https(url)))
}

/// Wall-clock time for the browser to return from loading `url`.
pub async fn measure_load_time<S: BrowserSession>(mut session: S, url: &str) -> Option<Duration> {
    let start = Instant::now();
    let outcome = session.load(url).await.map(|_| start.elapsed());
    close_session(session, url).await;

    match outcome {
        Ok(elapsed) => Some(elapsed),
        Err(e) => {
            warn!("Error loading {}: {}", url, e);
            None
        }
    }
}

fn is_https(url: &str) -> bool {
    Url::parse(url)
        .map(|u| u.scheme() == "https")
        .unwrap_or_else(|_| url.trim_start().to_lowercase().starts_with("https"))
}
