// Defaults shared by the CLI and the batch drivers

use std::time::Duration;

pub use onionbench_scanner::browser::{DEFAULT_SOCKS_PORT, DEFAULT_WEBDRIVER_URL};
pub use onionbench_scanner::control::DEFAULT_CONTROL_PORT;
pub use onionbench_scanner::geo::DEFAULT_GEO_URL;

pub const DEFAULT_RUNS: usize = 5;
pub const DEFAULT_RUN_DELAY: Duration = Duration::from_secs(600);

/// Settle delay after a page load when relays are annotated; streams need
/// time to show up on the control port.
pub const DEFAULT_RELAY_SETTLE: Duration = Duration::from_secs(5);
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(2);

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_GEO_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_GEO_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_LOG_FILE: &str = "onionbench.log";
