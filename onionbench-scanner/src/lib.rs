pub mod browser;
pub mod control;
pub mod error;
pub mod geo;
pub mod harness;
pub mod probe;
pub mod result;

pub use browser::{BrowserSession, FirefoxFactory, ProxyMode, SessionFactory};
pub use control::TorController;
pub use error::ScanError;
pub use geo::{GeoFormat, GeoLocator};
pub use probe::OnionProbe;
pub use result::{NavigationTiming, TimingResult};
