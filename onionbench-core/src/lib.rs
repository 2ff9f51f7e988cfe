pub mod batch;
pub mod config;
pub mod correlate;
pub mod country;
pub mod error;
pub mod fill;
pub mod probe;
pub mod relay;
pub mod summary;
pub mod table;

pub use batch::{BatchOptions, BatchSummary, execute_batch};
pub use correlate::CircuitSource;
pub use country::{CountryMap, CountryResolver};
pub use error::CoreError;
pub use fill::{FillOptions, FillSummary, execute_fill};
pub use probe::{ProbeOptions, ProbeSummary, execute_probe};
pub use relay::{Country, RelayRecord};
pub use summary::execute_summary;
pub use table::{ComparisonRow, ComparisonWriter, DomainPair, Variant};
