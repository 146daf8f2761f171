pub mod catalog_source;
pub mod harness;
pub mod remote;
pub mod scenario;

pub use catalog_source::{PullJob, ServerCatalogSource, CATALOG_BUNDLE_FILE};
pub use harness::{ReplicationHarness, Side};
pub use remote::{ResponseChecker, LAST_ERROR_RESPONSE};
pub use scenario::{run_scenario, RunReport, Stage, StageReport};
