//! Replication harness - end-to-end replication tests for catalog servers
//!
//! The harness uploads fixture objects to a primary server, triggers
//! replication, and polls the secondary server's catalog until every object
//! shows up (or is gone again), reporting anything that does not converge.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): object keys, the upload ledger, catalog
//!   snapshots, attribute comparison and the server port
//! - **Service Layer** (`services`): the convergence tracker and its
//!   conditions
//! - **Application Layer** (`application`): harness operations and scenarios
//! - **Infrastructure Layer** (`infrastructure`): HTTP client, wire formats,
//!   fixtures, configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use replication_harness::{run_scenario, ConfigLoader, ReplicationHarness};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     let mut harness = ReplicationHarness::connect(config).await?;
//!     let report = run_scenario(&mut harness).await?;
//!     println!("passed in {}s", report.duration.as_secs());
//!     Ok(())
//! }
//! ```

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{run_scenario, ReplicationHarness, RunReport, Side};
pub use domain::models::{
    AttributeValue, Attributes, CatalogEntry, CatalogSnapshot, HarnessConfig, LoggingConfig,
    ObjectKey, ObjectLedger, SessionState, Variant, Watermark,
};
pub use domain::ports::CatalogServer;
pub use domain::{HarnessError, HarnessResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    Condition, ConditionOutcome, ConvergenceCondition, ConvergenceTracker, PollOutcome,
    SnapshotSource, TrackerSettings,
};
