//! Convergence tracking
//!
//! Polls a catalog source until every pending key of a ledger satisfies a
//! [`ConvergenceCondition`], re-arming the timeout each time a key converges.

pub mod condition;
pub mod source;
pub mod tracker;

pub use condition::{Condition, ConditionOutcome, ConvergenceCondition, MetadataChange};
pub use source::SnapshotSource;
pub use tracker::{ConvergenceTracker, PollOutcome, Progress, TrackerSettings};
