pub mod convergence;

pub use convergence::{
    Condition, ConditionOutcome, ConvergenceCondition, ConvergenceTracker, MetadataChange,
    PollOutcome, Progress, SnapshotSource, TrackerSettings,
};
