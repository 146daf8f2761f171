//! Domain errors for the replication harness.

use std::time::Duration;

use thiserror::Error;

use super::models::comparator::ObjectMismatch;
use super::models::object::ObjectKey;

/// Format a key list as `(id, version), (id, version)`.
fn format_keys(keys: &[ObjectKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_mismatches(mismatches: &[ObjectMismatch]) -> String {
    mismatches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised while driving a replication test run.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Catalog parse error: {0}")]
    Parse(String),

    #[error("{operation} failed{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Infrastructure {
        operation: String,
        status: Option<u16>,
        message: String,
    },

    #[error("{condition}: no progress for {}s, still pending: {}", .timeout.as_secs(), format_keys(.pending))]
    TimedOut {
        condition: String,
        pending: Vec<ObjectKey>,
        timeout: Duration,
    },

    #[error("Key {0} is not pending")]
    UnknownKey(ObjectKey),

    #[error("Object {0} was already uploaded in this cycle")]
    DuplicateUpload(ObjectKey),

    #[error("Attribute mismatch: {}", format_mismatches(.0))]
    Mismatch(Vec<ObjectMismatch>),

    #[error("Condition violated for {key}: {reason}")]
    ConditionViolated { key: ObjectKey, reason: String },

    #[error("Stream replication is not disabled, already replicated: {}", format_keys(.0))]
    StreamReplicationActive(Vec<ObjectKey>),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("{operation} rejected by server: {message}")]
    RemoteRejected { operation: String, message: String },

    #[error("Tracking cancelled with {} key(s) pending", .pending.len())]
    Cancelled { pending: Vec<ObjectKey> },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl HarnessError {
    /// Build an infrastructure failure for a remote call.
    pub fn infrastructure(
        operation: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self::Infrastructure {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    /// Whether this error is a failure of the servers under test rather than
    /// a crash of the harness itself.
    pub const fn is_test_failure(&self) -> bool {
        matches!(
            self,
            Self::TimedOut { .. }
                | Self::Mismatch(_)
                | Self::ConditionViolated { .. }
                | Self::StreamReplicationActive(_)
                | Self::Precondition(_)
                | Self::RemoteRejected { .. }
        )
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<roxmltree::Error> for HarnessError {
    fn from(err: roxmltree::Error) -> Self {
        Self::Parse(format!("malformed markup: {err}"))
    }
}

impl From<zip::result::ZipError> for HarnessError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Parse(format!("malformed catalog bundle: {err}"))
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
