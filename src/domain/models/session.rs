//! Per-server mutable state that outlives a single request.

use super::snapshot::Watermark;

/// State carried across catalog fetches against one server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    catalog_from: Watermark,
    classifier_version: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor to send as "from" with the next catalog request.
    pub const fn catalog_from(&self) -> Watermark {
        self.catalog_from
    }

    /// Record a watermark returned by the server.
    ///
    /// Only the first non-zero value is kept. Advancing the cursor later would
    /// let the server omit records the run has not observed yet. Returns
    /// whether the cursor changed.
    pub fn observe_watermark(&mut self, watermark: Watermark) -> bool {
        if self.catalog_from == 0 && watermark != 0 {
            self.catalog_from = watermark;
            return true;
        }
        false
    }

    /// Cached metadata classifier version, if already queried.
    pub fn classifier_version(&self) -> Option<&str> {
        self.classifier_version.as_deref()
    }

    pub fn set_classifier_version(&mut self, version: impl Into<String>) {
        self.classifier_version = Some(version.into());
    }
}
