use std::time::Duration;

use async_trait::async_trait;

use crate::domain::errors::HarnessResult;
use crate::domain::models::{CatalogSnapshot, Watermark};

/// Where the tracker gets catalog snapshots from.
#[async_trait]
pub trait SnapshotSource: Send {
    /// Run the side-effecting pull step that must precede a fetch, if this
    /// source has one (e.g. an ingest job on the target server).
    ///
    /// Returns the delay to wait before fetching, or `None` when nothing was
    /// triggered.
    async fn trigger(&mut self) -> HarnessResult<Option<Duration>> {
        Ok(None)
    }

    /// Fetch a fresh snapshot, incremental from `from`.
    ///
    /// A non-success response from the server must be returned as
    /// [`HarnessError::Infrastructure`](crate::domain::HarnessError::Infrastructure).
    async fn fetch(&mut self, from: Watermark) -> HarnessResult<CatalogSnapshot>;
}
