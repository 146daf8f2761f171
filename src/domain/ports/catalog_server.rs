use async_trait::async_trait;

use crate::domain::errors::HarnessResult;
use crate::domain::models::{Attributes, ObjectKey, Watermark};

/// Raw outcome of a remote call.
///
/// Non-success statuses are data, not errors: callers decide how to report
/// them. Transport failures (connection refused, timeouts) are returned as
/// `Err` by the [`CatalogServer`] methods instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResponse {
    pub status: u16,
    /// Reason phrase for the status, if any.
    pub reason: String,
    pub body: Vec<u8>,
}

impl RemoteResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            reason: "OK".to_string(),
            body: body.into(),
        }
    }

    pub fn with_status(status: u16, reason: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            reason: reason.into(),
            body: body.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.status == 200
    }

    /// Body as text, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// An object to upload: a zip archive plus its metadata document.
#[derive(Debug, Clone)]
pub struct ObjectUpload {
    /// File name sent with the archive part.
    pub file_name: String,
    pub archive: Vec<u8>,
    pub metadata_document: String,
}

/// A metadata edit of one object.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataUpdate {
    pub object_id: String,
    /// `Updated` stamp of the object as last seen in the catalog.
    pub updated: f64,
    pub classifier_version: String,
    pub metadata: Attributes,
    pub tags: Vec<String>,
}

/// Operations the harness needs from a catalog server.
///
/// One implementation talks HTTP to a real server; tests substitute an
/// in-memory double.
#[async_trait]
pub trait CatalogServer: Send + Sync {
    /// Human-readable server address, for logs.
    fn address(&self) -> &str;

    /// Current catalog, incremental from `from` (0 for a full catalog).
    /// The body is a zip bundle holding one catalog document.
    async fn fetch_catalog(&self, from: Watermark) -> HarnessResult<RemoteResponse>;

    /// Archived versions of one object, as a zip bundle.
    async fn fetch_archive_catalog(&self, id: &str) -> HarnessResult<RemoteResponse>;

    /// Run a named admin method. The body carries `success` and `msg` fields.
    async fn run_remote_job(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> HarnessResult<RemoteResponse>;

    async fn delete_object(&self, key: &ObjectKey) -> HarnessResult<RemoteResponse>;

    /// Upload a new object or a new version of an existing one.
    async fn upload_object(&self, upload: &ObjectUpload) -> HarnessResult<RemoteResponse>;

    /// Replace an object's metadata.
    async fn set_metadata(&self, update: &MetadataUpdate) -> HarnessResult<RemoteResponse>;
}
