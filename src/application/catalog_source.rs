//! Catalog fetches from a server, with an optional pull job run first.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::remote::ResponseChecker;
use crate::domain::errors::HarnessResult;
use crate::domain::models::{CatalogSnapshot, Watermark};
use crate::domain::ports::CatalogServer;
use crate::services::convergence::SnapshotSource;

/// File the last fetched catalog bundle is kept in.
pub const CATALOG_BUNDLE_FILE: &str = "GetCatalog.zip";

/// A server-side job that pulls replicated data in before each fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullJob {
    pub method: String,
    pub params: Vec<(&'static str, String)>,
    /// Wait after the job before fetching.
    pub settle: Duration,
}

/// Snapshots of one server's current catalog.
pub struct ServerCatalogSource<'a> {
    server: &'a dyn CatalogServer,
    responses: &'a ResponseChecker,
    pull: Option<PullJob>,
}

impl<'a> ServerCatalogSource<'a> {
    pub fn new(server: &'a dyn CatalogServer, responses: &'a ResponseChecker) -> Self {
        Self {
            server,
            responses,
            pull: None,
        }
    }

    #[must_use]
    pub fn with_pull(mut self, pull: Option<PullJob>) -> Self {
        self.pull = pull;
        self
    }
}

#[async_trait]
impl SnapshotSource for ServerCatalogSource<'_> {
    async fn trigger(&mut self) -> HarnessResult<Option<Duration>> {
        let Some(pull) = &self.pull else {
            return Ok(None);
        };
        let params: Vec<(&str, String)> = pull
            .params
            .iter()
            .map(|(name, value)| (*name, value.clone()))
            .collect();
        self.responses
            .run_job(self.server, &pull.method, &params)
            .await?;
        info!(
            server = self.server.address(),
            method = %pull.method,
            settle_secs = pull.settle.as_secs(),
            "pull job started, waiting before fetching the catalog"
        );
        Ok(Some(pull.settle))
    }

    async fn fetch(&mut self, from: Watermark) -> HarnessResult<CatalogSnapshot> {
        let response = self.server.fetch_catalog(from).await?;
        let response = self.responses.require_success("GetCatalog", response).await?;
        self.responses.save(CATALOG_BUNDLE_FILE, &response.body).await?;
        let snapshot = CatalogSnapshot::from_bundle(&response.body, CatalogSnapshot::CATALOG_ENTRY)?;
        debug!(
            server = self.server.address(),
            from,
            entries = snapshot.len(),
            "catalog fetched"
        );
        Ok(snapshot)
    }
}
