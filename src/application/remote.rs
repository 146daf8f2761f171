//! Status checks and result files shared by every remote call.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, error};

use crate::domain::errors::{HarnessError, HarnessResult};
use crate::domain::ports::{CatalogServer, RemoteResponse};
use crate::infrastructure::wire::{self, JobResult};

/// File an unparsable error body is saved to.
pub const LAST_ERROR_RESPONSE: &str = "last_error_response";

/// Turns raw remote responses into results, keeping evidence of failures in
/// the results directory.
#[derive(Debug, Clone)]
pub struct ResponseChecker {
    results_dir: PathBuf,
}

impl ResponseChecker {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Write `bytes` to `file_name` inside the results directory, creating
    /// the directory if needed.
    pub async fn save(&self, file_name: &str, bytes: &[u8]) -> HarnessResult<PathBuf> {
        fs::create_dir_all(&self.results_dir).await?;
        let path = self.results_dir.join(file_name);
        fs::write(&path, bytes).await?;
        debug!(path = %path.display(), "result file written");
        Ok(path)
    }

    /// Pass a success response through; anything else becomes an
    /// infrastructure failure carrying a summary of the error body.
    pub async fn require_success(
        &self,
        operation: &str,
        response: RemoteResponse,
    ) -> HarnessResult<RemoteResponse> {
        if response.is_success() {
            return Ok(response);
        }

        let summary = wire::summarize_error(&response);
        let mut message = summary.message;
        if !summary.parsed {
            let path = self.save(LAST_ERROR_RESPONSE, &response.body).await?;
            message.push_str(&format!(", saved to {}", path.display()));
        }
        error!(operation, status = response.status, %message, "remote call failed");
        Err(HarnessError::infrastructure(
            operation,
            Some(response.status),
            message,
        ))
    }

    /// Run an admin RPC method and require `success: true` in its result.
    pub async fn run_job(
        &self,
        server: &dyn CatalogServer,
        method: &str,
        params: &[(&str, String)],
    ) -> HarnessResult<JobResult> {
        let response = server.run_remote_job(method, params).await?;
        let response = self.require_success(method, response).await?;
        let result = JobResult::parse(&response.body)?;
        if !result.success {
            return Err(HarnessError::RemoteRejected {
                operation: method.to_string(),
                message: result.message(),
            });
        }
        Ok(result)
    }
}
