//! Implementation of the `replication-harness cleanup` command.

use anyhow::Result;
use serde::Serialize;

use crate::application::ReplicationHarness;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::HarnessConfig;

#[derive(Debug, Serialize)]
pub struct CleanupOutput {
    pub success: bool,
    pub primary_server: String,
    pub secondary_server: String,
    pub deleted: usize,
}

impl CommandOutput for CleanupOutput {
    fn to_human(&self) -> String {
        if self.deleted == 0 {
            format!(
                "No fixture objects found on {} or {}",
                self.primary_server, self.secondary_server
            )
        } else {
            format!(
                "Deleted {} object version(s) from {} and {}",
                self.deleted, self.primary_server, self.secondary_server
            )
        }
    }
}

pub async fn execute(config: HarnessConfig, json_mode: bool) -> Result<()> {
    let primary_server = config.primary_server.clone();
    let secondary_server = config.secondary_server.clone();

    let mut harness = ReplicationHarness::connect(config).await?;
    let deleted = harness.delete_objects_by_names().await?;

    output(
        &CleanupOutput {
            success: true,
            primary_server,
            secondary_server,
            deleted,
        },
        json_mode,
    );
    Ok(())
}
