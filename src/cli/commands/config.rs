//! Implementation of the `replication-harness config` command.

use anyhow::Result;
use serde::Serialize;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::HarnessConfig;

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct ConfigOutput {
    pub config: HarnessConfig,
}

impl CommandOutput for ConfigOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.config).unwrap_or_default()
    }
}

pub fn execute(config: &HarnessConfig, json_mode: bool) -> Result<()> {
    output(
        &ConfigOutput {
            config: config.redacted(),
        },
        json_mode,
    );
    Ok(())
}
