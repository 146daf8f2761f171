//! Implementation of the `replication-harness run` command.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tokio::sync::watch;
use tracing::warn;

use crate::application::{run_scenario, ReplicationHarness, RunReport};
use crate::cli::output::{format_secs, output, stage_table, CommandOutput};
use crate::domain::models::HarnessConfig;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Do not draw progress bars during fixed waits
    #[arg(long)]
    pub no_progress: bool,

    /// Keep uploaded objects on the servers when the run fails
    #[arg(long)]
    pub keep_objects: bool,
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub success: bool,
    #[serde(flatten)]
    pub report: RunReport,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        format!(
            "Replication test passed ({}) in {}\n{}",
            self.report.variant.as_str(),
            format_secs(self.report.duration.as_secs()),
            stage_table(&self.report)
        )
    }
}

pub async fn execute(args: RunArgs, mut config: HarnessConfig, json_mode: bool) -> Result<()> {
    if args.keep_objects {
        config.delete_objects_on_error = false;
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping at the next poll");
            let _ = cancel_tx.send(true);
        }
    });

    let mut harness = ReplicationHarness::connect(config)
        .await?
        .with_progress(!args.no_progress && !json_mode)
        .with_cancellation(cancel_rx);
    let report = run_scenario(&mut harness).await?;

    output(
        &RunOutput {
            success: true,
            report,
        },
        json_mode,
    );
    Ok(())
}
