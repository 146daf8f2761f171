//! End-to-end scenarios per replication variant, with cleanup on failure.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::harness::ReplicationHarness;
use crate::domain::errors::HarnessResult;
use crate::domain::models::Variant;

/// A step of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Precheck,
    NewObjects,
    NewVersions,
    MetadataChange,
    Deletion,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Precheck => "precheck",
            Self::NewObjects => "new objects",
            Self::NewVersions => "new versions",
            Self::MetadataChange => "metadata change",
            Self::Deletion => "deletion",
        }
    }
}

/// A completed stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub duration_secs: u64,
    /// Objects uploaded or deleted by the stage.
    pub objects: usize,
}

/// Summary of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub variant: Variant,
    pub started_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,
    pub stages: Vec<StageReport>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_secs<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_secs())
}

struct StageClock {
    stage: Stage,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl RunReport {
    fn new(variant: Variant) -> Self {
        Self {
            variant,
            started_at: Utc::now(),
            duration: Duration::ZERO,
            stages: Vec::new(),
        }
    }

    fn begin(stage: Stage) -> StageClock {
        info!(stage = stage.as_str(), "stage started");
        StageClock {
            stage,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    fn complete(&mut self, clock: StageClock, objects: usize) {
        let elapsed = clock.started.elapsed();
        info!(stage = clock.stage.as_str(), secs = elapsed.as_secs(), "stage passed");
        self.stages.push(StageReport {
            stage: clock.stage,
            started_at: clock.started_at,
            duration_secs: elapsed.as_secs(),
            objects,
        });
    }
}

/// Run the scenario of the configured variant.
///
/// On failure, objects uploaded so far are deleted when
/// `delete_objects_on_error` is set; errors during that cleanup are logged
/// and the original error is returned.
pub async fn run_scenario(harness: &mut ReplicationHarness) -> HarnessResult<RunReport> {
    let variant = harness.config().variant;
    let started = Instant::now();
    let mut report = RunReport::new(variant);
    info!(variant = variant.as_str(), "replication test started");

    let result = match variant {
        Variant::Gateway => gateway(harness, &mut report).await,
        Variant::CorrectingReplication => correcting_replication(harness, &mut report).await,
    };

    match result {
        Ok(()) => {
            report.duration = started.elapsed();
            info!(secs = report.duration.as_secs(), "replication test passed");
            Ok(report)
        }
        Err(err) => {
            error!(error = %err, "replication test failed");
            cleanup_after_error(harness).await;
            Err(err)
        }
    }
}

async fn cleanup_after_error(harness: &mut ReplicationHarness) {
    if !harness.has_uploads() {
        return;
    }
    if !harness.config().delete_objects_on_error {
        warn!("uploaded objects are kept because delete_objects_on_error is off");
        return;
    }
    info!("deleting uploaded objects");
    match harness.delete_uploaded_objects(true).await {
        Ok(count) => info!(count, "cleanup finished"),
        Err(cleanup_err) => error!(error = %cleanup_err, "cleanup failed"),
    }
}

async fn precheck(harness: &mut ReplicationHarness, report: &mut RunReport) -> HarnessResult<()> {
    let clock = RunReport::begin(Stage::Precheck);
    harness.precheck().await?;
    report.complete(clock, 0);
    Ok(())
}

/// Offload on the primary, wait for the gateway, then track.
async fn through_gateway(harness: &mut ReplicationHarness) -> HarnessResult<Duration> {
    harness.offload_files().await?;
    let first = harness.config().first_timeout();
    harness
        .pause(first, "waiting for objects to pass the gateway")
        .await;
    Ok(first)
}

async fn gateway(harness: &mut ReplicationHarness, report: &mut RunReport) -> HarnessResult<()> {
    precheck(harness, report).await?;

    let clock = RunReport::begin(Stage::NewObjects);
    let dir = harness.config().new_objects_dir.clone();
    let uploaded = harness.put_objects_from_directory(&dir).await?;
    let waited = through_gateway(harness).await?;
    harness.track_replication(waited).await?;
    report.complete(clock, uploaded.len());

    let clock = RunReport::begin(Stage::NewVersions);
    harness.begin_new_wave();
    let dir = harness.config().new_versions_dir.clone();
    let uploaded = harness.put_objects_from_directory(&dir).await?;
    let waited = through_gateway(harness).await?;
    harness.track_replication(waited).await?;
    report.complete(clock, uploaded.len());

    let clock = RunReport::begin(Stage::MetadataChange);
    harness.change_metadata().await?;
    let waited = through_gateway(harness).await?;
    harness.track_changing_metadata(waited).await?;
    report.complete(clock, harness.ledger().uploaded_keys().len());

    let clock = RunReport::begin(Stage::Deletion);
    let deleted = harness.delete_uploaded_objects(false).await?;
    let waited = through_gateway(harness).await?;
    harness.track_deletion(waited).await?;
    report.complete(clock, deleted);

    Ok(())
}

/// Start a correcting replication, wait, then track.
async fn correct(harness: &mut ReplicationHarness) -> HarnessResult<()> {
    harness.run_correcting_replication().await?;
    let first = harness.config().first_timeout();
    harness.pause(first, "waiting for the replication").await;
    harness.track_replication(first).await
}

async fn correcting_replication(
    harness: &mut ReplicationHarness,
    report: &mut RunReport,
) -> HarnessResult<()> {
    precheck(harness, report).await?;

    let clock = RunReport::begin(Stage::NewObjects);
    let dir = harness.config().new_objects_dir.clone();
    let uploaded = harness.put_objects_from_directory(&dir).await?;
    let assure = harness.config().assure_timeout();
    harness
        .pause(assure, "waiting before checking that stream replication is off")
        .await;
    harness.assure_stream_replication_is_disabled().await?;
    correct(harness).await?;
    report.complete(clock, uploaded.len());

    let clock = RunReport::begin(Stage::NewVersions);
    harness.begin_new_wave();
    let dir = harness.config().new_versions_dir.clone();
    let uploaded = harness.put_objects_from_directory(&dir).await?;
    correct(harness).await?;
    report.complete(clock, uploaded.len());

    Ok(())
}
