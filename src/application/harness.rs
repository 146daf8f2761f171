//! Replication harness - the test operations against a primary/secondary pair
//!
//! Every operation either succeeds or returns a [`HarnessError`]; the
//! scenario runner decides about cleanup. Convergence checks all go through
//! [`ConvergenceTracker`] with a condition per use:
//!
//! | Operation                                | Condition                  |
//! |------------------------------------------|----------------------------|
//! | `track_replication`                      | presence by id and version |
//! | `track_changing_metadata`                | metadata updated           |
//! | `track_deletion`                         | absence by id and version  |
//! | `assure_stream_replication_is_disabled`  | single probe, presence     |

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, instrument, warn};

use super::catalog_source::{PullJob, ServerCatalogSource};
use super::remote::ResponseChecker;
use crate::domain::errors::{HarnessError, HarnessResult};
use crate::domain::models::{
    compare, Attributes, CatalogSnapshot, HarnessConfig, ObjectKey, ObjectLedger, ObjectMismatch,
    SessionState, Variant,
};
use crate::domain::ports::{CatalogServer, MetadataUpdate};
use crate::infrastructure::http::HttpCatalogServer;
use crate::infrastructure::progress::wait_with_progress;
use crate::infrastructure::{fixtures, wire};
use crate::services::convergence::{
    Condition, ConvergenceCondition, ConvergenceTracker, MetadataChange, PollOutcome,
    SnapshotSource, TrackerSettings,
};

const RUN_SCRIPT: &str = "admin.run_script";
const LIST_REPLICANTS: &str = "admin.get_list_db";
const START_REPLICATIONS: &str = "admin.start_replications";
const CLASSIFIER_VERSION: &str = "admin.md_classifier_version";
const ARCHIVE_BUNDLE_FILE: &str = "GetArchiveCatalog.zip";
const UPLOAD_ERROR_FILE: &str = "upload_object_error";
const CHANGE_METADATA_ERROR_FILE: &str = "change_metadata_error";
/// Catalog attribute holding `|`-separated tags.
const TAGS_ATTRIBUTE: &str = "c234";
/// Catalog attribute with the last modification stamp of an object.
const UPDATED_ATTRIBUTE: &str = "Updated";

/// One of the two servers under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Primary,
    Secondary,
}

impl Side {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

/// A server together with the session state kept for it.
struct Endpoint {
    server: Arc<dyn CatalogServer>,
    session: SessionState,
}

impl Endpoint {
    fn new(server: Arc<dyn CatalogServer>) -> Self {
        Self {
            server,
            session: SessionState::new(),
        }
    }

    fn address(&self) -> &str {
        self.server.address()
    }

    /// Fetch the catalog once, advancing the session cursor.
    async fn snapshot(&mut self, responses: &ResponseChecker) -> HarnessResult<CatalogSnapshot> {
        let mut source = ServerCatalogSource::new(self.server.as_ref(), responses);
        let snapshot = source.fetch(self.session.catalog_from()).await?;
        self.session.observe_watermark(snapshot.watermark());
        Ok(snapshot)
    }

    async fn delete(&self, responses: &ResponseChecker, key: &ObjectKey) -> HarnessResult<()> {
        let response = self.server.delete_object(key).await?;
        responses.require_success("DeleteObjects", response).await?;
        info!(server = self.address(), id = %key.id, version = key.version, "object deleted");
        Ok(())
    }
}

/// Per-run tracking parameters.
struct TrackRun<'c> {
    settings: TrackerSettings,
    pull: Option<PullJob>,
    cancel: Option<watch::Receiver<bool>>,
    condition: &'c Condition,
}

/// Drives uploads, replication triggers, convergence checks and cleanup
/// against a primary and a secondary server.
pub struct ReplicationHarness {
    config: HarnessConfig,
    primary: Endpoint,
    secondary: Endpoint,
    ledger: ObjectLedger,
    responses: ResponseChecker,
    /// Keys already deleted from the primary during the run.
    deleted: BTreeSet<ObjectKey>,
    waves: u32,
    show_progress: bool,
    cancel: Option<watch::Receiver<bool>>,
}

impl ReplicationHarness {
    pub fn new(
        config: HarnessConfig,
        primary: Arc<dyn CatalogServer>,
        secondary: Arc<dyn CatalogServer>,
    ) -> Self {
        let responses = ResponseChecker::new(config.results_dir.clone());
        Self {
            config,
            primary: Endpoint::new(primary),
            secondary: Endpoint::new(secondary),
            ledger: ObjectLedger::new(),
            responses,
            deleted: BTreeSet::new(),
            waves: 0,
            show_progress: false,
            cancel: None,
        }
    }

    /// Log in to both configured servers over HTTP.
    pub async fn connect(config: HarnessConfig) -> HarnessResult<Self> {
        let primary =
            HttpCatalogServer::connect(&config.primary_server, &config.login, &config.password)
                .await?;
        let secondary =
            HttpCatalogServer::connect(&config.secondary_server, &config.login, &config.password)
                .await?;
        Ok(Self::new(config, Arc::new(primary), Arc::new(secondary)))
    }

    /// Show fixed waits as a progress bar.
    #[must_use]
    pub const fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Let convergence tracking stop early once `cancel` turns `true`.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub const fn ledger(&self) -> &ObjectLedger {
        &self.ledger
    }

    /// Whether anything was uploaded during the run.
    pub fn has_uploads(&self) -> bool {
        self.ledger.has_uploads()
    }

    /// Sleep for a fixed time, showing progress if enabled.
    pub async fn pause(&self, duration: Duration, reason: &str) {
        info!(secs = duration.as_secs(), "{reason}");
        wait_with_progress(duration, reason, self.show_progress).await;
    }

    /// Check that both servers use the same metadata classifier and that no
    /// fixture object already exists on either of them.
    #[instrument(skip(self))]
    pub async fn precheck(&mut self) -> HarnessResult<()> {
        let primary = self.classifier_version(Side::Primary).await?;
        let secondary = self.classifier_version(Side::Secondary).await?;
        if primary != secondary {
            return Err(HarnessError::Precondition(format!(
                "metadata classifier versions differ: primary {primary}, secondary {secondary}"
            )));
        }

        let names = fixtures::names_in(&self.config.new_objects_dir).await?;
        let mut existing = Vec::new();
        for side in [Side::Primary, Side::Secondary] {
            let endpoint = match side {
                Side::Primary => &mut self.primary,
                Side::Secondary => &mut self.secondary,
            };
            let snapshot = endpoint.snapshot(&self.responses).await?;
            let found: Vec<&str> = names
                .iter()
                .filter(|(name, class)| snapshot.find_by_name(name, class).is_some())
                .map(|(name, _)| name.as_str())
                .collect();
            if !found.is_empty() {
                existing.push(format!("{}: {}", side.as_str(), found.join(", ")));
            }
        }
        if !existing.is_empty() {
            return Err(HarnessError::Precondition(format!(
                "objects to upload already exist on the servers ({})",
                existing.join("; ")
            )));
        }

        info!("precheck passed");
        Ok(())
    }

    /// Metadata classifier version of a server, cached per session.
    pub async fn classifier_version(&mut self, side: Side) -> HarnessResult<String> {
        let endpoint = match side {
            Side::Primary => &mut self.primary,
            Side::Secondary => &mut self.secondary,
        };
        if let Some(version) = endpoint.session.classifier_version() {
            return Ok(version.to_string());
        }
        let result = self
            .responses
            .run_job(endpoint.server.as_ref(), CLASSIFIER_VERSION, &[])
            .await?;
        let version = result.md_version().ok_or_else(|| {
            HarnessError::Parse(format!("{CLASSIFIER_VERSION} result has no md_version"))
        })?;
        endpoint.session.set_classifier_version(version.clone());
        Ok(version)
    }

    /// Archive the current upload cycle before uploading a new wave.
    pub fn begin_new_wave(&mut self) {
        self.ledger.archive_and_reset();
    }

    /// Upload every fixture pair in `dir` to the primary and record the
    /// uploads, then save the ledger to `uploaded_objects_<wave>.json`.
    #[instrument(skip(self, dir), fields(dir = %dir.display()))]
    pub async fn put_objects_from_directory(&mut self, dir: &Path) -> HarnessResult<Vec<ObjectKey>> {
        let pairs = fixtures::discover_pairs(dir).await?;
        let mut uploaded = Vec::with_capacity(pairs.len());
        for pair in &pairs {
            let (upload, metadata) = fixtures::load_pair(pair).await?;
            let response = self.primary.server.upload_object(&upload).await?;
            let response = self.responses.require_success("PutObject", response).await?;
            let key = match wire::parse_upload_response(&response.text()) {
                Ok(key) => key,
                Err(err) => {
                    let path = self.responses.save(UPLOAD_ERROR_FILE, &response.body).await?;
                    return Err(HarnessError::Parse(format!(
                        "{err} (response saved to {})",
                        path.display()
                    )));
                }
            };
            info!(name = %pair.stem(), id = %key.id, version = key.version, "object uploaded");
            self.ledger.record_upload(key.clone(), metadata.attributes)?;
            uploaded.push(key);
        }

        self.waves += 1;
        let export = serde_json::to_vec_pretty(&self.ledger.export())?;
        let path = self
            .responses
            .save(&format!("uploaded_objects_{}.json", self.waves), &export)
            .await?;
        info!(count = uploaded.len(), export = %path.display(), "uploads recorded");
        Ok(uploaded)
    }

    async fn run_script(&self, side: Side, script_id: u32) -> HarnessResult<()> {
        let endpoint = match side {
            Side::Primary => &self.primary,
            Side::Secondary => &self.secondary,
        };
        self.responses
            .run_job(
                endpoint.server.as_ref(),
                RUN_SCRIPT,
                &[("script_id", script_id.to_string())],
            )
            .await?;
        info!(server = endpoint.address(), script_id, "script started");
        Ok(())
    }

    /// Start the file offload job on the primary.
    pub async fn offload_files(&self) -> HarnessResult<()> {
        self.run_script(Side::Primary, self.config.scripts.offload_files)
            .await
    }

    /// Start the load-files-from-directory job on the secondary.
    pub async fn download_files(&self) -> HarnessResult<()> {
        self.run_script(Side::Secondary, self.config.scripts.download_files)
            .await
    }

    /// Start a correcting replication from the primary to the configured
    /// replicant.
    #[instrument(skip(self))]
    pub async fn run_correcting_replication(&self) -> HarnessResult<()> {
        let name = self.config.replicant_name.as_deref().ok_or_else(|| {
            HarnessError::Config("replicant_name is not configured".to_string())
        })?;

        let server = self.primary.server.as_ref();
        let replicants = self
            .responses
            .run_job(server, LIST_REPLICANTS, &[])
            .await?
            .replicants()?;
        let replicant = replicants
            .into_iter()
            .find(|r| r.username == name)
            .ok_or_else(|| HarnessError::Precondition(format!("no replicant named {name}")))?;

        self.responses
            .run_job(
                server,
                START_REPLICATIONS,
                &[
                    ("replicantId", wire::value_text(&replicant.replicant_id)),
                    ("replicantDB", replicant.username.clone()),
                    (
                        "replicationTimeOut",
                        self.config.replication_timeout_secs.to_string(),
                    ),
                    (
                        "replicationPeriod",
                        self.config.replication_period_secs.to_string(),
                    ),
                ],
            )
            .await?;
        info!(replicant = name, "correcting replication started");
        Ok(())
    }

    /// Edit the metadata of every object of the current cycle on the primary
    /// and expect the edit as a new revision.
    #[instrument(skip(self))]
    pub async fn change_metadata(&mut self) -> HarnessResult<()> {
        let classifier_version = self.classifier_version(Side::Primary).await?;
        let change = MetadataChange::from(&self.config.metadata_change);
        let snapshot = self.primary.snapshot(&self.responses).await?;

        for key in self.ledger.uploaded_keys() {
            let entry = snapshot.find(&key.id).ok_or_else(|| {
                HarnessError::Precondition(format!(
                    "object {} is not in the primary catalog",
                    key.id
                ))
            })?;
            let updated = entry
                .attribute(UPDATED_ATTRIBUTE)
                .and_then(|raw| raw.parse::<f64>().ok())
                .ok_or_else(|| {
                    HarnessError::Parse(format!("object {} has no valid {UPDATED_ATTRIBUTE}", key.id))
                })?;

            let mut metadata: Attributes = entry
                .attributes
                .iter()
                .filter(|(name, _)| name.starts_with('c'))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            let changes = change.changes_for(&metadata);
            metadata.extend(changes.clone());
            let tags: Vec<String> = metadata
                .get(TAGS_ATTRIBUTE)
                .map(|tags| {
                    tags.normalized()
                        .split('|')
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            let update = MetadataUpdate {
                object_id: key.id.clone(),
                updated,
                classifier_version: classifier_version.clone(),
                metadata,
                tags,
            };
            let response = self.primary.server.set_metadata(&update).await?;
            let response = self
                .responses
                .require_success("set_chart_metadata", response)
                .await?;
            let status = match wire::parse_xmlrpc_status(&response.text()) {
                Ok(status) => status,
                Err(err) => {
                    let path = self
                        .responses
                        .save(CHANGE_METADATA_ERROR_FILE, &response.body)
                        .await?;
                    return Err(HarnessError::Parse(format!(
                        "{err} (response saved to {})",
                        path.display()
                    )));
                }
            };
            if !status.success {
                return Err(HarnessError::RemoteRejected {
                    operation: "set_chart_metadata".to_string(),
                    message: status.message.unwrap_or_default(),
                });
            }

            self.ledger.expect_revision(&key, &changes)?;
            info!(id = %key.id, "metadata changed");
        }
        Ok(())
    }

    /// Pull job run on the secondary before each poll, for the gateway
    /// variant.
    fn pull_job(&self) -> Option<PullJob> {
        match self.config.variant {
            Variant::Gateway => Some(PullJob {
                method: RUN_SCRIPT.to_string(),
                params: vec![(
                    "script_id",
                    self.config.scripts.download_files.to_string(),
                )],
                settle: self.config.download_files_timeout(),
            }),
            Variant::CorrectingReplication => None,
        }
    }

    fn track_run<'c>(&self, condition: &'c Condition, waited: Duration) -> TrackRun<'c> {
        TrackRun {
            settings: TrackerSettings::new(self.config.max_timeout(), self.config.period())
                .with_elapsed_offset(waited),
            pull: self.pull_job(),
            cancel: self.cancel.clone(),
            condition,
        }
    }

    /// Wait until every object of the current cycle appears on the secondary
    /// with its version, then compare attributes.
    ///
    /// `waited` is the time already spent waiting since replication was
    /// triggered.
    #[instrument(skip(self))]
    pub async fn track_replication(&mut self, waited: Duration) -> HarnessResult<()> {
        let condition = Condition::PresenceByIdAndVersion;
        let run = self.track_run(&condition, waited);
        let result = track_on(&mut self.secondary, &self.responses, &mut self.ledger, run).await;
        if matches!(result, Err(HarnessError::TimedOut { .. }))
            && self.ledger.converged_keys().is_empty()
        {
            warn!(
                server = self.config.primary_server.as_str(),
                "nothing replicated; the data bank account may lack permissions"
            );
        }
        result?;
        info!("all objects replicated");
        self.verify_converged()
    }

    /// Wait until the metadata edit shows on the secondary for every object
    /// of the current cycle, then compare attributes.
    #[instrument(skip(self))]
    pub async fn track_changing_metadata(&mut self, waited: Duration) -> HarnessResult<()> {
        let condition = Condition::MetadataUpdated(MetadataChange::from(&self.config.metadata_change));
        let run = self.track_run(&condition, waited);
        self.ledger.restart_tracking();
        track_on(&mut self.secondary, &self.responses, &mut self.ledger, run).await?;
        info!("metadata of all objects replicated");
        self.verify_converged()
    }

    /// Wait until every version uploaded during the run is gone from the
    /// secondary.
    #[instrument(skip(self))]
    pub async fn track_deletion(&mut self, waited: Duration) -> HarnessResult<()> {
        let condition = Condition::AbsenceByIdAndVersion;
        let run = self.track_run(&condition, waited);
        let mut deletions = ObjectLedger::tracking(self.ledger.all_keys_ever());
        track_on(&mut self.secondary, &self.responses, &mut deletions, run).await?;
        info!("all deletions replicated");
        Ok(())
    }

    /// Fail if any object of the current cycle already reached the secondary
    /// without a replication having been started.
    ///
    /// This is a single fetch by design: it runs after a fixed wait, and any
    /// object found means stream replication is on.
    #[instrument(skip(self))]
    pub async fn assure_stream_replication_is_disabled(&mut self) -> HarnessResult<()> {
        let settings = TrackerSettings::new(self.config.max_timeout(), self.config.period());
        let mut source = ServerCatalogSource::new(self.secondary.server.as_ref(), &self.responses);
        let replicated = ConvergenceTracker::new(settings, &mut self.secondary.session)
            .probe(&self.ledger, &mut source, &Condition::PresenceByIdAndVersion)
            .await?;
        if !replicated.is_empty() {
            return Err(HarnessError::StreamReplicationActive(replicated));
        }
        info!("stream replication is disabled");
        Ok(())
    }

    /// Compare expected and observed attributes of every converged object.
    fn verify_converged(&self) -> HarnessResult<()> {
        let mismatches: Vec<ObjectMismatch> = self
            .ledger
            .uploaded_keys()
            .into_iter()
            .filter_map(|key| {
                let expected = self.ledger.expected(&key)?;
                let observed = self.ledger.observed(&key)?;
                let mismatches = compare(expected, observed);
                (!mismatches.is_empty()).then_some(ObjectMismatch { key, mismatches })
            })
            .collect();

        if mismatches.is_empty() {
            info!("uploaded and replicated metadata match");
            Ok(())
        } else {
            for mismatch in &mismatches {
                warn!(%mismatch, "attribute mismatch");
            }
            Err(HarnessError::Mismatch(mismatches))
        }
    }

    /// Delete every version uploaded during the run from the primary. After
    /// an error, also delete every object that reached the secondary.
    ///
    /// Secondary deletions are best effort: an object may already be gone
    /// when the error hit during the deletion stage.
    #[instrument(skip(self))]
    pub async fn delete_uploaded_objects(&mut self, after_error: bool) -> HarnessResult<usize> {
        let keys: Vec<ObjectKey> = self
            .ledger
            .all_keys_ever()
            .into_iter()
            .filter(|key| !self.deleted.contains(key))
            .collect();

        let mut deleted = 0;
        if !keys.is_empty() {
            info!(server = self.primary.address(), count = keys.len(), "deleting uploaded objects");
            for key in keys {
                self.primary.delete(&self.responses, &key).await?;
                self.deleted.insert(key);
                deleted += 1;
            }
        }

        if after_error {
            let replicated = self.ledger.all_converged_keys();
            if !replicated.is_empty() {
                info!(
                    server = self.secondary.address(),
                    count = replicated.len(),
                    "deleting replicated objects"
                );
                for key in &replicated {
                    match self.secondary.delete(&self.responses, key).await {
                        Ok(()) => deleted += 1,
                        Err(e) => warn!(
                            server = self.secondary.address(),
                            id = %key.id,
                            version = key.version,
                            error = %e,
                            "replicated object not deleted"
                        ),
                    }
                }
            }
        }
        Ok(deleted)
    }

    /// Delete every version of each fixture object, found by name and class,
    /// from both servers. Used to clean up after an interrupted run.
    #[instrument(skip(self))]
    pub async fn delete_objects_by_names(&mut self) -> HarnessResult<usize> {
        let names = fixtures::names_in(&self.config.new_objects_dir).await?;
        let mut deleted = 0;
        for side in [Side::Primary, Side::Secondary] {
            let endpoint = match side {
                Side::Primary => &mut self.primary,
                Side::Secondary => &mut self.secondary,
            };
            let snapshot = endpoint.snapshot(&self.responses).await?;
            for (name, class) in &names {
                let Some(latest) = snapshot.find_by_name(name, class) else {
                    continue;
                };

                let response = endpoint.server.fetch_archive_catalog(&latest.key.id).await?;
                let response = self
                    .responses
                    .require_success("GetArchiveCatalog", response)
                    .await?;
                self.responses.save(ARCHIVE_BUNDLE_FILE, &response.body).await?;
                let archive =
                    CatalogSnapshot::from_bundle(&response.body, CatalogSnapshot::ARCHIVE_ENTRY)?;

                for version in archive.entries() {
                    if version.name.as_deref() != Some(name.as_str())
                        || version.class.as_deref() != Some(class.as_str())
                        || version.key.id != latest.key.id
                    {
                        return Err(HarnessError::Precondition(format!(
                            "archive catalog of {name} disagrees on Name, Class or ID"
                        )));
                    }
                    endpoint.delete(&self.responses, &version.key).await?;
                    deleted += 1;
                }
                endpoint.delete(&self.responses, &latest.key).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

/// Run one convergence check against `target` and turn the outcome into a
/// result.
async fn track_on(
    target: &mut Endpoint,
    responses: &ResponseChecker,
    ledger: &mut ObjectLedger,
    run: TrackRun<'_>,
) -> HarnessResult<()> {
    let describe = run.condition.describe();
    let mut source = ServerCatalogSource::new(target.server.as_ref(), responses).with_pull(run.pull);
    let mut tracker = ConvergenceTracker::new(run.settings, &mut target.session);
    if let Some(cancel) = run.cancel {
        tracker = tracker.with_cancellation(cancel);
    }

    let outcome = tracker
        .run(ledger, &mut source, run.condition, |progress| {
            info!(
                id = %progress.key.id,
                version = progress.key.version,
                elapsed_secs = progress.elapsed.as_secs(),
                pending = progress.remaining,
                "converged ({describe})"
            );
        })
        .await?;

    match outcome {
        PollOutcome::Converged { fetches } => {
            info!(fetches, "{describe}: all keys converged");
            Ok(())
        }
        PollOutcome::TimedOut { pending, .. } => Err(HarnessError::TimedOut {
            condition: describe,
            pending,
            timeout: run.settings.max_timeout,
        }),
        PollOutcome::Cancelled { pending, .. } => Err(HarnessError::Cancelled { pending }),
    }
}
