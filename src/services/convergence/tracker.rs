//! Convergence tracker - polls a catalog until pending keys converge
//!
//! One run moves through `Polling` into one of three terminal states:
//!
//! - **Converged**: every pending key satisfied the condition
//! - **TimedOut**: the budget ran out with keys still pending
//! - **Failed**: a fetch failed; returned as `Err` without further retries
//!
//! The budget measures time since the last observed progress, not total
//! elapsed time. Any key converging re-arms it to the full `max_timeout`.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use super::condition::{ConditionOutcome, ConvergenceCondition};
use super::source::SnapshotSource;
use crate::domain::errors::{HarnessError, HarnessResult};
use crate::domain::models::{Attributes, CatalogSnapshot, ObjectKey, ObjectLedger, SessionState};

/// Timing parameters of a tracking run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSettings {
    /// Budget without progress before giving up.
    pub max_timeout: Duration,
    /// Delay between polls.
    pub retry_period: Duration,
    /// Time already spent waiting before the run started, added to the
    /// elapsed time reported for each converged key.
    pub elapsed_offset: Duration,
}

impl TrackerSettings {
    pub const fn new(max_timeout: Duration, retry_period: Duration) -> Self {
        Self {
            max_timeout,
            retry_period,
            elapsed_offset: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn with_elapsed_offset(mut self, offset: Duration) -> Self {
        self.elapsed_offset = offset;
        self
    }
}

/// Terminal outcome of a tracking run that did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PollOutcome {
    Converged { fetches: u32 },
    TimedOut { pending: Vec<ObjectKey>, fetches: u32 },
    Cancelled { pending: Vec<ObjectKey>, fetches: u32 },
}

impl PollOutcome {
    pub const fn is_converged(&self) -> bool {
        matches!(self, Self::Converged { .. })
    }

    pub const fn fetches(&self) -> u32 {
        match self {
            Self::Converged { fetches }
            | Self::TimedOut { fetches, .. }
            | Self::Cancelled { fetches, .. } => *fetches,
        }
    }
}

/// Reported to the progress callback each time a key converges.
#[derive(Debug)]
pub struct Progress<'a> {
    pub key: &'a ObjectKey,
    pub observed: &'a Attributes,
    /// Time since the triggering action, including the elapsed offset.
    pub elapsed: Duration,
    /// Keys still pending after this one.
    pub remaining: usize,
}

/// Polling state machine shared by every convergence check.
///
/// The tracker borrows the session state of the server it polls, so that the
/// incremental-fetch cursor persists across runs against that server.
pub struct ConvergenceTracker<'s> {
    settings: TrackerSettings,
    session: &'s mut SessionState,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'s> ConvergenceTracker<'s> {
    pub fn new(settings: TrackerSettings, session: &'s mut SessionState) -> Self {
        Self {
            settings,
            session,
            cancel: None,
        }
    }

    /// Stop at the next loop boundary once `cancel` turns `true`. A sleep in
    /// progress is not interrupted.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Poll until every pending key of `ledger` satisfies `condition`.
    ///
    /// Converged keys are moved out of pending with their observed
    /// attributes, and `on_progress` is called for each.
    pub async fn run<S, C, P>(
        &mut self,
        ledger: &mut ObjectLedger,
        source: &mut S,
        condition: &C,
        mut on_progress: P,
    ) -> HarnessResult<PollOutcome>
    where
        S: SnapshotSource + ?Sized,
        C: ConvergenceCondition + ?Sized,
        P: FnMut(Progress<'_>),
    {
        if self.settings.retry_period.is_zero() {
            return Err(HarnessError::Config(
                "retry period must be greater than zero".to_string(),
            ));
        }

        let started = Instant::now();
        let mut remaining = self.settings.max_timeout;
        let mut fetches = 0u32;

        while !remaining.is_zero() && ledger.pending_count() > 0 {
            if self.is_cancelled() {
                info!(pending = ledger.pending_count(), "convergence tracking cancelled");
                return Ok(PollOutcome::Cancelled {
                    pending: ledger.pending_keys().into_iter().collect(),
                    fetches,
                });
            }

            let snapshot = self.fetch_snapshot(source).await?;
            fetches += 1;

            for key in ledger.pending_keys() {
                match condition.evaluate(&key, &snapshot) {
                    ConditionOutcome::Matched(observed) => {
                        ledger.mark_converged(&key, observed.clone())?;
                        remaining = self.settings.max_timeout;
                        on_progress(Progress {
                            key: &key,
                            observed: &observed,
                            elapsed: started.elapsed() + self.settings.elapsed_offset,
                            remaining: ledger.pending_count(),
                        });
                    }
                    ConditionOutcome::NotYetMatched => {}
                    ConditionOutcome::Violated(reason) => {
                        return Err(HarnessError::ConditionViolated { key, reason });
                    }
                }
            }

            if ledger.pending_count() == 0 {
                break;
            }

            debug!(
                condition = %condition.describe(),
                pending = ledger.pending_count(),
                remaining_secs = remaining.as_secs(),
                retry_in_secs = self.settings.retry_period.as_secs(),
                "not all keys converged yet"
            );
            sleep(self.settings.retry_period).await;
            remaining = remaining.saturating_sub(self.settings.retry_period);
        }

        if ledger.pending_count() == 0 {
            Ok(PollOutcome::Converged { fetches })
        } else {
            Ok(PollOutcome::TimedOut {
                pending: ledger.pending_keys().into_iter().collect(),
                fetches,
            })
        }
    }

    /// Fetch a single snapshot and return the pending keys that already
    /// satisfy `condition`, without retrying and without touching the ledger.
    pub async fn probe<S, C>(
        &mut self,
        ledger: &ObjectLedger,
        source: &mut S,
        condition: &C,
    ) -> HarnessResult<Vec<ObjectKey>>
    where
        S: SnapshotSource + ?Sized,
        C: ConvergenceCondition + ?Sized,
    {
        let snapshot = self.fetch_snapshot(source).await?;
        let mut matched = Vec::new();
        for key in ledger.pending_keys() {
            match condition.evaluate(&key, &snapshot) {
                ConditionOutcome::Matched(_) => matched.push(key),
                ConditionOutcome::NotYetMatched => {}
                ConditionOutcome::Violated(reason) => {
                    return Err(HarnessError::ConditionViolated { key, reason });
                }
            }
        }
        Ok(matched)
    }

    async fn fetch_snapshot<S>(&mut self, source: &mut S) -> HarnessResult<CatalogSnapshot>
    where
        S: SnapshotSource + ?Sized,
    {
        if let Some(settle) = source.trigger().await? {
            debug!(settle_secs = settle.as_secs(), "waiting for triggered pull to settle");
            sleep(settle).await;
        }

        let snapshot = source.fetch(self.session.catalog_from()).await?;
        if self.session.observe_watermark(snapshot.watermark()) {
            debug!(from = snapshot.watermark(), "catalog cursor set");
        }
        Ok(snapshot)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{attributes, CatalogEntry, Watermark};
    use crate::services::convergence::condition::Condition;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    /// Serves a fixed sequence of snapshots, repeating the last one.
    struct ScriptedSource {
        script: Vec<HarnessResult<CatalogSnapshot>>,
        settle: Option<Duration>,
        started: Instant,
        froms: Vec<Watermark>,
        fetched_at: Vec<Duration>,
        triggers: u32,
    }

    impl ScriptedSource {
        fn new(script: Vec<HarnessResult<CatalogSnapshot>>) -> Self {
            Self {
                script,
                settle: None,
                started: Instant::now(),
                froms: Vec::new(),
                fetched_at: Vec::new(),
                triggers: 0,
            }
        }

        fn fetches(&self) -> usize {
            self.froms.len()
        }
    }

    #[async_trait]
    impl SnapshotSource for ScriptedSource {
        async fn trigger(&mut self) -> HarnessResult<Option<Duration>> {
            self.triggers += 1;
            Ok(self.settle)
        }

        async fn fetch(&mut self, from: Watermark) -> HarnessResult<CatalogSnapshot> {
            let index = self.froms.len().min(self.script.len() - 1);
            self.froms.push(from);
            self.fetched_at.push(self.started.elapsed());
            match &self.script[index] {
                Ok(snapshot) => Ok(snapshot.clone()),
                Err(_) => Err(HarnessError::infrastructure("GetCatalog", Some(500), "boom")),
            }
        }
    }

    fn snapshot_with(watermark: Watermark, keys: &[(&str, u64)]) -> CatalogSnapshot {
        let entries = keys
            .iter()
            .map(|(id, version)| CatalogEntry {
                key: ObjectKey::new(*id, *version),
                name: None,
                class: None,
                attributes: attributes([("ID", *id)]),
            })
            .collect();
        CatalogSnapshot::from_entries(watermark, entries)
    }

    fn ledger_with(keys: &[(&str, u64)]) -> ObjectLedger {
        let mut ledger = ObjectLedger::new();
        for (id, version) in keys {
            ledger
                .record_upload(ObjectKey::new(*id, *version), Attributes::new())
                .unwrap();
        }
        ledger
    }

    fn settings(max_secs: u64, period_secs: u64) -> TrackerSettings {
        TrackerSettings::new(Duration::from_secs(max_secs), Duration::from_secs(period_secs))
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_when_keys_appear_over_time() {
        let mut session = SessionState::new();
        let mut ledger = ledger_with(&[("a", 1), ("b", 1)]);
        let mut source = ScriptedSource::new(vec![
            Ok(snapshot_with(0, &[])),
            Ok(snapshot_with(0, &[("a", 1)])),
            Ok(snapshot_with(0, &[("a", 1), ("b", 1)])),
        ]);
        let mut seen = Vec::new();

        let outcome = ConvergenceTracker::new(settings(30, 10), &mut session)
            .run(&mut ledger, &mut source, &Condition::PresenceByIdAndVersion, |p| {
                seen.push((p.key.clone(), p.remaining));
            })
            .await
            .unwrap();

        assert_eq!(outcome, PollOutcome::Converged { fetches: 3 });
        assert!(ledger.pending_keys().is_empty());
        assert_eq!(
            ledger.converged_keys(),
            BTreeSet::from([ObjectKey::new("a", 1), ObjectKey::new("b", 1)])
        );
        assert_eq!(
            seen,
            vec![(ObjectKey::new("a", 1), 1), (ObjectKey::new("b", 1), 0)]
        );
        assert_eq!(
            source.fetched_at,
            vec![Duration::ZERO, Duration::from_secs(10), Duration::from_secs(20)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_nothing_converges() {
        let mut session = SessionState::new();
        let mut ledger = ledger_with(&[("a", 1), ("b", 2)]);
        let mut source = ScriptedSource::new(vec![Ok(snapshot_with(0, &[]))]);
        let started = Instant::now();

        let outcome = ConvergenceTracker::new(settings(30, 10), &mut session)
            .run(&mut ledger, &mut source, &Condition::PresenceById, |_| {})
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PollOutcome::TimedOut {
                pending: vec![ObjectKey::new("a", 1), ObjectKey::new("b", 2)],
                fetches: 3,
            }
        );
        assert!(source.fetches() <= 4);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        assert_eq!(ledger.pending_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_rearms_the_budget() {
        let mut session = SessionState::new();
        let mut ledger = ledger_with(&[("a", 1), ("b", 1)]);
        // Without progress only the polls at t=0, 10 and 20 fit the budget.
        // `a` at t=10 re-arms it, so `b` is still seen at t=30.
        let mut source = ScriptedSource::new(vec![
            Ok(snapshot_with(0, &[])),
            Ok(snapshot_with(0, &[("a", 1)])),
            Ok(snapshot_with(0, &[("a", 1)])),
            Ok(snapshot_with(0, &[("a", 1), ("b", 1)])),
        ]);

        let outcome = ConvergenceTracker::new(settings(30, 10), &mut session)
            .run(&mut ledger, &mut source, &Condition::PresenceById, |_| {})
            .await
            .unwrap();

        assert_eq!(outcome, PollOutcome::Converged { fetches: 4 });
        assert_eq!(source.fetched_at.last(), Some(&Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_stops_immediately() {
        let mut session = SessionState::new();
        let mut ledger = ledger_with(&[("a", 1)]);
        let mut source = ScriptedSource::new(vec![
            Ok(snapshot_with(0, &[])),
            Err(HarnessError::infrastructure("GetCatalog", Some(500), "boom")),
            Ok(snapshot_with(0, &[("a", 1)])),
        ]);

        let err = ConvergenceTracker::new(settings(600, 10), &mut session)
            .run(&mut ledger, &mut source, &Condition::PresenceById, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::Infrastructure { status: Some(500), .. }));
        assert_eq!(source.fetches(), 2);
        assert!(ledger.is_pending(&ObjectKey::new("a", 1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_non_zero_watermark_is_reused() {
        let mut session = SessionState::new();
        let mut ledger = ledger_with(&[("a", 1)]);
        let mut source = ScriptedSource::new(vec![
            Ok(snapshot_with(0, &[])),
            Ok(snapshot_with(100, &[])),
            Ok(snapshot_with(200, &[])),
            Ok(snapshot_with(300, &[("a", 1)])),
        ]);

        ConvergenceTracker::new(settings(60, 10), &mut session)
            .run(&mut ledger, &mut source, &Condition::PresenceById, |_| {})
            .await
            .unwrap();

        assert_eq!(source.froms, vec![0, 0, 100, 100]);
        assert_eq!(session.catalog_from(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_settle_delay_precedes_every_fetch() {
        let mut session = SessionState::new();
        let mut ledger = ledger_with(&[("a", 1)]);
        let mut source = ScriptedSource::new(vec![
            Ok(snapshot_with(0, &[])),
            Ok(snapshot_with(0, &[("a", 1)])),
        ]);
        source.settle = Some(Duration::from_secs(5));

        let outcome = ConvergenceTracker::new(settings(30, 10), &mut session)
            .run(&mut ledger, &mut source, &Condition::PresenceById, |_| {})
            .await
            .unwrap();

        assert!(outcome.is_converged());
        assert_eq!(source.triggers, 2);
        assert_eq!(
            source.fetched_at,
            vec![Duration::from_secs(5), Duration::from_secs(20)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_violation_aborts_tracking() {
        let mut session = SessionState::new();
        let mut ledger = ledger_with(&[("a", 1)]);
        let mut source = ScriptedSource::new(vec![Ok(snapshot_with(0, &[]))]);
        let vanished = |_: &ObjectKey, _: &CatalogSnapshot| {
            ConditionOutcome::Violated("gone".to_string())
        };

        let err = ConvergenceTracker::new(settings(30, 10), &mut session)
            .run(&mut ledger, &mut source, &vanished, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::ConditionViolated { reason, .. } if reason == "gone"));
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_is_honoured_at_loop_boundary() {
        let mut session = SessionState::new();
        let mut ledger = ledger_with(&[("a", 1)]);
        let mut source = ScriptedSource::new(vec![Ok(snapshot_with(0, &[]))]);
        let (cancel, rx) = watch::channel(false);
        cancel.send(true).unwrap();

        let outcome = ConvergenceTracker::new(settings(30, 10), &mut session)
            .with_cancellation(rx)
            .run(&mut ledger, &mut source, &Condition::PresenceById, |_| {})
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PollOutcome::Cancelled {
                pending: vec![ObjectKey::new("a", 1)],
                fetches: 0,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_ledger_converges_without_fetching() {
        let mut session = SessionState::new();
        let mut ledger = ObjectLedger::new();
        let mut source = ScriptedSource::new(vec![Ok(snapshot_with(0, &[]))]);

        let outcome = ConvergenceTracker::new(settings(30, 10), &mut session)
            .run(&mut ledger, &mut source, &Condition::PresenceById, |_| {})
            .await
            .unwrap();

        assert_eq!(outcome, PollOutcome::Converged { fetches: 0 });
        assert_eq!(source.fetches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retry_period_is_rejected() {
        let mut session = SessionState::new();
        let mut ledger = ledger_with(&[("a", 1)]);
        let mut source = ScriptedSource::new(vec![Ok(snapshot_with(0, &[]))]);

        let err = ConvergenceTracker::new(settings(30, 0), &mut session)
            .run(&mut ledger, &mut source, &Condition::PresenceById, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_elapsed_includes_offset() {
        let mut session = SessionState::new();
        let mut ledger = ledger_with(&[("a", 1)]);
        let mut source = ScriptedSource::new(vec![
            Ok(snapshot_with(0, &[])),
            Ok(snapshot_with(0, &[("a", 1)])),
        ]);
        let mut elapsed = Vec::new();

        ConvergenceTracker::new(
            settings(30, 10).with_elapsed_offset(Duration::from_secs(90)),
            &mut session,
        )
        .run(&mut ledger, &mut source, &Condition::PresenceById, |p| {
            elapsed.push(p.elapsed);
        })
        .await
        .unwrap();

        assert_eq!(elapsed, vec![Duration::from_secs(100)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_reports_matches_without_touching_ledger() {
        let mut session = SessionState::new();
        let ledger = ledger_with(&[("a", 1), ("b", 1)]);
        let mut source = ScriptedSource::new(vec![Ok(snapshot_with(42, &[("b", 1)]))]);

        let matched = ConvergenceTracker::new(settings(30, 10), &mut session)
            .probe(&ledger, &mut source, &Condition::PresenceByIdAndVersion)
            .await
            .unwrap();

        assert_eq!(matched, vec![ObjectKey::new("b", 1)]);
        assert_eq!(ledger.pending_count(), 2);
        assert_eq!(source.fetches(), 1);
        assert_eq!(session.catalog_from(), 42);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Keys that each appear within one budget window of the previous
        /// arrival always converge.
        #[test]
        fn prop_keys_arriving_within_budget_converge(
            gaps in prop::collection::vec(0usize..3, 1..6),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            // Key i becomes visible at fetch index arrival[i]; consecutive
            // arrivals are at most 2 polls apart, inside a 3 poll budget.
            let mut arrival = Vec::new();
            let mut at = 0;
            for gap in &gaps {
                at += gap;
                arrival.push(at);
            }
            let keys: Vec<(String, u64)> =
                (0..gaps.len()).map(|i| (format!("k{i}"), 1)).collect();
            let script = (0..=at)
                .map(|fetch| {
                    let visible: Vec<(&str, u64)> = keys
                        .iter()
                        .zip(&arrival)
                        .filter(|(_, arrived)| **arrived <= fetch)
                        .map(|((id, v), _)| (id.as_str(), *v))
                        .collect();
                    Ok(snapshot_with(0, &visible))
                })
                .collect();

            let (outcome, ledger) = runtime.block_on(async {
                let mut session = SessionState::new();
                let refs: Vec<(&str, u64)> = keys.iter().map(|(id, v)| (id.as_str(), *v)).collect();
                let mut ledger = ledger_with(&refs);
                let mut source = ScriptedSource::new(script);
                let outcome = ConvergenceTracker::new(settings(30, 10), &mut session)
                    .run(&mut ledger, &mut source, &Condition::PresenceById, |_| {})
                    .await
                    .unwrap();
                (outcome, ledger)
            });

            prop_assert!(outcome.is_converged());
            prop_assert_eq!(ledger.converged_keys(), ledger.uploaded_keys());
            prop_assert_eq!(ledger.pending_count(), 0);
        }
    }
}
