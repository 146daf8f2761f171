//! Bookkeeping of uploaded objects and their convergence status.
//!
//! The ledger holds three co-evolving collections for the current upload
//! cycle:
//!
//! - `uploaded`: every object uploaded in the cycle with its expected record
//! - `pending`: uploaded keys not yet observed on the target server
//! - `converged`: keys confirmed on the target, with the observed attributes
//!
//! `pending` and the keys of `converged` always partition the keys of
//! `uploaded`. Starting a new cycle archives the current state so that final
//! cleanup can still reach every object uploaded during the run. Keys seen on
//! the target are also remembered for the whole run, so restarting tracking
//! does not hide objects that cleanup must remove from the target.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::object::{Attributes, ObjectKey, ObjectRecord};
use crate::domain::errors::{HarnessError, HarnessResult};

/// An uploaded object with every expected revision layered so far.
#[derive(Debug, Clone, PartialEq, Eq)]
struct UploadedObject {
    /// Oldest first; never empty.
    revisions: Vec<ObjectRecord>,
}

impl UploadedObject {
    fn current(&self) -> &ObjectRecord {
        // `revisions` is created with one element and only ever grows.
        &self.revisions[self.revisions.len() - 1]
    }
}

/// A finished upload cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ArchivedCycle {
    uploaded: BTreeMap<ObjectKey, UploadedObject>,
}

/// Uploaded, pending and converged objects of a test run.
#[derive(Debug, Default, Clone)]
pub struct ObjectLedger {
    uploaded: BTreeMap<ObjectKey, UploadedObject>,
    pending: BTreeSet<ObjectKey>,
    converged: BTreeMap<ObjectKey, Attributes>,
    /// Every key ever marked converged; never shrinks.
    replicated: BTreeSet<ObjectKey>,
    history: Vec<ArchivedCycle>,
}

impl ObjectLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A ledger that only tracks presence of `keys`, with no expected
    /// attributes. Used to follow deletions of everything uploaded in a run.
    pub fn tracking(keys: impl IntoIterator<Item = ObjectKey>) -> Self {
        let mut ledger = Self::new();
        for key in keys {
            // Duplicates collapse; a key is tracked once.
            let _ = ledger.record_upload(key, Attributes::new());
        }
        ledger
    }

    /// Record a freshly uploaded object as pending.
    pub fn record_upload(&mut self, key: ObjectKey, attributes: Attributes) -> HarnessResult<()> {
        if self.uploaded.contains_key(&key) {
            return Err(HarnessError::DuplicateUpload(key));
        }
        self.uploaded.insert(
            key.clone(),
            UploadedObject {
                revisions: vec![ObjectRecord::new(attributes)],
            },
        );
        self.pending.insert(key);
        Ok(())
    }

    /// Layer a new expected-attribute revision over the current record.
    pub fn expect_revision(&mut self, key: &ObjectKey, changes: &Attributes) -> HarnessResult<()> {
        let object = self
            .uploaded
            .get_mut(key)
            .ok_or_else(|| HarnessError::UnknownKey(key.clone()))?;
        let revised = object.current().layered(changes);
        object.revisions.push(revised);
        Ok(())
    }

    /// Move `key` from pending to converged with the observed attributes.
    pub fn mark_converged(&mut self, key: &ObjectKey, observed: Attributes) -> HarnessResult<()> {
        if !self.pending.remove(key) {
            return Err(HarnessError::UnknownKey(key.clone()));
        }
        self.replicated.insert(key.clone());
        self.converged.insert(key.clone(), observed);
        Ok(())
    }

    /// Put every converged key back into pending, discarding observations.
    /// The keys stay in [`all_converged_keys`](Self::all_converged_keys).
    pub fn restart_tracking(&mut self) {
        let converged = std::mem::take(&mut self.converged);
        self.pending.extend(converged.into_keys());
    }

    /// Archive the current cycle and start an empty one.
    pub fn archive_and_reset(&mut self) {
        self.history.push(ArchivedCycle {
            uploaded: std::mem::take(&mut self.uploaded),
        });
        self.pending.clear();
        self.converged.clear();
    }

    /// Copy of the pending set, safe to iterate while the ledger changes.
    pub fn pending_keys(&self) -> BTreeSet<ObjectKey> {
        self.pending.clone()
    }

    pub fn is_pending(&self, key: &ObjectKey) -> bool {
        self.pending.contains(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn uploaded_keys(&self) -> BTreeSet<ObjectKey> {
        self.uploaded.keys().cloned().collect()
    }

    pub fn converged_keys(&self) -> BTreeSet<ObjectKey> {
        self.converged.keys().cloned().collect()
    }

    /// Every key uploaded in the current or any archived cycle.
    pub fn all_keys_ever(&self) -> BTreeSet<ObjectKey> {
        self.history
            .iter()
            .flat_map(|cycle| cycle.uploaded.keys())
            .chain(self.uploaded.keys())
            .cloned()
            .collect()
    }

    /// Whether anything was uploaded during the run, archived cycles included.
    pub fn has_uploads(&self) -> bool {
        !self.uploaded.is_empty() || self.history.iter().any(|c| !c.uploaded.is_empty())
    }

    /// Current expected attributes of `key`.
    pub fn expected(&self, key: &ObjectKey) -> Option<&Attributes> {
        self.uploaded.get(key).map(|o| o.current().attributes())
    }

    /// Every expected revision of `key`, oldest first.
    pub fn revisions(&self, key: &ObjectKey) -> &[ObjectRecord] {
        self.uploaded
            .get(key)
            .map(|o| o.revisions.as_slice())
            .unwrap_or_default()
    }

    /// Observed attributes of a converged key.
    pub fn observed(&self, key: &ObjectKey) -> Option<&Attributes> {
        self.converged.get(key)
    }

    /// Keys converged at any point of the run, across restarts and archived
    /// cycles.
    pub fn all_converged_keys(&self) -> BTreeSet<ObjectKey> {
        self.replicated.clone()
    }

    /// Expected attributes of the current cycle keyed as `"{id}-{version}"`.
    pub fn export(&self) -> UploadedObjectsExport {
        UploadedObjectsExport(
            self.uploaded
                .iter()
                .map(|(key, object)| {
                    (
                        format!("{}-{}", key.id, key.version),
                        object.current().attributes().clone(),
                    )
                })
                .collect(),
        )
    }
}

/// Serialisable view of the uploaded objects, kept on disk so that a run
/// interrupted before cleanup can be cleaned up by hand.
#[derive(Debug, Clone, Serialize)]
pub struct UploadedObjectsExport(pub BTreeMap<String, Attributes>);
