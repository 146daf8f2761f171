//! Per-key convergence predicates.

use std::fmt;

use crate::domain::models::{
    AttributeValue, Attributes, CatalogEntry, CatalogSnapshot, MetadataChangeConfig, ObjectKey,
};

/// Result of checking one pending key against one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionOutcome {
    /// The key converged; carries the observed attributes.
    Matched(Attributes),
    NotYetMatched,
    /// The target is in a state from which convergence is impossible.
    Violated(String),
}

/// A predicate deciding whether a pending key has converged.
///
/// Implementations must be pure: the tracker evaluates every pending key once
/// per poll and may evaluate the same key against many snapshots.
pub trait ConvergenceCondition: Send + Sync {
    /// Short description used in logs and timeout errors.
    fn describe(&self) -> String;

    fn evaluate(&self, key: &ObjectKey, snapshot: &CatalogSnapshot) -> ConditionOutcome;
}

impl<F> ConvergenceCondition for F
where
    F: Fn(&ObjectKey, &CatalogSnapshot) -> ConditionOutcome + Send + Sync,
{
    fn describe(&self) -> String {
        "custom condition".to_string()
    }

    fn evaluate(&self, key: &ObjectKey, snapshot: &CatalogSnapshot) -> ConditionOutcome {
        self(key, snapshot)
    }
}

/// The metadata edit the harness applies and then waits for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataChange {
    pub name_attribute: String,
    pub name_suffix: String,
    pub scale_attribute: String,
    pub scale_value: i64,
}

impl From<&MetadataChangeConfig> for MetadataChange {
    fn from(config: &MetadataChangeConfig) -> Self {
        Self {
            name_attribute: config.name_attribute.clone(),
            name_suffix: config.name_suffix.clone(),
            scale_attribute: config.scale_attribute.clone(),
            scale_value: config.scale_value,
        }
    }
}

impl MetadataChange {
    /// The attribute changes this edit makes to an object currently carrying
    /// `current`.
    pub fn changes_for(&self, current: &Attributes) -> Attributes {
        let name = current
            .get(&self.name_attribute)
            .map(AttributeValue::to_string)
            .unwrap_or_default();
        Attributes::from([
            (
                self.name_attribute.clone(),
                AttributeValue::Text(format!("{name}{}", self.name_suffix)),
            ),
            (
                self.scale_attribute.clone(),
                AttributeValue::Integer(self.scale_value),
            ),
        ])
    }

    /// Whether `entry` already shows the edit.
    pub fn is_applied(&self, entry: &CatalogEntry) -> bool {
        let suffix = self.name_suffix.trim();
        let name_done = entry
            .attribute(&self.name_attribute)
            .is_some_and(|name| name.ends_with(suffix));
        let scale_done = entry
            .attribute(&self.scale_attribute)
            .is_some_and(|scale| scale == self.scale_value.to_string());
        name_done && scale_done
    }
}

/// The ways the harness decides that a key has converged on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Any version of the object is listed.
    PresenceById,
    /// The exact version is listed.
    PresenceByIdAndVersion,
    /// The object is listed and shows the metadata edit. The object vanishing
    /// altogether is a violation.
    MetadataUpdated(MetadataChange),
    /// No version of the object is listed.
    AbsenceById,
    /// The exact version is no longer listed.
    AbsenceByIdAndVersion,
}

impl ConvergenceCondition for Condition {
    fn describe(&self) -> String {
        match self {
            Self::PresenceById => "presence by id",
            Self::PresenceByIdAndVersion => "presence by id and version",
            Self::MetadataUpdated(_) => "metadata update",
            Self::AbsenceById => "absence by id",
            Self::AbsenceByIdAndVersion => "absence by id and version",
        }
        .to_string()
    }

    fn evaluate(&self, key: &ObjectKey, snapshot: &CatalogSnapshot) -> ConditionOutcome {
        match self {
            Self::PresenceById => present(snapshot.find(&key.id)),
            Self::PresenceByIdAndVersion => present(snapshot.find_key(key)),
            Self::MetadataUpdated(change) => match snapshot.find(&key.id) {
                None => ConditionOutcome::Violated(
                    "object disappeared from the target catalog".to_string(),
                ),
                Some(entry) if change.is_applied(entry) => {
                    ConditionOutcome::Matched(entry.attributes.clone())
                }
                Some(_) => ConditionOutcome::NotYetMatched,
            },
            Self::AbsenceById => absent(snapshot.find(&key.id)),
            Self::AbsenceByIdAndVersion => absent(snapshot.find_key(key)),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

fn present(entry: Option<&CatalogEntry>) -> ConditionOutcome {
    entry.map_or(ConditionOutcome::NotYetMatched, |e| {
        ConditionOutcome::Matched(e.attributes.clone())
    })
}

fn absent(entry: Option<&CatalogEntry>) -> ConditionOutcome {
    match entry {
        Some(_) => ConditionOutcome::NotYetMatched,
        None => ConditionOutcome::Matched(Attributes::new()),
    }
}
