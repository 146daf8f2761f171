//! Object identity and attribute snapshots.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one version of one uploaded object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Server-assigned object identifier.
    pub id: String,
    /// Version number ("Issue" in catalog terms).
    pub version: u64,
}

impl ObjectKey {
    pub fn new(id: impl Into<String>, version: u64) -> Self {
        Self {
            id: id.into(),
            version,
        }
    }

    /// Parse a version as rendered by the servers.
    ///
    /// Versions are integers but some responses render them as `2.0`.
    pub fn parse_version(raw: &str) -> Option<u64> {
        let raw = raw.trim();
        if let Ok(version) = raw.parse::<u64>() {
            return Some(version);
        }
        let float = raw.parse::<f64>().ok()?;
        (float.is_finite() && float >= 0.0 && float.fract() == 0.0).then_some(float as u64)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.id, self.version)
    }
}

/// A single attribute value, textual or numeric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Integer(i64),
    Text(String),
}

impl AttributeValue {
    /// String form used for comparisons, so that `987654` and `"987654"` agree.
    pub fn normalized(&self) -> String {
        match self {
            Self::Integer(value) => value.to_string(),
            Self::Text(value) => value.trim().to_string(),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

/// Attribute name to value mapping.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Build an [`Attributes`] map from string pairs.
pub fn attributes<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Attributes {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), AttributeValue::from(value)))
        .collect()
}

/// Expected attributes of an uploaded object, captured at upload time.
///
/// Records are never edited. A metadata change produces a new record layered
/// over the previous one with [`ObjectRecord::layered`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    attributes: Attributes,
}

impl ObjectRecord {
    pub const fn new(attributes: Attributes) -> Self {
        Self { attributes }
    }

    pub const fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// A new record with `changes` applied on top of this one.
    pub fn layered(&self, changes: &Attributes) -> Self {
        let mut attributes = self.attributes.clone();
        attributes.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { attributes }
    }
}
