//! Read-only view of a remote object catalog at one point in time.
//!
//! A catalog document is markup whose root element carries the server's
//! incremental-fetch cursor in its `Created` attribute and whose `CHART`
//! elements describe one object version each:
//!
//! ```xml
//! <catalog Created="1700000000">
//!   <CHART ID="7f3a" Issue="2" Name="N-37-1" Class="topo" c122="..."/>
//! </catalog>
//! ```
//!
//! The servers deliver the document inside a zip bundle; see
//! [`CatalogSnapshot::from_bundle`].

use std::collections::HashMap;
use std::io::{Cursor, Read};

use zip::result::ZipError;
use zip::ZipArchive;

use super::object::{AttributeValue, Attributes, ObjectKey};
use crate::domain::errors::{HarnessError, HarnessResult};

/// Incremental-fetch cursor ("from") returned by the catalog server.
pub type Watermark = u64;

const ENTRY_TAG: &str = "CHART";
const ID_ATTR: &str = "ID";
const VERSION_ATTR: &str = "Issue";
const NAME_ATTR: &str = "Name";
const CLASS_ATTR: &str = "Class";
const WATERMARK_ATTR: &str = "Created";

/// One object version listed in a catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub key: ObjectKey,
    pub name: Option<String>,
    pub class: Option<String>,
    /// Every attribute of the entry, identity attributes included.
    pub attributes: Attributes,
}

impl CatalogEntry {
    /// Textual value of an attribute, if present.
    pub fn attribute(&self, name: &str) -> Option<String> {
        self.attributes.get(name).map(AttributeValue::normalized)
    }
}

/// Immutable catalog index, rebuilt on every poll.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    watermark: Watermark,
    entries: Vec<CatalogEntry>,
    by_id: HashMap<String, Vec<usize>>,
}

impl CatalogSnapshot {
    /// Bundle entry holding the current catalog.
    pub const CATALOG_ENTRY: &'static str = "WF.CLL";
    /// Bundle entry holding an object's archived versions.
    pub const ARCHIVE_ENTRY: &'static str = "catalog.xml";

    /// Index already-parsed entries.
    pub fn from_entries(watermark: Watermark, entries: Vec<CatalogEntry>) -> Self {
        let mut by_id: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, entry) in entries.iter().enumerate() {
            by_id.entry(entry.key.id.clone()).or_default().push(index);
        }
        Self {
            watermark,
            entries,
            by_id,
        }
    }

    /// Parse a catalog document.
    pub fn build(document: &str) -> HarnessResult<Self> {
        let doc = roxmltree::Document::parse(document)?;
        let watermark = doc
            .root_element()
            .attribute(WATERMARK_ATTR)
            .map(parse_watermark)
            .transpose()?
            .unwrap_or(0);

        let entries = doc
            .descendants()
            .filter(|node| node.has_tag_name(ENTRY_TAG))
            .map(|node| {
                let attributes: Attributes = node
                    .attributes()
                    .map(|attr| (attr.name().to_string(), AttributeValue::from(attr.value())))
                    .collect();
                let id = node
                    .attribute(ID_ATTR)
                    .ok_or_else(|| HarnessError::Parse(format!("{ENTRY_TAG} without {ID_ATTR}")))?;
                let raw_version = node.attribute(VERSION_ATTR).ok_or_else(|| {
                    HarnessError::Parse(format!("{ENTRY_TAG} {id} without {VERSION_ATTR}"))
                })?;
                let version = ObjectKey::parse_version(raw_version).ok_or_else(|| {
                    HarnessError::Parse(format!(
                        "{ENTRY_TAG} {id} has invalid {VERSION_ATTR} {raw_version:?}"
                    ))
                })?;
                Ok(CatalogEntry {
                    key: ObjectKey::new(id, version),
                    name: node.attribute(NAME_ATTR).map(str::to_string),
                    class: node.attribute(CLASS_ATTR).map(str::to_string),
                    attributes,
                })
            })
            .collect::<HarnessResult<Vec<_>>>()?;

        Ok(Self::from_entries(watermark, entries))
    }

    /// Unpack `entry` from a zip bundle and parse it.
    pub fn from_bundle(bundle: &[u8], entry: &str) -> HarnessResult<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bundle))?;
        let mut file = match archive.by_name(entry) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => {
                return Err(HarnessError::Parse(format!(
                    "catalog bundle has no {entry} entry"
                )))
            }
            Err(err) => return Err(err.into()),
        };
        let mut document = String::new();
        file.read_to_string(&mut document)
            .map_err(|e| HarnessError::Parse(format!("unreadable {entry}: {e}")))?;
        Self::build(&document)
    }

    /// First entry with the given id.
    pub fn find(&self, id: &str) -> Option<&CatalogEntry> {
        self.by_id
            .get(id)
            .and_then(|indices| indices.first())
            .map(|&index| &self.entries[index])
    }

    /// Entry with the given id and version.
    pub fn find_version(&self, id: &str, version: u64) -> Option<&CatalogEntry> {
        self.by_id.get(id).and_then(|indices| {
            indices
                .iter()
                .map(|&index| &self.entries[index])
                .find(|entry| entry.key.version == version)
        })
    }

    /// Entry with the given id and version of `key`.
    pub fn find_key(&self, key: &ObjectKey) -> Option<&CatalogEntry> {
        self.find_version(&key.id, key.version)
    }

    /// First entry with the given name and class.
    pub fn find_by_name(&self, name: &str, class: &str) -> Option<&CatalogEntry> {
        self.entries
            .iter()
            .find(|e| e.name.as_deref() == Some(name) && e.class.as_deref() == Some(class))
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cursor to send as "from" on the next fetch.
    pub const fn watermark(&self) -> Watermark {
        self.watermark
    }
}

/// Integers pass through; fractional timestamps are floored, which can only
/// widen the next incremental fetch.
fn parse_watermark(raw: &str) -> HarnessResult<Watermark> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0);
    }
    if let Ok(value) = raw.parse::<u64>() {
        return Ok(value);
    }
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Ok(value.floor() as u64),
        _ => Err(HarnessError::Parse(format!(
            "invalid {WATERMARK_ATTR} cursor {raw:?}"
        ))),
    }
}
