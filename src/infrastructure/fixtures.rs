//! Test objects on disk: `<stem>.zip` archives, each with a `<stem>.xml`
//! metadata document next to it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::domain::errors::{HarnessError, HarnessResult};
use crate::domain::models::{AttributeValue, Attributes};
use crate::domain::ports::ObjectUpload;

/// An archive and its metadata document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixturePair {
    pub archive: PathBuf,
    pub metadata: PathBuf,
}

impl FixturePair {
    /// File stem shared by the two files.
    pub fn stem(&self) -> String {
        self.archive
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Name, class and expected attributes declared by a metadata document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub name: String,
    pub class: String,
    /// `Class`, `Name` and `Type` of the `chart` element plus every
    /// `Attribute` name/value pair.
    pub attributes: Attributes,
}

/// Every `*.zip` in `dir` with its metadata document, sorted by path.
///
/// A zip without a matching xml file is a precondition failure.
pub async fn discover_pairs(dir: &Path) -> HarnessResult<Vec<FixturePair>> {
    let mut entries = fs::read_dir(dir).await.map_err(|e| {
        HarnessError::Precondition(format!("cannot read fixture directory {}: {e}", dir.display()))
    })?;

    let mut pairs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let archive = entry.path();
        if archive.extension().and_then(|e| e.to_str()) != Some("zip") {
            continue;
        }
        let metadata = archive.with_extension("xml");
        if !fs::try_exists(&metadata).await? {
            return Err(HarnessError::Precondition(format!(
                "no metadata file {} for {}",
                metadata.display(),
                archive.display()
            )));
        }
        pairs.push(FixturePair { archive, metadata });
    }
    pairs.sort_by(|a, b| a.archive.cmp(&b.archive));
    Ok(pairs)
}

/// Parse a metadata document.
pub fn parse_metadata(document: &str) -> HarnessResult<ObjectMetadata> {
    let doc = roxmltree::Document::parse(document)?;
    let chart = doc
        .descendants()
        .find(|n| n.has_tag_name("chart"))
        .ok_or_else(|| HarnessError::Parse("metadata document has no chart element".to_string()))?;

    let mut attributes = Attributes::new();
    for name in ["Class", "Name", "Type"] {
        if let Some(value) = chart.attribute(name) {
            attributes.insert(name.to_string(), AttributeValue::from(value));
        }
    }
    for attribute in doc.descendants().filter(|n| n.has_tag_name("Attribute")) {
        if let (Some(name), Some(value)) = (attribute.attribute("name"), attribute.attribute("value")) {
            attributes.insert(name.to_string(), AttributeValue::from(value));
        }
    }

    let required = |name: &str| {
        chart
            .attribute(name)
            .map(str::to_string)
            .ok_or_else(|| HarnessError::Parse(format!("chart element has no {name}")))
    };
    Ok(ObjectMetadata {
        name: required("Name")?,
        class: required("Class")?,
        attributes,
    })
}

/// Read both files of a pair.
pub async fn load_pair(pair: &FixturePair) -> HarnessResult<(ObjectUpload, ObjectMetadata)> {
    let archive = fs::read(&pair.archive).await?;
    let metadata_document = fs::read_to_string(&pair.metadata).await?;
    let metadata = parse_metadata(&metadata_document)?;
    let file_name = pair
        .archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok((
        ObjectUpload {
            file_name,
            archive,
            metadata_document,
        },
        metadata,
    ))
}

/// `Name -> Class` of every fixture object in `dir`.
pub async fn names_in(dir: &Path) -> HarnessResult<BTreeMap<String, String>> {
    let mut names = BTreeMap::new();
    for pair in discover_pairs(dir).await? {
        let metadata = parse_metadata(&fs::read_to_string(&pair.metadata).await?)?;
        names.insert(metadata.name, metadata.class);
    }
    Ok(names)
}
