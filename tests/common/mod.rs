//! Common test utilities for integration tests
//!
//! An in-memory primary/secondary server pair implementing `CatalogServer`,
//! plus fixture and configuration helpers.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tempfile::TempDir;

use replication_harness::domain::models::{AttributeValue, Attributes, CatalogSnapshot};
use replication_harness::domain::ports::{
    CatalogServer, MetadataUpdate, ObjectUpload, RemoteResponse,
};
use replication_harness::infrastructure::{fixtures, wire};
use replication_harness::{HarnessConfig, HarnessResult, ObjectKey, Variant, Watermark};

pub const CATALOG_CREATED: Watermark = 1_700_000_000;
pub const REPLICANT_ID: u64 = 5;
pub const REPLICANT_NAME: &str = "replica";

/// A change travelling from the primary to the secondary.
#[derive(Debug, Clone)]
pub enum Change {
    Put(ObjectKey, Attributes),
    Delete(ObjectKey),
}

/// Catalog of one server: id to versions.
#[derive(Debug, Default)]
pub struct ServerData {
    pub objects: BTreeMap<String, BTreeMap<u64, Attributes>>,
    pub md_version: String,
    /// `from` of every catalog fetch.
    pub froms: Vec<Watermark>,
    /// Admin methods called, with their parameters.
    pub jobs: Vec<(String, Vec<(String, String)>)>,
    /// Changes not yet offloaded or replicated.
    journal: Vec<Change>,
    next_id: u32,
}

impl ServerData {
    pub fn insert(&mut self, key: &ObjectKey, attributes: Attributes) {
        self.objects
            .entry(key.id.clone())
            .or_default()
            .insert(key.version, attributes);
    }

    pub fn remove(&mut self, key: &ObjectKey) -> bool {
        let Some(versions) = self.objects.get_mut(&key.id) else {
            return false;
        };
        let removed = versions.remove(&key.version).is_some();
        if versions.is_empty() {
            self.objects.remove(&key.id);
        }
        removed
    }

    fn apply(&mut self, change: Change) {
        match change {
            Change::Put(key, attributes) => self.insert(&key, attributes),
            Change::Delete(key) => {
                self.remove(&key);
            }
        }
    }

    pub fn version_count(&self) -> usize {
        self.objects.values().map(BTreeMap::len).sum()
    }

    pub fn job_count(&self, method: &str) -> usize {
        self.jobs.iter().filter(|(m, _)| m == method).count()
    }

    fn find_by_name(&self, name: &str, class: &str) -> Option<(String, u64)> {
        self.objects.iter().find_map(|(id, versions)| {
            let (version, attributes) = versions.last_key_value()?;
            let matches = attributes.get("Name").map(AttributeValue::to_string).as_deref()
                == Some(name)
                && attributes.get("Class").map(AttributeValue::to_string).as_deref()
                    == Some(class);
            matches.then(|| (id.clone(), *version))
        })
    }
}

/// State shared by both servers.
#[derive(Debug, Default)]
pub struct Network {
    pub primary: ServerData,
    pub secondary: ServerData,
    /// Directory the primary offloads into and the secondary loads from.
    pub gateway: Vec<Change>,
    /// Nothing reaches the secondary.
    pub blocked: bool,
    /// Non-empty deliveries let through before the link goes down.
    pub deliveries_left: Option<usize>,
    /// Every primary change reaches the secondary at once.
    pub stream: bool,
    /// Attribute value the secondary stores instead of the replicated one.
    pub corrupt: Option<(String, String)>,
}

impl Network {
    fn deliver(&mut self, changes: Vec<Change>) {
        if self.blocked || changes.is_empty() {
            return;
        }
        if let Some(left) = self.deliveries_left.as_mut() {
            if *left == 0 {
                return;
            }
            *left -= 1;
        }
        for change in changes {
            let change = match (change, &self.corrupt) {
                (Change::Put(key, mut attributes), Some((name, value))) => {
                    attributes.insert(name.clone(), AttributeValue::from(value.as_str()));
                    Change::Put(key, attributes)
                }
                (change, _) => change,
            };
            self.secondary.apply(change);
        }
    }

    fn record(&mut self, change: Change) {
        if self.stream {
            self.deliver(vec![change.clone()]);
        }
        self.primary.journal.push(change);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Secondary,
}

/// One side of a [`Network`].
pub struct FakeCatalogServer {
    address: String,
    role: Role,
    network: Arc<Mutex<Network>>,
}

impl FakeCatalogServer {
    fn data<'a>(&self, network: &'a mut Network) -> &'a mut ServerData {
        match self.role {
            Role::Primary => &mut network.primary,
            Role::Secondary => &mut network.secondary,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Network> {
        self.network.lock().unwrap()
    }
}

/// A primary/secondary pair over one shared [`Network`].
pub fn server_pair() -> (Arc<FakeCatalogServer>, Arc<FakeCatalogServer>, Arc<Mutex<Network>>) {
    let network = Arc::new(Mutex::new(Network::default()));
    {
        let mut net = network.lock().unwrap();
        net.primary.md_version = "7".to_string();
        net.secondary.md_version = "7".to_string();
    }
    let primary = FakeCatalogServer {
        address: "primary:8080".to_string(),
        role: Role::Primary,
        network: Arc::clone(&network),
    };
    let secondary = FakeCatalogServer {
        address: "secondary:8080".to_string(),
        role: Role::Secondary,
        network: Arc::clone(&network),
    };
    (Arc::new(primary), Arc::new(secondary), network)
}

fn chart(id: &str, version: u64, attributes: &Attributes) -> String {
    let mut element = format!(
        r#"<CHART ID="{}" Issue="{version}" Updated="1700000000.5""#,
        wire::escape(id)
    );
    for (name, value) in attributes {
        element.push_str(&format!(r#" {name}="{}""#, wire::escape(&value.to_string())));
    }
    element.push_str("/>");
    element
}

fn job_ok(extra: serde_json::Value) -> RemoteResponse {
    let mut body = serde_json::json!({ "success": true, "msg": "ok" });
    if let (Some(body), serde_json::Value::Object(extra)) = (body.as_object_mut(), extra) {
        body.extend(extra);
    }
    RemoteResponse::ok(body.to_string())
}

fn not_found(message: &str) -> RemoteResponse {
    RemoteResponse::with_status(
        404,
        "Not Found",
        format!(r#"<response><result result_message="{message}"/></response>"#),
    )
}

const XMLRPC_SUCCESS: &str = "<?xml version=\"1.0\"?><methodResponse><params><param><value><struct>\
<member><name>success</name><value><boolean>1</boolean></value></member>\
</struct></value></param></params></methodResponse>";

#[async_trait]
impl CatalogServer for FakeCatalogServer {
    fn address(&self) -> &str {
        &self.address
    }

    async fn fetch_catalog(&self, from: Watermark) -> HarnessResult<RemoteResponse> {
        let mut network = self.lock();
        let data = self.data(&mut network);
        data.froms.push(from);
        let mut document = format!(r#"<catalog Created="{CATALOG_CREATED}">"#);
        for (id, versions) in &data.objects {
            if let Some((version, attributes)) = versions.last_key_value() {
                document.push_str(&chart(id, *version, attributes));
            }
        }
        document.push_str("</catalog>");
        Ok(RemoteResponse::ok(wire::pack_bundle(
            CatalogSnapshot::CATALOG_ENTRY,
            &document,
        )?))
    }

    async fn fetch_archive_catalog(&self, id: &str) -> HarnessResult<RemoteResponse> {
        let mut network = self.lock();
        let data = self.data(&mut network);
        let Some(versions) = data.objects.get(id) else {
            return Ok(not_found("unknown object"));
        };
        let mut document = "<catalog>".to_string();
        let archived = versions.len().saturating_sub(1);
        for (version, attributes) in versions.iter().take(archived) {
            document.push_str(&chart(id, *version, attributes));
        }
        document.push_str("</catalog>");
        Ok(RemoteResponse::ok(wire::pack_bundle(
            CatalogSnapshot::ARCHIVE_ENTRY,
            &document,
        )?))
    }

    async fn run_remote_job(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> HarnessResult<RemoteResponse> {
        let mut network = self.lock();
        let recorded = params
            .iter()
            .map(|(name, value)| ((*name).to_string(), value.clone()))
            .collect();
        self.data(&mut network).jobs.push((method.to_string(), recorded));

        let response = match (method, self.role) {
            ("admin.md_classifier_version", _) => {
                let version = self.data(&mut network).md_version.clone();
                job_ok(serde_json::json!({ "md_version": version }))
            }
            ("admin.run_script", Role::Primary) => {
                let offloaded = std::mem::take(&mut network.primary.journal);
                network.gateway.extend(offloaded);
                job_ok(serde_json::json!({}))
            }
            ("admin.run_script", Role::Secondary) => {
                let loaded = std::mem::take(&mut network.gateway);
                network.deliver(loaded);
                job_ok(serde_json::json!({}))
            }
            ("admin.get_list_db", Role::Primary) => job_ok(serde_json::json!({
                "rows": [
                    { "replicantId": 3, "username": "archive" },
                    { "replicantId": REPLICANT_ID, "username": REPLICANT_NAME },
                ]
            })),
            ("admin.start_replications", Role::Primary) => {
                let changes = std::mem::take(&mut network.primary.journal);
                network.deliver(changes);
                job_ok(serde_json::json!({}))
            }
            _ => RemoteResponse::ok(
                serde_json::json!({ "success": false, "msg": "unknown method" }).to_string(),
            ),
        };
        Ok(response)
    }

    async fn delete_object(&self, key: &ObjectKey) -> HarnessResult<RemoteResponse> {
        let mut network = self.lock();
        if !self.data(&mut network).remove(key) {
            return Ok(not_found("no such object version"));
        }
        if self.role == Role::Primary {
            network.record(Change::Delete(key.clone()));
        }
        Ok(RemoteResponse::ok("<response><result/></response>"))
    }

    async fn upload_object(&self, upload: &ObjectUpload) -> HarnessResult<RemoteResponse> {
        let metadata = fixtures::parse_metadata(&upload.metadata_document)?;
        let mut network = self.lock();
        let data = self.data(&mut network);
        let key = match data.find_by_name(&metadata.name, &metadata.class) {
            Some((id, version)) => ObjectKey::new(id, version + 1),
            None => {
                data.next_id += 1;
                ObjectKey::new(format!("obj-{}", data.next_id), 1)
            }
        };
        data.insert(&key, metadata.attributes.clone());
        if self.role == Role::Primary {
            network.record(Change::Put(key.clone(), metadata.attributes));
        }
        Ok(RemoteResponse::ok(format!(
            r#"<response><object objectId="{}" version="{}"/></response>"#,
            key.id, key.version
        )))
    }

    async fn set_metadata(&self, update: &MetadataUpdate) -> HarnessResult<RemoteResponse> {
        let mut network = self.lock();
        let data = self.data(&mut network);
        if update.classifier_version != data.md_version {
            return Ok(RemoteResponse::ok(
                "<methodResponse><fault><value><struct><member><name>faultString</name>\
<value><string>classifier version mismatch</string></value></member></struct></value></fault></methodResponse>",
            ));
        }
        let Some((version, attributes)) = data
            .objects
            .get_mut(&update.object_id)
            .and_then(|versions| versions.last_entry())
            .map(|mut entry| {
                entry.get_mut().extend(update.metadata.clone());
                (*entry.key(), entry.get().clone())
            })
        else {
            return Ok(not_found("unknown object"));
        };
        if self.role == Role::Primary {
            network.record(Change::Put(
                ObjectKey::new(update.object_id.clone(), version),
                attributes,
            ));
        }
        Ok(RemoteResponse::ok(XMLRPC_SUCCESS))
    }
}

/// Write `<stem>.zip` and `<stem>.xml` into `dir`.
pub fn write_fixture(dir: &Path, stem: &str, name: &str, class: &str, c122: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(format!("{stem}.zip")), format!("PK archive of {name}")).unwrap();
    std::fs::write(
        dir.join(format!("{stem}.xml")),
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata>
  <chart Class="{class}" Name="{name}" Type="map">
    <Attribute name="c122" value="{c122}"/>
    <Attribute name="c201" value="100000"/>
    <Attribute name="c234" value="roads|rivers"/>
  </chart>
</metadata>"#
        ),
    )
    .unwrap();
}

/// Fixture directories and results directory of one test run.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    /// Two new objects and one new version of the first.
    pub fn new() -> Self {
        let workspace = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        write_fixture(&workspace.new_objects(), "n37-1", "N-37-1", "topo", "North");
        write_fixture(&workspace.new_objects(), "n37-2", "N-37-2", "topo", "South");
        write_fixture(&workspace.new_versions(), "n37-1", "N-37-1", "topo", "North v2");
        workspace
    }

    pub fn new_objects(&self) -> PathBuf {
        self.dir.path().join("put_new_objects")
    }

    pub fn new_versions(&self) -> PathBuf {
        self.dir.path().join("put_new_versions")
    }

    pub fn results(&self) -> PathBuf {
        self.dir.path().join("results")
    }

    pub fn config(&self, variant: Variant) -> HarnessConfig {
        HarnessConfig {
            variant,
            primary_server: "primary:8080".to_string(),
            secondary_server: "secondary:8080".to_string(),
            login: "tester".to_string(),
            password: "secret".to_string(),
            replicant_name: Some(REPLICANT_NAME.to_string()),
            results_dir: self.results(),
            new_objects_dir: self.new_objects(),
            new_versions_dir: self.new_versions(),
            assure_timeout_secs: 5,
            first_timeout_secs: 5,
            max_timeout_secs: 30,
            period_secs: 10,
            download_files_timeout_secs: 1,
            ..HarnessConfig::default()
        }
    }
}

/// Attributes of a stored object version.
pub fn stored(attributes: &[(&str, &str)]) -> Attributes {
    replication_harness::domain::models::attributes(attributes.iter().copied())
}
