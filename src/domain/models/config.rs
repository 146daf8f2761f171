use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How objects travel from the primary to the secondary server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// An admin-triggered correcting replication between the two servers.
    CorrectingReplication,
    /// File offload on the primary, ingest from a directory on the secondary.
    Gateway,
}

impl Variant {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CorrectingReplication => "correcting_replication",
            Self::Gateway => "gateway",
        }
    }
}

/// Main configuration structure for the harness
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HarnessConfig {
    /// Replication mechanism under test
    #[serde(default = "default_variant")]
    pub variant: Variant,

    /// Address (host[:port]) of the server objects are uploaded to
    #[serde(default)]
    pub primary_server: String,

    /// Address (host[:port]) of the server objects replicate to
    #[serde(default)]
    pub secondary_server: String,

    #[serde(default)]
    pub login: String,

    #[serde(default)]
    pub password: String,

    /// Replicant account on the primary (correcting replication only)
    #[serde(default)]
    pub replicant_name: Option<String>,

    #[serde(default = "default_replication_timeout_secs")]
    pub replication_timeout_secs: u64,

    #[serde(default = "default_replication_period_secs")]
    pub replication_period_secs: u64,

    /// Where catalog bundles, error bodies and upload exports are written
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    #[serde(default = "default_new_objects_dir")]
    pub new_objects_dir: PathBuf,

    #[serde(default = "default_new_versions_dir")]
    pub new_versions_dir: PathBuf,

    /// Fixed wait before checking that stream replication is off
    #[serde(default = "default_assure_timeout_secs")]
    pub assure_timeout_secs: u64,

    /// Fixed wait between triggering replication and the first poll
    #[serde(default = "default_first_timeout_secs")]
    pub first_timeout_secs: u64,

    /// Polling budget without progress before giving up
    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: u64,

    /// Delay between polls
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,

    /// Settle delay after the gateway ingest job, before each poll
    #[serde(default = "default_download_files_timeout_secs")]
    pub download_files_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub delete_objects_on_error: bool,

    #[serde(default)]
    pub scripts: ScriptsConfig,

    #[serde(default)]
    pub metadata_change: MetadataChangeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

const fn default_variant() -> Variant {
    Variant::Gateway
}

const fn default_replication_timeout_secs() -> u64 {
    3600
}

const fn default_replication_period_secs() -> u64 {
    10
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_new_objects_dir() -> PathBuf {
    PathBuf::from("data/put_new_objects")
}

fn default_new_versions_dir() -> PathBuf {
    PathBuf::from("data/put_new_versions")
}

const fn default_assure_timeout_secs() -> u64 {
    60
}

const fn default_first_timeout_secs() -> u64 {
    30
}

const fn default_max_timeout_secs() -> u64 {
    30
}

const fn default_period_secs() -> u64 {
    10
}

const fn default_download_files_timeout_secs() -> u64 {
    10
}

const fn default_true() -> bool {
    true
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            variant: default_variant(),
            primary_server: String::new(),
            secondary_server: String::new(),
            login: String::new(),
            password: String::new(),
            replicant_name: None,
            replication_timeout_secs: default_replication_timeout_secs(),
            replication_period_secs: default_replication_period_secs(),
            results_dir: default_results_dir(),
            new_objects_dir: default_new_objects_dir(),
            new_versions_dir: default_new_versions_dir(),
            assure_timeout_secs: default_assure_timeout_secs(),
            first_timeout_secs: default_first_timeout_secs(),
            max_timeout_secs: default_max_timeout_secs(),
            period_secs: default_period_secs(),
            download_files_timeout_secs: default_download_files_timeout_secs(),
            delete_objects_on_error: true,
            scripts: ScriptsConfig::default(),
            metadata_change: MetadataChangeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl HarnessConfig {
    pub const fn max_timeout(&self) -> Duration {
        Duration::from_secs(self.max_timeout_secs)
    }

    pub const fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub const fn first_timeout(&self) -> Duration {
        Duration::from_secs(self.first_timeout_secs)
    }

    pub const fn assure_timeout(&self) -> Duration {
        Duration::from_secs(self.assure_timeout_secs)
    }

    pub const fn download_files_timeout(&self) -> Duration {
        Duration::from_secs(self.download_files_timeout_secs)
    }

    /// Copy safe to print: the password is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.password.is_empty() {
            copy.password = "[REDACTED]".to_string();
        }
        copy
    }
}

/// Ids of the server-side admin scripts used by the gateway variant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScriptsConfig {
    /// "Offload files" job on the primary
    #[serde(default = "default_offload_files")]
    pub offload_files: u32,

    /// "Load files from directory" job on the secondary
    #[serde(default = "default_download_files")]
    pub download_files: u32,
}

const fn default_offload_files() -> u32 {
    16
}

const fn default_download_files() -> u32 {
    17
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            offload_files: default_offload_files(),
            download_files: default_download_files(),
        }
    }
}

/// The metadata edit applied to every uploaded object
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MetadataChangeConfig {
    /// Attribute whose value gets `name_suffix` appended
    #[serde(default = "default_name_attribute")]
    pub name_attribute: String,

    #[serde(default = "default_name_suffix")]
    pub name_suffix: String,

    /// Attribute replaced with `scale_value`
    #[serde(default = "default_scale_attribute")]
    pub scale_attribute: String,

    #[serde(default = "default_scale_value")]
    pub scale_value: i64,
}

fn default_name_attribute() -> String {
    "c122".to_string()
}

fn default_name_suffix() -> String {
    " штрих".to_string()
}

fn default_scale_attribute() -> String {
    "c201".to_string()
}

const fn default_scale_value() -> i64 {
    987_654
}

impl Default for MetadataChangeConfig {
    fn default() -> Self {
        Self {
            name_attribute: default_name_attribute(),
            name_suffix: default_name_suffix(),
            scale_attribute: default_scale_attribute(),
            scale_value: default_scale_value(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for the JSON log file; console only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Log to stderr
    #[serde(default = "default_true")]
    pub enable_stdout: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            enable_stdout: true,
        }
    }
}
