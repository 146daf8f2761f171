use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::{HarnessConfig, Variant};
use crate::infrastructure::logging::logger::parse_log_level;

/// Project config file, read from the working directory.
pub const CONFIG_FILE: &str = "replication.yaml";
/// Optional local overrides, e.g. credentials kept out of version control.
pub const LOCAL_CONFIG_FILE: &str = "replication.local.yaml";
/// Prefix of environment overrides; `__` separates nested keys.
pub const ENV_PREFIX: &str = "REPLICATION_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} server address cannot be empty")]
    EmptyServer(&'static str),

    #[error("Login cannot be empty")]
    EmptyLogin,

    #[error("Invalid {0}: must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("replicant_name is required for the correcting_replication variant")]
    MissingReplicant,
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. replication.yaml
    /// 3. replication.local.yaml (optional)
    /// 4. Environment variables (REPLICATION_* prefix)
    pub fn load() -> Result<HarnessConfig> {
        let config: HarnessConfig = Figment::new()
            .merge(Serialized::defaults(HarnessConfig::default()))
            .merge(Yaml::file(CONFIG_FILE))
            .merge(Yaml::file(LOCAL_CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honouring environment
    /// overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<HarnessConfig> {
        let path = path.as_ref();
        if !path.is_file() {
            anyhow::bail!("Config file {} does not exist", path.display());
        }

        let config: HarnessConfig = Figment::new()
            .merge(Serialized::defaults(HarnessConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &HarnessConfig) -> Result<(), ConfigError> {
        if config.primary_server.trim().is_empty() {
            return Err(ConfigError::EmptyServer("Primary"));
        }
        if config.secondary_server.trim().is_empty() {
            return Err(ConfigError::EmptyServer("Secondary"));
        }
        if config.login.is_empty() {
            return Err(ConfigError::EmptyLogin);
        }

        if config.period_secs == 0 {
            return Err(ConfigError::ZeroDuration("period_secs"));
        }
        if config.max_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("max_timeout_secs"));
        }

        if parse_log_level(&config.logging.level).is_err() {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.variant == Variant::CorrectingReplication
            && config
                .replicant_name
                .as_deref()
                .is_none_or(|name| name.trim().is_empty())
        {
            return Err(ConfigError::MissingReplicant);
        }

        Ok(())
    }
}
