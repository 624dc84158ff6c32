use crate::{
    config::{DatabaseName, Endpoint, Locator},
    migrate::FailurePolicy,
    tool::Tools,
};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
#[serde(rename_all = "kebab-case")]
pub struct AppConfig {
    pub tools: Tools,
    pub jobs: Jobs,
    pub backups: Vec<BackupEntry>,
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
#[serde(rename_all = "kebab-case")]
pub struct Jobs {
    /// Number of finished jobs to keep in the registry; unbounded when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retain: Option<usize>,
    pub failure_policy: FailurePolicy,
}

/// A scheduled export: dump `database` at `locator` into a timestamped
/// archive under `directory`, keeping the newest `retention` archives.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackupEntry {
    pub locator: Locator,
    pub database: DatabaseName,
    #[serde(with = "humantime_serde")]
    pub every: Duration,
    #[serde(default = "default_retention")]
    pub retention: usize,
    pub directory: PathBuf,
}

fn default_retention() -> usize {
    7
}

impl BackupEntry {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            locator: self.locator.clone(),
            database: self.database.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("invalid configuration string")]
    InvalidConfigString(String, #[source] eyre::Report),
    #[error("invalid configuration file {}", .0.display())]
    InvalidConfigFile(PathBuf, #[source] eyre::Report),
    #[error("i/o error reading configuration file {}", .0.display())]
    IoError(PathBuf, std::io::Error),
}

impl AppConfig {
    pub fn parse(s: &str) -> Result<AppConfig, ConfigLoadError> {
        toml::from_str(s).map_err(|e| ConfigLoadError::InvalidConfigString(s.to_owned(), e.into()))
    }

    pub async fn parse_file(p: &Path) -> Result<AppConfig, ConfigLoadError> {
        let config_string = tokio::fs::read_to_string(p)
            .await
            .map_err(|e| ConfigLoadError::IoError(p.to_owned(), e))?;
        toml::from_str(&config_string)
            .map_err(|e| ConfigLoadError::InvalidConfigFile(p.to_owned(), e.into()))
    }
}
