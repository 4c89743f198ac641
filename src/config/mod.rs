mod raw;
pub mod scrape;

pub use self::raw::ConfigParseError;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use jiff::tz::TimeZone;
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

use self::raw::RawDeploymentConfig;
use crate::schedule::CronSchedule;

/// Everything needed to render the CronJob descriptor.
#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    pub name: String,
    pub namespace: String,
    pub schedule: CronSchedule,
    pub expected_interval: Duration,
    pub time_zone: Option<String>,
    /// Zone the schedule's wall-clock fields are read in, UTC unless `time_zone` is set
    pub schedule_zone: TimeZone,
    /// Image reference with the tag still templated
    pub image: String,
    pub command: Vec<String>,
    pub image_pull_policy: Option<String>,
    pub env_from: EnvSources,
    pub history: HistoryLimits,
    pub concurrency_policy: Option<ConcurrencyPolicy>,
    pub starting_deadline_seconds: Option<i64>,
    pub active_deadline_seconds: Option<i64>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSources {
    pub secrets: Vec<String>,
    pub config_maps: Vec<String>,
}

/// Number of finished Jobs the controller keeps around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimits {
    pub successful: i32,
    pub failed: i32,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyPolicy {
    Allow,
    Forbid,
    Replace,
}

impl ConcurrencyPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcurrencyPolicy::Allow => "Allow",
            ConcurrencyPolicy::Forbid => "Forbid",
            ConcurrencyPolicy::Replace => "Replace",
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("Failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse '{}': {source}", path.display())]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Invalid deployment config '{}': {source}", path.display())]
    Invalid {
        path: PathBuf,
        source: ConfigParseError,
    },
}

impl DeploymentConfig {
    #[instrument("load_deployment_config", level = "debug")]
    pub async fn new_from_file(path: &Path) -> Result<Self, ConfigLoadError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigLoadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_yaml(&text).map_err(|e| e.with_path(path))
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigLoadError> {
        let raw: RawDeploymentConfig =
            serde_yaml::from_str(text).map_err(|source| ConfigLoadError::Yaml {
                path: PathBuf::new(),
                source,
            })?;
        DeploymentConfig::try_from(raw).map_err(|source| ConfigLoadError::Invalid {
            path: PathBuf::new(),
            source,
        })
    }
}

impl ConfigLoadError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.to_path_buf();
        match self {
            ConfigLoadError::Io { source, .. } => ConfigLoadError::Io { path, source },
            ConfigLoadError::Yaml { source, .. } => ConfigLoadError::Yaml { path, source },
            ConfigLoadError::Invalid { source, .. } => ConfigLoadError::Invalid { path, source },
        }
    }
}
