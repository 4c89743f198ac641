use std::collections::BTreeMap;
use std::time::Duration;

use duration_string::DurationString;
use jiff::tz::TimeZone;
use serde::Deserialize;
use thiserror::Error;

use super::{ConcurrencyPolicy, DeploymentConfig, EnvSources, HistoryLimits};
use crate::schedule::{CronParseError, CronSchedule};
use crate::template::{TemplateError, validate_image_template};

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub(super) struct RawDeploymentConfig {
    pub(super) name: String,
    pub(super) namespace: String,

    /// Five-field cron expression, evaluated by the cluster
    pub(super) schedule: String,

    /// Period the schedule must amount to
    #[serde(default = "default_expected_interval")]
    pub(super) expected_interval: DurationString,

    pub(super) time_zone: Option<String>,

    /// Image reference ending in `:{{TAG}}`
    ///
    /// Example: "ghcr.io/aare-guru/aare-scraper:{{TAG}}"
    pub(super) image: String,

    pub(super) command: Vec<String>,

    pub(super) image_pull_policy: Option<String>,

    #[serde(default)]
    pub(super) env_from: RawEnvSources,

    #[serde(default)]
    pub(super) history: RawHistoryLimits,

    pub(super) concurrency_policy: Option<ConcurrencyPolicy>,

    pub(super) starting_deadline: Option<DurationString>,

    pub(super) active_deadline: Option<DurationString>,

    #[serde(default)]
    pub(super) labels: BTreeMap<String, String>,
}

#[cfg_attr(test, derive(PartialEq))]
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub(super) struct RawEnvSources {
    #[serde(default)]
    pub(super) secrets: Vec<String>,
    #[serde(default)]
    pub(super) config_maps: Vec<String>,
}

#[cfg_attr(test, derive(PartialEq))]
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub(super) struct RawHistoryLimits {
    #[serde(default = "default_successful_history")]
    pub(super) successful: i64,
    #[serde(default = "default_failed_history")]
    pub(super) failed: i64,
}

impl Default for RawHistoryLimits {
    fn default() -> Self {
        Self {
            successful: default_successful_history(),
            failed: default_failed_history(),
        }
    }
}

fn default_expected_interval() -> DurationString {
    Duration::from_secs(30 * 60).into()
}
const fn default_successful_history() -> i64 {
    3
}
const fn default_failed_history() -> i64 {
    1
}

#[derive(Error, Debug)]
pub enum ConfigParseError {
    #[error("'{field}' must be a DNS-1123 label, got '{value}'")]
    InvalidLabel { field: &'static str, value: String },

    #[error("'{field}' must be a DNS-1123 subdomain, got '{value}'")]
    InvalidSubdomain { field: &'static str, value: String },

    #[error("'schedule' is not a valid cron expression: {0}")]
    Schedule(#[from] CronParseError),

    #[error("'schedule' ({schedule}) does not fire every {expected:?}")]
    ScheduleInterval {
        schedule: String,
        expected: Duration,
    },

    #[error("'time_zone' '{0}' is not a known IANA time zone")]
    UnknownTimeZone(String),

    #[error("'image': {0}")]
    Image(#[from] TemplateError),

    #[error("'command' must not be empty")]
    EmptyCommand,

    #[error("'env_from' must reference at least one secret or config map")]
    NoEnvSources,

    #[error("'history.{kind}' must be between 0 and {max}, got {value}")]
    HistoryLimit {
        kind: &'static str,
        value: i64,
        max: i32,
    },

    #[error("'{field}' must be a whole number of seconds greater than zero")]
    Deadline { field: &'static str },
}

impl TryFrom<RawDeploymentConfig> for DeploymentConfig {
    type Error = ConfigParseError;

    fn try_from(raw: RawDeploymentConfig) -> Result<Self, Self::Error> {
        check_label("name", &raw.name)?;
        check_label("namespace", &raw.namespace)?;

        let schedule: CronSchedule = raw.schedule.parse()?;
        let expected_interval: Duration = raw.expected_interval.into();
        if schedule.fixed_interval() != Some(expected_interval) {
            return Err(ConfigParseError::ScheduleInterval {
                schedule: schedule.to_string(),
                expected: expected_interval,
            });
        }

        let schedule_zone = match &raw.time_zone {
            Some(tz) => TimeZone::get(tz)
                .map_err(|_| ConfigParseError::UnknownTimeZone(tz.clone()))?,
            None => TimeZone::UTC,
        };

        validate_image_template(&raw.image)?;

        if raw.command.is_empty() {
            return Err(ConfigParseError::EmptyCommand);
        }

        let env_from = EnvSources {
            secrets: raw.env_from.secrets,
            config_maps: raw.env_from.config_maps,
        };
        if env_from.secrets.is_empty() && env_from.config_maps.is_empty() {
            return Err(ConfigParseError::NoEnvSources);
        }
        for name in &env_from.secrets {
            check_subdomain("env_from.secrets", name)?;
        }
        for name in &env_from.config_maps {
            check_subdomain("env_from.config_maps", name)?;
        }

        let history = HistoryLimits {
            successful: history_limit("successful", raw.history.successful)?,
            failed: history_limit("failed", raw.history.failed)?,
        };

        Ok(DeploymentConfig {
            name: raw.name,
            namespace: raw.namespace,
            schedule,
            expected_interval,
            time_zone: raw.time_zone,
            schedule_zone,
            image: raw.image,
            command: raw.command,
            image_pull_policy: raw.image_pull_policy,
            env_from,
            history,
            concurrency_policy: raw.concurrency_policy,
            starting_deadline_seconds: deadline("starting_deadline", raw.starting_deadline)?,
            active_deadline_seconds: deadline("active_deadline", raw.active_deadline)?,
            labels: raw.labels,
        })
    }
}

fn history_limit(kind: &'static str, value: i64) -> Result<i32, ConfigParseError> {
    i32::try_from(value)
        .ok()
        .filter(|v| *v >= 0)
        .ok_or(ConfigParseError::HistoryLimit {
            kind,
            value,
            max: i32::MAX,
        })
}

/// Deadlines are rendered as `int64` seconds.
fn deadline(
    field: &'static str,
    value: Option<DurationString>,
) -> Result<Option<i64>, ConfigParseError> {
    let Some(d) = value.map(Duration::from) else {
        return Ok(None);
    };
    if d.is_zero() || d.subsec_nanos() != 0 {
        return Err(ConfigParseError::Deadline { field });
    }
    i64::try_from(d.as_secs())
        .map(Some)
        .map_err(|_| ConfigParseError::Deadline { field })
}

fn is_dns1123_label(value: &str) -> bool {
    let bytes = value.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= 63
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[0] != b'-'
        && bytes[bytes.len() - 1] != b'-'
}

fn is_dns1123_subdomain(value: &str) -> bool {
    value.len() <= 253 && value.split('.').all(is_dns1123_label)
}

fn check_label(field: &'static str, value: &str) -> Result<(), ConfigParseError> {
    if is_dns1123_label(value) {
        Ok(())
    } else {
        Err(ConfigParseError::InvalidLabel {
            field,
            value: value.to_string(),
        })
    }
}

fn check_subdomain(field: &'static str, value: &str) -> Result<(), ConfigParseError> {
    if is_dns1123_subdomain(value) {
        Ok(())
    } else {
        Err(ConfigParseError::InvalidSubdomain {
            field,
            value: value.to_string(),
        })
    }
}
