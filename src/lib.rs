use self::cli::{Cli, Commands, ManifestCommands, ScheduleCommands};
use self::config::{ConfigLoadError, DeploymentConfig};
use self::kubernetes_objects::apply::{ApplyError, apply_cronjob};
use self::kubernetes_objects::cronjob::{build_cronjob, to_yaml};
use self::kubernetes_objects::policy::{self, PolicyViolation};
use self::routine::scrape::error::ScrapeError;
use self::template::TemplateError;
use clap::Parser;
use jiff::Timestamp;
use k8s_openapi::api::batch::v1::CronJob;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, info};
use tracing_error::ExtractSpanTrace;
use tracing_error::SpanTrace;

pub(crate) mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod kubernetes_objects;
pub mod routine;
pub mod schedule;
pub mod shutdown;
pub mod template;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to load config.\n{0}")]
    ConfigError(#[from] ConfigLoadError),

    #[error("Failed to initialize kubernetes client.\n{0}")]
    KubeClientError(#[from] kube::Error),

    #[error("Scrape failed: {0}")]
    ScrapeError(#[from] ScrapeError),

    #[error("Failed to render manifest: {0}")]
    TemplateError(#[from] TemplateError),

    #[error("Failed to (de)serialize manifest '{}': {source}", path.display())]
    ManifestYamlError {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Failed to access '{}': {source}", path.display())]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Manifest violates the execution policy:\n{}", format_violations(.0))]
    PolicyError(Vec<PolicyViolation>),

    #[error("Failed to apply manifest: {0}")]
    ApplyError(#[from] ApplyError),

    #[error("Schedule '{0}' has no upcoming run")]
    NoUpcomingRun(String),
}

impl ExtractSpanTrace for AppError {
    fn span_trace(&self) -> Option<&SpanTrace> {
        match self {
            AppError::ScrapeError(e) => e.span_trace(),
            AppError::ApplyError(e) => e.span_trace(),
            _ => None,
        }
    }
}

fn format_violations(violations: &[PolicyViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("  - {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn app() -> Result<(), AppError> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scrape { scrape, alert } => {
            routine::scrape::scrape(scrape, alert).await?;
        }
        Commands::Manifest(command) => {
            let config = DeploymentConfig::new_from_file(&cli.config).await?;
            info!("Config Loaded.");
            manifest(command, &config).await?;
        }
        Commands::Schedule(ScheduleCommands::Next { count }) => {
            let config = DeploymentConfig::new_from_file(&cli.config).await?;
            for tick in upcoming_runs(&config, Timestamp::now(), count)? {
                println!("{tick}");
            }
        }
    }

    Ok(())
}

async fn manifest(command: ManifestCommands, config: &DeploymentConfig) -> Result<(), AppError> {
    match command {
        ManifestCommands::Render { tag, output } => {
            let cronjob = checked_cronjob(config, &tag)?;
            let yaml = to_yaml(&cronjob).map_err(|source| AppError::ManifestYamlError {
                path: output.clone().unwrap_or_default(),
                source,
            })?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, yaml)
                        .await
                        .map_err(|source| AppError::IoError {
                            path: path.clone(),
                            source,
                        })?;
                    info!("CronJob written to '{}'.", path.display());
                }
                None => print!("{yaml}"),
            }
        }
        ManifestCommands::Check { file } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .map_err(|source| AppError::IoError {
                    path: file.clone(),
                    source,
                })?;
            let cronjob: CronJob =
                serde_yaml::from_str(&text).map_err(|source| AppError::ManifestYamlError {
                    path: file.clone(),
                    source,
                })?;
            let violations = policy::check(&cronjob, config);
            if !violations.is_empty() {
                return Err(AppError::PolicyError(violations));
            }
            info!("'{}' satisfies the execution policy.", file.display());
        }
        ManifestCommands::Apply { tag } => {
            let cronjob = checked_cronjob(config, &tag)?;
            let client = kube::Client::try_default().await?;
            info!("Kubernetes Client Initialized.");
            apply_cronjob(client, &cronjob).await?;
        }
    }
    Ok(())
}

/// Next `count` fire times in UTC, honouring the CronJob's `timeZone`.
fn upcoming_runs(
    config: &DeploymentConfig,
    after: Timestamp,
    count: usize,
) -> Result<Vec<Timestamp>, AppError> {
    let ticks: Vec<Timestamp> = config
        .schedule
        .upcoming(after, &config.schedule_zone)
        .take(count)
        .collect();
    if ticks.len() < count {
        return Err(AppError::NoUpcomingRun(config.schedule.to_string()));
    }
    Ok(ticks)
}

/// Renders the descriptor and refuses to hand out anything the policy rejects.
fn checked_cronjob(config: &DeploymentConfig, tag: &str) -> Result<CronJob, AppError> {
    let cronjob = build_cronjob(config, tag)?;
    let violations = policy::check(&cronjob, config);
    if violations.is_empty() {
        Ok(cronjob)
    } else {
        error!("Rendered CronJob violates the execution policy.");
        Err(AppError::PolicyError(violations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes_objects::fixtures::deployment;

    #[test]
    fn test_checked_cronjob() {
        assert!(checked_cronjob(&deployment(), "v1.4.0").is_ok());
        assert!(matches!(
            checked_cronjob(&deployment(), "bad tag"),
            Err(AppError::TemplateError(_))
        ));
    }

    #[test]
    fn test_policy_error_lists_violations() {
        let err = AppError::PolicyError(vec![
            PolicyViolation::BackoffLimit(Some(6)),
            PolicyViolation::ContainerCount(2),
        ]);
        assert_eq!(
            err.to_string(),
            "Manifest violates the execution policy:\n  - backoffLimit is Some(6), expected 0\n  - job template declares 2 containers, expected exactly 1"
        );
    }

    #[test]
    fn test_upcoming_runs_follow_time_zone() {
        let mut config = deployment();
        config.schedule = "0 3 * * *".parse().unwrap();
        config.time_zone = Some("Europe/Zurich".to_string());
        config.schedule_zone = jiff::tz::TimeZone::get("Europe/Zurich").unwrap();

        let after: Timestamp = "2024-06-01T00:00:00Z".parse().unwrap();
        let ticks = upcoming_runs(&config, after, 2).unwrap();
        assert_eq!(
            ticks.iter().map(|t| t.to_string()).collect::<Vec<_>>(),
            vec!["2024-06-01T01:00:00Z", "2024-06-02T01:00:00Z"]
        );
    }

    #[test]
    fn test_upcoming_runs_reports_exhausted_schedule() {
        let mut config = deployment();
        config.schedule = "0 0 31 2 *".parse().unwrap();
        let after: Timestamp = "2024-06-01T00:00:00Z".parse().unwrap();
        assert!(matches!(
            upcoming_runs(&config, after, 1),
            Err(AppError::NoUpcomingRun(_))
        ));
    }

    #[tokio::test]
    async fn test_render_writes_checkable_file() {
        let config = deployment();
        let path = std::env::temp_dir().join(format!("aare-scraper-{}.yaml", std::process::id()));
        manifest(
            ManifestCommands::Render {
                tag: "v1.4.0".to_string(),
                output: Some(path.clone()),
            },
            &config,
        )
        .await
        .unwrap();
        manifest(ManifestCommands::Check { file: path.clone() }, &config)
            .await
            .unwrap();
        let _ = std::fs::remove_file(path);
    }
}
