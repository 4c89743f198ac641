//! Invariants every rendered or hand-edited descriptor must satisfy before it
//! reaches the cluster.

use std::time::Duration;

use k8s_openapi::api::batch::v1::CronJob;
use thiserror::Error;
use tracing::{debug, instrument};

use super::{BACKOFF_LIMIT, RESTART_POLICY};
use crate::config::DeploymentConfig;
use crate::schedule::{CronParseError, CronSchedule};
use crate::template::unresolved_tokens;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("{0} is missing")]
    MissingSpec(&'static str),

    #[error("schedule '{schedule}' is not a valid cron expression: {error}")]
    InvalidSchedule {
        schedule: String,
        error: CronParseError,
    },

    #[error("schedule '{schedule}' fires every {actual:?}, expected every {expected:?}")]
    ScheduleInterval {
        schedule: String,
        expected: Duration,
        actual: Option<Duration>,
    },

    #[error("job template declares {0} containers, expected exactly 1")]
    ContainerCount(usize),

    #[error("restartPolicy is {0:?}, expected \"Never\"")]
    RestartPolicy(Option<String>),

    #[error("backoffLimit is {0:?}, expected 0")]
    BackoffLimit(Option<i32>),

    #[error("{kind} jobs history limit is {actual:?}, expected {expected}")]
    HistoryLimit {
        kind: &'static str,
        expected: i32,
        actual: Option<i32>,
    },

    #[error("unresolved template token '{0}'")]
    UnresolvedToken(String),

    #[error("descriptor could not be serialized for the token scan: {0}")]
    Unserializable(String),

    #[error("{kind} '{name}' is not referenced by envFrom")]
    EnvSourceMissing { kind: &'static str, name: String },
}

/// Checks `cronjob` against the fixed execution policy and the configured values.
#[instrument("policy_check", level = "debug", skip_all)]
pub fn check(cronjob: &CronJob, config: &DeploymentConfig) -> Vec<PolicyViolation> {
    let mut violations = Vec::new();

    violations.extend(token_violations(serde_json::to_string(cronjob)));

    let Some(spec) = &cronjob.spec else {
        violations.push(PolicyViolation::MissingSpec("spec"));
        return violations;
    };

    match spec.schedule.parse::<CronSchedule>() {
        Ok(schedule) => {
            let actual = schedule.fixed_interval();
            if actual != Some(config.expected_interval) {
                violations.push(PolicyViolation::ScheduleInterval {
                    schedule: spec.schedule.clone(),
                    expected: config.expected_interval,
                    actual,
                });
            }
        }
        Err(error) => violations.push(PolicyViolation::InvalidSchedule {
            schedule: spec.schedule.clone(),
            error,
        }),
    }

    for (kind, expected, actual) in [
        (
            "successful",
            config.history.successful,
            spec.successful_jobs_history_limit,
        ),
        (
            "failed",
            config.history.failed,
            spec.failed_jobs_history_limit,
        ),
    ] {
        if actual != Some(expected) {
            violations.push(PolicyViolation::HistoryLimit {
                kind,
                expected,
                actual,
            });
        }
    }

    let Some(job) = &spec.job_template.spec else {
        violations.push(PolicyViolation::MissingSpec("spec.jobTemplate.spec"));
        return violations;
    };

    if job.backoff_limit != Some(BACKOFF_LIMIT) {
        violations.push(PolicyViolation::BackoffLimit(job.backoff_limit));
    }

    let Some(pod) = &job.template.spec else {
        violations.push(PolicyViolation::MissingSpec(
            "spec.jobTemplate.spec.template.spec",
        ));
        return violations;
    };

    if pod.restart_policy.as_deref() != Some(RESTART_POLICY) {
        violations.push(PolicyViolation::RestartPolicy(pod.restart_policy.clone()));
    }

    if pod.containers.len() != 1 {
        violations.push(PolicyViolation::ContainerCount(pod.containers.len()));
    }

    let env_from = pod
        .containers
        .iter()
        .flat_map(|c| c.env_from.iter().flatten());
    let mut secrets = Vec::new();
    let mut config_maps = Vec::new();
    for source in env_from {
        if let Some(secret) = &source.secret_ref {
            secrets.push(secret.name.as_str());
        }
        if let Some(config_map) = &source.config_map_ref {
            config_maps.push(config_map.name.as_str());
        }
    }
    for name in &config.env_from.secrets {
        if !secrets.contains(&name.as_str()) {
            violations.push(PolicyViolation::EnvSourceMissing {
                kind: "secret",
                name: name.clone(),
            });
        }
    }
    for name in &config.env_from.config_maps {
        if !config_maps.contains(&name.as_str()) {
            violations.push(PolicyViolation::EnvSourceMissing {
                kind: "config map",
                name: name.clone(),
            });
        }
    }

    debug!("{} policy violation(s) found", violations.len());
    violations
}

fn token_violations(rendered: serde_json::Result<String>) -> Vec<PolicyViolation> {
    match rendered {
        Ok(text) => unresolved_tokens(&text)
            .into_iter()
            .map(PolicyViolation::UnresolvedToken)
            .collect(),
        Err(e) => vec![PolicyViolation::Unserializable(e.to_string())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes_objects::cronjob::build_cronjob;
    use crate::kubernetes_objects::fixtures::deployment;
    use k8s_openapi::api::core::v1::Container;

    fn parse(yaml: &str) -> CronJob {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_rendered_cronjob_passes() {
        let config = deployment();
        let cronjob = build_cronjob(&config, "v1.4.0").unwrap();
        assert_eq!(check(&cronjob, &config), vec![]);
    }

    #[test]
    fn test_shipped_descriptor_only_lacks_its_tag() {
        let cronjob = parse(include_str!("../../deploy/cronjob.yaml"));
        assert_eq!(
            check(&cronjob, &deployment()),
            vec![PolicyViolation::UnresolvedToken("{{TAG}}".to_string())]
        );
    }

    #[test]
    fn test_hand_edited_descriptor() {
        let cronjob = parse(
            r#"
            apiVersion: batch/v1
            kind: CronJob
            metadata:
              name: aare-scraper
            spec:
              schedule: "*/15 * * * *"
              successfulJobsHistoryLimit: 3
              jobTemplate:
                spec:
                  backoffLimit: 2
                  template:
                    spec:
                      restartPolicy: OnFailure
                      containers:
                        - name: aare-scraper
                          image: "ghcr.io/aare-guru/aare-scraper:${TAG}"
                          envFrom:
                            - secretRef:
                                name: aare-scraper-secrets
            "#,
        );
        let violations = check(&cronjob, &deployment());
        assert_eq!(
            violations,
            vec![
                PolicyViolation::UnresolvedToken("${TAG}".to_string()),
                PolicyViolation::ScheduleInterval {
                    schedule: "*/15 * * * *".to_string(),
                    expected: Duration::from_secs(1800),
                    actual: Some(Duration::from_secs(900)),
                },
                PolicyViolation::HistoryLimit {
                    kind: "failed",
                    expected: 1,
                    actual: None,
                },
                PolicyViolation::BackoffLimit(Some(2)),
                PolicyViolation::RestartPolicy(Some("OnFailure".to_string())),
                PolicyViolation::EnvSourceMissing {
                    kind: "secret",
                    name: "aare-scraper-telegram".to_string(),
                },
                PolicyViolation::EnvSourceMissing {
                    kind: "config map",
                    name: "aare-scraper-config".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_sidecar_is_rejected() {
        let config = deployment();
        let mut cronjob = build_cronjob(&config, "v1").unwrap();
        let pod = cronjob
            .spec
            .as_mut()
            .and_then(|s| s.job_template.spec.as_mut())
            .and_then(|j| j.template.spec.as_mut())
            .unwrap();
        pod.containers.push(Container {
            name: "sidecar".to_string(),
            ..Default::default()
        });
        assert_eq!(
            check(&cronjob, &config),
            vec![PolicyViolation::ContainerCount(2)]
        );
    }

    #[test]
    fn test_invalid_schedule_and_missing_job_spec() {
        let cronjob = parse(
            r#"
            apiVersion: batch/v1
            kind: CronJob
            metadata:
              name: aare-scraper
            spec:
              schedule: "every half hour"
              successfulJobsHistoryLimit: 3
              failedJobsHistoryLimit: 1
              jobTemplate: {}
            "#,
        );
        let violations = check(&cronjob, &deployment());
        assert!(matches!(
            violations[0],
            PolicyViolation::InvalidSchedule { .. }
        ));
        assert_eq!(
            violations[1],
            PolicyViolation::MissingSpec("spec.jobTemplate.spec")
        );
        assert_eq!(violations.len(), 2);
    }

    #[test]
    fn test_serialization_failure_is_a_violation() {
        let err = serde_json::from_str::<String>("{").unwrap_err();
        assert!(matches!(
            token_violations(Err(err)).as_slice(),
            [PolicyViolation::Unserializable(_)]
        ));
        assert_eq!(
            token_violations(Ok(r#"{"image":"scraper:{{ TAG }}"}"#.to_string())),
            vec![PolicyViolation::UnresolvedToken("{{ TAG }}".to_string())]
        );
    }

    #[test]
    fn test_missing_spec() {
        let cronjob = parse("apiVersion: batch/v1\nkind: CronJob\nmetadata:\n  name: x\n");
        assert_eq!(
            check(&cronjob, &deployment()),
            vec![PolicyViolation::MissingSpec("spec")]
        );
    }
}
