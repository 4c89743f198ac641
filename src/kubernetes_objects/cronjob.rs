use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapEnvSource, Container, EnvFromSource, PodSpec, PodTemplateSpec, SecretEnvSource,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{Level, instrument};

use super::{BACKOFF_LIMIT, MANAGER_NAME, RESTART_POLICY};
use crate::config::DeploymentConfig;
use crate::template::{TemplateError, substitute_tag};

/// Renders the descriptor for one image tag.
#[instrument(
    "build_cronjob",
    level = Level::DEBUG,
    skip(config),
    fields(cronjob_name = %config.name, kubernetes_namespace = %config.namespace)
)]
pub fn build_cronjob(config: &DeploymentConfig, tag: &str) -> Result<CronJob, TemplateError> {
    let image = substitute_tag(&config.image, tag)?;
    let labels = labels(config);

    let container = Container {
        name: config.name.clone(),
        image: Some(image),
        image_pull_policy: config.image_pull_policy.clone(),
        command: Some(config.command.clone()),
        env_from: Some(env_from(config)),
        ..Default::default()
    };

    let job_spec = JobSpec {
        backoff_limit: Some(BACKOFF_LIMIT),
        active_deadline_seconds: config.active_deadline_seconds,
        template: PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(labels.clone()),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![container],
                restart_policy: Some(RESTART_POLICY.to_string()),
                ..Default::default()
            }),
        },
        ..Default::default()
    };

    Ok(CronJob {
        metadata: ObjectMeta {
            name: Some(config.name.clone()),
            namespace: Some(config.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(CronJobSpec {
            schedule: config.schedule.to_string(),
            time_zone: config.time_zone.clone(),
            concurrency_policy: config.concurrency_policy.map(|p| p.as_str().to_string()),
            starting_deadline_seconds: config.starting_deadline_seconds,
            successful_jobs_history_limit: Some(config.history.successful),
            failed_jobs_history_limit: Some(config.history.failed),
            job_template: JobTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(job_spec),
            },
            ..Default::default()
        }),
        status: None,
    })
}

fn labels(config: &DeploymentConfig) -> BTreeMap<String, String> {
    let mut labels = config.labels.clone();
    labels.insert("app.kubernetes.io/name".to_string(), config.name.clone());
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        MANAGER_NAME.to_string(),
    );
    labels
}

/// Secrets first, then config maps, in configured order.
fn env_from(config: &DeploymentConfig) -> Vec<EnvFromSource> {
    let secrets = config.env_from.secrets.iter().map(|name| EnvFromSource {
        secret_ref: Some(SecretEnvSource {
            name: name.clone(),
            optional: Some(false),
        }),
        ..Default::default()
    });
    let config_maps = config.env_from.config_maps.iter().map(|name| EnvFromSource {
        config_map_ref: Some(ConfigMapEnvSource {
            name: name.clone(),
            optional: Some(false),
        }),
        ..Default::default()
    });
    secrets.chain(config_maps).collect()
}

/// YAML as handed to `kubectl apply -f`.
pub fn to_yaml(cronjob: &CronJob) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(cronjob)
}
