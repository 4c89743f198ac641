use k8s_openapi::api::batch::v1::CronJob;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use thiserror::Error;
use tracing::{Instrument, info, instrument, trace_span};
use tracing_error::{ExtractSpanTrace, SpanTrace};

use super::MANAGER_NAME;
use crate::error::{SpannedErr, SpannedExt};

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("CronJob has no metadata.{0}")]
    MissingMetadata(&'static str, SpanTrace),

    #[error("Kubernetes client error: {0}")]
    KubeClient(SpannedErr<kube::Error>),
}

impl ExtractSpanTrace for ApplyError {
    fn span_trace(&self) -> Option<&SpanTrace> {
        match self {
            ApplyError::MissingMetadata(_, span_trace) => Some(span_trace),
            ApplyError::KubeClient(e) => e.span_trace(),
        }
    }
}

/// Server-side applies the descriptor, taking ownership of every field it sets.
#[instrument("apply_cronjob", skip_all)]
pub async fn apply_cronjob(client: Client, cronjob: &CronJob) -> Result<CronJob, ApplyError> {
    let name = cronjob
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| ApplyError::MissingMetadata("name", SpanTrace::capture()))?;
    let namespace = cronjob
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| ApplyError::MissingMetadata("namespace", SpanTrace::capture()))?;

    let api: Api<CronJob> = Api::namespaced(client, namespace);
    let params = PatchParams::apply(MANAGER_NAME).force();

    let applied = async {
        api.patch(name, &params, &Patch::Apply(cronjob))
            .await
            .with_span_trace()
            .map_err(ApplyError::KubeClient)
    }
    .instrument(trace_span!(
        "patch_cronjob",
        kubernetes_namespace = %namespace,
        cronjob_name = %name
    ))
    .await?;

    info!(
        "CronJob '{}' applied in namespace '{}' (resourceVersion {}).",
        name,
        namespace,
        applied.metadata.resource_version.as_deref().unwrap_or("<unknown>")
    );
    Ok(applied)
}
