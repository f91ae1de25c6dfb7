//! Status projection: stamping the `Accepted` condition and endpoint list
//! back onto a `TrafficManagerBackend`, and the metric series that mirror
//! it.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Resource, ResourceExt};
use serde_json::json;

use crate::crd::backend::{EndpointStatus, TrafficManagerBackend};
use crate::error::Result;
use crate::metrics::{BackendStatusLabels, BackendStatusMetrics};

/// Sets `observed_generation` to the backend's current generation before
/// persisting; stage functions build conditions without knowing the
/// generation they apply to.
fn with_generation(mut condition: Condition, generation: Option<i64>) -> Condition {
    condition.observed_generation = generation;
    condition
}

/// Merge-patches `status.conditions` (just the `Accepted` condition) and
/// `status.endpoints` onto the backend, then records the
/// `backend_status_last_timestamp` gauge for the written condition.
pub async fn patch_status(
    api: &Api<TrafficManagerBackend>,
    backend: &TrafficManagerBackend,
    condition: Condition,
    endpoints: Vec<EndpointStatus>,
    resource_group: Option<String>,
    metrics: &BackendStatusMetrics,
    now_unix: i64,
) -> Result<()> {
    let condition = with_generation(condition, backend.meta().generation);
    let name = backend.name_any();

    let patch = Patch::Merge(json!({
        "status": {
            "conditions": [condition.clone()],
            "endpoints": endpoints,
            "resource_group": resource_group,
        }
    }));
    api.patch_status(&name, &PatchParams::default(), &patch)
        .await?;

    metrics.observe(
        BackendStatusLabels {
            namespace: backend.namespace().unwrap_or_default(),
            name,
            generation: backend.meta().generation.unwrap_or_default(),
            condition: condition.type_,
            status: condition.status,
            reason: condition.reason,
        },
        now_unix,
    );
    Ok(())
}

/// Drops every metric series this backend could plausibly have produced,
/// across every condition/generation it ever passed through, not just
/// whatever is currently on `status.conditions`. Called once on deletion,
/// after the cloud-cleanup finalizer has been removed, so the gauge doesn't
/// linger once the object is gone.
pub fn drop_metric_series(backend: &TrafficManagerBackend, metrics: &BackendStatusMetrics) {
    metrics.remove_all(&backend.namespace().unwrap_or_default(), &backend.name_any());
}
