use std::collections::HashMap;
use std::sync::Arc;

use kube::api::Api;
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType};
use kube::{Resource, ResourceExt};
use tokio::time::Duration;
use tracing::{field, info, instrument, Span};

use crate::backend::endpoints::InvalidExport;
use crate::backend::validate::{self, Stage};
use crate::backend::{convergence, delete, endpoints, status, Context, CLOUD_CLEANUP_FINALIZER, METRIC_FINALIZER};
use crate::crd::backend::TrafficManagerBackend;
use crate::crd::service_export::InternalServiceExport;
use crate::crd::service_import::ServiceImport;
use crate::crd::tm_profile::TrafficManagerProfile;
use crate::error::{Error, Result};
use crate::finalizer;
use crate::telemetry;

/// Steady-state requeue once a backend is successfully converged.
const STEADY_STATE_REQUEUE: Duration = Duration::from_secs(10 * 60);
/// Requeue while waiting on a dependency that may still become ready
/// (unprogrammed profile, cloud profile not yet provisioned, stale import).
const PENDING_REQUEUE: Duration = Duration::from_secs(30);

#[instrument(skip(ctx, backend), fields(trace_id))]
pub async fn reconcile(backend: Arc<TrafficManagerBackend>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));
    let _timer = ctx.metrics.reconcile.count_and_measure(&trace_id);
    ctx.diagnostics.write().await.last_event = chrono::Utc::now();

    let namespace = backend.namespace().ok_or_else(|| {
        Error::UserInputError("TrafficManagerBackend must be namespaced".to_string())
    })?;
    let name = backend.name_any();
    let api = Api::<TrafficManagerBackend>::namespaced(ctx.client.clone(), &namespace);

    if backend.meta().deletion_timestamp.is_some() {
        info!("deleting TrafficManagerBackend {name} in {namespace}");
        return delete::cleanup(backend, ctx).await;
    }

    if let Err(e) = finalizer::ensure(&api, backend.as_ref(), METRIC_FINALIZER).await {
        return if e.is_conflict() { Ok(Action::await_change()) } else { Err(e) };
    }

    let profiles = Api::<TrafficManagerProfile>::namespaced(ctx.client.clone(), &namespace);
    let profile = match validate::profile_stage(&profiles, &backend).await {
        Stage::Proceed(profile) => profile,
        Stage::Stop(condition) => {
            status::patch_status(&api, &backend, condition, vec![], None, &ctx.metrics.backend_status, now())
                .await?;
            return Ok(Action::requeue(PENDING_REQUEUE));
        }
        Stage::Fail(e) => return Err(e),
    };
    let resource_group = profile.spec.resource_group.clone();
    let profile_name = backend.spec.profile.name.clone();
    let backend_uid = backend.uid().unwrap_or_default();

    match validate::cloud_profile_stage(ctx.cloud.as_ref(), &resource_group, &profile_name).await {
        Stage::Proceed(_) => {}
        Stage::Stop(condition) => {
            status::patch_status(
                &api,
                &backend,
                condition,
                vec![],
                Some(resource_group.clone()),
                &ctx.metrics.backend_status,
                now(),
            )
            .await?;
            return Ok(Action::requeue(PENDING_REQUEUE));
        }
        Stage::Fail(e) => return Err(e),
    }

    let imports = Api::<ServiceImport>::namespaced(ctx.client.clone(), &namespace);
    let import = match validate::service_import_stage(&imports, &backend).await {
        Stage::Proceed(import) => import,
        Stage::Stop(condition) => {
            if validate::is_service_import_missing(&condition) {
                // The ServiceImport this backend exposed is gone entirely;
                // nothing should still be programmed on its behalf. A
                // transient cloud error here is reported as Pending rather
                // than silently dropped, same as the main convergence call.
                if let Err(e) =
                    convergence::converge(ctx.cloud.as_ref(), &resource_group, &profile_name, &backend_uid, Vec::new())
                        .await
                {
                    publish_azure_api_error(&ctx, &backend, &e).await?;
                    let pending = validate::pending_condition(format!(
                        "cloud cleanup after ServiceImport removal failed: {e}"
                    ));
                    status::patch_status(
                        &api,
                        &backend,
                        pending,
                        existing_endpoints(&backend),
                        Some(resource_group.clone()),
                        &ctx.metrics.backend_status,
                        now(),
                    )
                    .await?;
                    return Err(e);
                }
            }
            status::patch_status(
                &api,
                &backend,
                condition,
                vec![],
                Some(resource_group.clone()),
                &ctx.metrics.backend_status,
                now(),
            )
            .await?;
            return Ok(Action::requeue(PENDING_REQUEUE));
        }
        Stage::Fail(e) => return Err(e),
    };

    let backend_weight = backend.spec.effective_weight();
    let mut invalid_exports: Vec<InvalidExport> = Vec::new();
    let desired = if backend_weight == 0 {
        // Weight-zero shortcut: skip export enumeration entirely and
        // converge toward an empty set, tearing down anything we own.
        Vec::new()
    } else {
        let exporting_clusters: Vec<String> = import
            .status
            .as_ref()
            .map(|s| s.clusters.iter().map(|c| c.cluster.clone()).collect())
            .unwrap_or_default();

        let exports_api = Api::<InternalServiceExport>::namespaced(ctx.client.clone(), &namespace);
        let all_exports = exports_api.list(&Default::default()).await?;
        let by_cluster: HashMap<String, InternalServiceExport> = all_exports
            .items
            .into_iter()
            .filter(|e| {
                e.spec.service_reference.namespaced_name.namespace == namespace
                    && e.spec.service_reference.namespaced_name.name == backend.spec.backend.name
            })
            .map(|e| (e.spec.service_reference.cluster_id.clone(), e))
            .collect();

        // A cluster the ServiceImport claims is exporting, but for which no
        // InternalServiceExport has shown up yet, is a stale read: stop and
        // wait for the watch that will fire once it lands.
        if let Some(missing) = exporting_clusters.iter().find(|c| !by_cluster.contains_key(*c)) {
            let condition = validate::pending_condition(format!(
                "no InternalServiceExport yet for cluster {missing}"
            ));
            status::patch_status(
                &api,
                &backend,
                condition,
                vec![],
                Some(resource_group.clone()),
                &ctx.metrics.backend_status,
                now(),
            )
            .await?;
            return Ok(Action::requeue(PENDING_REQUEUE));
        }

        let matching: Vec<InternalServiceExport> = exporting_clusters
            .iter()
            .filter_map(|c| by_cluster.get(c).cloned())
            .collect();

        let derivation = endpoints::derive_desired_endpoints(
            &backend_uid,
            &backend.spec.backend.name,
            backend_weight,
            &matching,
        );
        invalid_exports = derivation.invalid;
        derivation.desired
    };

    if !desired.is_empty() {
        if let Err(e) = finalizer::ensure(&api, backend.as_ref(), CLOUD_CLEANUP_FINALIZER).await {
            return if e.is_conflict() { Ok(Action::await_change()) } else { Err(e) };
        }
    }

    let outcome = match convergence::converge(
        ctx.cloud.as_ref(),
        &resource_group,
        &profile_name,
        &backend_uid,
        desired,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            // A transient delete/PUT failure reports Pending rather than
            // leaving whatever condition the last successful pass wrote;
            // the previously-accepted endpoint list is left untouched since
            // convergence failed before producing a new one.
            publish_azure_api_error(&ctx, &backend, &e).await?;
            let pending = validate::pending_condition(format!("cloud convergence error: {e}"));
            status::patch_status(
                &api,
                &backend,
                pending,
                existing_endpoints(&backend),
                Some(resource_group),
                &ctx.metrics.backend_status,
                now(),
            )
            .await?;
            return Err(e);
        }
    };

    let condition = validate::terminal(&invalid_exports, &outcome.faults);
    let recorder = ctx.diagnostics.read().await.recorder(ctx.client.clone(), &backend);
    recorder
        .publish(Event {
            type_: if condition.status == "True" { EventType::Normal } else { EventType::Warning },
            reason: "Accepted".into(),
            note: Some(condition.message.clone()),
            action: "Reconcile".into(),
            secondary: None,
        })
        .await
        .map_err(Error::KubeError)?;
    status::patch_status(
        &api,
        &backend,
        condition,
        outcome.endpoints,
        Some(resource_group),
        &ctx.metrics.backend_status,
        now(),
    )
    .await?;

    if !outcome.faults.is_empty() {
        return Err(Error::BadEndpoints(outcome.faults));
    }

    Ok(Action::requeue(STEADY_STATE_REQUEUE))
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Publishes the `AzureAPIError` Warning event for a cloud error surfaced
/// during convergence, before the caller patches status and returns.
async fn publish_azure_api_error(ctx: &Context, backend: &TrafficManagerBackend, error: &Error) -> Result<()> {
    let recorder = ctx.diagnostics.read().await.recorder(ctx.client.clone(), backend);
    recorder
        .publish(Event {
            type_: EventType::Warning,
            reason: "AzureAPIError".into(),
            note: Some(error.to_string()),
            action: "Converge".into(),
            secondary: None,
        })
        .await
        .map_err(Error::KubeError)
}

/// The endpoint list already on status, for a Pending write that failed to
/// converge and so has nothing fresher to report.
fn existing_endpoints(backend: &TrafficManagerBackend) -> Vec<crate::crd::backend::EndpointStatus> {
    backend
        .status
        .as_ref()
        .map(|s| s.endpoints.clone())
        .unwrap_or_default()
}
