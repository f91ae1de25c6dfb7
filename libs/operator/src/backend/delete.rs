//! Handles a `TrafficManagerBackend` that has a deletion timestamp: tears
//! down every cloud endpoint it owns, bounded to a fixed amount of
//! concurrency, then releases both finalizers in order.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use kube::api::Api;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType};

use crate::backend::endpoints::owned_prefix;
use crate::backend::status::drop_metric_series;
use crate::backend::validate::is_not_found;
use crate::backend::{Context, CLOUD_CLEANUP_FINALIZER, METRIC_FINALIZER};
use crate::crd::backend::TrafficManagerBackend;
use crate::crd::tm_profile::TrafficManagerProfile;
use crate::error::{Error, Result};
use crate::finalizer;

/// Removes `token`, tolerating a version conflict on the patch by treating
/// it as already-handled: the write that won the race already bumped
/// `resourceVersion`, so the watch has a fresh reconcile queued already.
async fn remove_finalizer(
    api: &Api<TrafficManagerBackend>,
    backend: &TrafficManagerBackend,
    token: &str,
) -> Result<()> {
    match finalizer::remove(api, backend, token).await {
        Ok(()) | Err(Error::Conflict(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Tears down every cloud endpoint the backend owns, then removes both
/// finalizers. Runs up to `ctx.teardown_concurrency` deletes at once; the
/// first endpoint that fails to delete aborts the remaining ones for this
/// pass, so the finalizer is only dropped once nothing is left.
pub async fn cleanup(backend: Arc<TrafficManagerBackend>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = backend.namespace().ok_or_else(|| {
        Error::UserInputError("TrafficManagerBackend must be namespaced".to_string())
    })?;
    let api = Api::<TrafficManagerBackend>::namespaced(ctx.client.clone(), &namespace);

    if finalizer::has(backend.as_ref(), CLOUD_CLEANUP_FINALIZER) {
        let profile_name = backend.spec.profile.name.clone();
        let profile_api = Api::<TrafficManagerProfile>::namespaced(ctx.client.clone(), &namespace);
        let resource_group = match profile_api.get(&profile_name).await {
            Ok(profile) => profile.spec.resource_group,
            Err(e) if is_not_found(&e) => {
                // The Profile this backend pointed at is gone, so there is no
                // resource group left to resolve a cloud profile under;
                // nothing was ever programmed, or it already was torn down.
                remove_finalizer(&api, backend.as_ref(), CLOUD_CLEANUP_FINALIZER).await?;
                return finish(&api, backend, ctx).await;
            }
            Err(e) => return Err(Error::KubeError(e)),
        };

        let profile = ctx
            .cloud
            .get_profile(&resource_group, &profile_name)
            .await;
        let profile = match profile {
            Ok(profile) => profile,
            Err(e) if e.is_not_found() => {
                // Cloud profile is already gone; nothing left to tear down.
                remove_finalizer(&api, backend.as_ref(), CLOUD_CLEANUP_FINALIZER).await?;
                return finish(&api, backend, ctx).await;
            }
            Err(e) => return Err(Error::CloudError(e)),
        };

        let prefix = owned_prefix(&backend.uid().unwrap_or_default());
        let owned_names: Vec<String> = profile
            .endpoints
            .into_iter()
            .filter(|e| e.name.to_lowercase().starts_with(&prefix))
            .map(|e| e.name)
            .collect();

        let cloud = ctx.cloud.clone();
        let resource_group = Arc::new(resource_group);
        let profile_name = Arc::new(profile_name);
        stream::iter(owned_names.into_iter().map(|name| {
            let cloud = cloud.clone();
            let resource_group = resource_group.clone();
            let profile_name = profile_name.clone();
            async move {
                cloud
                    .delete_endpoint(&resource_group, &profile_name, &name)
                    .await
                    .map_err(Error::CloudError)
            }
        }))
        .buffer_unordered(ctx.teardown_concurrency.max(1))
        .try_for_each(|_| async { Ok::<(), Error>(()) })
        .await?;

        remove_finalizer(&api, backend.as_ref(), CLOUD_CLEANUP_FINALIZER).await?;
    }

    finish(&api, backend, ctx).await
}

async fn finish(
    api: &Api<TrafficManagerBackend>,
    backend: Arc<TrafficManagerBackend>,
    ctx: Arc<Context>,
) -> Result<Action> {
    if finalizer::has(backend.as_ref(), METRIC_FINALIZER) {
        drop_metric_series(&backend, &ctx.metrics.backend_status);
        remove_finalizer(api, backend.as_ref(), METRIC_FINALIZER).await?;
    }

    let recorder = ctx.diagnostics.read().await.recorder(ctx.client.clone(), backend.as_ref());
    recorder
        .publish(Event {
            type_: EventType::Normal,
            reason: "Deleted".into(),
            note: Some(format!("{} removed, cloud endpoints torn down", backend.name_any())),
            action: "Deleting".into(),
            secondary: None,
        })
        .await
        .map_err(Error::KubeError)?;

    Ok(Action::await_change())
}
