//! Generic finalizer add/remove helpers.
//!
//! A `TrafficManagerBackend` carries two independent finalizer tokens with
//! different lifecycles (the cloud-cleanup finalizer is added only right
//! before the first cloud mutation; the metric finalizer is added on first
//! observation); `kube::runtime::finalizer`'s single Apply/Cleanup helper
//! doesn't fit that shape, so these are hand-rolled JSON-patch helpers in
//! the same spirit.

use kube::api::{Api, Patch, PatchParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::error::{Error, Result};

/// Adds `token` to `resource`'s finalizer list if not already present.
/// No-op (and no API call) if the finalizer is already there.
pub async fn ensure<K>(api: &Api<K>, resource: &K, token: &str) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + std::fmt::Debug,
    K::DynamicType: Default,
{
    if resource
        .finalizers()
        .iter()
        .any(|f| f.as_str() == token)
    {
        return Ok(());
    }

    let mut finalizers = resource.finalizers().to_vec();
    finalizers.push(token.to_string());

    let patch = Patch::Merge(json!({
        "metadata": {
            "finalizers": finalizers,
        }
    }));
    api.patch(&resource.name_any(), &PatchParams::default(), &patch)
        .await
        .map_err(|e| match &e {
            kube::Error::Api(ae) if ae.code == 409 => Error::Conflict(resource.name_any()),
            _ => Error::FinalizerError(e),
        })?;
    Ok(())
}

/// Removes `token` from `resource`'s finalizer list if present. No-op if
/// absent.
pub async fn remove<K>(api: &Api<K>, resource: &K, token: &str) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + std::fmt::Debug,
    K::DynamicType: Default,
{
    if !resource.finalizers().iter().any(|f| f.as_str() == token) {
        return Ok(());
    }

    let finalizers: Vec<String> = resource
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != token)
        .cloned()
        .collect();

    let patch = Patch::Merge(json!({
        "metadata": {
            "finalizers": finalizers,
        }
    }));
    api.patch(&resource.name_any(), &PatchParams::default(), &patch)
        .await
        .map_err(|e| match &e {
            kube::Error::Api(ae) if ae.code == 409 => Error::Conflict(resource.name_any()),
            _ => Error::FinalizerError(e),
        })?;
    Ok(())
}

/// True if `resource` carries `token` among its finalizers.
pub fn has<K: Resource>(resource: &K, token: &str) -> bool {
    resource.finalizers().iter().any(|f| f.as_str() == token)
}
