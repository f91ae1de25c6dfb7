//! Diffs the desired endpoint set against the cloud profile's current state
//! and issues the PUT/DELETE calls to close the gap.

use crate::backend::endpoints::{owned_prefix, DesiredEndpoint};
use crate::cloud::{CloudError, Endpoint, TrafficManagerClient};
use crate::crd::backend::{EndpointStatus, FromCluster};
use crate::error::{Error, Result};

/// What converging toward a desired set produced: the endpoints now in
/// place (whether freshly written or already matching), and any
/// non-throttling client faults the cloud rejected individual endpoints
/// with. Transient errors (throttling, server faults, transport failures)
/// are not collected here; they propagate immediately so the reconciler
/// requeues with backoff instead of reporting a false `Accepted`.
pub struct ConvergenceOutcome {
    pub endpoints: Vec<EndpointStatus>,
    pub faults: Vec<CloudError>,
}

fn to_status(saved: &Endpoint, desired: &DesiredEndpoint) -> EndpointStatus {
    EndpointStatus {
        name: desired.name.clone(),
        target: desired.target_resource_id.clone(),
        weight: desired.weight,
        from: FromCluster {
            cluster: desired.from_cluster.clone(),
            weight: desired.from_weight,
        },
        resource_id: saved.id.clone(),
    }
}

/// GETs the cloud profile, deletes any endpoint this backend owns (by
/// prefix) that's no longer desired, and PUTs every desired endpoint that's
/// missing or out of date.
pub async fn converge(
    cloud: &dyn TrafficManagerClient,
    resource_group: &str,
    profile_name: &str,
    backend_uid: &str,
    desired: Vec<DesiredEndpoint>,
) -> Result<ConvergenceOutcome> {
    let profile = cloud.get_profile(resource_group, profile_name).await?;
    let prefix = owned_prefix(backend_uid);
    let owned: Vec<&Endpoint> = profile
        .endpoints
        .iter()
        .filter(|e| e.name.to_lowercase().starts_with(&prefix))
        .collect();

    for existing in &owned {
        let still_desired = desired.iter().any(|d| d.name.eq_ignore_ascii_case(&existing.name));
        if !still_desired {
            cloud
                .delete_endpoint(resource_group, profile_name, &existing.name)
                .await?;
        }
    }

    let mut endpoints = Vec::with_capacity(desired.len());
    let mut faults = Vec::new();

    for d in &desired {
        let wanted = Endpoint::new(d.name.clone(), d.target_resource_id.clone(), d.weight);
        let current = owned.iter().find(|e| e.name.eq_ignore_ascii_case(&d.name));

        let up_to_date = current.map(|c| c.matches_desired(&wanted)).unwrap_or(false);
        if up_to_date {
            endpoints.push(to_status(current.unwrap(), d));
            continue;
        }

        match cloud.put_endpoint(resource_group, profile_name, &wanted).await {
            Ok(saved) => endpoints.push(to_status(&saved, d)),
            Err(e) if e.is_client_fault() => faults.push(e),
            Err(e) => return Err(Error::CloudError(e)),
        }
    }

    Ok(ConvergenceOutcome { endpoints, faults })
}
