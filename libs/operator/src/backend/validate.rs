//! The validation chain: each stage either proceeds with a value, stops the
//! pipeline after recording why (an `Accepted` condition to write), or fails
//! outright on an unexpected error.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::api::Api;

use crate::backend::endpoints::InvalidExport;
use crate::cloud::{CloudError, CloudProfile, TrafficManagerClient};
use crate::crd::{
    backend::{reason, TrafficManagerBackend},
    service_import::ServiceImport,
    tm_profile::TrafficManagerProfile,
};
use crate::error::Error;

/// The outcome of one validation stage. `Stop` carries the condition the
/// caller should write to status before requeuing; it is not an error, just
/// a dependency that isn't ready (or never will be) yet.
pub enum Stage<T> {
    Proceed(T),
    Stop(Condition),
    Fail(Error),
}

pub(crate) fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 404)
}

fn condition(status: &str, reason: &str, message: impl Into<String>) -> Condition {
    Condition {
        type_: crate::crd::backend::ACCEPTED_CONDITION_TYPE.to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
        message: message.into(),
        observed_generation: None,
        last_transition_time: k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
            chrono::Utc::now(),
        ),
    }
}

fn invalid(reason: &str, message: impl Into<String>) -> Condition {
    condition("False", reason, message)
}

fn pending(reason: &str, message: impl Into<String>) -> Condition {
    condition("Unknown", reason, message)
}

/// A `Pending` condition with the catch-all reason, for stages that stop the
/// pipeline on a dependency that hasn't settled yet but carries no dedicated
/// reason of its own (e.g. a stale `ServiceImport` cluster list).
pub fn pending_condition(message: impl Into<String>) -> Condition {
    pending(reason::PENDING, message)
}

/// Resolves `backend.spec.profile` and requires it to carry
/// `Programmed=True` observed at the profile's current generation. A missing
/// profile is `Invalid` (permanent until the spec changes); `Programmed=False`
/// at the current generation is also `Invalid` (the profile reconciler has
/// spoken and rejected it); anything else (absent condition, or a condition
/// still trailing an older generation) is `Pending` (retried via watch).
pub async fn profile_stage(
    profiles: &Api<TrafficManagerProfile>,
    backend: &TrafficManagerBackend,
) -> Stage<TrafficManagerProfile> {
    let name = &backend.spec.profile.name;
    match profiles.get(name).await {
        Ok(profile) => {
            let generation = profile.metadata.generation;
            let programmed = profile.status.as_ref().and_then(|s| s.programmed());
            match programmed {
                Some(c) if c.status == "True" && c.observed_generation == generation => {
                    Stage::Proceed(profile)
                }
                Some(c) if c.status == "False" && c.observed_generation == generation => {
                    Stage::Stop(invalid(
                        reason::INVALID,
                        format!("TrafficManagerProfile {name} is not programmed"),
                    ))
                }
                _ => Stage::Stop(pending(
                    reason::PENDING,
                    format!("TrafficManagerProfile {name} is not yet programmed"),
                )),
            }
        }
        Err(e) if is_not_found(&e) => Stage::Stop(invalid(
            reason::INVALID,
            format!("TrafficManagerProfile {name} is not found"),
        )),
        Err(e) => Stage::Fail(e.into()),
    }
}

/// GETs the cloud profile the `TrafficManagerProfile` claims to own. A
/// cloud-side 404 means the profile reconciler hasn't provisioned it yet
/// (or it was deleted out of band) and is treated as `Invalid`; any other
/// cloud error is transient and fails the reconcile for a backoff retry.
pub async fn cloud_profile_stage(
    cloud: &dyn TrafficManagerClient,
    resource_group: &str,
    profile_name: &str,
) -> Stage<CloudProfile> {
    match cloud.get_profile(resource_group, profile_name).await {
        Ok(profile) => Stage::Proceed(profile),
        Err(e) if e.is_not_found() => Stage::Stop(invalid(
            reason::INVALID,
            format!(
                "cloud Traffic Manager profile {profile_name} not found in resource group {resource_group}"
            ),
        )),
        Err(e) => Stage::Fail(e.into()),
    }
}

/// Resolves `backend.spec.backend` (the `ServiceImport`). A missing
/// `ServiceImport` is `Invalid`, and the caller must run cloud-side cleanup
/// of this backend's owned endpoints before persisting that condition: the
/// service it was exposing no longer exists anywhere in the fleet (see
/// [`is_service_import_missing`]). An empty cluster list is `Pending`:
/// exports just haven't landed yet, no cleanup is warranted.
pub async fn service_import_stage(
    imports: &Api<ServiceImport>,
    backend: &TrafficManagerBackend,
) -> Stage<ServiceImport> {
    let name = &backend.spec.backend.name;
    match imports.get(name).await {
        Ok(import) => {
            let has_clusters = import
                .status
                .as_ref()
                .map(|s| !s.clusters.is_empty())
                .unwrap_or(false);
            if has_clusters {
                Stage::Proceed(import)
            } else {
                Stage::Stop(pending(
                    reason::PENDING,
                    "In the process of exporting the services",
                ))
            }
        }
        Err(e) if is_not_found(&e) => Stage::Stop(invalid(
            reason::INVALID,
            format!("ServiceImport {name} not found"),
        )),
        Err(e) => Stage::Fail(e.into()),
    }
}

pub fn accepted() -> Condition {
    condition("True", reason::ACCEPTED, "backend is programmed")
}

/// Whether a `Stop` condition from [`service_import_stage`] represents the
/// `ServiceImport` having disappeared entirely (as opposed to merely not
/// having exports yet), the one case that requires a cloud cleanup pass
/// before the condition is persisted.
pub fn is_service_import_missing(condition: &Condition) -> bool {
    condition.reason == reason::INVALID
}

/// Builds the terminal `Accepted` condition for a convergence pass: `True`
/// only when every export was eligible and every desired endpoint converged
/// cleanly. Otherwise `False/Invalid`, with a message naming the count and a
/// sample of whichever failure classes are non-empty: bad endpoint faults
/// first, then ineligible exports, matching the design's reporting order.
pub fn terminal(invalid_exports: &[InvalidExport], faults: &[CloudError]) -> Condition {
    if invalid_exports.is_empty() && faults.is_empty() {
        return accepted();
    }

    let mut parts = Vec::new();
    if !faults.is_empty() {
        let sample = faults
            .iter()
            .take(3)
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        parts.push(format!(
            "{} endpoint(s) rejected by the cloud API ({sample})",
            faults.len()
        ));
    }
    if !invalid_exports.is_empty() {
        let sample = invalid_exports
            .iter()
            .take(3)
            .map(|i| format!("cluster {} ({})", i.cluster, i.reason))
            .collect::<Vec<_>>()
            .join("; ");
        parts.push(format!(
            "{} export(s) ineligible ({sample})",
            invalid_exports.len()
        ));
    }

    invalid(reason::INVALID, parts.join(". "))
}
