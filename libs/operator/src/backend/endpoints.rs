//! Turns a Backend's matching `InternalServiceExport`s into the desired set
//! of cloud endpoints: eligibility filtering, weight redistribution, and the
//! deterministic endpoint naming convention.

use crate::crd::service_export::{InternalServiceExport, ServiceType};

/// One endpoint the reconciler wants the cloud profile to have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredEndpoint {
    pub name: String,
    pub target_resource_id: String,
    pub weight: i64,
    pub from_cluster: String,
    pub from_weight: u32,
}

/// An export that was seen but didn't make the eligible set, and why. Never
/// causes a retry on its own; it's surfaced in the `Accepted` message so a
/// human can fix the export, and resolved by the next watch event on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidExport {
    pub cluster: String,
    pub reason: &'static str,
}

/// The result of turning a cluster's exports into a desired endpoint set:
/// what to converge toward, plus every export that was excluded and why.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Derivation {
    pub desired: Vec<DesiredEndpoint>,
    pub invalid: Vec<InvalidExport>,
}

/// Lowercased, `#`-delimited endpoint name. Doubles as an ownership tag: a
/// cloud endpoint's name is only ever touched by the backend whose uid
/// produced it.
pub fn endpoint_name(backend_uid: &str, service_import_name: &str, cluster: &str) -> String {
    format!("fleet-{backend_uid}#{service_import_name}#{cluster}").to_lowercase()
}

/// The prefix every endpoint this backend owns carries, for scoping
/// convergence diffs against a cloud profile that may hold endpoints owned
/// by sibling backends.
pub fn owned_prefix(backend_uid: &str) -> String {
    format!("fleet-{}#", backend_uid.to_lowercase())
}

/// An export is eligible only when it is a public `LoadBalancer` service
/// with a DNS label already configured on its public IP (so Traffic Manager
/// can monitor it). Internal load balancers and services without a
/// configured DNS label are never programmed as endpoints. Returns the
/// reason for exclusion, checked in the order the design lists them.
fn ineligibility_reason(export: &InternalServiceExport) -> Option<&'static str> {
    if export.spec.service_type != ServiceType::LoadBalancer {
        Some("service type is not LoadBalancer")
    } else if export.spec.is_internal_load_balancer {
        Some("is an internal load balancer")
    } else if export.spec.public_ip_resource_id.is_empty() {
        Some("has no public IP resource id")
    } else if !export.spec.is_dns_label_configured {
        Some("has no DNS label configured")
    } else {
        None
    }
}

/// `ceil(a * b / total)` in integer arithmetic, matching the redistribution
/// formula exactly without floating-point rounding.
fn ceil_div(numerator: u64, denominator: u64) -> u64 {
    if denominator == 0 {
        0
    } else {
        (numerator + denominator - 1) / denominator
    }
}

/// Derives the desired endpoint set for one backend from the
/// `InternalServiceExport`s that publish its `ServiceImport`. `exports`
/// should already be filtered to the backend's namespace and
/// `serviceReference.namespacedName`, and to the clusters the `ServiceImport`
/// actually lists (the caller is responsible for the "stale import" check:
/// a listed cluster with no matching export at all is a different, terminal
/// condition, not an ineligibility).
pub fn derive_desired_endpoints(
    backend_uid: &str,
    service_import_name: &str,
    backend_weight: u32,
    exports: &[InternalServiceExport],
) -> Derivation {
    let mut invalid = Vec::new();
    let eligible: Vec<&InternalServiceExport> = exports
        .iter()
        .filter(|e| match ineligibility_reason(e) {
            None => true,
            Some(reason) => {
                invalid.push(InvalidExport {
                    cluster: e.spec.service_reference.cluster_id.clone(),
                    reason,
                });
                false
            }
        })
        .collect();

    let total_export_weight: u64 = eligible
        .iter()
        .map(|e| e.spec.effective_weight() as u64)
        .sum();

    if total_export_weight == 0 {
        return Derivation {
            desired: Vec::new(),
            invalid,
        };
    }

    let desired = eligible
        .into_iter()
        .map(|export| {
            let export_weight = export.spec.effective_weight() as u64;
            let weight = ceil_div(backend_weight as u64 * export_weight, total_export_weight);
            let cluster = export.spec.service_reference.cluster_id.clone();
            DesiredEndpoint {
                name: endpoint_name(backend_uid, service_import_name, &cluster),
                target_resource_id: export.spec.public_ip_resource_id.clone(),
                weight: weight as i64,
                from_cluster: cluster,
                from_weight: export.spec.effective_weight(),
            }
        })
        .collect();

    Derivation { desired, invalid }
}
