use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reason for an `Accepted` condition, matching the fixed vocabulary in the
/// validation chain (profile, cloud profile and service-import stages all
/// settle on one of these three).
pub mod reason {
    pub const ACCEPTED: &str = "Accepted";
    pub const INVALID: &str = "Invalid";
    pub const PENDING: &str = "Pending";
}

pub const ACCEPTED_CONDITION_TYPE: &str = "Accepted";

/// A reference to a `TrafficManagerProfile` in the same namespace.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ProfileReference {
    pub name: String,
}

/// A reference to a `ServiceImport` in the same namespace. The field is
/// called `backend` in the wire schema: a Backend binds one ServiceImport to
/// one Profile, and from the CRD author's point of view the ServiceImport
/// *is* the backend being exposed.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ServiceImportReference {
    pub name: String,
}

/// `TrafficManagerBackend` binds an exported, multi-cluster service
/// (`ServiceImport`) to a `TrafficManagerProfile` with a weight, and asks the
/// controller to program one cloud endpoint per exporting cluster.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "networking.fleet.azure.com",
    version = "v1beta1",
    kind = "TrafficManagerBackend",
    plural = "trafficmanagerbackends",
    shortname = "tmb",
    namespaced,
    status = "BackendStatus",
    derive = "Default"
)]
pub struct BackendSpec {
    /// Reference to the `TrafficManagerProfile` this backend programs.
    /// Immutable after creation.
    pub profile: ProfileReference,

    /// Reference to the `ServiceImport` this backend exposes. Immutable
    /// after creation.
    pub backend: ServiceImportReference,

    /// Weight of this backend relative to others sharing the profile, in
    /// `[0, 1000]`. Defaults to 1 when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

impl BackendSpec {
    pub const MAX_WEIGHT: u32 = 1000;

    /// The effective weight, applying the documented default of 1 when the
    /// field is unset.
    pub fn effective_weight(&self) -> u32 {
        self.weight.unwrap_or(1)
    }
}

/// A single cloud endpoint this backend currently owns, as last observed by
/// the controller.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct FromCluster {
    pub cluster: String,
    pub weight: u32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct EndpointStatus {
    /// Lowercased endpoint name, `fleet-<backend-uid>#<service>#<cluster>`.
    pub name: String,
    /// DNS name or IP address the endpoint targets.
    pub target: String,
    /// Effective weight assigned after redistribution.
    pub weight: i64,
    /// Exporting cluster and its raw (pre-redistribution) export weight.
    pub from: FromCluster,
    /// Fully-qualified cloud resource id returned by the Traffic Manager API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct BackendStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<EndpointStatus>,
    /// The resource group the cloud profile lives in, cached from the
    /// `TrafficManagerProfile` at the last status write. Informational only:
    /// the deletion path re-resolves it from the `TrafficManagerProfile`
    /// directly rather than trusting a status field that may be stale or
    /// never got written before a crash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
}

impl BackendStatus {
    pub fn accepted(&self) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.type_ == ACCEPTED_CONDITION_TYPE)
    }
}
