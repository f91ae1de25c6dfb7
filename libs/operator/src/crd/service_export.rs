use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Mirrors `corev1.ServiceType`. Eligibility only ever accepts
/// [`ServiceType::LoadBalancer`] (spec Non-goals: other service types are
/// out of scope).
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ServiceType {
    ClusterIP,
    NodePort,
    LoadBalancer,
    ExternalName,
}

impl Default for ServiceType {
    fn default() -> Self {
        ServiceType::ClusterIP
    }
}

/// The namespaced name of the exported service, as published by the
/// exporting member cluster. This is the field the controller indexes
/// `InternalServiceExport` on.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl std::fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ExportedObjectReference {
    pub cluster_id: String,
    pub namespaced_name: NamespacedName,
}

/// `InternalServiceExport` is a single cluster's publication of a service:
/// its type, whether it is an internal load balancer, its public IP resource
/// id, whether a DNS label has been configured on that IP, and the weight
/// this cluster's export should carry relative to sibling exports.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "networking.fleet.azure.com",
    version = "v1alpha1",
    kind = "InternalServiceExport",
    plural = "internalserviceexports",
    namespaced,
    derive = "Default"
)]
pub struct InternalServiceExportSpec {
    pub service_type: ServiceType,
    #[serde(default)]
    pub is_internal_load_balancer: bool,
    #[serde(default)]
    pub public_ip_resource_id: String,
    #[serde(default)]
    pub is_dns_label_configured: bool,
    /// Per-export weight. Defaults to 1 when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    pub service_reference: ExportedObjectReference,
}

impl Default for InternalServiceExportSpec {
    fn default() -> Self {
        Self {
            service_type: ServiceType::default(),
            is_internal_load_balancer: false,
            public_ip_resource_id: String::new(),
            is_dns_label_configured: false,
            weight: None,
            service_reference: ExportedObjectReference::default(),
        }
    }
}

impl InternalServiceExportSpec {
    /// Per-export weight, applying the documented default of 1 when unset.
    pub fn effective_weight(&self) -> u32 {
        self.weight.unwrap_or(1)
    }
}
