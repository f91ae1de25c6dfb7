use serde::{Deserialize, Serialize};

/// The only endpoint subtype this reconciler ever programs.
pub const AZURE_ENDPOINT_TYPE: &str = "Microsoft.Network/trafficManagerProfiles/azureEndpoints";

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum EndpointStatusValue {
    Enabled,
    Disabled,
}

impl Default for EndpointStatusValue {
    fn default() -> Self {
        EndpointStatusValue::Enabled
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct EndpointProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_resource_id: Option<String>,
    pub endpoint_status: EndpointStatusValue,
    pub weight: i64,
}

/// A Traffic Manager endpoint, as exchanged with the cloud API. `id` is
/// server-assigned and only ever populated on responses.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Endpoint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub properties: EndpointProperties,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, target_resource_id: impl Into<String>, weight: i64) -> Self {
        Self {
            id: None,
            name: name.into(),
            type_: AZURE_ENDPOINT_TYPE.to_string(),
            properties: EndpointProperties {
                target_resource_id: Some(target_resource_id.into()),
                endpoint_status: EndpointStatusValue::Enabled,
                weight,
            },
        }
    }

    /// Equality the convergence loop cares about: everything an `Endpoint`
    /// stores except server-assigned fields (`id`) and casing on `type`.
    pub fn matches_desired(&self, other: &Endpoint) -> bool {
        self.type_.eq_ignore_ascii_case(&other.type_)
            && self.properties.target_resource_id == other.properties.target_resource_id
            && self.properties.weight == other.properties.weight
            && self.properties.endpoint_status == other.properties.endpoint_status
    }
}

/// The subset of a Traffic Manager profile this reconciler reads: just its
/// current endpoint list. Monitoring configuration, DNS config, and other
/// profile-level fields belong to the companion profile reconciler.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CloudProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}
