use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type set by the companion `TrafficManagerProfile` reconciler
/// once the cloud profile has been provisioned. Owned by that controller;
/// this crate only ever reads it.
pub const PROGRAMMED_CONDITION_TYPE: &str = "Programmed";

/// Minimal monitor configuration, present only so `TrafficManagerProfileSpec`
/// round-trips through the API server; this reconciler never reads it
/// (profile-level monitoring configuration is out of scope, see spec
/// Non-goals).
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct MonitorConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// `TrafficManagerProfile` is owned and reconciled by a sibling controller.
/// This crate only resolves it to read `resource_group` and the
/// `Programmed` condition.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "networking.fleet.azure.com",
    version = "v1beta1",
    kind = "TrafficManagerProfile",
    plural = "trafficmanagerprofiles",
    shortname = "tmp",
    namespaced,
    status = "TrafficManagerProfileStatus",
    derive = "Default"
)]
pub struct TrafficManagerProfileSpec {
    pub resource_group: String,
    #[serde(default)]
    pub monitor_config: MonitorConfig,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct TrafficManagerProfileStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl TrafficManagerProfileStatus {
    pub fn programmed(&self) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.type_ == PROGRAMMED_CONDITION_TYPE)
    }
}
