//! An in-memory [`TrafficManagerClient`] used by reconciler tests. Keeps one
//! endpoint map per `(resource_group, profile_name)` pair so multiple
//! profiles can be exercised in the same test without cross-talk.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::client::TrafficManagerClient;
use super::error::CloudError;
use super::types::{CloudProfile, Endpoint};

#[derive(Default)]
pub struct FakeTrafficManagerClient {
    profiles: Mutex<HashMap<(String, String), Vec<Endpoint>>>,
    /// Endpoint names that should be rejected as non-throttling client
    /// errors on PUT, to exercise the bad-endpoint path.
    reject_puts: Mutex<Vec<String>>,
    /// Set to force every call to fail as a transient error, to exercise the
    /// requeue-on-error path.
    fail_transient: Mutex<bool>,
}

impl FakeTrafficManagerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a profile's existing endpoint list, as if already programmed
    /// by a prior reconcile or an unrelated backend.
    pub fn seed(&self, resource_group: &str, profile_name: &str, endpoints: Vec<Endpoint>) {
        self.profiles
            .lock()
            .unwrap()
            .insert((resource_group.to_string(), profile_name.to_string()), endpoints);
    }

    pub fn reject_put(&self, endpoint_name: &str) {
        self.reject_puts
            .lock()
            .unwrap()
            .push(endpoint_name.to_string());
    }

    pub fn fail_transient(&self, fail: bool) {
        *self.fail_transient.lock().unwrap() = fail;
    }

    pub fn endpoints(&self, resource_group: &str, profile_name: &str) -> Vec<Endpoint> {
        self.profiles
            .lock()
            .unwrap()
            .get(&(resource_group.to_string(), profile_name.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl TrafficManagerClient for FakeTrafficManagerClient {
    async fn get_profile(
        &self,
        resource_group: &str,
        profile_name: &str,
    ) -> Result<CloudProfile, CloudError> {
        if *self.fail_transient.lock().unwrap() {
            return Err(CloudError::Server { status: 503 });
        }
        let endpoints = self
            .profiles
            .lock()
            .unwrap()
            .get(&(resource_group.to_string(), profile_name.to_string()))
            .cloned();

        match endpoints {
            Some(endpoints) => Ok(CloudProfile {
                id: format!(
                    "/subscriptions/fake/resourceGroups/{resource_group}/providers/Microsoft.Network/trafficmanagerprofiles/{profile_name}"
                ),
                name: profile_name.to_string(),
                endpoints,
            }),
            None => Err(CloudError::NotFound),
        }
    }

    async fn put_endpoint(
        &self,
        resource_group: &str,
        profile_name: &str,
        endpoint: &Endpoint,
    ) -> Result<Endpoint, CloudError> {
        if *self.fail_transient.lock().unwrap() {
            return Err(CloudError::Server { status: 503 });
        }
        if self
            .reject_puts
            .lock()
            .unwrap()
            .iter()
            .any(|n| n.eq_ignore_ascii_case(&endpoint.name))
        {
            return Err(CloudError::Client {
                status: 400,
                message: format!("endpoint {} rejected", endpoint.name),
            });
        }

        let mut profiles = self.profiles.lock().unwrap();
        let endpoints = profiles
            .entry((resource_group.to_string(), profile_name.to_string()))
            .or_default();

        let mut stored = endpoint.clone();
        stored.id = Some(format!(
            "/subscriptions/fake/resourceGroups/{resource_group}/providers/Microsoft.Network/trafficmanagerprofiles/{profile_name}/azureEndpoints/{}",
            endpoint.name
        ));

        if let Some(existing) = endpoints
            .iter_mut()
            .find(|e| e.name.eq_ignore_ascii_case(&endpoint.name))
        {
            *existing = stored.clone();
        } else {
            endpoints.push(stored.clone());
        }
        Ok(stored)
    }

    async fn delete_endpoint(
        &self,
        resource_group: &str,
        profile_name: &str,
        endpoint_name: &str,
    ) -> Result<(), CloudError> {
        if *self.fail_transient.lock().unwrap() {
            return Err(CloudError::Server { status: 503 });
        }
        let mut profiles = self.profiles.lock().unwrap();
        if let Some(endpoints) = profiles.get_mut(&(resource_group.to_string(), profile_name.to_string())) {
            endpoints.retain(|e| !e.name.eq_ignore_ascii_case(endpoint_name));
        }
        Ok(())
    }
}
