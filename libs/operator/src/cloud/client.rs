use async_trait::async_trait;

use super::error::CloudError;
use super::types::{CloudProfile, Endpoint};

/// The cloud-facing boundary this reconciler drives: GET on the profile,
/// GET/PUT/DELETE on its endpoints. Modeled as a trait so the reconciler can
/// be exercised against [`super::fake::FakeTrafficManagerClient`] in tests
/// without a live Azure subscription.
#[async_trait]
pub trait TrafficManagerClient: Send + Sync {
    /// GET the cloud profile by its deterministic name under
    /// `resource_group`, including its current endpoint list.
    async fn get_profile(
        &self,
        resource_group: &str,
        profile_name: &str,
    ) -> Result<CloudProfile, CloudError>;

    /// Create or update an endpoint under the given profile.
    async fn put_endpoint(
        &self,
        resource_group: &str,
        profile_name: &str,
        endpoint: &Endpoint,
    ) -> Result<Endpoint, CloudError>;

    /// Delete an endpoint under the given profile. Implementations must
    /// treat an already-absent endpoint as success, matching Azure's DELETE
    /// semantics for resources that don't exist.
    async fn delete_endpoint(
        &self,
        resource_group: &str,
        profile_name: &str,
        endpoint_name: &str,
    ) -> Result<(), CloudError>;
}
