use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use tracing::debug;

use super::client::TrafficManagerClient;
use super::error::{classify_status, CloudError};
use super::types::{CloudProfile, Endpoint};

const API_VERSION: &str = "2022-04-01";

/// Speaks the Azure Resource Manager REST surface for Traffic Manager
/// profiles and endpoints: `GET` on the profile, `GET`/`PUT`/`DELETE` on its
/// `azureEndpoints` children. Authentication is a static bearer token,
/// refreshed by the caller (`cmd/operator`'s credential loader) ahead of
/// each reconciler run; this client never re-acquires it.
pub struct ArmTrafficManagerClient {
    http: HttpClient,
    base_url: String,
    subscription_id: String,
    bearer_token: String,
}

impl ArmTrafficManagerClient {
    pub fn new(
        http: HttpClient,
        base_url: impl Into<String>,
        subscription_id: impl Into<String>,
        bearer_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            subscription_id: subscription_id.into(),
            bearer_token: bearer_token.into(),
        }
    }

    fn profile_url(&self, resource_group: &str, profile_name: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/trafficmanagerprofiles/{}?api-version={}",
            self.base_url,
            url_escape::encode_path(&self.subscription_id),
            url_escape::encode_path(resource_group),
            url_escape::encode_path(profile_name),
            API_VERSION,
        )
    }

    fn endpoint_url(&self, resource_group: &str, profile_name: &str, endpoint_name: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/trafficmanagerprofiles/{}/azureEndpoints/{}?api-version={}",
            self.base_url,
            url_escape::encode_path(&self.subscription_id),
            url_escape::encode_path(resource_group),
            url_escape::encode_path(profile_name),
            url_escape::encode_path(endpoint_name),
            API_VERSION,
        )
    }

    async fn to_classified_error(response: reqwest::Response) -> CloudError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        classify_status(status.as_u16(), body)
    }
}

#[async_trait]
impl TrafficManagerClient for ArmTrafficManagerClient {
    async fn get_profile(
        &self,
        resource_group: &str,
        profile_name: &str,
    ) -> Result<CloudProfile, CloudError> {
        let url = self.profile_url(resource_group, profile_name);
        debug!(url, "GET cloud profile");
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.bearer_token)
            .send()
            .await
            .map_err(CloudError::Transport)?;

        if response.status() == StatusCode::OK {
            response
                .json::<CloudProfile>()
                .await
                .map_err(CloudError::Transport)
        } else {
            Err(Self::to_classified_error(response).await)
        }
    }

    async fn put_endpoint(
        &self,
        resource_group: &str,
        profile_name: &str,
        endpoint: &Endpoint,
    ) -> Result<Endpoint, CloudError> {
        let url = self.endpoint_url(resource_group, profile_name, &endpoint.name);
        debug!(url, "PUT cloud endpoint");
        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.bearer_token)
            .json(endpoint)
            .send()
            .await
            .map_err(CloudError::Transport)?;

        if response.status().is_success() {
            response
                .json::<Endpoint>()
                .await
                .map_err(CloudError::Transport)
        } else {
            Err(Self::to_classified_error(response).await)
        }
    }

    async fn delete_endpoint(
        &self,
        resource_group: &str,
        profile_name: &str,
        endpoint_name: &str,
    ) -> Result<(), CloudError> {
        let url = self.endpoint_url(resource_group, profile_name, endpoint_name);
        debug!(url, "DELETE cloud endpoint");
        let response = self
            .http
            .delete(&url)
            .bearer_auth(&self.bearer_token)
            .send()
            .await
            .map_err(CloudError::Transport)?;

        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(Self::to_classified_error(response).await)
        }
    }
}
