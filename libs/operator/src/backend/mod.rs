pub mod controller;
pub mod convergence;
pub mod delete;
pub mod endpoints;
pub mod reconcile;
pub mod status;
pub mod validate;

/// Added right before the first cloud mutation; guards cloud endpoint
/// teardown on deletion. Removed only once every owned endpoint has been
/// deleted.
pub static CLOUD_CLEANUP_FINALIZER: &str = "networking.fleet.azure.com/traffic-manager-backend-cleanup";

/// Added on first observation of a Backend, independent of whether it has
/// ever produced a cloud endpoint. Removed on deletion once the metric
/// series for this object have been dropped.
pub static METRIC_FINALIZER: &str = "networking.fleet.azure.com/traffic-manager-backend-metrics";

pub use controller::{run, Context, State};

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use http::{Request, Response};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
    use kube::{client::Body, Client, Resource, ResourceExt};
    use tokio::sync::RwLock;

    use crate::backend::controller::{Context, Diagnostics};
    use crate::cloud::fake::FakeTrafficManagerClient;
    use crate::cloud::{Endpoint, TrafficManagerClient};
    use crate::crd::backend::{
        BackendSpec, BackendStatus, ProfileReference, ServiceImportReference, TrafficManagerBackend,
    };
    use crate::crd::tm_profile::{TrafficManagerProfile, TrafficManagerProfileSpec, TrafficManagerProfileStatus};
    use crate::error::Result;
    use crate::metrics::Metrics;

    use super::endpoints::endpoint_name;
    use super::reconcile::reconcile;
    use super::{CLOUD_CLEANUP_FINALIZER, METRIC_FINALIZER};

    impl TrafficManagerBackend {
        pub fn test() -> Self {
            let mut b = TrafficManagerBackend::new(
                "test",
                BackendSpec {
                    profile: ProfileReference { name: "prof".into() },
                    backend: ServiceImportReference { name: "svc".into() },
                    weight: None,
                },
            );
            b.meta_mut().namespace = Some("default".into());
            b
        }

        pub fn finalized(mut self) -> Self {
            self.finalizers_mut().push(METRIC_FINALIZER.to_string());
            self
        }

        pub fn needs_delete(mut self) -> Self {
            use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
            self.meta_mut().deletion_timestamp = Some(Time(chrono::Utc::now()));
            self
        }
    }

    type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;
    struct ApiServerVerifier(ApiServerHandle);

    impl ApiServerVerifier {
        // Expects the finalizer-creation patch, then a GET for a profile
        // that doesn't exist, then the Accepted=False status patch.
        fn run_profile_missing(self, backend: TrafficManagerBackend) -> tokio::task::JoinHandle<()> {
            tokio::spawn(async move {
                self.handle_finalizer_creation(backend.clone())
                    .await
                    .unwrap()
                    .handle_profile_not_found()
                    .await
                    .unwrap()
                    .handle_status_patch()
                    .await
                    .expect("scenario completed without errors");
            })
        }

        async fn handle_finalizer_creation(mut self, backend: TrafficManagerBackend) -> Result<Self> {
            let (request, send) = self.0.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::PATCH);
            let response = serde_json::to_vec(&backend.finalized()).unwrap();
            send.send_response(Response::builder().body(Body::from(response)).unwrap());
            Ok(self)
        }

        async fn handle_profile_not_found(mut self) -> Result<Self> {
            let (request, send) = self.0.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::GET);
            assert!(request.uri().to_string().contains("trafficmanagerprofiles/prof"));
            send.send_response(
                Response::builder()
                    .status(404)
                    .body(Body::from(serde_json::to_vec(&serde_json::json!({
                        "kind": "Status",
                        "code": 404,
                        "message": "not found",
                        "reason": "NotFound",
                    })).unwrap()))
                    .unwrap(),
            );
            Ok(self)
        }

        async fn handle_profile_programmed(mut self) -> Result<Self> {
            let (request, send) = self.0.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::GET);
            assert!(request.uri().to_string().contains("trafficmanagerprofiles/prof"));
            let mut profile = TrafficManagerProfile::new(
                "prof",
                TrafficManagerProfileSpec {
                    resource_group: "rg".to_string(),
                    monitor_config: Default::default(),
                },
            );
            profile.status = Some(TrafficManagerProfileStatus {
                conditions: vec![Condition {
                    type_: "Programmed".to_string(),
                    status: "True".to_string(),
                    reason: "Programmed".to_string(),
                    message: "".to_string(),
                    observed_generation: profile.metadata.generation,
                    last_transition_time: Time(chrono::Utc::now()),
                }],
            });
            let response = serde_json::to_vec(&profile).unwrap();
            send.send_response(Response::builder().body(Body::from(response)).unwrap());
            Ok(self)
        }

        async fn handle_service_import_not_found(mut self) -> Result<Self> {
            let (request, send) = self.0.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::GET);
            assert!(request.uri().to_string().contains("serviceimports/svc"));
            send.send_response(
                Response::builder()
                    .status(404)
                    .body(Body::from(serde_json::to_vec(&serde_json::json!({
                        "kind": "Status",
                        "code": 404,
                        "message": "not found",
                        "reason": "NotFound",
                    })).unwrap()))
                    .unwrap(),
            );
            Ok(self)
        }

        async fn handle_finalizer_removal(mut self, token: &str) -> Result<Self> {
            let (request, send) = self.0.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::PATCH);
            let req_body = request.into_body().collect_bytes().await.unwrap();
            let patch: serde_json::Value = serde_json::from_slice(&req_body).unwrap();
            let finalizers = patch["metadata"]["finalizers"].as_array().unwrap();
            assert!(
                !finalizers.iter().any(|f| f.as_str() == Some(token)),
                "{token} should have been removed from the finalizer list"
            );
            let response = serde_json::to_vec(&TrafficManagerBackend::test()).unwrap();
            send.send_response(Response::builder().body(Body::from(response)).unwrap());
            Ok(self)
        }

        // Recorder::publish PATCHes an events.k8s.io/v1 Event object.
        async fn handle_event_publish(mut self, reason: &str) -> Result<Self> {
            let (request, send) = self.0.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::PATCH);
            assert!(request.uri().to_string().contains("/events"));
            let req_body = request.into_body().collect_bytes().await.unwrap();
            let json: serde_json::Value = serde_json::from_slice(&req_body).unwrap();
            assert_eq!(json["reason"], reason);
            let response = serde_json::to_vec(&serde_json::json!({
                "apiVersion": "events.k8s.io/v1",
                "kind": "Event",
                "metadata": {"name": "test-event", "namespace": "default"},
                "regarding": {},
                "reason": reason,
                "type": json["type"],
                "eventTime": null,
            }))
            .unwrap();
            send.send_response(Response::builder().body(Body::from(response)).unwrap());
            Ok(self)
        }

        async fn handle_status_patch(mut self) -> Result<Self> {
            let (request, send) = self.0.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::PATCH);
            assert!(request.uri().to_string().contains("/status"));
            let req_body = request.into_body().collect_bytes().await.unwrap();
            let json: serde_json::Value = serde_json::from_slice(&req_body).unwrap();
            let conditions = json["status"]["conditions"].as_array().unwrap();
            assert_eq!(conditions[0]["type"], "Accepted");
            assert_eq!(conditions[0]["status"], "False");
            let response = serde_json::to_vec(&TrafficManagerBackend::test().finalized()).unwrap();
            send.send_response(Response::builder().body(Body::from(response)).unwrap());
            Ok(self)
        }
    }

    fn test_context(cloud: Arc<dyn TrafficManagerClient>) -> (Arc<Context>, ApiServerVerifier) {
        let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let mock_client = Client::new(mock_service, "default");
        let ctx = Context {
            client: mock_client,
            cloud,
            teardown_concurrency: 5,
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            metrics: Arc::new(Metrics::default()),
        };
        (Arc::new(ctx), ApiServerVerifier(handle))
    }

    #[tokio::test]
    async fn reconcile_stops_when_profile_is_missing() {
        let backend = Arc::new(TrafficManagerBackend::test());
        let (ctx, verifier) = test_context(Arc::new(FakeTrafficManagerClient::new()));
        let mocksrv = verifier.run_profile_missing(TrafficManagerBackend::test());

        reconcile(backend, ctx).await.expect("reconciler accepted missing profile as a stop, not a failure");
        tokio::time::timeout(std::time::Duration::from_secs(1), mocksrv)
            .await
            .expect("timeout on mock apiserver")
            .expect("scenario succeeded");
    }

    // A deleted backend tears down every cloud endpoint it owns (leaving a
    // sibling backend's endpoint alone), then removes both finalizers in
    // order: cloud-cleanup first, metrics second.
    #[tokio::test]
    async fn cleanup_deletes_owned_endpoints_then_both_finalizers_in_order() {
        let fake = FakeTrafficManagerClient::new();
        let uid = "abc-123";
        let owned = endpoint_name(uid, "svc", "cluster-a");
        let foreign = endpoint_name("other-uid", "svc", "cluster-a");
        fake.seed(
            "rg",
            "prof",
            vec![
                Endpoint::new(owned.clone(), "/resource/a", 500),
                Endpoint::new(foreign.clone(), "/resource/b", 500),
            ],
        );
        let cloud: Arc<dyn TrafficManagerClient> = Arc::new(fake);

        let mut backend = TrafficManagerBackend::test()
            .finalized()
            .needs_delete();
        backend.meta_mut().uid = Some(uid.to_string());
        backend.finalizers_mut().push(CLOUD_CLEANUP_FINALIZER.to_string());
        backend.status = Some(BackendStatus {
            resource_group: Some("rg".to_string()),
            ..Default::default()
        });

        let (ctx, verifier) = test_context(cloud.clone());
        let mocksrv = tokio::spawn(async move {
            verifier
                .handle_profile_programmed()
                .await
                .unwrap()
                .handle_finalizer_removal(CLOUD_CLEANUP_FINALIZER)
                .await
                .unwrap()
                .handle_finalizer_removal(METRIC_FINALIZER)
                .await
                .unwrap()
                .handle_event_publish("Deleted")
                .await
                .expect("scenario completed without errors");
        });

        reconcile(Arc::new(backend), ctx)
            .await
            .expect("cleanup of an already-deleted profile's endpoints succeeds");
        tokio::time::timeout(std::time::Duration::from_secs(1), mocksrv)
            .await
            .expect("timeout on mock apiserver")
            .expect("scenario succeeded");

        let remaining = cloud.get_profile("rg", "prof").await.unwrap().endpoints;
        assert_eq!(remaining.len(), 1, "only the sibling backend's endpoint survives");
        assert_eq!(remaining[0].name, foreign);
    }

    // A ServiceImport disappearing entirely means the service it exposed is
    // gone from the whole fleet: the reconciler should tear down every
    // endpoint it owns before recording the terminal Invalid condition, not
    // just leave them orphaned in the cloud profile.
    #[tokio::test]
    async fn reconcile_tears_down_owned_endpoints_when_service_import_disappears() {
        let fake = FakeTrafficManagerClient::new();
        let uid = "uid-1";
        let owned = endpoint_name(uid, "svc", "east");
        fake.seed("rg", "prof", vec![Endpoint::new(owned.clone(), "/ip/east", 500)]);
        let cloud: Arc<dyn TrafficManagerClient> = Arc::new(fake);

        let mut backend = TrafficManagerBackend::test().finalized();
        backend.meta_mut().uid = Some(uid.to_string());

        let (ctx, verifier) = test_context(cloud.clone());
        let mocksrv = tokio::spawn(async move {
            verifier
                .handle_profile_programmed()
                .await
                .unwrap()
                .handle_service_import_not_found()
                .await
                .unwrap()
                .handle_status_patch()
                .await
                .expect("scenario completed without errors");
        });

        reconcile(Arc::new(backend), ctx)
            .await
            .expect("missing ServiceImport is a stop, not a failure");
        tokio::time::timeout(std::time::Duration::from_secs(1), mocksrv)
            .await
            .expect("timeout on mock apiserver")
            .expect("scenario succeeded");

        assert!(
            cloud.get_profile("rg", "prof").await.unwrap().endpoints.is_empty(),
            "endpoint owned by the now-orphaned backend should have been torn down"
        );
    }
}
