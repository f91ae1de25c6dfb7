#[cfg(all(test, feature = "e2e-tests"))]
mod test {
    use std::time::Duration;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
    use kube::api::{Api, Patch, PatchParams, PostParams};
    use kube::client::Client;
    use kube::runtime::wait::{await_condition, conditions, Condition as WaitCondition};
    use kube::ResourceExt;
    use tmb_operator::crd::backend::{
        BackendSpec, ProfileReference, ServiceImportReference, TrafficManagerBackend,
    };
    use tmb_operator::crd::tm_profile::{TrafficManagerProfile, TrafficManagerProfileSpec};
    use tokio::time::timeout;

    // These tests only exercise the Kubernetes-facing half of the
    // reconciler (condition transitions, finalizer lifecycle): driving it
    // through a full Accepted=True convergence would require a live Azure
    // subscription, which a CI cluster doesn't have.

    fn is_accepted(expected_status: &'static str) -> impl WaitCondition<TrafficManagerBackend> {
        move |obj: Option<&TrafficManagerBackend>| {
            obj.and_then(|b| b.status.as_ref())
                .map(|s| accepted_condition(&s.conditions))
                .flatten()
                .map(|c| c.status == expected_status)
                .unwrap_or(false)
        }
    }

    fn accepted_condition(conditions: &[Condition]) -> Option<&Condition> {
        conditions.iter().find(|c| c.type_ == "Accepted")
    }

    async fn wait_for<R, C>(api: Api<R>, name: &str, condition: C)
    where
        R: kube::Resource
            + Clone
            + std::fmt::Debug
            + for<'de> k8s_openapi::serde::Deserialize<'de>
            + 'static
            + Send,
        C: WaitCondition<R>,
    {
        timeout(Duration::from_secs(30), await_condition(api, name, condition))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn backend_is_invalid_when_profile_is_missing() {
        let client = Client::try_default().await.unwrap();
        let name = "test-missing-profile";
        let backend_api = Api::<TrafficManagerBackend>::namespaced(client.clone(), "default");

        let backend = TrafficManagerBackend::new(
            name,
            BackendSpec {
                profile: ProfileReference {
                    name: "does-not-exist".to_string(),
                },
                backend: ServiceImportReference {
                    name: "svc".to_string(),
                },
                weight: None,
            },
        );
        backend_api
            .create(&PostParams::default(), &backend)
            .await
            .unwrap();

        wait_for(backend_api.clone(), name, is_accepted("False")).await;

        backend_api.delete(name, &Default::default()).await.unwrap();
        wait_for(
            backend_api,
            name,
            conditions::is_deleted(&backend.uid().unwrap_or_default()),
        )
        .await;
    }

    #[tokio::test]
    async fn backend_is_pending_until_profile_is_programmed() {
        let client = Client::try_default().await.unwrap();
        let profile_name = "test-pending-profile";
        let name = "test-pending-backend";

        let profile_api = Api::<TrafficManagerProfile>::namespaced(client.clone(), "default");
        let profile = TrafficManagerProfile::new(
            profile_name,
            TrafficManagerProfileSpec {
                resource_group: "rg".to_string(),
                monitor_config: Default::default(),
            },
        );
        profile_api
            .create(&PostParams::default(), &profile)
            .await
            .unwrap();

        let backend_api = Api::<TrafficManagerBackend>::namespaced(client.clone(), "default");
        let backend = TrafficManagerBackend::new(
            name,
            BackendSpec {
                profile: ProfileReference {
                    name: profile_name.to_string(),
                },
                backend: ServiceImportReference {
                    name: "svc".to_string(),
                },
                weight: None,
            },
        );
        backend_api
            .create(&PostParams::default(), &backend)
            .await
            .unwrap();

        wait_for(backend_api.clone(), name, is_accepted("Unknown")).await;

        let current_profile = profile_api.get(profile_name).await.unwrap();
        let programmed = Condition {
            type_: "Programmed".to_string(),
            status: "True".to_string(),
            reason: "Programmed".to_string(),
            message: "".to_string(),
            observed_generation: current_profile.metadata.generation,
            last_transition_time: k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
                chrono::Utc::now(),
            ),
        };
        profile_api
            .patch_status(
                profile_name,
                &PatchParams::default(),
                &Patch::Merge(serde_json::json!({
                    "status": { "conditions": [programmed] }
                })),
            )
            .await
            .unwrap();

        // No ServiceImport named "svc" exists, so the chain still stops,
        // just one stage further along.
        wait_for(backend_api.clone(), name, is_accepted("False")).await;

        backend_api.delete(name, &Default::default()).await.unwrap();
        profile_api
            .delete(profile_name, &Default::default())
            .await
            .unwrap();
    }
}
