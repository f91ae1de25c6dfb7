use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{
    controller::Controller,
    events::{Recorder, Reporter},
    watcher,
    WatchStreamExt,
};
use kube::{
    api::{Api, ListParams},
    client::Client,
    Resource, ResourceExt,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, info, instrument, trace, warn};

use crate::backend::reconcile::reconcile;
use crate::cloud::TrafficManagerClient;
use crate::crd::backend::TrafficManagerBackend;
use crate::crd::service_export::{InternalServiceExport, ServiceType};
use crate::crd::service_import::ServiceImport;
use crate::crd::tm_profile::TrafficManagerProfile;
use crate::error::Error;
use crate::metrics::Metrics;

/// Context injected into every `reconcile`/`error_policy` invocation.
pub struct Context {
    pub client: Client,
    pub cloud: Arc<dyn TrafficManagerClient>,
    /// Upper bound on concurrent cloud DELETEs during teardown.
    pub teardown_concurrency: usize,
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    pub metrics: Arc<Metrics>,
}

/// Diagnostics read by the web server.
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    #[serde(deserialize_with = "from_ts")]
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "trafficmanagerbackend-controller".into(),
        }
    }
}

impl Diagnostics {
    /// An event recorder scoped to one `TrafficManagerBackend`, for
    /// publishing the `Accepted`/`Deleted`/`AzureAPIError` events named in
    /// the external interface.
    pub fn recorder(&self, client: Client, backend: &TrafficManagerBackend) -> Recorder {
        Recorder::new(client, self.reporter.clone(), backend.object_ref(&()))
    }
}

fn error_policy(
    backend: Arc<TrafficManagerBackend>,
    error: &Error,
    ctx: Arc<Context>,
) -> kube::runtime::controller::Action {
    warn!(backend = %backend.name_any(), "reconcile failed: {:?}", error);
    ctx.metrics.reconcile.set_failure(&backend, error);
    kube::runtime::controller::Action::requeue(tokio::time::Duration::from_secs(5 * 60))
}

/// State shared between the controller and the metrics/health web server.
#[derive(Clone, Default)]
pub struct State {
    diagnostics: Arc<RwLock<Diagnostics>>,
    metrics: Arc<Metrics>,
}

impl State {
    /// Builds state around a `Metrics` that was constructed from a registry
    /// the caller may have already registered other metrics onto (e.g. the
    /// `kube` client's request metrics), so everything ends up on one
    /// `/metrics` page.
    pub fn new(metrics: Metrics) -> Self {
        Self {
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            metrics: Arc::new(metrics),
        }
    }

    pub fn metrics(&self) -> String {
        let mut buffer = String::new();
        let registry = &*self.metrics.registry;
        prometheus_client::encoding::text::encode(&mut buffer, registry).unwrap();
        buffer
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    fn to_context(&self, client: Client, cloud: Arc<dyn TrafficManagerClient>, teardown_concurrency: usize) -> Arc<Context> {
        Arc::new(Context {
            client,
            cloud,
            teardown_concurrency,
            metrics: self.metrics.clone(),
            diagnostics: self.diagnostics.clone(),
        })
    }
}

fn backend_ref(namespace: &str, name: &str) -> ObjectRef<TrafficManagerBackend> {
    ObjectRef::new(name).within(namespace)
}

/// Caches the last relevant projection seen for each watched dependency and
/// reports whether the current one differs, so a `.watches()` mapper only
/// fans out to dependent Backends when a field the reconciler actually
/// reads has moved, not on every unrelated status write. Always reports a
/// change once the object carries a deletion timestamp: losing a
/// dependency must stay visible even if every field we project is
/// otherwise unchanged from the last observation.
struct ChangeGate<K: Resource, V> {
    seen: Mutex<HashMap<ObjectRef<K>, V>>,
}

impl<K, V> ChangeGate<K, V>
where
    K: Resource,
    K::DynamicType: Default,
    V: Clone + PartialEq,
{
    fn new() -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
        }
    }

    fn fire(&self, obj: &K, relevant: V) -> bool {
        let key = ObjectRef::from_obj_with(obj, K::DynamicType::default());
        let mut seen = self.seen.lock().unwrap();
        if obj.meta().deletion_timestamp.is_some() {
            seen.remove(&key);
            return true;
        }
        let changed = seen.get(&key) != Some(&relevant);
        seen.insert(key, relevant);
        changed
    }
}

/// `Programmed` condition status and observed generation; reason changes
/// alone don't move this and so don't retrigger dependent Backends.
fn profile_fingerprint(profile: &TrafficManagerProfile) -> (Option<String>, Option<i64>) {
    let programmed = profile.status.as_ref().and_then(|s| s.programmed());
    (
        programmed.map(|c| c.status.clone()),
        programmed.and_then(|c| c.observed_generation),
    )
}

fn import_fingerprint(import: &ServiceImport) -> Vec<String> {
    let mut clusters: Vec<String> = import
        .status
        .as_ref()
        .map(|s| s.clusters.iter().map(|c| c.cluster.clone()).collect())
        .unwrap_or_default();
    clusters.sort();
    clusters
}

type ExportFingerprint = (ServiceType, bool, String, bool, u32);

fn export_fingerprint(export: &InternalServiceExport) -> ExportFingerprint {
    (
        export.spec.service_type.clone(),
        export.spec.is_internal_load_balancer,
        export.spec.public_ip_resource_id.clone(),
        export.spec.is_dns_label_configured,
        export.spec.effective_weight(),
    )
}

fn backends_referencing_profile(
    store: &Store<TrafficManagerBackend>,
    profile: &TrafficManagerProfile,
) -> Vec<ObjectRef<TrafficManagerBackend>> {
    let namespace = profile.namespace().unwrap_or_default();
    store
        .state()
        .iter()
        .filter(|b| b.namespace().as_deref() == Some(namespace.as_str()) && b.spec.profile.name == profile.name_any())
        .map(|b| backend_ref(&namespace, &b.name_any()))
        .collect()
}

fn backends_referencing_service_import(
    store: &Store<TrafficManagerBackend>,
    import: &ServiceImport,
) -> Vec<ObjectRef<TrafficManagerBackend>> {
    let namespace = import.namespace().unwrap_or_default();
    store
        .state()
        .iter()
        .filter(|b| b.namespace().as_deref() == Some(namespace.as_str()) && b.spec.backend.name == import.name_any())
        .map(|b| backend_ref(&namespace, &b.name_any()))
        .collect()
}

/// Per spec, an `InternalServiceExport` only matters to a Backend once the
/// `ServiceImport` it names actually lists the exporting cluster; until the
/// aggregator has picked it up, the export is a stale or not-yet-relevant
/// publication and shouldn't fan out to anything.
fn backends_referencing_export(
    backend_store: &Store<TrafficManagerBackend>,
    import_store: &Store<ServiceImport>,
    export: &InternalServiceExport,
) -> Vec<ObjectRef<TrafficManagerBackend>> {
    let namespaced_name = &export.spec.service_reference.namespaced_name;
    let import_ref = ObjectRef::<ServiceImport>::new(&namespaced_name.name).within(&namespaced_name.namespace);
    let Some(import) = import_store.get(&import_ref) else {
        return Vec::new();
    };
    let cluster_id = &export.spec.service_reference.cluster_id;
    let is_member = import
        .status
        .as_ref()
        .map(|s| s.clusters.iter().any(|c| &c.cluster == cluster_id))
        .unwrap_or(false);
    if !is_member {
        return Vec::new();
    }

    backend_store
        .state()
        .iter()
        .filter(|b| {
            b.namespace().as_deref() == Some(namespaced_name.namespace.as_str())
                && b.spec.backend.name == namespaced_name.name
        })
        .map(|b| backend_ref(&namespaced_name.namespace, &b.name_any()))
        .collect()
}

/// Initializes the controller and drives it to completion (normally
/// forever, until the process receives a shutdown signal).
#[instrument(skip_all)]
pub async fn run(state: State, client: Client, cloud: Arc<dyn TrafficManagerClient>, teardown_concurrency: usize) {
    let backends = Api::<TrafficManagerBackend>::all(client.clone());
    if let Err(e) = backends.list(&ListParams::default().limit(1)).await {
        error!("TrafficManagerBackend CRD is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    let profiles = Api::<TrafficManagerProfile>::all(client.clone());
    let imports = Api::<ServiceImport>::all(client.clone());
    let exports = Api::<InternalServiceExport>::all(client.clone());

    let (reader, writer) = reflector::store();
    let backend_gate = ChangeGate::<TrafficManagerBackend, Option<i64>>::new();
    let stream = reflector::reflector(writer, watcher(backends, watcher::Config::default()))
        .default_backoff()
        .touched_objects()
        .filter(move |res| {
            let fire = match res {
                // A status-only patch never bumps `.metadata.generation`, so
                // this alone keeps the Backend's own status writes from
                // requeuing itself; `ChangeGate::fire` still always passes
                // deletion-timestamp transitions through.
                Ok(backend) => backend_gate.fire(backend, backend.meta().generation),
                Err(_) => true,
            };
            futures::future::ready(fire)
        });

    // Watched purely so `backends_referencing_export` can resolve cluster
    // membership synchronously; `.watches()` below hands its mapper only
    // the touched object, not a queryable store of a different kind.
    let (import_reader, import_writer) = reflector::store();
    let import_watch = reflector::reflector(import_writer, watcher(imports.clone(), watcher::Config::default()))
        .default_backoff()
        .touched_objects()
        .for_each(|res| async move {
            if let Err(e) = res {
                warn!("ServiceImport watch error: {e:?}");
            }
        });

    trace!("Init TrafficManagerBackend controller");
    let profile_store = reader.clone();
    let import_backend_store = reader.clone();
    let export_backend_store = reader.clone();
    let export_import_store = import_reader;

    let profile_gate = ChangeGate::<TrafficManagerProfile, (Option<String>, Option<i64>)>::new();
    let import_gate = ChangeGate::<ServiceImport, Vec<String>>::new();
    let export_gate = ChangeGate::<InternalServiceExport, ExportFingerprint>::new();

    let controller = Controller::for_stream(stream, reader)
        .watches(profiles, watcher::Config::default(), move |profile| {
            if !profile_gate.fire(&profile, profile_fingerprint(&profile)) {
                return Vec::new();
            }
            backends_referencing_profile(&profile_store, &profile)
        })
        .watches(imports, watcher::Config::default(), move |import| {
            if !import_gate.fire(&import, import_fingerprint(&import)) {
                return Vec::new();
            }
            backends_referencing_service_import(&import_backend_store, &import)
        })
        .watches(exports, watcher::Config::default(), move |export| {
            if !export_gate.fire(&export, export_fingerprint(&export)) {
                return Vec::new();
            }
            backends_referencing_export(&export_backend_store, &export_import_store, &export)
        })
        .shutdown_on_signal()
        .run(
            reconcile,
            error_policy,
            state.to_context(client, cloud, teardown_concurrency),
        )
        .for_each(|res| async move {
            match res {
                Ok(o) => info!("reconciled {:?}", o),
                Err(e) => warn!("reconcile failed to complete: {:?}", e),
            }
        });

    tokio::select! {
        _ = controller => {},
        _ = import_watch => {},
    }
}
