use crate::error::Error;

use kube::ResourceExt;
use opentelemetry::trace::TraceId;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::{
    counter::Counter, exemplar::HistogramWithExemplars, family::Family, gauge::Gauge,
};
use prometheus_client::registry::{Registry, Unit};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub reconcile: ReconcileMetrics,
    pub backend_status: BackendStatusMetrics,
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Registers this crate's metrics onto `registry` and takes ownership of
    /// it, so a registry that already carries metrics from elsewhere (the
    /// `kube` client's request metrics, registered by the caller before this
    /// is constructed) ends up as the single registry `State::metrics()`
    /// encodes, instead of a second, never-exposed one.
    pub fn new(mut registry: Registry) -> Self {
        let reconcile = ReconcileMetrics::default().register(&mut registry);
        let backend_status = BackendStatusMetrics::default().register(&mut registry);
        Self {
            registry: Arc::new(registry),
            reconcile,
            backend_status,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new(Registry::with_prefix("tmb_reconcile"))
    }
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct TraceLabel {
    pub id: String,
}
impl TryFrom<&TraceId> for TraceLabel {
    type Error = Error;

    fn try_from(id: &TraceId) -> Result<TraceLabel, Self::Error> {
        if std::matches!(id, &TraceId::INVALID) {
            Err(Error::UserInputError("invalid trace id".to_string()))
        } else {
            let trace_id = id.to_string();
            Ok(Self { id: trace_id })
        }
    }
}

#[derive(Clone)]
pub struct ReconcileMetrics {
    pub runs: Family<(), Counter>,
    pub failures: Family<ErrorLabels, Counter>,
    pub duration: HistogramWithExemplars<TraceLabel>,
}

impl Default for ReconcileMetrics {
    fn default() -> Self {
        Self {
            runs: Family::<(), Counter>::default(),
            failures: Family::<ErrorLabels, Counter>::default(),
            duration: HistogramWithExemplars::new([0.1, 0.5, 1., 5., 10.].into_iter()),
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub instance: String,
    pub error: String,
}

impl ReconcileMetrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, r: &mut Registry) -> Self {
        r.register_with_unit(
            "duration",
            "reconcile duration",
            Unit::Seconds,
            self.duration.clone(),
        );
        r.register("failures", "reconciliation errors", self.failures.clone());
        r.register("runs", "reconciliations", self.runs.clone());
        self
    }

    pub fn set_failure<K: ResourceExt>(&self, obj: &Arc<K>, e: &Error) {
        self.failures
            .get_or_create(&ErrorLabels {
                instance: obj.name_any(),
                error: e.metric_label(),
            })
            .inc();
    }

    pub fn count_and_measure(&self, trace_id: &TraceId) -> ReconcileMeasurer {
        self.runs.get_or_create(&()).inc();
        ReconcileMeasurer {
            start: Instant::now(),
            labels: trace_id.try_into().ok(),
            metric: self.duration.clone(),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    labels: Option<TraceLabel>,
    metric: HistogramWithExemplars<TraceLabel>,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        let labels = self.labels.take();
        self.metric.observe(duration, labels);
    }
}

/// Labels for `tmb_reconcile_backend_status_last_timestamp_seconds`: one
/// series per `(namespace, name, generation, condition, status, reason)`
/// tuple, as laid out in the external interfaces design.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BackendStatusLabels {
    pub namespace: String,
    pub name: String,
    pub generation: i64,
    pub condition: String,
    pub status: String,
    pub reason: String,
}

#[derive(Clone, Default)]
pub struct BackendStatusMetrics {
    last_timestamp: Family<BackendStatusLabels, Gauge>,
    /// Every distinct label set observed per `(namespace, name)`, since
    /// `status.conditions` only ever holds the most recently written
    /// condition and can't be replayed at deletion time to find earlier
    /// ones (e.g. a Pending series from before the backend went Accepted).
    observed: Arc<Mutex<HashMap<(String, String), HashSet<BackendStatusLabels>>>>,
}

impl BackendStatusMetrics {
    pub fn register(self, r: &mut Registry) -> Self {
        r.register_with_unit(
            "backend_status_last_timestamp",
            "unix time of the last status write for this condition",
            Unit::Seconds,
            self.last_timestamp.clone(),
        );
        self
    }

    /// Records the current time against the condition this status write
    /// just persisted.
    pub fn observe(&self, labels: BackendStatusLabels, now_unix: i64) {
        let key = (labels.namespace.clone(), labels.name.clone());
        self.observed
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .insert(labels.clone());
        self.last_timestamp.get_or_create(&labels).set(now_unix);
    }

    /// Drops every series ever observed for `(namespace, name)`, regardless
    /// of which condition/generation each one was recorded under. Called
    /// once the metric finalizer's cleanup runs, so the gauge doesn't carry
    /// stale series across the object's whole history forever.
    pub fn remove_all(&self, namespace: &str, name: &str) {
        let key = (namespace.to_string(), name.to_string());
        if let Some(labels) = self.observed.lock().unwrap().remove(&key) {
            for label in labels {
                self.last_timestamp.remove(&label);
            }
        }
    }
}
