use crate::cloud::error::CloudError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All errors possible to occur during reconciliation.
///
/// Variants map onto the taxonomy in the reconciler design: not-found
/// conditions are handled before they ever become an `Error` (they are
/// folded into the `Accepted` condition instead), so only transient and
/// programmer-facing failures reach this type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Any error originating from the `kube-rs` crate reading or writing a
    /// fleet API object.
    #[error("Kubernetes reported error: {0}")]
    KubeError(#[source] kube::Error),

    /// A call into the Traffic Manager cloud API failed in a way that isn't
    /// already folded into the `Accepted` condition.
    #[error("cloud API error: {0}")]
    CloudError(#[from] CloudError),

    /// One or more endpoint PUTs were rejected by the cloud as bad requests.
    /// Carried separately from `CloudError` so the reconciler can join many
    /// of these into the single error it returns per pass.
    #[error("{} endpoint(s) rejected by the cloud API", .0.len())]
    BadEndpoints(Vec<CloudError>),

    /// The object is missing data the contract requires (e.g. no namespace
    /// on a namespaced resource).
    #[error("invalid TrafficManagerBackend: {0}")]
    UserInputError(String),

    /// Adding or removing a finalizer failed.
    #[error("finalizer error: {0}")]
    FinalizerError(#[source] kube::Error),

    /// An optimistic-concurrency conflict on a status/finalizer write. The
    /// caller treats this as non-fatal: the next reconcile will re-read.
    #[error("version conflict updating {0}")]
    Conflict(String),
}

impl Error {
    /// An optimistic-concurrency conflict on a finalizer or status write.
    /// Per the design's error taxonomy this is swallowed rather than
    /// retried with backoff: the write that won the race already bumped
    /// `resourceVersion`, so the watch has already queued a fresh reconcile
    /// with the latest object.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// A short, low-cardinality label safe to use in a Prometheus label
    /// value.
    pub fn metric_label(&self) -> String {
        match self {
            Error::KubeError(_) => "kube_error",
            Error::CloudError(_) => "cloud_error",
            Error::BadEndpoints(_) => "bad_endpoints",
            Error::UserInputError(_) => "user_input_error",
            Error::FinalizerError(_) => "finalizer_error",
            Error::Conflict(_) => "conflict",
        }
        .to_string()
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        Error::KubeError(e)
    }
}
