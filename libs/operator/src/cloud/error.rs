/// Classification of a failed Traffic Manager API call, following the
/// taxonomy in the design's error handling section: not-found is a normal
/// state transition, throttling/server errors are transient and retried,
/// non-throttling client errors are recorded per-endpoint and not retried by
/// the error-return path, and transport failures without a response are
/// treated as transient.
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("cloud resource not found")]
    NotFound,

    #[error("cloud API throttled the request")]
    Throttled,

    #[error("cloud API rejected the request ({status}): {message}")]
    Client { status: u16, message: String },

    #[error("cloud API server error ({status})")]
    Server { status: u16 },

    #[error("cloud API transport error: {0}")]
    Transport(#[source] reqwest::Error),
}

impl CloudError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound)
    }

    /// Errors that warrant `Accepted=Unknown/Pending` and a requeue:
    /// throttling, server-side faults, and anything that never got an HTTP
    /// response at all.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CloudError::Throttled | CloudError::Server { .. } | CloudError::Transport(_)
        )
    }

    /// Non-throttling 4xx: recorded as a per-endpoint fault, not retried by
    /// the error-return path.
    pub fn is_client_fault(&self) -> bool {
        matches!(self, CloudError::Client { .. })
    }
}

/// Classifies a completed HTTP response into the taxonomy above. `status`
/// and a best-effort error body make up the `Client`/`Server` variants; 429
/// is always `Throttled` regardless of body content.
pub fn classify_status(status: u16, body: String) -> CloudError {
    match status {
        404 => CloudError::NotFound,
        429 => CloudError::Throttled,
        400..=499 => CloudError::Client {
            status,
            message: body,
        },
        _ => CloudError::Server { status },
    }
}
