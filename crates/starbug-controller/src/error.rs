use miette::Diagnostic;
use thiserror::Error;

/// Controller error type for cache, queue and reconciliation operations
#[derive(Error, Debug, Diagnostic)]
pub enum ControllerError {
    /// API server answered with a non-success status
    #[error("API request failed with status {status}: {message}")]
    #[diagnostic(
        code(starbug::controller::api_error),
        help("Check the API server logs. 404 means the object is gone, 409 means it changed underneath us")
    )]
    Api {
        #[allow(unused)]
        status: u16,
        #[allow(unused)]
        message: String,
    },

    /// Request never produced a response
    #[error("HTTP transport error: {message}")]
    #[diagnostic(
        code(starbug::controller::transport_error),
        help("Verify the API server URL is correct and the server is reachable")
    )]
    Transport {
        #[allow(unused)]
        message: String,
    },

    /// Response body could not be decoded
    #[error("Failed to decode {what}: {message}")]
    #[diagnostic(
        code(starbug::controller::decode_error),
        help("The API server returned a body that does not match the expected schema")
    )]
    Decode {
        #[allow(unused)]
        what: String,
        #[allow(unused)]
        message: String,
    },

    /// Core library error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] starbug_core::StarbugError),

    /// Some pod create/delete calls of a batch failed
    #[error("{failed} of {attempted} pod {action} calls failed for job {job}: {message}")]
    #[diagnostic(
        code(starbug::controller::pod_control_failed),
        help("Expectations were lowered for every failed call; the job will be retried with backoff")
    )]
    PodControl {
        #[allow(unused)]
        job: String,
        #[allow(unused)]
        action: String,
        #[allow(unused)]
        failed: usize,
        #[allow(unused)]
        attempted: usize,
        #[allow(unused)]
        message: String,
    },

    /// Job status could not be persisted
    #[error("Failed to update status of job {job}: {message}")]
    #[diagnostic(
        code(starbug::controller::status_update_failed),
        help("The job will be re-queued and its status recomputed on the next sync")
    )]
    StatusUpdate {
        #[allow(unused)]
        job: String,
        #[allow(unused)]
        message: String,
    },

    /// Store was queried with an index that was never registered
    #[error("Index '{index}' is not registered on this store")]
    #[diagnostic(
        code(starbug::controller::unknown_index),
        help("Register the indexer when constructing the store with `Store::with_indexers()`")
    )]
    UnknownIndex {
        #[allow(unused)]
        index: String,
    },

    /// Pod template cannot be turned into a pod
    #[error("Invalid pod template for job {job}: {message}")]
    #[diagnostic(
        code(starbug::controller::invalid_template),
        help("Job templates must carry labels that match the job selector")
    )]
    InvalidTemplate {
        #[allow(unused)]
        job: String,
        #[allow(unused)]
        message: String,
    },

    /// Internal error
    #[error("Internal controller error: {message}")]
    #[diagnostic(
        code(starbug::controller::internal_error),
        help("This is likely a bug in starbug-controller. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

impl ControllerError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn decode(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            what: what.into(),
            message: message.into(),
        }
    }

    pub fn pod_control(
        job: impl Into<String>,
        action: impl Into<String>,
        failed: usize,
        attempted: usize,
        message: impl Into<String>,
    ) -> Self {
        Self::PodControl {
            job: job.into(),
            action: action.into(),
            failed,
            attempted,
            message: message.into(),
        }
    }

    pub fn status_update(job: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StatusUpdate {
            job: job.into(),
            message: message.into(),
        }
    }

    pub fn unknown_index(index: impl Into<String>) -> Self {
        Self::UnknownIndex {
            index: index.into(),
        }
    }

    pub fn invalid_template(job: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            job: job.into(),
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// 404 from the API server
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }

    /// 409 from the API server
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Api { status: 409, .. })
    }

    /// Whether re-queueing the key may succeed later.
    ///
    /// Malformed keys, selectors and templates fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Core(_) | Self::UnknownIndex { .. } | Self::InvalidTemplate { .. } => false,
            Self::Api { status, .. } => !matches!(status, 400 | 422),
            _ => true,
        }
    }
}
