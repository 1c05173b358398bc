/// Top-level error type for the public client API.
///
/// Only whole-request failures surface here. Malformed individual wire lines
/// are never errors; they decode to `WireEvent::Unrecognized`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input.
    #[error("validation error: {0}")]
    Validation(String),
    /// Network failure or non-success HTTP status. Not retried by this crate.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        status_code: Option<u16>,
    },
    /// Response shape was invalid (for example a successful run without a result).
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The remote workflow reported a failed run.
    #[error("workflow run {run_id} failed: {reason}")]
    RunFailed { run_id: String, reason: String },
    /// Polling attempts were exhausted while the run was still running.
    #[error("workflow run {run_id} timed out after {attempts} polls")]
    Timeout { run_id: String, attempts: u32 },
    /// The caller cancelled the operation.
    #[error("cancelled")]
    Cancelled,
}

impl ClientError {
    /// Creates a transport error without an HTTP status.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status_code: None,
        }
    }

    /// Creates a transport error tagged with the HTTP status that caused it.
    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status_code: Some(status),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Returns the HTTP status for transport errors caused by a non-2xx response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Transport { status_code, .. } => *status_code,
            _ => None,
        }
    }

    /// Returns true for network/HTTP failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport {
            message: value.to_string(),
            status_code: value.status().map(|s| s.as_u16()),
        }
    }
}
