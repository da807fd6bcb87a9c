use thiserror::Error;

/// Failures of a single backend interaction.  None of these are fatal to a
/// surface: callers log them and wait for the next cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("request to {endpoint} failed: {source}")]
    Http {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned HTTP {status}")]
    Status {
        endpoint: &'static str,
        status: reqwest::StatusCode,
    },

    #[error("malformed {endpoint} payload: {reason}")]
    Decode {
        endpoint: &'static str,
        reason: String,
    },

    #[error("event stream closed by server")]
    StreamClosed,
}

impl SyncError {
    /// Network-level failure (as opposed to a bad response).
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Http { .. } | SyncError::StreamClosed)
            || matches!(self, SyncError::Status { status, .. } if status.is_server_error())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
