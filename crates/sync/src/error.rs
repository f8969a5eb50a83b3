use thiserror::Error;

/// Errors from talking to the document server.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The write was stamped with a stale version
    #[error("version conflict: server is at version {current}")]
    Conflict { current: u64 },

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed response: {0}")]
    Parse(String),
}

impl SyncError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Conflict { .. })
    }

    /// Transient failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network(_) => true,
            SyncError::Http { status, .. } => *status >= 500 || *status == 429,
            SyncError::Conflict { .. } | SyncError::Parse(_) => false,
        }
    }
}
