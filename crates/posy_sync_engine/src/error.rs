//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Credentials are absent, malformed or revoked. Sync is off for this
    /// cycle; local operation is unaffected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The remote rejected the access token (HTTP 401).
    #[error("access token rejected by remote")]
    Unauthorized,

    /// Network failure that may succeed on retry.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// A remote call exceeded its deadline.
    #[error("remote call timed out")]
    Timeout,

    /// The remote account is out of space or API quota.
    #[error("remote quota exceeded: {0}")]
    RemoteQuota(String),

    /// The remote copy has not changed since the known marker.
    #[error("remote not modified since last sync")]
    NotModified,

    /// The remote moved on between pull and push.
    #[error("remote changed concurrently: expected {expected:?}, found {actual:?}")]
    RemoteChanged {
        /// Marker the push was based on.
        expected: Option<String>,
        /// Marker found on the remote.
        actual: Option<String>,
    },

    /// The remote answered with something unusable.
    #[error("unexpected remote response: {0}")]
    Protocol(String),

    /// Local store error during sync.
    #[error("local store error: {0}")]
    Core(#[from] posy_core::CoreError),

    /// Local storage error while persisting sync bookkeeping.
    #[error("storage error: {0}")]
    Storage(#[from] posy_storage::StorageError),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a transient network error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientNetwork(message.into())
    }

    /// Creates an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_) | Self::Timeout)
    }

    /// Returns true for errors that mean sync cannot authenticate.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transient("connection reset").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(!SyncError::RemoteQuota("storage full".into()).is_retryable());
        assert!(!SyncError::auth("revoked").is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::RemoteChanged {
            expected: Some("a".into()),
            actual: Some("b".into()),
        };
        assert!(err.to_string().contains("\"a\""));
        assert_eq!(SyncError::NotModified.to_string(), "remote not modified since last sync");
    }
}
