//! Error types for Posy core.

use crate::types::{Collection, RecordId, RecordKey, Version};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Posy core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error (local storage unwritable or unreadable).
    #[error("storage error: {0}")]
    Storage(#[from] posy_storage::StorageError),

    /// I/O error outside the storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The record does not exist (or is a tombstone).
    #[error("record not found: {collection}/{id}")]
    NotFound {
        /// Collection searched.
        collection: Collection,
        /// Identifier that was not found.
        id: RecordId,
    },

    /// The caller's expected version is stale.
    #[error("version conflict on {key}: expected {expected:?}, found {actual:?}")]
    VersionConflict {
        /// The record that conflicted.
        key: RecordKey,
        /// Version the caller based its write on (`None` = create).
        expected: Option<Version>,
        /// Version currently stored (`None` = absent).
        actual: Option<Version>,
    },

    /// The order is Fulfilled or Cancelled and can no longer change.
    #[error("order {id} is {status} and cannot be modified")]
    TerminalState {
        /// Order identifier.
        id: RecordId,
        /// Its terminal status.
        status: String,
    },

    /// The requested order status change is not allowed.
    #[error("invalid order transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// The record is malformed or does not belong in the collection.
    #[error("invalid record: {message}")]
    InvalidRecord {
        /// What is wrong with the record.
        message: String,
    },

    /// A persisted file has an invalid format or version.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Snapshot payload checksum mismatch.
    #[error("snapshot checksum mismatch for {id}")]
    ChecksumMismatch {
        /// Snapshot that failed verification.
        id: String,
    },

    /// No snapshot with this identifier exists.
    #[error("snapshot not found: {id}")]
    SnapshotNotFound {
        /// The requested snapshot.
        id: String,
    },

    /// Another process holds the data directory.
    #[error("data directory locked: another process has exclusive access")]
    DirectoryLocked,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a not-found error.
    pub fn not_found(collection: Collection, id: &RecordId) -> Self {
        Self::NotFound {
            collection,
            id: id.clone(),
        }
    }

    /// Creates an invalid record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for errors caused by local storage being unusable.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let id = RecordId::new("rose-red").unwrap();
        let err = CoreError::not_found(Collection::Flowers, &id);
        assert_eq!(err.to_string(), "record not found: flowers/rose-red");

        let err = CoreError::VersionConflict {
            key: RecordKey::new(Collection::Flowers, id),
            expected: Some(Version::new(2)),
            actual: Some(Version::new(3)),
        };
        assert!(err.to_string().contains("flowers/rose-red"));
    }

    #[test]
    fn io_classification() {
        let err = CoreError::from(posy_storage::StorageError::ReadOnly);
        assert!(err.is_io());
        assert!(!CoreError::DirectoryLocked.is_io());
    }
}
