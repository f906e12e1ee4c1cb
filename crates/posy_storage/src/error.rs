//! Storage errors.

use std::io;
use thiserror::Error;

/// Result alias for backend calls.
pub type StorageResult<T> = Result<T, StorageError>;

/// Failures of a [`StorageBackend`](crate::StorageBackend).
#[derive(Debug, Error)]
pub enum StorageError {
    /// The filesystem refused.
    #[error("storage I/O failed: {0}")]
    Io(#[from] io::Error),

    /// The blob name is empty or contains path components.
    #[error("invalid blob name: {0:?}")]
    InvalidName(String),

    /// A rename source does not exist.
    #[error("blob not found: {0}")]
    NotFound(String),

    /// The backend was opened read-only.
    #[error("backend is read-only")]
    ReadOnly,
}
