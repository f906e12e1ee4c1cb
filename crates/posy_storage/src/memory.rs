//! In-memory storage backend for testing.

use crate::backend::{validate_name, StorageBackend};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory storage backend.
///
/// This backend keeps all blobs in memory and is suitable for:
/// - Unit tests
/// - Integration tests that simulate disk failures
///
/// [`InMemoryBackend::set_read_only`] makes every mutating call fail with
/// [`StorageError::ReadOnly`], which is how tests exercise the
/// "storage unwritable" path without touching the file system.
///
/// # Example
///
/// ```rust
/// use posy_storage::{StorageBackend, InMemoryBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.write_atomic("a", b"1").unwrap();
/// backend.set_read_only(true);
/// assert!(backend.write_atomic("a", b"2").is_err());
/// assert_eq!(backend.read("a").unwrap().as_deref(), Some(&b"1"[..]));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
    read_only: AtomicBool,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the backend refuse (or accept again) all writes.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Returns a copy of every blob, for assertions.
    #[must_use]
    pub fn dump(&self) -> BTreeMap<String, Vec<u8>> {
        self.blobs.read().clone()
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.read_only.load(Ordering::SeqCst) {
            Err(StorageError::ReadOnly)
        } else {
            Ok(())
        }
    }
}

impl StorageBackend for InMemoryBackend {
    fn read(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_name(name)?;
        Ok(self.blobs.read().get(name).cloned())
    }

    fn write_atomic(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        validate_name(name)?;
        self.check_writable()?;
        self.blobs.write().insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&self, name: &str) -> StorageResult<bool> {
        validate_name(name)?;
        self.check_writable()?;
        Ok(self.blobs.write().remove(name).is_some())
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        validate_name(from)?;
        validate_name(to)?;
        self.check_writable()?;
        let mut blobs = self.blobs.write();
        let data = blobs
            .remove(from)
            .ok_or_else(|| StorageError::NotFound(from.to_string()))?;
        blobs.insert(to.to_string(), data);
        Ok(())
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        Ok(self.blobs.read().keys().cloned().collect())
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        validate_name(name)?;
        Ok(self.blobs.read().contains_key(name))
    }
}
