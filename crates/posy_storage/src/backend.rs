//! Storage backend trait definition.

use crate::error::{StorageError, StorageResult};

/// A named-blob storage backend.
///
/// Backends are **opaque byte stores** addressed by flat names such as
/// `flowers.json` or `snap-0001700000000-3f2a9c01d4e5.posy`. Callers own
/// the meaning of every blob.
///
/// # Invariants
///
/// - `write_atomic` either leaves the previous content or the new content
///   visible under `name`, never a mix, even across a crash
/// - After `write_atomic`, `remove` or `rename` returns, the change is durable
/// - `list` never reports in-flight temporary files
/// - Backends must be `Send + Sync` for concurrent access
pub trait StorageBackend: Send + Sync {
    /// Reads the blob stored under `name`, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or an I/O error occurs.
    fn read(&self, name: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Replaces the blob under `name` with `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, the backend is read-only,
    /// or an I/O error occurs. On error the previous content is intact.
    fn write_atomic(&self, name: &str, data: &[u8]) -> StorageResult<()>;

    /// Removes the blob under `name`. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is read-only or an I/O error occurs.
    fn remove(&self, name: &str) -> StorageResult<bool>;

    /// Atomically renames `from` to `to`, replacing any blob under `to`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if `from` does not exist.
    fn rename(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Lists all blob names in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing cannot be read.
    fn list(&self) -> StorageResult<Vec<String>>;

    /// Returns true if a blob exists under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn exists(&self, name: &str) -> StorageResult<bool> {
        Ok(self.read(name)?.is_some())
    }
}

/// Suffix used for in-flight temporary files.
pub(crate) const TEMP_SUFFIX: &str = ".tmp";

/// Checks that `name` is a flat, non-empty blob name.
///
/// # Errors
///
/// Returns [`StorageError::InvalidName`] for empty names, names with path
/// separators, `.`/`..`, or names ending in the temporary suffix.
pub fn validate_name(name: &str) -> StorageResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
        || name.ends_with(TEMP_SUFFIX);
    if bad {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_flat_names() {
        assert!(validate_name("flowers.json").is_ok());
        assert!(validate_name("snap-0000000000001-abcdef012345.posy").is_ok());
    }

    #[test]
    fn rejects_paths_and_temp_names() {
        for name in ["", ".", "..", "a/b", "a\\b", "x.tmp"] {
            assert!(
                matches!(validate_name(name), Err(StorageError::InvalidName(_))),
                "{name:?} should be rejected"
            );
        }
    }
}
