//! Remote kept in a plain directory: a network share, a USB stick, or a
//! folder mirrored by a desktop sync client.

use super::{remote_changed, RemoteMarker, RemoteObject, RemoteStore};
use crate::credentials::AccessToken;
use crate::error::{SyncError, SyncResult};
use posy_core::SnapshotId;
use posy_storage::{FileBackend, StorageBackend};
use std::path::{Path, PathBuf};

/// A remote stored as `<root>/<folder>/<file>`.
#[derive(Debug, Clone)]
pub struct DirectoryRemote {
    root: PathBuf,
    folder: String,
    file: String,
}

impl DirectoryRemote {
    /// Creates a remote under `root`. `root` itself must exist when syncing;
    /// the folder inside it is created on first upload.
    pub fn new(root: impl Into<PathBuf>, folder: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            folder: folder.into(),
            file: file.into(),
        }
    }

    /// Directory holding the snapshot file.
    pub fn folder_path(&self) -> PathBuf {
        self.root.join(&self.folder)
    }

    fn backend(&self) -> SyncResult<FileBackend> {
        if !self.root.is_dir() {
            return Err(SyncError::transient(format!(
                "remote directory {} unavailable",
                self.root.display()
            )));
        }
        FileBackend::open(&self.folder_path()).map_err(|e| unavailable(&self.root, e))
    }

    fn read(&self, backend: &FileBackend) -> SyncResult<Option<RemoteObject>> {
        let Some(bytes) = backend.read(&self.file).map_err(|e| unavailable(&self.root, e))? else {
            return Ok(None);
        };
        let id = SnapshotId::of_bundle(&bytes)
            .map_err(|e| SyncError::protocol(format!("remote snapshot unreadable: {e}")))?;
        Ok(Some(RemoteObject {
            marker: RemoteMarker::from(&id),
            bytes,
        }))
    }
}

fn unavailable(root: &Path, err: posy_storage::StorageError) -> SyncError {
    SyncError::transient(format!("remote directory {}: {err}", root.display()))
}

impl RemoteStore for DirectoryRemote {
    fn describe(&self) -> String {
        self.folder_path().join(&self.file).display().to_string()
    }

    fn head(&self, _token: &AccessToken) -> SyncResult<Option<RemoteMarker>> {
        let backend = self.backend()?;
        Ok(self.read(&backend)?.map(|o| o.marker))
    }

    fn download(&self, _token: &AccessToken) -> SyncResult<Option<RemoteObject>> {
        let backend = self.backend()?;
        self.read(&backend)
    }

    fn upload(
        &self,
        _token: &AccessToken,
        bytes: &[u8],
        marker: &RemoteMarker,
        expected: Option<&RemoteMarker>,
    ) -> SyncResult<()> {
        let id = SnapshotId::of_bundle(bytes)?;
        if RemoteMarker::from(&id) != *marker {
            return Err(SyncError::protocol(format!(
                "marker {marker} does not match bundle {id}"
            )));
        }

        let backend = self.backend()?;
        let current = self.read(&backend)?.map(|o| o.marker);
        if current.as_ref() != expected {
            return Err(remote_changed(expected, current.as_ref()));
        }
        backend
            .write_atomic(&self.file, bytes)
            .map_err(|e| unavailable(&self.root, e))?;
        tracing::debug!(remote = %self.describe(), %marker, "snapshot uploaded");
        Ok(())
    }
}
