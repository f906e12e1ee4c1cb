//! Remote copies of the store.
//!
//! A remote holds exactly one snapshot bundle plus the revision marker it
//! was uploaded with. The marker is the snapshot id, so equal markers mean
//! equal content.

mod directory;
mod drive;
mod memory;

pub use directory::DirectoryRemote;
pub use drive::{DriveRemote, DRIVE_API_BASE, DRIVE_UPLOAD_BASE};
pub use memory::{MemoryRemote, RemoteFault};

use crate::credentials::AccessToken;
use crate::error::SyncResult;
use posy_core::SnapshotId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Revision marker of a remote snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteMarker(String);

impl RemoteMarker {
    /// Wraps a marker string.
    pub fn new(marker: impl Into<String>) -> Self {
        Self(marker.into())
    }

    /// The marker as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&SnapshotId> for RemoteMarker {
    fn from(id: &SnapshotId) -> Self {
        Self(id.as_str().to_string())
    }
}

impl fmt::Display for RemoteMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A downloaded bundle and the marker it carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Revision marker.
    pub marker: RemoteMarker,
    /// Encoded snapshot bundle.
    pub bytes: Vec<u8>,
}

/// Storage for the remote copy.
///
/// Implementations report an expired or rejected token as
/// [`SyncError::Unauthorized`](crate::SyncError::Unauthorized) so the client
/// can refresh and retry.
pub trait RemoteStore: Send + Sync {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// Marker of the current remote copy, or `None` if there is none.
    fn head(&self, token: &AccessToken) -> SyncResult<Option<RemoteMarker>>;

    /// Downloads the current remote copy.
    fn download(&self, token: &AccessToken) -> SyncResult<Option<RemoteObject>>;

    /// Replaces the remote copy with `bytes` tagged `marker`, provided the
    /// remote is still at `expected` (`None` = no remote copy yet).
    ///
    /// Fails with [`SyncError::RemoteChanged`](crate::SyncError::RemoteChanged)
    /// otherwise.
    fn upload(
        &self,
        token: &AccessToken,
        bytes: &[u8],
        marker: &RemoteMarker,
        expected: Option<&RemoteMarker>,
    ) -> SyncResult<()>;
}

impl<R: RemoteStore + ?Sized> RemoteStore for std::sync::Arc<R> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn head(&self, token: &AccessToken) -> SyncResult<Option<RemoteMarker>> {
        (**self).head(token)
    }

    fn download(&self, token: &AccessToken) -> SyncResult<Option<RemoteObject>> {
        (**self).download(token)
    }

    fn upload(
        &self,
        token: &AccessToken,
        bytes: &[u8],
        marker: &RemoteMarker,
        expected: Option<&RemoteMarker>,
    ) -> SyncResult<()> {
        (**self).upload(token, bytes, marker, expected)
    }
}

pub(crate) fn remote_changed(
    expected: Option<&RemoteMarker>,
    actual: Option<&RemoteMarker>,
) -> crate::SyncError {
    crate::SyncError::RemoteChanged {
        expected: expected.map(|m| m.to_string()),
        actual: actual.map(|m| m.to_string()),
    }
}
