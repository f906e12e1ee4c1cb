//! In-process remote with scriptable faults.

use super::{remote_changed, RemoteMarker, RemoteObject, RemoteStore};
use crate::credentials::AccessToken;
use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use posy_core::Snapshot;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Failure a [`MemoryRemote`] injects into every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFault {
    /// Calls fail as a network outage.
    Unreachable,
    /// Calls time out.
    Timeout,
    /// Uploads fail with a quota error.
    QuotaExceeded,
    /// Calls are rejected as unauthorized.
    AuthRevoked,
}

/// A remote held in memory.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    object: Mutex<Option<RemoteObject>>,
    fault: Mutex<Option<(RemoteFault, Option<usize>)>>,
    required_token: Mutex<Option<String>>,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
    calls: AtomicUsize,
}

impl MemoryRemote {
    /// Creates an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Injects `fault` into every call until cleared.
    pub fn set_fault(&self, fault: RemoteFault) {
        *self.fault.lock() = Some((fault, None));
    }

    /// Injects `fault` into the next `times` calls.
    pub fn fail_next(&self, fault: RemoteFault, times: usize) {
        *self.fault.lock() = Some((fault, Some(times)));
    }

    /// Removes any injected fault.
    pub fn clear_fault(&self) {
        *self.fault.lock() = None;
    }

    /// Rejects every token except `token` with 401.
    pub fn require_token(&self, token: impl Into<String>) {
        *self.required_token.lock() = Some(token.into());
    }

    /// Stores `snapshot` as if another device had uploaded it.
    pub fn put_snapshot(&self, snapshot: &Snapshot) -> SyncResult<()> {
        let bytes = snapshot.to_bytes()?;
        *self.object.lock() = Some(RemoteObject {
            marker: RemoteMarker::from(&snapshot.id),
            bytes,
        });
        Ok(())
    }

    /// Decodes the current remote copy.
    pub fn snapshot(&self) -> SyncResult<Option<Snapshot>> {
        match &*self.object.lock() {
            Some(object) => Ok(Some(Snapshot::from_bytes(&object.bytes)?)),
            None => Ok(None),
        }
    }

    /// Current marker.
    pub fn marker(&self) -> Option<RemoteMarker> {
        self.object.lock().as_ref().map(|o| o.marker.clone())
    }

    /// Number of successful uploads.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Number of successful downloads.
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Number of calls attempted, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn gate(&self, token: &AccessToken, uploading: bool) -> SyncResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut fault = self.fault.lock();
            if let Some((kind, remaining)) = *fault {
                let applies = !(kind == RemoteFault::QuotaExceeded && !uploading);
                if applies {
                    match remaining {
                        Some(0) => *fault = None,
                        Some(n) => {
                            *fault = Some((kind, Some(n - 1)));
                            return Err(fault_error(kind));
                        }
                        None => return Err(fault_error(kind)),
                    }
                }
            }
        }
        if let Some(required) = &*self.required_token.lock() {
            if token.secret() != required {
                return Err(SyncError::Unauthorized);
            }
        }
        Ok(())
    }
}

fn fault_error(fault: RemoteFault) -> SyncError {
    match fault {
        RemoteFault::Unreachable => SyncError::transient("remote unreachable"),
        RemoteFault::Timeout => SyncError::Timeout,
        RemoteFault::QuotaExceeded => SyncError::RemoteQuota("storage quota exceeded".into()),
        RemoteFault::AuthRevoked => SyncError::Unauthorized,
    }
}

impl RemoteStore for MemoryRemote {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn head(&self, token: &AccessToken) -> SyncResult<Option<RemoteMarker>> {
        self.gate(token, false)?;
        Ok(self.marker())
    }

    fn download(&self, token: &AccessToken) -> SyncResult<Option<RemoteObject>> {
        self.gate(token, false)?;
        let object = self.object.lock().clone();
        if object.is_some() {
            self.downloads.fetch_add(1, Ordering::SeqCst);
        }
        Ok(object)
    }

    fn upload(
        &self,
        token: &AccessToken,
        bytes: &[u8],
        marker: &RemoteMarker,
        expected: Option<&RemoteMarker>,
    ) -> SyncResult<()> {
        self.gate(token, true)?;
        let mut object = self.object.lock();
        let actual = object.as_ref().map(|o| &o.marker);
        if actual != expected {
            return Err(remote_changed(expected, actual));
        }
        *object = Some(RemoteObject {
            marker: marker.clone(),
            bytes: bytes.to_vec(),
        });
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> AccessToken {
        AccessToken::anonymous()
    }

    #[test]
    fn upload_checks_expected_marker() {
        let remote = MemoryRemote::new();
        let m1 = RemoteMarker::new("m1");
        remote.upload(&token(), b"one", &m1, None).unwrap();

        let err = remote
            .upload(&token(), b"two", &RemoteMarker::new("m2"), None)
            .unwrap_err();
        assert!(matches!(err, SyncError::RemoteChanged { .. }));

        remote
            .upload(&token(), b"two", &RemoteMarker::new("m2"), Some(&m1))
            .unwrap();
        let object = remote.download(&token()).unwrap().unwrap();
        assert_eq!(object.bytes, b"two");
        assert_eq!(remote.upload_count(), 2);
    }

    #[test]
    fn transient_faults_expire() {
        let remote = MemoryRemote::new();
        remote.fail_next(RemoteFault::Unreachable, 2);
        assert!(remote.head(&token()).unwrap_err().is_retryable());
        assert!(remote.head(&token()).unwrap_err().is_retryable());
        assert_eq!(remote.head(&token()).unwrap(), None);
        assert_eq!(remote.call_count(), 3);
    }

    #[test]
    fn quota_fault_only_hits_uploads() {
        let remote = MemoryRemote::new();
        remote.set_fault(RemoteFault::QuotaExceeded);
        assert!(remote.head(&token()).is_ok());
        assert!(matches!(
            remote.upload(&token(), b"x", &RemoteMarker::new("m"), None),
            Err(SyncError::RemoteQuota(_))
        ));
    }

    #[test]
    fn required_token_rejects_others() {
        let remote = MemoryRemote::new();
        remote.require_token("good");
        assert!(matches!(
            remote.head(&AccessToken::new("bad", None)),
            Err(SyncError::Unauthorized)
        ));
        assert!(remote.head(&AccessToken::new("good", None)).is_ok());
    }
}
