//! The remote sync client: authentication, pull and push with retries.

use crate::config::RetryConfig;
use crate::credentials::{AccessToken, CredentialProvider};
use crate::error::{SyncError, SyncResult};
use crate::remote::{RemoteMarker, RemoteStore};
use posy_core::Snapshot;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest stretch a backoff wait goes without looking at the cancel flag.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// A snapshot pulled from the remote.
#[derive(Debug, Clone)]
pub struct PulledSnapshot {
    /// Marker the remote reported.
    pub marker: RemoteMarker,
    /// Decoded snapshot.
    pub snapshot: Snapshot,
}

/// Talks to one remote on behalf of the reconciliation engine.
pub struct RemoteSyncClient {
    remote: Arc<dyn RemoteStore>,
    credentials: Arc<dyn CredentialProvider>,
    retry: RetryConfig,
    cancelled: Arc<AtomicBool>,
}

impl RemoteSyncClient {
    /// Creates a client.
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        credentials: Arc<dyn CredentialProvider>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            remote,
            credentials,
            retry,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shares the engine's cancel flag, so a cancel also cuts short any
    /// backoff wait in progress.
    pub(crate) fn with_cancel_flag(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// Human-readable remote location.
    pub fn describe(&self) -> String {
        self.remote.describe()
    }

    /// Loads credentials and obtains a token.
    pub fn authenticate(&self) -> SyncResult<()> {
        self.with_retry("authenticate", || self.credentials.load().map(drop))
    }

    /// Downloads the remote snapshot unless it is still at `known`.
    ///
    /// Returns `Ok(None)` when the remote holds nothing yet and
    /// [`SyncError::NotModified`] when its marker equals `known`.
    pub fn pull(&self, known: Option<&RemoteMarker>) -> SyncResult<Option<PulledSnapshot>> {
        let head = self.call("head", |remote, token| remote.head(token))?;
        let Some(head) = head else {
            return Ok(None);
        };
        if Some(&head) == known {
            return Err(SyncError::NotModified);
        }

        let Some(object) = self.call("download", |remote, token| remote.download(token))? else {
            return Ok(None);
        };
        let snapshot = Snapshot::from_bytes(&object.bytes)
            .map_err(|e| SyncError::protocol(format!("remote snapshot rejected: {e}")))?;
        tracing::debug!(marker = %object.marker, records = snapshot.state.len(), "pulled remote snapshot");
        Ok(Some(PulledSnapshot {
            marker: object.marker,
            snapshot,
        }))
    }

    /// Uploads `snapshot`, provided the remote is still at `expected`.
    /// Returns the new marker.
    pub fn push(&self, snapshot: &Snapshot, expected: Option<&RemoteMarker>) -> SyncResult<RemoteMarker> {
        let bytes = snapshot.to_bytes()?;
        let marker = RemoteMarker::from(&snapshot.id);
        self.call("upload", |remote, token| {
            remote.upload(token, &bytes, &marker, expected)
        })?;
        tracing::info!(%marker, bytes = bytes.len(), "pushed snapshot");
        Ok(marker)
    }

    /// Runs a remote call with a token, refreshing it once on 401.
    fn call<T>(
        &self,
        op: &str,
        f: impl Fn(&dyn RemoteStore, &AccessToken) -> SyncResult<T>,
    ) -> SyncResult<T> {
        let mut refreshed = false;
        self.with_retry(op, || {
            let token = self.credentials.load()?;
            match f(&*self.remote, &token) {
                Err(SyncError::Unauthorized) if !refreshed => {
                    refreshed = true;
                    tracing::debug!(op, "token rejected, refreshing");
                    self.credentials.invalidate();
                    let token = self.credentials.refresh()?;
                    f(&*self.remote, &token).map_err(|e| match e {
                        SyncError::Unauthorized => {
                            SyncError::auth("remote rejected a freshly refreshed token")
                        }
                        other => other,
                    })
                }
                Err(SyncError::Unauthorized) => {
                    Err(SyncError::auth("remote rejected a freshly refreshed token"))
                }
                other => other,
            }
        })
    }

    /// Retries `f` with backoff while it fails with retryable errors.
    fn with_retry<T>(&self, op: &str, mut f: impl FnMut() -> SyncResult<T>) -> SyncResult<T> {
        let mut attempt = 0;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.retry.max_attempts => {
                    attempt += 1;
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(op, attempt, ?delay, error = %e, "remote call failed, retrying");
                    self.backoff(delay)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Sleeps for `delay` in short slices, failing with
    /// [`SyncError::Cancelled`] as soon as the cancel flag is raised.
    fn backoff(&self, delay: Duration) -> SyncResult<()> {
        let deadline = Instant::now() + delay;
        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(SyncError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(CANCEL_POLL));
        }
    }
}

impl std::fmt::Debug for RemoteSyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSyncClient")
            .field("remote", &self.remote.describe())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
