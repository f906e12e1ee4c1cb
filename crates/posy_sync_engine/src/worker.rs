//! Background sync worker.

use crate::engine::{CycleTrigger, ReconciliationEngine};
use crate::error::{SyncError, SyncResult};
use posy_core::CoreError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How often the worker wakes to check for shutdown.
const POLL: Duration = Duration::from_millis(100);

/// Runs sync cycles on a dedicated thread: once at start, after local
/// changes settle for the debounce window, and on the configured interval.
pub struct SyncWorker {
    engine: Arc<ReconciliationEngine>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SyncWorker {
    /// Starts the worker thread.
    pub fn spawn(engine: Arc<ReconciliationEngine>) -> SyncResult<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = std::thread::Builder::new()
            .name("posy-sync".into())
            .spawn({
                let engine = engine.clone();
                let shutdown = shutdown.clone();
                move || run(&engine, &shutdown)
            })
            .map_err(|e| SyncError::Core(CoreError::Io(e)))?;
        Ok(Self {
            engine,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Returns true while the worker thread runs.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancels the running cycle and waits for the thread to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::SeqCst);
        self.engine.cancel();
        if handle.join().is_err() {
            tracing::error!("sync worker panicked");
        }
        self.engine.reset_cancel();
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SyncWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncWorker")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn run(engine: &ReconciliationEngine, shutdown: &AtomicBool) {
    let events = engine.store().subscribe();
    let debounce = engine.config().debounce;
    let interval = engine.config().sync_interval;
    tracing::info!(?debounce, ?interval, "sync worker started");

    let cycle = |trigger| {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        // Failures are logged by the engine; the next trigger retries.
        let _ = engine.run_cycle(trigger);
    };

    cycle(CycleTrigger::Startup);
    let mut last_event: Option<Instant> = None;
    let mut next_tick = interval.map(|i| Instant::now() + i);

    while !shutdown.load(Ordering::SeqCst) {
        match events.recv_timeout(POLL) {
            Ok(_) => last_event = Some(Instant::now()),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => std::thread::sleep(POLL),
        }

        if last_event.is_some_and(|at| at.elapsed() >= debounce) {
            last_event = None;
            cycle(CycleTrigger::LocalChange);
        }
        if let (Some(tick), Some(interval)) = (next_tick, interval) {
            if Instant::now() >= tick {
                next_tick = Some(Instant::now() + interval);
                cycle(CycleTrigger::Scheduled);
            }
        }
    }
    tracing::info!("sync worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RemoteSyncClient;
    use crate::config::{RetryConfig, SyncConfig};
    use crate::credentials::NoCredentials;
    use crate::remote::{MemoryRemote, RemoteFault};
    use crate::state::SyncStateStore;
    use posy_core::{BackupManager, CatalogRecord, Collection, Record, RecordId, RecordStore};
    use posy_storage::InMemoryBackend;

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn worker_syncs_local_changes() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        let backups = Arc::new(BackupManager::new(backend.clone(), store.clone()));
        let remote = Arc::new(MemoryRemote::new());
        let engine = Arc::new(
            ReconciliationEngine::new(
                store.clone(),
                backups,
                SyncStateStore::open(backend).unwrap(),
                SyncConfig::new()
                    .with_debounce(Duration::from_millis(20))
                    .with_sync_interval(None)
                    .with_retry(RetryConfig::no_retry()),
            )
            .with_client(RemoteSyncClient::new(
                remote.clone(),
                Arc::new(NoCredentials),
                RetryConfig::no_retry(),
            )),
        );

        let worker = SyncWorker::spawn(engine.clone()).unwrap();
        assert!(worker.is_running());

        store
            .put(
                Collection::Colors,
                Record::Catalog(CatalogRecord::new(RecordId::new("red").unwrap())),
                None,
            )
            .unwrap();
        assert!(wait_for(|| remote.upload_count() >= 1));
        assert!(wait_for(|| !store.is_dirty()));

        worker.shutdown();
        let snapshot = remote.snapshot().unwrap().unwrap();
        assert_eq!(snapshot.state.live_count(Collection::Colors), 1);
    }

    #[test]
    fn shutdown_interrupts_retry_backoff() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        let backups = Arc::new(BackupManager::new(backend.clone(), store.clone()));
        let remote = Arc::new(MemoryRemote::new());
        remote.set_fault(RemoteFault::Unreachable);
        let slow = RetryConfig::new(4).with_initial_delay(Duration::from_secs(2));
        let engine = Arc::new(
            ReconciliationEngine::new(
                store,
                backups,
                SyncStateStore::open(backend).unwrap(),
                SyncConfig::new().with_sync_interval(None).with_retry(slow.clone()),
            )
            .with_client(RemoteSyncClient::new(
                remote.clone(),
                Arc::new(NoCredentials),
                slow,
            )),
        );

        let worker = SyncWorker::spawn(engine.clone()).unwrap();
        assert!(wait_for(|| remote.call_count() >= 1));
        let started = Instant::now();
        worker.shutdown();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(remote.call_count() < 4);
        assert_eq!(engine.stats().last_outcome, Some("cancelled"));
    }
}
