//! Reconciliation engine state machine.
//!
//! One cycle walks `Detecting → LocalBackup → RemoteCheck → Merging →
//! Committing` and comes back to `Idle`, or rests in `AuthFailed` or
//! `ConflictPending`. Local data is only ever changed by one all-or-nothing
//! commit, and the sync state only advances once that commit and the remote
//! push have both succeeded.

use crate::client::{PulledSnapshot, RemoteSyncClient};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::merge::{merge, MergeConflict, MergeOutcome};
use crate::remote::RemoteMarker;
use crate::state::{SyncState, SyncStateStore};
use parking_lot::{Mutex, RwLock};
use posy_core::{
    BackupManager, ConflictChoice, CoreError, Record, RecordKey, RecordStore, SnapshotId,
    StoreState, Timestamp,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The current state of the reconciliation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Resting between cycles.
    Idle,
    /// Deciding whether a cycle is warranted.
    Detecting,
    /// Taking the local safety snapshot.
    LocalBackup,
    /// Authenticating and pulling.
    RemoteCheck,
    /// Merging local and remote state.
    Merging,
    /// Committing locally and pushing.
    Committing,
    /// The last cycle could not authenticate.
    AuthFailed,
    /// Conflicts await manual resolution.
    ConflictPending,
}

impl EngineState {
    /// Returns true while a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            EngineState::Detecting
                | EngineState::LocalBackup
                | EngineState::RemoteCheck
                | EngineState::Merging
                | EngineState::Committing
        )
    }

    /// Lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::Detecting => "detecting",
            EngineState::LocalBackup => "local-backup",
            EngineState::RemoteCheck => "remote-check",
            EngineState::Merging => "merging",
            EngineState::Committing => "committing",
            EngineState::AuthFailed => "auth-failed",
            EngineState::ConflictPending => "conflict-pending",
        }
    }
}

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleTrigger {
    /// The store changed.
    LocalChange,
    /// The periodic tick.
    Scheduled,
    /// Explicitly requested.
    Manual,
    /// Process start.
    Startup,
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing warranted a cycle, or no remote is configured.
    Skipped,
    /// Local and remote already agreed.
    UpToDate,
    /// Changes were exchanged and the sync state advanced.
    Synced,
    /// Records changed on both sides; both versions are retained.
    ConflictPending(Vec<MergeConflict>),
    /// Credentials are missing, malformed or revoked.
    AuthFailed(String),
    /// A transient problem; the next cycle will try again.
    Deferred(String),
    /// The remote is out of space or quota.
    QuotaExceeded(String),
    /// The cycle was cancelled.
    Cancelled,
}

impl CycleOutcome {
    /// Lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            CycleOutcome::Skipped => "skipped",
            CycleOutcome::UpToDate => "up-to-date",
            CycleOutcome::Synced => "synced",
            CycleOutcome::ConflictPending(_) => "conflict-pending",
            CycleOutcome::AuthFailed(_) => "auth-failed",
            CycleOutcome::Deferred(_) => "deferred",
            CycleOutcome::QuotaExceeded(_) => "quota-exceeded",
            CycleOutcome::Cancelled => "cancelled",
        }
    }

    /// Returns true if local and remote agree after the cycle.
    pub fn is_in_sync(&self) -> bool {
        matches!(self, CycleOutcome::UpToDate | CycleOutcome::Synced)
    }
}

/// Report of one cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// What started the cycle.
    pub trigger: CycleTrigger,
    /// How it ended.
    pub outcome: CycleOutcome,
    /// Last snapshot the cycle published.
    pub snapshot: Option<SnapshotId>,
    /// Records taken from the remote.
    pub applied_remote: usize,
    /// Whether a snapshot was uploaded.
    pub pushed: bool,
    /// Wall time.
    pub duration: Duration,
}

/// Side kept by [`ReconciliationEngine::resolve_conflict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keep the local record.
    KeepLocal,
    /// Take the remote copy.
    AcceptRemote,
}

impl From<Resolution> for ConflictChoice {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::KeepLocal => ConflictChoice::KeepLocal,
            Resolution::AcceptRemote => ConflictChoice::AcceptRemote,
        }
    }
}

/// Statistics about sync cycles.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Cycles run, skipped ones included.
    pub cycles: u64,
    /// Cycles that ended in sync.
    pub synced: u64,
    /// Snapshots uploaded.
    pub pushes: u64,
    /// Records taken from the remote.
    pub records_applied: u64,
    /// Conflicts raised.
    pub conflicts: u64,
    /// Cycles that ended without reaching the remote.
    pub failures: u64,
    /// Last time local and remote agreed.
    pub last_sync_time: Option<Instant>,
    /// Outcome of the last cycle.
    pub last_outcome: Option<&'static str>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Summary for status displays.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    /// Engine state.
    pub state: EngineState,
    /// Remote description, if one is configured.
    pub remote: Option<String>,
    /// Persisted sync state.
    pub sync_state: SyncState,
    /// Records changed since the last sync.
    pub pending_changes: usize,
    /// Conflicts awaiting resolution.
    pub conflicts: usize,
    /// Whether the store changed since the last cycle.
    pub dirty: bool,
}

#[derive(Default)]
struct Progress {
    snapshot: Option<SnapshotId>,
    applied_remote: usize,
    pushed: bool,
}

enum RemoteView {
    Empty,
    Unchanged,
    Fetched(PulledSnapshot),
}

/// Drives backups and remote sync for one store.
pub struct ReconciliationEngine {
    store: Arc<RecordStore>,
    backups: Arc<BackupManager>,
    client: Option<RemoteSyncClient>,
    sync_state: SyncStateStore,
    config: SyncConfig,
    state: RwLock<EngineState>,
    stats: RwLock<EngineStats>,
    cycle_lock: Mutex<()>,
    cancelled: Arc<AtomicBool>,
    last_cycle_at: Mutex<Option<Timestamp>>,
}

impl ReconciliationEngine {
    /// Creates an engine with no remote: cycles only take local backups.
    pub fn new(
        store: Arc<RecordStore>,
        backups: Arc<BackupManager>,
        sync_state: SyncStateStore,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            backups,
            client: None,
            sync_state,
            config,
            state: RwLock::new(EngineState::Idle),
            stats: RwLock::new(EngineStats::default()),
            cycle_lock: Mutex::new(()),
            cancelled: Arc::new(AtomicBool::new(false)),
            last_cycle_at: Mutex::new(None),
        }
    }

    /// Attaches a remote.
    pub fn with_client(mut self, client: RemoteSyncClient) -> Self {
        self.client = Some(client.with_cancel_flag(self.cancelled.clone()));
        self
    }

    /// The store being synced.
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the current state.
    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    /// Returns true if a remote is attached.
    pub fn has_remote(&self) -> bool {
        self.client.is_some()
    }

    /// The persisted sync state.
    pub fn sync_state(&self) -> SyncState {
        self.sync_state.get()
    }

    /// Current status.
    pub fn status(&self) -> SyncStatus {
        let sync_state = self.sync_state.get();
        let local = self.store.export_state();
        SyncStatus {
            state: self.state(),
            remote: self.client.as_ref().map(RemoteSyncClient::describe),
            pending_changes: sync_state.pending_changes(&local).len(),
            conflicts: local.conflicts.len(),
            dirty: self.store.is_dirty(),
            sync_state,
        }
    }

    /// Conflicts awaiting resolution.
    pub fn pending_conflicts(&self) -> Vec<MergeConflict> {
        pending_conflicts(&self.store.export_state())
    }

    /// Cancels the running cycle at its next phase boundary or during a
    /// retry wait. A cancel issued while idle cancels the next cycle.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Checks if the cycle was cancelled.
    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sets the state.
    fn set_state(&self, state: EngineState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            tracing::trace!(from = previous.name(), to = state.name(), "engine state");
        }
    }

    /// Forgets the sync state; the next cycle treats every record as unsynced.
    pub fn reset_sync_state(&self) -> SyncResult<()> {
        let _cycle = self.cycle_lock.lock();
        self.sync_state.reset()
    }

    /// Runs one cycle. Only local storage failures are errors; everything
    /// remote is reported in the outcome.
    pub fn run_cycle(&self, trigger: CycleTrigger) -> SyncResult<CycleReport> {
        let _cycle = self.cycle_lock.lock();
        let start = Instant::now();
        let mut progress = Progress::default();

        let result = match self.cycle(trigger, &mut progress) {
            Err(SyncError::Cancelled) => Ok(CycleOutcome::Cancelled),
            other => other,
        };
        self.reset_cancel();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.set_state(EngineState::Idle);
                let mut stats = self.stats.write();
                stats.cycles += 1;
                stats.failures += 1;
                stats.last_outcome = Some("error");
                stats.last_error = Some(e.to_string());
                tracing::error!(?trigger, error = %e, "sync cycle failed");
                return Err(e);
            }
        };

        match &outcome {
            CycleOutcome::AuthFailed(_) => self.set_state(EngineState::AuthFailed),
            CycleOutcome::ConflictPending(_) => self.set_state(EngineState::ConflictPending),
            _ => self.set_state(EngineState::Idle),
        }
        if outcome != CycleOutcome::Skipped || progress.snapshot.is_some() {
            *self.last_cycle_at.lock() = Some(self.store.clock().now());
        }

        let report = CycleReport {
            trigger,
            outcome,
            snapshot: progress.snapshot,
            applied_remote: progress.applied_remote,
            pushed: progress.pushed,
            duration: start.elapsed(),
        };
        self.record(&report);
        Ok(report)
    }

    fn record(&self, report: &CycleReport) {
        let mut stats = self.stats.write();
        stats.cycles += 1;
        stats.records_applied += report.applied_remote as u64;
        if report.pushed {
            stats.pushes += 1;
        }
        stats.last_outcome = Some(report.outcome.name());
        match &report.outcome {
            CycleOutcome::UpToDate | CycleOutcome::Synced => {
                stats.synced += 1;
                stats.last_sync_time = Some(Instant::now());
                stats.last_error = None;
            }
            CycleOutcome::ConflictPending(conflicts) => stats.conflicts += conflicts.len() as u64,
            CycleOutcome::AuthFailed(reason)
            | CycleOutcome::Deferred(reason)
            | CycleOutcome::QuotaExceeded(reason) => {
                stats.failures += 1;
                stats.last_error = Some(reason.clone());
            }
            CycleOutcome::Skipped | CycleOutcome::Cancelled => {}
        }

        match &report.outcome {
            CycleOutcome::Skipped => {
                tracing::debug!(trigger = ?report.trigger, "sync cycle skipped");
            }
            CycleOutcome::AuthFailed(reason)
            | CycleOutcome::Deferred(reason)
            | CycleOutcome::QuotaExceeded(reason) => tracing::warn!(
                outcome = report.outcome.name(),
                reason = %reason,
                "sync cycle did not complete; local data is unaffected"
            ),
            outcome => tracing::info!(
                outcome = outcome.name(),
                applied = report.applied_remote,
                pushed = report.pushed,
                elapsed_ms = report.duration.as_millis() as u64,
                "sync cycle finished"
            ),
        }
    }

    /// Decides whether a cycle is warranted.
    fn warranted(&self, trigger: CycleTrigger, sync: &SyncState) -> bool {
        if matches!(trigger, CycleTrigger::Manual | CycleTrigger::Startup) || self.store.is_dirty() {
            return true;
        }
        let Some(interval) = self.config.sync_interval else {
            return false;
        };
        let last = sync.last_synced_at.max(*self.last_cycle_at.lock());
        match last {
            Some(last) => {
                let elapsed = self.store.clock().now().millis_since(last);
                u128::from(elapsed) >= interval.as_millis()
            }
            None => true,
        }
    }

    fn cycle(&self, trigger: CycleTrigger, progress: &mut Progress) -> SyncResult<CycleOutcome> {
        self.set_state(EngineState::Detecting);
        let sync = self.sync_state.get();
        if !self.warranted(trigger, &sync) {
            return Ok(CycleOutcome::Skipped);
        }

        // Every remote interaction is preceded by a local rollback point.
        self.set_state(EngineState::LocalBackup);
        let (local, generation) = self.store.export_with_generation();
        let backup = self.backups.snapshot_of(local.clone())?;
        progress.snapshot = Some(backup.id.clone());
        if let Some(policy) = &self.config.retention {
            if let Err(e) = self.backups.prune(policy) {
                tracing::warn!(error = %e, "snapshot pruning failed");
            }
        }

        let Some(client) = &self.client else {
            self.store.mark_clean(generation);
            return Ok(CycleOutcome::Skipped);
        };
        self.check_cancelled()?;

        self.set_state(EngineState::RemoteCheck);
        if let Err(e) = client.authenticate() {
            return self.remote_failure(e);
        }
        let remote = match client.pull(sync.remote_marker.as_ref()) {
            Ok(Some(pulled)) => RemoteView::Fetched(pulled),
            Ok(None) => RemoteView::Empty,
            Err(SyncError::NotModified) => RemoteView::Unchanged,
            Err(e) => return self.remote_failure(e),
        };
        self.check_cancelled()?;

        self.set_state(EngineState::Merging);
        let now = self.store.clock().now();
        let outcome = match &remote {
            RemoteView::Fetched(pulled) => merge(&local, &pulled.snapshot.state, &sync.base, now),
            RemoteView::Empty | RemoteView::Unchanged => MergeOutcome {
                conflicts: pending_conflicts(&local),
                merged: local.clone(),
                applied_remote: Vec::new(),
                kept_local: Vec::new(),
            },
        };
        self.check_cancelled()?;

        self.set_state(EngineState::Committing);
        let commit = match self.store.apply_merge(&local, &outcome.merged) {
            Ok(commit) => commit,
            Err(CoreError::VersionConflict { key, .. }) => {
                return Ok(CycleOutcome::Deferred(format!(
                    "{key} changed during sync; retrying next cycle"
                )));
            }
            Err(e) => return Err(e.into()),
        };
        progress.applied_remote = outcome.applied_remote.len();
        if let RemoteView::Fetched(pulled) = &remote {
            self.acknowledge_applied(&outcome.applied_remote, &pulled.snapshot.state)?;
        }
        // Writes racing the commit keep the store dirty.
        let clean_to = if commit.generation_before == generation {
            commit.generation
        } else {
            generation
        };

        if outcome.has_conflicts() {
            self.store.mark_clean(clean_to);
            for conflict in &outcome.conflicts {
                tracing::warn!(
                    key = %conflict.key,
                    local = %conflict.local.version,
                    remote = %conflict.remote.version,
                    "record changed on both sides"
                );
            }
            return Ok(CycleOutcome::ConflictPending(outcome.conflicts));
        }

        let merged = outcome.merged;
        let (needs_push, expected) = match &remote {
            RemoteView::Fetched(pulled) => (
                merged.collections != pulled.snapshot.state.collections,
                Some(pulled.marker.clone()),
            ),
            RemoteView::Unchanged => (
                !sync.pending_changes(&merged).is_empty(),
                sync.remote_marker.clone(),
            ),
            RemoteView::Empty => (!merged.is_empty(), None),
        };

        if !needs_push {
            let adopted: Option<(RemoteMarker, SnapshotId)> = match &remote {
                RemoteView::Fetched(pulled) => {
                    Some((pulled.marker.clone(), pulled.snapshot.id.clone()))
                }
                _ => None,
            };
            self.sync_state.update(|s| match adopted {
                Some((marker, id)) => s.advance(marker, &id, &merged, now),
                None => {
                    s.base = merged.marks();
                    s.last_synced_at = Some(now);
                }
            })?;
            self.store.mark_clean(clean_to);
            return Ok(if progress.applied_remote > 0 {
                CycleOutcome::Synced
            } else {
                CycleOutcome::UpToDate
            });
        }

        let snapshot = self.backups.snapshot_of(merged.clone())?;
        progress.snapshot = Some(snapshot.id.clone());
        self.check_cancelled()?;

        let marker = match client.push(&snapshot, expected.as_ref()) {
            Ok(marker) => marker,
            Err(e) => return self.remote_failure(e),
        };
        progress.pushed = true;
        self.sync_state
            .update(|s| s.advance(marker, &snapshot.id, &merged, now))?;
        self.store.mark_clean(clean_to);
        Ok(CycleOutcome::Synced)
    }

    /// Records the remote marks of records just taken from the remote, so a
    /// cycle that stops before the push does not later mistake them for
    /// local edits. The remote marker is left alone.
    fn acknowledge_applied(&self, applied: &[RecordKey], remote: &StoreState) -> SyncResult<()> {
        if applied.is_empty() {
            return Ok(());
        }
        self.sync_state.update(|s| {
            for key in applied {
                if let Some(record) = remote.get(key) {
                    s.base.insert(key.clone(), record.mark());
                }
            }
        })?;
        Ok(())
    }

    /// Maps a remote failure onto a cycle outcome. Local failures stay errors.
    fn remote_failure(&self, error: SyncError) -> SyncResult<CycleOutcome> {
        match error {
            e if e.is_auth() => Ok(CycleOutcome::AuthFailed(e.to_string())),
            SyncError::RemoteQuota(message) => Ok(CycleOutcome::QuotaExceeded(message)),
            SyncError::Cancelled => Ok(CycleOutcome::Cancelled),
            e @ (SyncError::TransientNetwork(_)
            | SyncError::Timeout
            | SyncError::Protocol(_)
            | SyncError::RemoteChanged { .. }
            | SyncError::NotModified) => Ok(CycleOutcome::Deferred(e.to_string())),
            e => Err(e),
        }
    }

    /// Settles a conflict and marks the remote side as seen, so the next
    /// cycle pushes the resolution.
    pub fn resolve_conflict(&self, key: &RecordKey, resolution: Resolution) -> SyncResult<Record> {
        let _cycle = self.cycle_lock.lock();
        let (record, copy) = self.store.settle_conflict(key, resolution.into())?;
        self.sync_state.update(|s| {
            s.base.insert(key.clone(), copy.remote_mark);
        })?;
        if self.state() == EngineState::ConflictPending && self.store.conflicts().is_empty() {
            self.set_state(EngineState::Idle);
        }
        tracing::info!(%key, ?resolution, version = %record.version(), "conflict resolved");
        Ok(record)
    }
}

fn pending_conflicts(state: &StoreState) -> Vec<MergeConflict> {
    state
        .conflicts
        .iter()
        .map(|(key, copy)| {
            let local = state.get(key);
            MergeConflict {
                key: key.clone(),
                local: local.map_or(copy.local_mark, Record::mark),
                remote: copy.remote_mark,
                local_modified_at: local.map_or(copy.detected_at, Record::modified_at),
                remote_modified_at: copy.remote.modified_at(),
            }
        })
        .collect()
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("state", &self.state())
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::credentials::NoCredentials;
    use crate::remote::MemoryRemote;
    use posy_core::{CatalogRecord, Collection, ManualClock, RecordId};
    use posy_storage::InMemoryBackend;
    use serde_json::json;

    struct Fixture {
        store: Arc<RecordStore>,
        backups: Arc<BackupManager>,
        clock: Arc<ManualClock>,
        backend: Arc<InMemoryBackend>,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(InMemoryBackend::new());
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000)));
        let store = Arc::new(RecordStore::open(backend.clone(), clock.clone()).unwrap());
        let backups = Arc::new(BackupManager::new(backend.clone(), store.clone()));
        Fixture {
            store,
            backups,
            clock,
            backend,
        }
    }

    fn engine(fx: &Fixture, remote: Option<Arc<MemoryRemote>>) -> ReconciliationEngine {
        let config = SyncConfig::new()
            .with_retry(RetryConfig::no_retry())
            .with_sync_interval(Some(Duration::from_secs(60)));
        let engine = ReconciliationEngine::new(
            fx.store.clone(),
            fx.backups.clone(),
            SyncStateStore::open(fx.backend.clone()).unwrap(),
            config,
        );
        match remote {
            Some(remote) => engine.with_client(RemoteSyncClient::new(
                remote,
                Arc::new(NoCredentials),
                RetryConfig::no_retry(),
            )),
            None => engine,
        }
    }

    fn put_flower(store: &RecordStore, id: &str) {
        let record = Record::Catalog(
            CatalogRecord::new(RecordId::new(id).unwrap()).with_attribute("price", json!(1)),
        );
        store.put(Collection::Flowers, record, None).unwrap();
    }

    #[test]
    fn state_checks() {
        assert!(EngineState::Merging.is_active());
        assert!(!EngineState::Idle.is_active());
        assert!(!EngineState::ConflictPending.is_active());
        assert!(CycleOutcome::Synced.is_in_sync());
        assert!(!CycleOutcome::Deferred("x".into()).is_in_sync());
    }

    #[test]
    fn local_only_cycle_backs_up_and_skips() {
        let fx = fixture();
        let engine = engine(&fx, None);
        put_flower(&fx.store, "rose");

        let report = engine.run_cycle(CycleTrigger::LocalChange).unwrap();
        assert_eq!(report.outcome, CycleOutcome::Skipped);
        assert!(report.snapshot.is_some());
        assert!(!fx.store.is_dirty());
        assert_eq!(fx.backups.list().unwrap().len(), 1);

        // Clean store, interval not elapsed: nothing to do.
        let report = engine.run_cycle(CycleTrigger::Scheduled).unwrap();
        assert_eq!(report.outcome, CycleOutcome::Skipped);
        assert!(report.snapshot.is_none());

        fx.clock.advance(Duration::from_secs(61));
        let report = engine.run_cycle(CycleTrigger::Scheduled).unwrap();
        assert!(report.snapshot.is_some());
    }

    #[test]
    fn first_cycle_pushes_then_up_to_date() {
        let fx = fixture();
        let remote = Arc::new(MemoryRemote::new());
        let engine = engine(&fx, Some(remote.clone()));
        put_flower(&fx.store, "rose");

        let report = engine.run_cycle(CycleTrigger::Manual).unwrap();
        assert_eq!(report.outcome, CycleOutcome::Synced);
        assert!(report.pushed);
        assert_eq!(remote.upload_count(), 1);
        assert_eq!(engine.sync_state().remote_marker, remote.marker());
        assert!(!fx.store.is_dirty());

        let report = engine.run_cycle(CycleTrigger::Manual).unwrap();
        assert_eq!(report.outcome, CycleOutcome::UpToDate);
        assert!(!report.pushed);
        assert_eq!(remote.upload_count(), 1);
        assert_eq!(engine.stats().synced, 2);
    }

    #[test]
    fn cancelled_before_start_leaves_everything() {
        let fx = fixture();
        let remote = Arc::new(MemoryRemote::new());
        let engine = engine(&fx, Some(remote.clone()));
        put_flower(&fx.store, "rose");

        engine.cancel();
        let report = engine.run_cycle(CycleTrigger::Manual).unwrap();
        assert_eq!(report.outcome, CycleOutcome::Cancelled);
        assert_eq!(remote.call_count(), 0);
        assert!(engine.sync_state().is_initial());
        assert!(fx.store.is_dirty());

        // The flag is cleared after the cancelled cycle.
        let report = engine.run_cycle(CycleTrigger::Manual).unwrap();
        assert_eq!(report.outcome, CycleOutcome::Synced);
    }

    #[test]
    fn local_failure_is_an_error() {
        let fx = fixture();
        let engine = engine(&fx, Some(Arc::new(MemoryRemote::new())));
        put_flower(&fx.store, "rose");
        fx.backend.set_read_only(true);

        assert!(engine.run_cycle(CycleTrigger::Manual).is_err());
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.stats().last_outcome, Some("error"));
    }
}
