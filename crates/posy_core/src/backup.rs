//! Local snapshots: publish, list, prune and restore.
//!
//! Snapshots are published to the backups directory with an atomic write
//! and never modified afterwards. A restore always snapshots the current
//! state first, so every restore can itself be undone.
//!
//! ## Usage
//!
//! ```ignore
//! let backups = BackupManager::new(backups_backend, store.clone());
//! let snapshot = backups.snapshot()?;
//! // ... edits ...
//! let report = backups.restore(&snapshot.id)?;
//! backups.restore(&report.pre_restore)?; // undo
//! ```

use crate::clock::Clock;
use crate::config::RetentionPolicy;
use crate::error::{CoreError, CoreResult};
use crate::snapshot::{Snapshot, SnapshotId};
use crate::store::{RecordStore, StoreState};
use crate::types::Timestamp;
use parking_lot::Mutex;
use posy_storage::StorageBackend;
use std::sync::Arc;

/// Listing entry for a published snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// Snapshot id.
    pub id: SnapshotId,
    /// Creation time.
    pub created_at: Timestamp,
}

/// Result of a restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    /// The snapshot that was restored.
    pub restored: SnapshotId,
    /// Snapshot of the state that was replaced.
    pub pre_restore: SnapshotId,
    /// Store generation after the restore.
    pub generation: u64,
}

/// Manages the local snapshot history of a [`RecordStore`].
pub struct BackupManager {
    backend: Arc<dyn StorageBackend>,
    store: Arc<RecordStore>,
    clock: Arc<dyn Clock>,
    creating: Mutex<()>,
}

impl BackupManager {
    /// Creates a manager publishing into `backend`.
    pub fn new(backend: Arc<dyn StorageBackend>, store: Arc<RecordStore>) -> Self {
        let clock = Arc::clone(store.clock());
        Self {
            backend,
            store,
            clock,
            creating: Mutex::new(()),
        }
    }

    /// Snapshots the current store state.
    pub fn snapshot(&self) -> CoreResult<Snapshot> {
        self.snapshot_of(self.store.export_state())
    }

    /// Snapshots a given state (for example a merge result before it is
    /// installed).
    ///
    /// A snapshot of a different state never shares or precedes the
    /// creation time of the newest published one, so listing order is
    /// creation order even when the clock has not moved.
    pub fn snapshot_of(&self, state: StoreState) -> CoreResult<Snapshot> {
        let _creating = self.creating.lock();
        let now = self.clock.now();
        let mut snapshot = Snapshot::new(state, now)?;
        if let Some(latest) = self.latest()? {
            if latest.created_at >= now && latest.id != snapshot.id {
                let after = Timestamp::from_millis(latest.created_at.as_millis().saturating_add(1));
                snapshot = Snapshot::new(snapshot.state, after)?;
            }
        }
        self.publish(&snapshot)?;
        Ok(snapshot)
    }

    /// Writes `snapshot` to the backups directory unless it is already there.
    pub fn publish(&self, snapshot: &Snapshot) -> CoreResult<()> {
        let name = snapshot.id.file_name();
        if self.backend.exists(&name)? {
            return Ok(());
        }
        self.backend.write_atomic(&name, &snapshot.to_bytes()?)?;
        tracing::info!(
            id = %snapshot.id,
            records = snapshot.state.len(),
            "snapshot published"
        );
        Ok(())
    }

    /// Published snapshots, newest first.
    pub fn list(&self) -> CoreResult<Vec<SnapshotInfo>> {
        let mut ids: Vec<SnapshotId> = self
            .backend
            .list()?
            .iter()
            .filter_map(|name| SnapshotId::from_file_name(name))
            .collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids
            .into_iter()
            .map(|id| SnapshotInfo {
                created_at: id.created_at(),
                id,
            })
            .collect())
    }

    /// The newest snapshot, if any.
    pub fn latest(&self) -> CoreResult<Option<SnapshotInfo>> {
        Ok(self.list()?.into_iter().next())
    }

    /// Raw bundle bytes of a published snapshot.
    pub fn read_bytes(&self, id: &SnapshotId) -> CoreResult<Vec<u8>> {
        self.backend
            .read(&id.file_name())?
            .ok_or_else(|| CoreError::SnapshotNotFound { id: id.to_string() })
    }

    /// Loads and verifies a published snapshot.
    pub fn load(&self, id: &SnapshotId) -> CoreResult<Snapshot> {
        let snapshot = Snapshot::from_bytes(&self.read_bytes(id)?)?;
        if &snapshot.id != id {
            return Err(CoreError::invalid_format(format!(
                "file {} holds snapshot {}",
                id.file_name(),
                snapshot.id
            )));
        }
        Ok(snapshot)
    }

    /// Deletes snapshots outside `policy`. Returns the removed ids.
    pub fn prune(&self, policy: &RetentionPolicy) -> CoreResult<Vec<SnapshotId>> {
        let now = self.clock.now();
        let mut removed = Vec::new();

        for info in self.list()?.into_iter().skip(policy.retain_count()) {
            let expired = match policy.retain_age() {
                None => true,
                Some(age) => u128::from(now.millis_since(info.created_at)) > age.as_millis(),
            };
            if expired && self.backend.remove(&info.id.file_name())? {
                removed.push(info.id);
            }
        }

        if !removed.is_empty() {
            tracing::info!(removed = removed.len(), "pruned snapshots");
        }
        Ok(removed)
    }

    /// Restores the store to snapshot `id`, after snapshotting the current
    /// state. Writers wait for the whole restore, so `pre_restore` holds
    /// exactly what was replaced.
    pub fn restore(&self, id: &SnapshotId) -> CoreResult<RestoreReport> {
        let target = self.load(id)?;
        let (pre_restore, generation) = self
            .store
            .replace_state_after(&target.state, |previous| self.snapshot_of(previous.clone()))?;

        tracing::info!(restored = %id, pre_restore = %pre_restore.id, "store restored");
        Ok(RestoreReport {
            restored: target.id,
            pre_restore: pre_restore.id,
            generation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::record::{CatalogRecord, Record};
    use crate::types::{Collection, RecordId, Version};
    use posy_storage::InMemoryBackend;
    use std::time::Duration;

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<RecordStore>,
        backups: BackupManager,
        backend: Arc<InMemoryBackend>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_700_000_000_000)));
        let store = Arc::new(
            RecordStore::open(Arc::new(InMemoryBackend::new()), clock.clone()).unwrap(),
        );
        let backend = Arc::new(InMemoryBackend::new());
        let backups = BackupManager::new(backend.clone(), store.clone());
        Fixture {
            clock,
            store,
            backups,
            backend,
        }
    }

    fn put(store: &RecordStore, name: &str) {
        store
            .put(
                Collection::Flowers,
                Record::Catalog(CatalogRecord::new(RecordId::new(name).unwrap())),
                None,
            )
            .unwrap();
    }

    #[test]
    fn snapshot_list_and_load() {
        let f = fixture();
        put(&f.store, "rose");
        let first = f.backups.snapshot().unwrap();
        f.clock.advance(Duration::from_secs(1));
        put(&f.store, "lily");
        let second = f.backups.snapshot().unwrap();

        let listed: Vec<_> = f.backups.list().unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(listed, vec![second.id.clone(), first.id.clone()]);
        assert_eq!(f.backups.load(&first.id).unwrap().state.len(), 1);
        assert_eq!(f.backups.latest().unwrap().unwrap().id, second.id);
    }

    #[test]
    fn republishing_identical_snapshot_is_a_no_op() {
        let f = fixture();
        put(&f.store, "rose");
        let a = f.backups.snapshot().unwrap();
        let b = f.backups.snapshot().unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(f.backups.list().unwrap().len(), 1);
    }

    #[test]
    fn snapshots_in_one_millisecond_list_in_creation_order() {
        let f = fixture();
        let mut taken = Vec::new();
        for name in ["rose", "lily", "tulip", "iris"] {
            put(&f.store, name);
            taken.push(f.backups.snapshot().unwrap().id);
        }
        taken.reverse();

        let listed: Vec<_> = f.backups.list().unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(listed, taken);

        let removed = f.backups.prune(&RetentionPolicy::keep_last(1)).unwrap();
        assert_eq!(removed.len(), 3);
        assert_eq!(f.backups.latest().unwrap().unwrap().id, taken[0]);
        assert_eq!(f.backups.load(&taken[0]).unwrap().state, f.store.export_state());
    }

    #[test]
    fn returning_to_an_earlier_state_still_lists_newest() {
        let f = fixture();
        put(&f.store, "rose");
        let first = f.backups.snapshot().unwrap();
        put(&f.store, "lily");
        f.backups.snapshot().unwrap();

        let again = f.backups.snapshot_of(first.state.clone()).unwrap();
        assert_ne!(again.id, first.id);
        assert_eq!(f.backups.latest().unwrap().unwrap().id, again.id);
        assert_eq!(f.backups.list().unwrap().len(), 3);
    }

    #[test]
    fn load_missing_snapshot() {
        let f = fixture();
        let id = SnapshotId::parse("snap-0000000000001-000000000000").unwrap();
        assert!(matches!(
            f.backups.load(&id),
            Err(CoreError::SnapshotNotFound { .. })
        ));
    }

    #[test]
    fn prune_keeps_newest_count() {
        let f = fixture();
        for i in 0..5 {
            put(&f.store, &format!("f{i}"));
            f.backups.snapshot().unwrap();
            f.clock.advance(Duration::from_secs(60));
        }
        let newest = f.backups.list().unwrap()[0].id.clone();

        let removed = f.backups.prune(&RetentionPolicy::keep_last(2)).unwrap();
        assert_eq!(removed.len(), 3);
        let left = f.backups.list().unwrap();
        assert_eq!(left.len(), 2);
        assert_eq!(left[0].id, newest);

        f.backups.prune(&RetentionPolicy::keep_last(0)).unwrap();
        assert_eq!(f.backups.list().unwrap().len(), 1);
    }

    #[test]
    fn prune_spares_young_snapshots() {
        let f = fixture();
        for i in 0..4 {
            put(&f.store, &format!("f{i}"));
            f.backups.snapshot().unwrap();
            f.clock.advance(Duration::from_secs(3600));
        }
        // Ages are now 4h, 3h, 2h and 1h.
        let policy = RetentionPolicy::keep_last(1).with_max_age(Duration::from_secs(150 * 60));
        let removed = f.backups.prune(&policy).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(f.backups.list().unwrap().len(), 2);
    }

    #[test]
    fn restore_is_reversible() {
        let f = fixture();
        put(&f.store, "rose");
        let before = f.backups.snapshot().unwrap();
        f.clock.advance(Duration::from_secs(1));

        put(&f.store, "lily");
        f.store
            .delete(Collection::Flowers, &RecordId::new("rose").unwrap(), Some(Version::new(1)))
            .unwrap();
        let edited = f.store.export_state();

        let report = f.backups.restore(&before.id).unwrap();
        assert_eq!(report.restored, before.id);
        assert_eq!(f.store.export_state(), before.state);

        f.clock.advance(Duration::from_secs(1));
        f.backups.restore(&report.pre_restore).unwrap();
        assert_eq!(f.store.export_state(), edited);
    }

    #[test]
    fn restore_refuses_corrupt_snapshot() {
        let f = fixture();
        put(&f.store, "rose");
        let snap = f.backups.snapshot().unwrap();
        let mut bytes = f.backups.read_bytes(&snap.id).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 1;
        f.backend.write_atomic(&snap.id.file_name(), &bytes).unwrap();
        put(&f.store, "lily");

        assert!(f.backups.restore(&snap.id).is_err());
        assert_eq!(f.store.list(Collection::Flowers).count(), 2);
    }
}
