//! Persisted sync bookkeeping.

use crate::error::SyncResult;
use crate::remote::RemoteMarker;
use parking_lot::RwLock;
use posy_core::{Collection, RecordKey, RecordMark, SnapshotId, StoreState, Timestamp};
use posy_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// File holding the sync state.
pub const SYNC_STATE_FILE: &str = "sync_state.json";

const SYNC_STATE_FORMAT: u16 = 1;

fn current_format() -> u16 {
    SYNC_STATE_FORMAT
}

/// The last confirmed synchronization point.
///
/// Advanced only after a merge was committed locally and pushed (or found
/// already present) remotely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default = "current_format")]
    format: u16,
    /// Marker of the remote snapshot at the last sync.
    #[serde(default)]
    pub remote_marker: Option<RemoteMarker>,
    /// Snapshot last synced, per collection.
    #[serde(default)]
    pub last_snapshot: BTreeMap<Collection, SnapshotId>,
    /// Mark of every record at the last sync: the merge base.
    #[serde(default)]
    pub base: BTreeMap<RecordKey, RecordMark>,
    /// When the last sync completed.
    #[serde(default)]
    pub last_synced_at: Option<Timestamp>,
}

impl SyncState {
    /// Returns true if no sync has completed yet.
    pub fn is_initial(&self) -> bool {
        self.remote_marker.is_none() && self.base.is_empty()
    }

    /// Records whose local mark differs from the base, conflict copies
    /// excluded.
    pub fn pending_changes(&self, local: &StoreState) -> Vec<RecordKey> {
        local
            .iter()
            .filter(|(key, record)| self.base.get(key) != Some(&record.mark()))
            .map(|(key, _)| key)
            .collect()
    }

    /// Records a completed sync of `state`, published as `snapshot`.
    pub fn advance(
        &mut self,
        marker: RemoteMarker,
        snapshot: &SnapshotId,
        state: &StoreState,
        at: Timestamp,
    ) {
        self.format = SYNC_STATE_FORMAT;
        self.remote_marker = Some(marker);
        self.last_snapshot = Collection::ALL
            .into_iter()
            .map(|c| (c, snapshot.clone()))
            .collect();
        self.base = state.marks();
        self.last_synced_at = Some(at);
    }
}

/// Loads and saves [`SyncState`] in the data directory.
pub struct SyncStateStore {
    backend: Arc<dyn StorageBackend>,
    current: RwLock<SyncState>,
}

impl SyncStateStore {
    /// Opens the state file. A missing file starts empty; a corrupt one is
    /// logged and also starts empty, which at worst re-raises conflicts.
    pub fn open(backend: Arc<dyn StorageBackend>) -> SyncResult<Self> {
        let state = match backend.read(SYNC_STATE_FILE)? {
            None => SyncState::default(),
            Some(data) => match serde_json::from_slice::<SyncState>(&data) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(error = %e, "sync state unreadable, starting from scratch");
                    SyncState::default()
                }
            },
        };
        Ok(Self {
            backend,
            current: RwLock::new(state),
        })
    }

    /// The current state.
    pub fn get(&self) -> SyncState {
        self.current.read().clone()
    }

    /// Persists `state` atomically, then makes it current.
    pub fn save(&self, state: SyncState) -> SyncResult<()> {
        let data = serde_json::to_vec_pretty(&state)?;
        self.backend.write_atomic(SYNC_STATE_FILE, &data)?;
        *self.current.write() = state;
        Ok(())
    }

    /// Applies `change` to a copy of the state and saves it.
    pub fn update(&self, change: impl FnOnce(&mut SyncState)) -> SyncResult<SyncState> {
        let mut state = self.get();
        change(&mut state);
        self.save(state.clone())?;
        Ok(state)
    }

    /// Re-initializes: the next cycle treats every record as unsynced.
    pub fn reset(&self) -> SyncResult<()> {
        self.backend.remove(SYNC_STATE_FILE)?;
        *self.current.write() = SyncState::default();
        tracing::info!("sync state reset");
        Ok(())
    }
}

impl std::fmt::Debug for SyncStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.current.read();
        f.debug_struct("SyncStateStore")
            .field("remote_marker", &state.remote_marker)
            .field("base_records", &state.base.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use posy_core::{CatalogRecord, Record, RecordId, Snapshot, Version};
    use posy_storage::InMemoryBackend;

    fn state_with(id: &str, version: u64) -> StoreState {
        let mut record = Record::Catalog(CatalogRecord::new(RecordId::new(id).unwrap()));
        record.stamp(Version::new(version), Timestamp::from_millis(version));
        let mut state = StoreState::new();
        state.insert(Collection::Flowers, record);
        state
    }

    #[test]
    fn starts_empty_and_persists() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = SyncStateStore::open(backend.clone()).unwrap();
        assert!(store.get().is_initial());

        let local = state_with("rose", 1);
        let snapshot = Snapshot::new(local.clone(), Timestamp::from_millis(9)).unwrap();
        store
            .update(|s| {
                s.advance(
                    RemoteMarker::from(&snapshot.id),
                    &snapshot.id,
                    &local,
                    Timestamp::from_millis(10),
                )
            })
            .unwrap();

        let reopened = SyncStateStore::open(backend).unwrap().get();
        assert_eq!(reopened, store.get());
        assert_eq!(reopened.last_snapshot.len(), Collection::ALL.len());
        assert_eq!(reopened.last_synced_at, Some(Timestamp::from_millis(10)));
        assert!(reopened.pending_changes(&local).is_empty());
    }

    #[test]
    fn pending_changes_tracks_marks() {
        let mut state = SyncState::default();
        let synced = state_with("rose", 1);
        state.base = synced.marks();

        let edited = state_with("rose", 2);
        let pending = state.pending_changes(&edited);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id.as_str(), "rose");

        let mut added = synced.clone();
        added.insert(
            Collection::Colors,
            Record::Catalog(CatalogRecord::new(RecordId::new("red").unwrap())),
        );
        assert_eq!(state.pending_changes(&added).len(), 1);
    }

    #[test]
    fn corrupt_file_starts_fresh_and_reset_removes_it() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.write_atomic(SYNC_STATE_FILE, b"not json").unwrap();
        let store = SyncStateStore::open(backend.clone()).unwrap();
        assert!(store.get().is_initial());

        store
            .update(|s| s.remote_marker = Some(RemoteMarker::new("m")))
            .unwrap();
        assert!(backend.exists(SYNC_STATE_FILE).unwrap());
        store.reset().unwrap();
        assert!(!backend.exists(SYNC_STATE_FILE).unwrap());
        assert!(store.get().is_initial());
    }
}
