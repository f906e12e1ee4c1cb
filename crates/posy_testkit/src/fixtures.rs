//! Test fixtures and store helpers.

use posy_core::{
    BackupManager, CatalogRecord, Collection, LineItem, ManualClock, OrderRecord, Record,
    RecordId, RecordStore, StoreState, Timestamp, Version,
};
use posy_storage::{FileBackend, InMemoryBackend, StorageBackend};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Start time of every [`TestStore`] clock.
pub const TEST_EPOCH: Timestamp = Timestamp::from_millis(1_700_000_000_000);

/// A record store with backups and a manual clock.
pub struct TestStore {
    /// The store.
    pub store: Arc<RecordStore>,
    /// Backups of the store, kept in the same backend.
    pub backups: Arc<BackupManager>,
    /// The backend holding everything.
    pub backend: Arc<dyn StorageBackend>,
    /// The clock stamping writes.
    pub clock: Arc<ManualClock>,
    memory: Option<Arc<InMemoryBackend>>,
    temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates an in-memory store.
    pub fn memory() -> Self {
        let memory = Arc::new(InMemoryBackend::new());
        Self::with_backend(memory.clone(), Some(memory), None)
    }

    /// Creates a store in a fresh temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let backend =
            Arc::new(FileBackend::open(temp_dir.path()).expect("Failed to open file backend"));
        Self::with_backend(backend, None, Some(temp_dir))
    }

    fn with_backend(
        backend: Arc<dyn StorageBackend>,
        memory: Option<Arc<InMemoryBackend>>,
        temp_dir: Option<TempDir>,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(TEST_EPOCH));
        let store = Arc::new(
            RecordStore::open(backend.clone(), clock.clone()).expect("Failed to open store"),
        );
        let backups = Arc::new(BackupManager::new(backend.clone(), store.clone()));
        Self {
            store,
            backups,
            backend,
            clock,
            memory,
            temp_dir,
        }
    }

    /// Directory of a file-based store.
    pub fn path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// Opens a second store over the same backend, as after a restart.
    pub fn reopen(&self) -> RecordStore {
        RecordStore::open(self.backend.clone(), self.clock.clone()).expect("Failed to reopen store")
    }

    /// Makes an in-memory backend refuse writes.
    ///
    /// # Panics
    ///
    /// Panics for file-based stores.
    pub fn set_read_only(&self, read_only: bool) {
        self.memory
            .as_ref()
            .expect("read-only switch needs an in-memory store")
            .set_read_only(read_only);
    }

    /// Current store state.
    pub fn state(&self) -> StoreState {
        self.store.export_state()
    }
}

/// Builds a flower record with a price attribute.
pub fn flower(id: &str, price: u64) -> Record {
    Record::Catalog(
        CatalogRecord::new(RecordId::new(id).expect("valid id"))
            .with_attribute("price", json!(price)),
    )
}

/// Builds a flower stamped with a version and modification time, as a
/// remote copy would carry it.
pub fn stamped_flower(id: &str, price: u64, version: u64, modified_at: Timestamp) -> Record {
    let mut record = flower(id, price);
    record.stamp(Version::new(version), modified_at);
    record
}

/// Inserts a new flower and returns it as stored.
pub fn put_flower(store: &RecordStore, id: &str, price: u64) -> Record {
    store
        .put(Collection::Flowers, flower(id, price), None)
        .expect("put flower");
    store
        .get(Collection::Flowers, &RecordId::new(id).expect("valid id"))
        .expect("read back flower")
}

/// Rewrites an existing flower's price and returns it as stored.
pub fn update_flower(store: &RecordStore, id: &str, price: u64) -> Record {
    let id = RecordId::new(id).expect("valid id");
    let current = store.get(Collection::Flowers, &id).expect("flower exists");
    store
        .put(
            Collection::Flowers,
            flower(id.as_str(), price),
            Some(current.version()),
        )
        .expect("update flower");
    store.get(Collection::Flowers, &id).expect("read back flower")
}

/// A draft order with one line.
pub fn draft_order(store: &RecordStore, bouquet: &str, quantity: u32, unit_price: u64) -> OrderRecord {
    store
        .create_order(vec![LineItem {
            catalog_id: RecordId::new(bouquet).expect("valid id"),
            quantity,
            unit_price,
        }])
        .expect("create order")
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A store with a few flowers, colors and bouquets.
    pub fn small_shop() -> TestStore {
        let shop = TestStore::memory();
        for (i, name) in ["rose-red", "tulip", "lily", "iris"].into_iter().enumerate() {
            put_flower(&shop.store, name, 100 * (i as u64 + 1));
        }
        for color in ["red", "white", "yellow"] {
            shop.store
                .put(
                    Collection::Colors,
                    Record::Catalog(CatalogRecord::new(RecordId::new(color).expect("valid id"))),
                    None,
                )
                .expect("put color");
        }
        shop.store
            .put(
                Collection::Bouquets,
                Record::Catalog(
                    CatalogRecord::new(RecordId::new("spring").expect("valid id"))
                        .with_attribute("flowers", json!(["tulip", "iris"])),
                ),
                None,
            )
            .expect("put bouquet");
        shop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let shop = TestStore::memory();
        let rose = put_flower(&shop.store, "rose", 10);
        assert_eq!(rose.version(), Version::INITIAL);
        assert_eq!(rose.modified_at(), TEST_EPOCH);

        let rose = update_flower(&shop.store, "rose", 12);
        assert_eq!(rose.version(), Version::new(2));
        assert_eq!(shop.reopen().generation(), 0);
        assert!(shop.path().is_none());
    }

    #[test]
    fn file_store_survives_reopen() {
        let shop = TestStore::file();
        put_flower(&shop.store, "tulip", 3);
        let reopened = shop.reopen();
        assert_eq!(reopened.list(Collection::Flowers).count(), 1);
        assert!(shop.path().is_some());
    }

    #[test]
    fn small_shop_scenario() {
        let shop = scenarios::small_shop();
        let state = shop.state();
        assert_eq!(state.live_count(Collection::Flowers), 4);
        assert_eq!(state.live_count(Collection::Colors), 3);
        assert_eq!(state.live_count(Collection::Bouquets), 1);
    }
}
