//! The record store.
//!
//! Each collection is held in memory behind its own mutex and persisted to
//! its own JSON file with an atomic replace. Writers to one collection are
//! serialized by that mutex; writes that span collections (merge, restore,
//! conflict resolution) take every lock they need in [`Collection::ALL`]
//! order and go through a staged commit.
//!
//! ```rust
//! use posy_core::{Collection, CatalogRecord, Record, RecordId, RecordStore};
//!
//! let store = RecordStore::open_in_memory().unwrap();
//! let id = RecordId::new("tulip").unwrap();
//! let v1 = store
//!     .put(Collection::Flowers, Record::Catalog(CatalogRecord::new(id.clone())), None)
//!     .unwrap();
//! assert_eq!(v1.as_u64(), 1);
//! assert!(store.is_dirty());
//! assert_eq!(store.get(Collection::Flowers, &id).unwrap().version(), v1);
//! ```

mod commit;
mod cursor;
mod state;

pub use commit::{Recovery, JOURNAL};
pub use cursor::RecordCursor;
pub use state::{CollectionMap, ConflictCopy, StoreState};

use crate::change_feed::{ChangeEvent, ChangeFeed, ChangeType};
use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, CoreResult};
use crate::record::{LineItem, OrderRecord, OrderStatus, Record};
use crate::types::{Collection, RecordId, RecordKey, Timestamp, Version};
use parking_lot::{Mutex, MutexGuard};
use posy_storage::{InMemoryBackend, StorageBackend};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

/// File holding unresolved conflict copies.
pub const CONFLICTS_FILE: &str = "conflicts.json";

const FILE_FORMAT: u16 = 1;

type ConflictMap = BTreeMap<RecordKey, ConflictCopy>;

#[derive(Serialize)]
struct CollectionFileRef<'a> {
    format: u16,
    collection: Collection,
    records: Vec<&'a Record>,
}

#[derive(Deserialize)]
struct CollectionFile {
    format: u16,
    collection: Collection,
    records: Vec<Record>,
}

#[derive(Serialize, Deserialize)]
struct ConflictsFile {
    format: u16,
    conflicts: ConflictMap,
}

/// Which side a resolved conflict keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Keep the local record, discard the remote copy.
    KeepLocal,
    /// Replace the local record with the remote copy.
    AcceptRemote,
}

/// Outcome of [`RecordStore::apply_merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeCommit {
    /// Store generation when the merge was checked.
    pub generation_before: u64,
    /// Store generation after the merge was installed.
    pub generation: u64,
    /// Number of records (and conflict copies) written.
    pub changed: usize,
}

/// Versioned, durable storage for catalog records and orders.
pub struct RecordStore {
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    collections: [Mutex<Arc<CollectionMap>>; 5],
    conflicts: Mutex<Arc<ConflictMap>>,
    generation: AtomicU64,
    clean_generation: AtomicU64,
    feed: ChangeFeed,
    commit_lock: Mutex<()>,
}

impl RecordStore {
    /// Opens the store on `backend`, finishing any interrupted commit.
    pub fn open(backend: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>) -> CoreResult<Self> {
        let recovery = commit::recover(&*backend)?;
        if recovery != Recovery::default() {
            tracing::info!(?recovery, "recovered record store");
        }

        let [flowers, colors, bouquets, pricing, orders] =
            Collection::ALL.map(|c| load_collection(&*backend, c));
        let collections = [flowers?, colors?, bouquets?, pricing?, orders?]
            .map(|map| Mutex::new(Arc::new(map)));
        let conflicts = load_conflicts(&*backend)?;

        tracing::debug!(
            records = collections.iter().map(|m| m.lock().len()).sum::<usize>(),
            conflicts = conflicts.len(),
            "opened record store"
        );

        Ok(Self {
            backend,
            clock,
            collections,
            conflicts: Mutex::new(Arc::new(conflicts)),
            generation: AtomicU64::new(0),
            clean_generation: AtomicU64::new(0),
            feed: ChangeFeed::new(),
            commit_lock: Mutex::new(()),
        })
    }

    /// Opens an empty store held in memory.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open(Arc::new(InMemoryBackend::new()), Arc::new(SystemClock))
    }

    /// The clock used to stamp writes.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn slot(&self, collection: Collection) -> &Mutex<Arc<CollectionMap>> {
        &self.collections[collection as usize]
    }

    fn lock_all(&self) -> Vec<MutexGuard<'_, Arc<CollectionMap>>> {
        Collection::ALL.iter().map(|c| self.slot(*c).lock()).collect()
    }

    /// Writes files through the staged commit. Commits never overlap, so a
    /// journal left by one is finished before the next touches any file.
    fn commit(&self, files: &[(String, Vec<u8>)]) -> CoreResult<()> {
        let _serial = self.commit_lock.lock();
        commit::commit_files(&*self.backend, files)
    }

    fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    // ---- reads ----

    /// Returns the live record `id`, or `NotFound` (also for tombstones).
    pub fn get(&self, collection: Collection, id: &RecordId) -> CoreResult<Record> {
        self.slot(collection)
            .lock()
            .get(id)
            .filter(|r| !r.is_deleted())
            .cloned()
            .ok_or_else(|| CoreError::not_found(collection, id))
    }

    /// Returns the order `id`.
    pub fn get_order(&self, id: &RecordId) -> CoreResult<OrderRecord> {
        match self.get(Collection::Orders, id)? {
            Record::Order(order) => Ok(order),
            Record::Catalog(_) => Err(CoreError::not_found(Collection::Orders, id)),
        }
    }

    /// Lists the live records of `collection`, ordered by id.
    pub fn list(&self, collection: Collection) -> RecordCursor {
        RecordCursor::new(Arc::clone(&self.slot(collection).lock()))
    }

    /// Returns a consistent copy of every collection and the conflict copies.
    pub fn export_state(&self) -> StoreState {
        self.export_with_generation().0
    }

    /// Like [`export_state`](Self::export_state), also returning the
    /// generation the state corresponds to.
    pub fn export_with_generation(&self) -> (StoreState, u64) {
        let guards = self.lock_all();
        let conflicts = self.conflicts.lock();
        let generation = self.generation.load(Ordering::SeqCst);

        let mut state = StoreState::new();
        for (collection, guard) in Collection::ALL.into_iter().zip(&guards) {
            state.collections.insert(collection, (***guard).clone());
        }
        state.conflicts = (**conflicts).clone();
        (state, generation)
    }

    /// Unresolved conflict copies.
    pub fn conflicts(&self) -> ConflictMap {
        (**self.conflicts.lock()).clone()
    }

    // ---- dirty tracking ----

    /// Number of durable writes since open.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Returns true if there are writes not yet covered by a sync.
    pub fn is_dirty(&self) -> bool {
        self.generation() > self.clean_generation.load(Ordering::SeqCst)
    }

    /// Records that everything up to `generation` has been synced.
    pub fn mark_clean(&self, generation: u64) {
        self.clean_generation.fetch_max(generation, Ordering::SeqCst);
    }

    /// Subscribes to change events emitted after each durable write.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    /// The change feed.
    pub fn change_feed(&self) -> &ChangeFeed {
        &self.feed
    }

    // ---- single-record writes ----

    fn check_expected(
        key: &RecordKey,
        live: Option<&Record>,
        expected: Option<Version>,
    ) -> CoreResult<()> {
        match (expected, live) {
            (None, Some(r)) => Err(CoreError::VersionConflict {
                key: key.clone(),
                expected: None,
                actual: Some(r.version()),
            }),
            (Some(v), Some(r)) if r.version() != v => Err(CoreError::VersionConflict {
                key: key.clone(),
                expected: Some(v),
                actual: Some(r.version()),
            }),
            (Some(_), None) => Err(CoreError::not_found(key.collection, &key.id)),
            _ => Ok(()),
        }
    }

    /// Writes `records` into the locked collection and publishes them.
    fn commit_records(
        &self,
        collection: Collection,
        guard: &mut MutexGuard<'_, Arc<CollectionMap>>,
        records: Vec<(Record, ChangeType)>,
    ) -> CoreResult<()> {
        let mut next = CollectionMap::clone(guard);
        for (record, _) in &records {
            next.insert(record.id().clone(), record.clone());
        }
        let bytes = encode_collection(collection, &next)?;
        self.commit(&[(collection.file_name().to_string(), bytes)])?;
        **guard = Arc::new(next);

        let generation = self.bump_generation();
        for (record, change_type) in records {
            tracing::debug!(
                key = %RecordKey::new(collection, record.id().clone()),
                version = %record.version(),
                ?change_type,
                "record written"
            );
            self.feed.emit(ChangeEvent {
                generation,
                key: RecordKey::new(collection, record.id().clone()),
                version: record.version(),
                change_type,
            });
        }
        Ok(())
    }

    /// Creates or updates a record and returns its new version.
    ///
    /// `expected` is `None` to create (a tombstone may be recreated) or the
    /// version the caller last read. The record's own version and
    /// modification time are ignored and assigned here.
    pub fn put(
        &self,
        collection: Collection,
        mut record: Record,
        expected: Option<Version>,
    ) -> CoreResult<Version> {
        record.validate_for(collection)?;
        let key = RecordKey::new(collection, record.id().clone());
        let now = self.clock.now();

        let mut guard = self.slot(collection).lock();
        let current = guard.get(&key.id);
        let live = current.filter(|r| !r.is_deleted());
        Self::check_expected(&key, live, expected)?;

        if let Record::Order(new) = &mut record {
            match live {
                Some(Record::Order(old)) => {
                    check_order_change(old, new.status)?;
                    new.created_at = old.created_at;
                }
                _ if new.created_at == Timestamp::default() => new.created_at = now,
                _ => {}
            }
        }

        let version = current.map_or(Version::INITIAL, |r| r.version().next());
        let change_type = if live.is_some() {
            ChangeType::Update
        } else {
            ChangeType::Insert
        };
        record.set_deleted(false);
        record.stamp(version, now);

        self.commit_records(collection, &mut guard, vec![(record, change_type)])?;
        Ok(version)
    }

    /// Tombstones a record and returns the tombstone's version.
    ///
    /// `expected` of `None` deletes whatever version is current.
    pub fn delete(
        &self,
        collection: Collection,
        id: &RecordId,
        expected: Option<Version>,
    ) -> CoreResult<Version> {
        let key = RecordKey::new(collection, id.clone());
        let mut guard = self.slot(collection).lock();
        let live = guard
            .get(id)
            .filter(|r| !r.is_deleted())
            .ok_or_else(|| CoreError::not_found(collection, id))?;
        if expected.is_some() {
            Self::check_expected(&key, Some(live), expected)?;
        }

        let mut tombstone = live.clone();
        let version = live.version().next();
        tombstone.set_deleted(true);
        tombstone.stamp(version, self.clock.now());

        self.commit_records(collection, &mut guard, vec![(tombstone, ChangeType::Delete)])?;
        Ok(version)
    }

    /// Renames a catalog record in one atomic write: `from` becomes a
    /// tombstone and `to` a live copy of it. Returns the new record's version.
    pub fn rename(
        &self,
        collection: Collection,
        from: &RecordId,
        to: RecordId,
        expected: Option<Version>,
    ) -> CoreResult<Version> {
        if !collection.is_catalog() {
            return Err(CoreError::invalid_operation("orders cannot be renamed"));
        }
        if from == &to {
            return Err(CoreError::invalid_operation("rename to the same id"));
        }
        let now = self.clock.now();
        let mut guard = self.slot(collection).lock();

        let source = guard
            .get(from)
            .filter(|r| !r.is_deleted())
            .ok_or_else(|| CoreError::not_found(collection, from))?;
        if expected.is_some() {
            Self::check_expected(&RecordKey::new(collection, from.clone()), Some(source), expected)?;
        }
        let target_key = RecordKey::new(collection, to.clone());
        let existing = guard.get(&to);
        Self::check_expected(&target_key, existing.filter(|r| !r.is_deleted()), None)?;

        let mut tombstone = source.clone();
        tombstone.set_deleted(true);
        tombstone.stamp(source.version().next(), now);

        let Record::Catalog(mut renamed) = source.clone() else {
            return Err(CoreError::invalid_record("catalog collection holds an order"));
        };
        renamed.id = to;
        let mut renamed = Record::Catalog(renamed);
        let version = existing.map_or(Version::INITIAL, |r| r.version().next());
        renamed.stamp(version, now);

        self.commit_records(
            collection,
            &mut guard,
            vec![
                (tombstone, ChangeType::Delete),
                (renamed, ChangeType::Insert),
            ],
        )?;
        Ok(version)
    }

    // ---- orders ----

    /// Creates a draft order with a fresh id.
    pub fn create_order(&self, line_items: Vec<LineItem>) -> CoreResult<OrderRecord> {
        let now = self.clock.now();
        let mut order = OrderRecord::draft(RecordId::generate(), now);
        order.line_items = line_items;
        order.validate()?;

        let mut guard = self.slot(Collection::Orders).lock();
        self.commit_records(
            Collection::Orders,
            &mut guard,
            vec![(Record::Order(order.clone()), ChangeType::Insert)],
        )?;
        Ok(order)
    }

    fn update_order(
        &self,
        id: &RecordId,
        expected: Option<Version>,
        change: impl FnOnce(&mut OrderRecord) -> CoreResult<()>,
    ) -> CoreResult<OrderRecord> {
        let key = RecordKey::new(Collection::Orders, id.clone());
        let mut guard = self.slot(Collection::Orders).lock();
        let current = match guard.get(id).filter(|r| !r.is_deleted()) {
            Some(Record::Order(order)) => order,
            _ => return Err(CoreError::not_found(Collection::Orders, id)),
        };
        if expected.is_some() {
            Self::check_expected(&key, guard.get(id), expected)?;
        }
        if current.status.is_terminal() {
            return Err(CoreError::TerminalState {
                id: id.clone(),
                status: current.status.to_string(),
            });
        }

        let mut order = current.clone();
        change(&mut order)?;
        order.validate()?;
        order.version = current.version.next();
        order.modified_at = self.clock.now();

        self.commit_records(
            Collection::Orders,
            &mut guard,
            vec![(Record::Order(order.clone()), ChangeType::Update)],
        )?;
        Ok(order)
    }

    /// Adds a line, merging with an existing line for the same catalog id
    /// and price.
    pub fn add_line_item(
        &self,
        order_id: &RecordId,
        item: LineItem,
        expected: Option<Version>,
    ) -> CoreResult<OrderRecord> {
        self.update_order(order_id, expected, |order| {
            if item.quantity == 0 {
                return Err(CoreError::invalid_record("quantity must be positive"));
            }
            match order
                .line_items
                .iter_mut()
                .find(|l| l.catalog_id == item.catalog_id)
            {
                Some(line) if line.unit_price == item.unit_price => {
                    line.quantity = line
                        .quantity
                        .checked_add(item.quantity)
                        .ok_or_else(|| CoreError::invalid_record("quantity overflow"))?;
                }
                Some(line) => {
                    return Err(CoreError::invalid_record(format!(
                        "order already has {} at a different price",
                        line.catalog_id
                    )));
                }
                None => order.line_items.push(item),
            }
            Ok(())
        })
    }

    /// Sets the quantity of an existing line.
    pub fn set_line_quantity(
        &self,
        order_id: &RecordId,
        catalog_id: &RecordId,
        quantity: u32,
        expected: Option<Version>,
    ) -> CoreResult<OrderRecord> {
        if quantity == 0 {
            return Err(CoreError::invalid_record("quantity must be positive"));
        }
        self.update_order(order_id, expected, |order| {
            let line = order
                .line_items
                .iter_mut()
                .find(|l| &l.catalog_id == catalog_id)
                .ok_or_else(|| CoreError::invalid_record(format!("no line for {catalog_id}")))?;
            line.quantity = quantity;
            Ok(())
        })
    }

    /// Removes the line for `catalog_id`.
    pub fn remove_line_item(
        &self,
        order_id: &RecordId,
        catalog_id: &RecordId,
        expected: Option<Version>,
    ) -> CoreResult<OrderRecord> {
        self.update_order(order_id, expected, |order| {
            let before = order.line_items.len();
            order.line_items.retain(|l| &l.catalog_id != catalog_id);
            if order.line_items.len() == before {
                return Err(CoreError::invalid_record(format!("no line for {catalog_id}")));
            }
            Ok(())
        })
    }

    /// Moves an order to `to` along the allowed lifecycle edges.
    pub fn transition_order(
        &self,
        order_id: &RecordId,
        to: OrderStatus,
        expected: Option<Version>,
    ) -> CoreResult<OrderRecord> {
        self.update_order(order_id, expected, |order| {
            check_order_change(order, to)?;
            order.status = to;
            Ok(())
        })
    }

    // ---- whole-store commits ----

    /// Installs `merged` if every record it changes relative to `base` is
    /// still as in `base`. Otherwise nothing is written and the first stale
    /// record is reported as a `VersionConflict`.
    pub fn apply_merge(&self, base: &StoreState, merged: &StoreState) -> CoreResult<MergeCommit> {
        merged.validate()?;
        let mut guards = self.lock_all();
        let mut conflicts = self.conflicts.lock();
        let generation_before = self.generation.load(Ordering::SeqCst);

        let empty = CollectionMap::new();
        let mut files = Vec::new();
        let mut installs = Vec::new();
        let mut events = Vec::new();

        for (index, collection) in Collection::ALL.into_iter().enumerate() {
            let base_map = base.collections.get(&collection).unwrap_or(&empty);
            let merged_map = merged.collections.get(&collection).unwrap_or(&empty);
            let current: &CollectionMap = &guards[index];

            let ids: BTreeSet<&RecordId> = base_map.keys().chain(merged_map.keys()).collect();
            let mut next: Option<CollectionMap> = None;
            for id in ids {
                let (was, want) = (base_map.get(id), merged_map.get(id));
                if was == want {
                    continue;
                }
                let now = current.get(id);
                if now != was {
                    return Err(CoreError::VersionConflict {
                        key: RecordKey::new(collection, id.clone()),
                        expected: was.map(Record::version),
                        actual: now.map(Record::version),
                    });
                }
                let next = next.get_or_insert_with(|| current.clone());
                match want {
                    Some(record) => {
                        next.insert(id.clone(), record.clone());
                        events.push((RecordKey::new(collection, id.clone()), record.version()));
                    }
                    None => {
                        next.remove(id);
                    }
                }
            }
            if let Some(next) = next {
                files.push((
                    collection.file_name().to_string(),
                    encode_collection(collection, &next)?,
                ));
                installs.push((index, next));
            }
        }

        let keys: BTreeSet<&RecordKey> =
            base.conflicts.keys().chain(merged.conflicts.keys()).collect();
        let mut next_conflicts: Option<ConflictMap> = None;
        let mut conflict_changes = 0;
        for key in keys {
            let (was, want) = (base.conflicts.get(key), merged.conflicts.get(key));
            if was == want {
                continue;
            }
            if conflicts.get(key) != was {
                return Err(CoreError::VersionConflict {
                    key: key.clone(),
                    expected: was.map(|c| c.remote_mark.version),
                    actual: conflicts.get(key).map(|c| c.remote_mark.version),
                });
            }
            let next = next_conflicts.get_or_insert_with(|| (**conflicts).clone());
            match want {
                Some(copy) => next.insert(key.clone(), copy.clone()),
                None => next.remove(key),
            };
            conflict_changes += 1;
        }
        if let Some(next) = &next_conflicts {
            files.push((CONFLICTS_FILE.to_string(), encode_conflicts(next)?));
        }

        let changed = events.len() + conflict_changes;
        if files.is_empty() {
            return Ok(MergeCommit {
                generation_before,
                generation: generation_before,
                changed,
            });
        }

        self.commit(&files)?;
        for (index, next) in installs {
            *guards[index] = Arc::new(next);
        }
        if let Some(next) = next_conflicts {
            *conflicts = Arc::new(next);
        }
        let generation = self.bump_generation();
        tracing::info!(records = events.len(), conflicts = conflict_changes, generation, "merge applied");
        self.feed.emit_batch(
            events
                .into_iter()
                .map(|(key, version)| ChangeEvent {
                    generation,
                    key,
                    version,
                    change_type: ChangeType::Replace,
                }),
        );

        Ok(MergeCommit {
            generation_before,
            generation,
            changed,
        })
    }

    /// Replaces every collection and the conflict copies with `state`, all
    /// or nothing. Returns the new generation.
    pub fn replace_state(&self, state: &StoreState) -> CoreResult<u64> {
        self.replace_state_after(state, |_| Ok(()))
            .map(|((), generation)| generation)
    }

    /// Like [`replace_state`](Self::replace_state), first handing `before`
    /// the state about to be replaced. Both run under the same locks, so no
    /// write lands between them. If `before` fails nothing is replaced.
    pub fn replace_state_after<R>(
        &self,
        state: &StoreState,
        before: impl FnOnce(&StoreState) -> CoreResult<R>,
    ) -> CoreResult<(R, u64)> {
        state.validate()?;
        let mut guards = self.lock_all();
        let mut conflicts = self.conflicts.lock();

        let mut previous = StoreState::new();
        for (collection, guard) in Collection::ALL.into_iter().zip(&guards) {
            previous.collections.insert(collection, (***guard).clone());
        }
        previous.conflicts = (**conflicts).clone();
        let prior = before(&previous)?;

        let empty = CollectionMap::new();
        let mut files = Vec::new();
        let mut events = Vec::new();
        for (index, collection) in Collection::ALL.into_iter().enumerate() {
            let map = state.collections.get(&collection).unwrap_or(&empty);
            let current: &CollectionMap = &guards[index];
            for (id, record) in map {
                if current.get(id) != Some(record) {
                    events.push((RecordKey::new(collection, id.clone()), record.version()));
                }
            }
            files.push((
                collection.file_name().to_string(),
                encode_collection(collection, map)?,
            ));
        }
        files.push((
            CONFLICTS_FILE.to_string(),
            encode_conflicts(&state.conflicts)?,
        ));

        self.commit(&files)?;
        for (index, collection) in Collection::ALL.into_iter().enumerate() {
            let map = state.collections.get(&collection).cloned().unwrap_or_default();
            *guards[index] = Arc::new(map);
        }
        *conflicts = Arc::new(state.conflicts.clone());

        let generation = self.bump_generation();
        tracing::info!(records = state.len(), generation, "store state replaced");
        self.feed.emit_batch(
            events
                .into_iter()
                .map(|(key, version)| ChangeEvent {
                    generation,
                    key,
                    version,
                    change_type: ChangeType::Replace,
                }),
        );
        Ok((prior, generation))
    }

    /// Settles a conflict: writes the chosen side with a version above both
    /// and drops the conflict copy, in one commit.
    ///
    /// Returns the record written and the conflict copy that was removed.
    pub fn settle_conflict(
        &self,
        key: &RecordKey,
        choice: ConflictChoice,
    ) -> CoreResult<(Record, ConflictCopy)> {
        let mut guard = self.slot(key.collection).lock();
        let mut conflicts = self.conflicts.lock();

        let copy = conflicts
            .get(key)
            .cloned()
            .ok_or_else(|| CoreError::invalid_operation(format!("no conflict pending for {key}")))?;
        let local = guard.get(&key.id).cloned();

        let floor = local
            .as_ref()
            .map_or(copy.remote.version(), |l| l.version().max(copy.remote.version()));
        let mut winner = match (choice, local) {
            (ConflictChoice::KeepLocal, Some(local)) => local,
            (ConflictChoice::KeepLocal, None) => {
                return Err(CoreError::not_found(key.collection, &key.id));
            }
            (ConflictChoice::AcceptRemote, _) => copy.remote.clone(),
        };
        winner.stamp(floor.next(), self.clock.now());
        winner.validate_for(key.collection)?;

        let mut next = CollectionMap::clone(&guard);
        next.insert(key.id.clone(), winner.clone());
        let mut next_conflicts = (**conflicts).clone();
        next_conflicts.remove(key);

        self.commit(&[
            (
                key.collection.file_name().to_string(),
                encode_collection(key.collection, &next)?,
            ),
            (CONFLICTS_FILE.to_string(), encode_conflicts(&next_conflicts)?),
        ])?;
        *guard = Arc::new(next);
        *conflicts = Arc::new(next_conflicts);

        let generation = self.bump_generation();
        tracing::info!(%key, ?choice, version = %winner.version(), "conflict resolved");
        self.feed.emit(ChangeEvent {
            generation,
            key: key.clone(),
            version: winner.version(),
            change_type: ChangeType::Update,
        });
        Ok((winner, copy))
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("generation", &self.generation())
            .field("dirty", &self.is_dirty())
            .finish_non_exhaustive()
    }
}

fn check_order_change(order: &OrderRecord, to: OrderStatus) -> CoreResult<()> {
    if order.status.is_terminal() {
        return Err(CoreError::TerminalState {
            id: order.id.clone(),
            status: order.status.to_string(),
        });
    }
    if order.status != to && !order.status.can_transition_to(to) {
        return Err(CoreError::InvalidTransition {
            from: order.status.to_string(),
            to: to.to_string(),
        });
    }
    Ok(())
}

fn encode_collection(collection: Collection, map: &CollectionMap) -> CoreResult<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(&CollectionFileRef {
        format: FILE_FORMAT,
        collection,
        records: map.values().collect(),
    })?)
}

fn encode_conflicts(conflicts: &ConflictMap) -> CoreResult<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(&ConflictsFile {
        format: FILE_FORMAT,
        conflicts: conflicts.clone(),
    })?)
}

fn load_collection(backend: &dyn StorageBackend, collection: Collection) -> CoreResult<CollectionMap> {
    let name = collection.file_name();
    let Some(bytes) = backend.read(name)? else {
        return Ok(CollectionMap::new());
    };
    let file: CollectionFile = serde_json::from_slice(&bytes)
        .map_err(|e| CoreError::invalid_format(format!("{name}: {e}")))?;
    if file.format != FILE_FORMAT {
        return Err(CoreError::invalid_format(format!(
            "{name}: unsupported format {}",
            file.format
        )));
    }
    if file.collection != collection {
        return Err(CoreError::invalid_format(format!(
            "{name}: holds collection {}",
            file.collection
        )));
    }

    let mut map = CollectionMap::new();
    for record in file.records {
        record.validate_for(collection)?;
        let id = record.id().clone();
        if map.insert(id.clone(), record).is_some() {
            return Err(CoreError::invalid_format(format!("{name}: duplicate id {id}")));
        }
    }
    Ok(map)
}

fn load_conflicts(backend: &dyn StorageBackend) -> CoreResult<ConflictMap> {
    let Some(bytes) = backend.read(CONFLICTS_FILE)? else {
        return Ok(ConflictMap::new());
    };
    let file: ConflictsFile = serde_json::from_slice(&bytes)
        .map_err(|e| CoreError::invalid_format(format!("{CONFLICTS_FILE}: {e}")))?;
    if file.format != FILE_FORMAT {
        return Err(CoreError::invalid_format(format!(
            "{CONFLICTS_FILE}: unsupported format {}",
            file.format
        )));
    }
    Ok(file.conflicts)
}
