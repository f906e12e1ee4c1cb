//! Whole-store values: what snapshots hold and what sync merges.

use crate::error::{CoreError, CoreResult};
use crate::record::{Record, RecordMark};
use crate::types::{Collection, RecordId, RecordKey, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Records of one collection, keyed by id.
pub type CollectionMap = BTreeMap<RecordId, Record>;

/// A remote version kept aside after a both-sides-changed conflict.
///
/// The local record stays active; this copy waits until the user picks a
/// side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictCopy {
    /// The remote record as it was pulled.
    pub remote: Record,
    /// Local version and fingerprint when the conflict was detected.
    pub local_mark: RecordMark,
    /// Mark of `remote`.
    pub remote_mark: RecordMark,
    /// When the conflict was detected.
    pub detected_at: Timestamp,
}

/// Every record of every collection plus pending conflict copies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    /// Records per collection, tombstones included.
    #[serde(default)]
    pub collections: BTreeMap<Collection, CollectionMap>,
    /// Unresolved conflicts.
    #[serde(default)]
    pub conflicts: BTreeMap<RecordKey, ConflictCopy>,
}

impl StoreState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record at `key`, tombstones included.
    #[must_use]
    pub fn get(&self, key: &RecordKey) -> Option<&Record> {
        self.collections.get(&key.collection)?.get(&key.id)
    }

    /// Inserts or replaces a record.
    pub fn insert(&mut self, collection: Collection, record: Record) {
        self.collections
            .entry(collection)
            .or_default()
            .insert(record.id().clone(), record);
    }

    /// Removes a record entirely (not a tombstone).
    pub fn remove(&mut self, key: &RecordKey) -> Option<Record> {
        self.collections.get_mut(&key.collection)?.remove(&key.id)
    }

    /// Iterates the records of one collection in id order.
    pub fn records(&self, collection: Collection) -> impl Iterator<Item = &Record> + '_ {
        self.collections
            .get(&collection)
            .into_iter()
            .flat_map(|m| m.values())
    }

    /// Iterates every record with its key.
    pub fn iter(&self) -> impl Iterator<Item = (RecordKey, &Record)> + '_ {
        self.collections.iter().flat_map(|(c, map)| {
            map.iter()
                .map(move |(id, r)| (RecordKey::new(*c, id.clone()), r))
        })
    }

    /// All record keys.
    #[must_use]
    pub fn keys(&self) -> BTreeSet<RecordKey> {
        self.iter().map(|(k, _)| k).collect()
    }

    /// Marks of every record.
    #[must_use]
    pub fn marks(&self) -> BTreeMap<RecordKey, RecordMark> {
        self.iter().map(|(k, r)| (k, r.mark())).collect()
    }

    /// Number of records, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.collections.values().map(BTreeMap::len).sum()
    }

    /// Returns true if there are no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live records in `collection`.
    #[must_use]
    pub fn live_count(&self, collection: Collection) -> usize {
        self.records(collection).filter(|r| !r.is_deleted()).count()
    }

    /// Checks every record sits under its own id in a collection of its kind.
    pub fn validate(&self) -> CoreResult<()> {
        for (collection, map) in &self.collections {
            for (id, record) in map {
                if record.id() != id {
                    return Err(CoreError::invalid_record(format!(
                        "record {} stored under id {id}",
                        record.id()
                    )));
                }
                record.validate_for(*collection)?;
            }
        }
        for (key, copy) in &self.conflicts {
            if copy.remote.id() != &key.id {
                return Err(CoreError::invalid_record(format!(
                    "conflict copy for {key} holds {}",
                    copy.remote.id()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CatalogRecord;

    fn flower(id: &str) -> Record {
        Record::Catalog(CatalogRecord::new(RecordId::new(id).unwrap()))
    }

    #[test]
    fn insert_get_and_keys() {
        let mut state = StoreState::new();
        state.insert(Collection::Flowers, flower("tulip"));
        state.insert(Collection::Flowers, flower("iris"));
        state.insert(Collection::Colors, flower("red"));

        let key = RecordKey::new(Collection::Flowers, RecordId::new("iris").unwrap());
        assert!(state.get(&key).is_some());
        assert_eq!(state.len(), 3);

        let ids: Vec<_> = state
            .records(Collection::Flowers)
            .map(|r| r.id().as_str().to_string())
            .collect();
        assert_eq!(ids, ["iris", "tulip"]);
        assert_eq!(state.keys().len(), 3);
    }

    #[test]
    fn validate_catches_misplaced_records() {
        let mut state = StoreState::new();
        state.insert(Collection::Orders, flower("tulip"));
        assert!(state.validate().is_err());
    }

    #[test]
    fn json_round_trip() {
        let mut state = StoreState::new();
        state.insert(Collection::Pricing, flower("rose-stem"));
        let json = serde_json::to_string(&state).unwrap();
        let back: StoreState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
