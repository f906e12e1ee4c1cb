//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records that satisfy the store's
//! validation rules.

use posy_core::{
    CatalogRecord, Collection, CoreError, CoreResult, LineItem, Record, RecordId, RecordStore,
};
use proptest::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;

/// Strategy for generating valid record ids.
pub fn record_id_strategy() -> impl Strategy<Value = RecordId> {
    prop::string::string_regex("[a-z][a-z0-9-]{0,15}")
        .expect("Invalid regex")
        .prop_map(|s| RecordId::new(s).expect("generated id is valid"))
}

/// Strategy for the four catalog collections.
pub fn catalog_collection_strategy() -> impl Strategy<Value = Collection> {
    prop_oneof![
        Just(Collection::Flowers),
        Just(Collection::Colors),
        Just(Collection::Bouquets),
        Just(Collection::Pricing),
    ]
}

/// Strategy for opaque attribute values.
pub fn attribute_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        prop::string::string_regex("[a-zA-Z ]{0,12}")
            .expect("Invalid regex")
            .prop_map(Value::String),
        prop::collection::vec(any::<u16>().prop_map(Value::from), 0..4).prop_map(Value::Array),
    ]
}

/// Strategy for attribute maps.
pub fn attributes_strategy() -> impl Strategy<Value = BTreeMap<String, Value>> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex"),
        attribute_value_strategy(),
        0..4,
    )
}

/// Strategy for catalog records (unversioned: the store stamps them).
pub fn catalog_record_strategy() -> impl Strategy<Value = Record> {
    (record_id_strategy(), attributes_strategy()).prop_map(|(id, attributes)| {
        let mut record = CatalogRecord::new(id);
        record.attributes = attributes;
        Record::Catalog(record)
    })
}

/// Strategy for order lines with distinct catalog ids.
pub fn line_items_strategy() -> impl Strategy<Value = Vec<LineItem>> {
    prop::collection::btree_map(record_id_strategy(), (1u32..50, 0u64..100_000), 0..5).prop_map(
        |lines| {
            lines
                .into_iter()
                .map(|(catalog_id, (quantity, unit_price))| LineItem {
                    catalog_id,
                    quantity,
                    unit_price,
                })
                .collect()
        },
    )
}

/// A store mutation.
#[derive(Debug, Clone)]
pub enum StoreOp {
    /// Put a record, creating or updating.
    Put(Collection, Record),
    /// Delete a record by id.
    Delete(Collection, RecordId),
}

impl StoreOp {
    /// Applies the operation against whatever version is current.
    ///
    /// Deleting a missing record is a no-op.
    pub fn apply(&self, store: &RecordStore) -> CoreResult<()> {
        match self {
            Self::Put(collection, record) => {
                let current = match store.get(*collection, record.id()) {
                    Ok(r) => Some(r.version()),
                    Err(CoreError::NotFound { .. }) => None,
                    Err(e) => return Err(e),
                };
                store.put(*collection, record.clone(), current)?;
            }
            Self::Delete(collection, id) => match store.delete(*collection, id, None) {
                Ok(_) | Err(CoreError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            },
        }
        Ok(())
    }
}

/// Strategy for sequences of catalog mutations over a small id space, so
/// that updates and deletes hit existing records.
pub fn store_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<StoreOp>> {
    let id = prop::sample::select(vec!["a", "b", "c", "d"])
        .prop_map(|s| RecordId::new(s).expect("valid id"));
    let op = prop_oneof![
        3 => (catalog_collection_strategy(), id.clone(), attributes_strategy()).prop_map(
            |(collection, id, attributes)| {
                let mut record = CatalogRecord::new(id);
                record.attributes = attributes;
                StoreOp::Put(collection, Record::Catalog(record))
            }
        ),
        1 => (catalog_collection_strategy(), id).prop_map(|(c, id)| StoreOp::Delete(c, id)),
    ];
    prop::collection::vec(op, 1..max_len.max(2))
}
