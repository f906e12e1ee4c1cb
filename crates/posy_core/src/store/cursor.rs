//! Lazy, restartable iteration over one collection.

use super::state::CollectionMap;
use crate::record::Record;
use crate::types::RecordId;
use std::ops::Bound;
use std::sync::Arc;

/// Iterates the live records of a collection in id order.
///
/// The cursor holds the collection as it was when
/// [`RecordStore::list`](super::RecordStore::list) was called; later
/// writes do not show up. [`rewind`](Self::rewind) starts over on the same
/// view.
#[derive(Debug, Clone)]
pub struct RecordCursor {
    view: Arc<CollectionMap>,
    last: Option<RecordId>,
    include_deleted: bool,
}

impl RecordCursor {
    pub(crate) fn new(view: Arc<CollectionMap>) -> Self {
        Self {
            view,
            last: None,
            include_deleted: false,
        }
    }

    /// Also yields tombstones.
    #[must_use]
    pub fn with_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Restarts iteration from the first record.
    pub fn rewind(&mut self) {
        self.last = None;
    }
}

impl Iterator for RecordCursor {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        let lower = match &self.last {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        let include_deleted = self.include_deleted;
        let (id, record) = self
            .view
            .range::<RecordId, _>((lower, Bound::Unbounded))
            .find(|(_, r)| include_deleted || !r.is_deleted())?;
        let (id, record) = (id.clone(), record.clone());
        self.last = Some(id);
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CatalogRecord;

    fn view(ids: &[(&str, bool)]) -> Arc<CollectionMap> {
        Arc::new(
            ids.iter()
                .map(|(id, deleted)| {
                    let mut r = Record::Catalog(CatalogRecord::new(RecordId::new(*id).unwrap()));
                    r.set_deleted(*deleted);
                    (r.id().clone(), r)
                })
                .collect(),
        )
    }

    #[test]
    fn yields_live_records_in_order_and_rewinds() {
        let mut cursor = RecordCursor::new(view(&[("c", false), ("a", false), ("b", true)]));
        let ids: Vec<_> = cursor.by_ref().map(|r| r.id().to_string()).collect();
        assert_eq!(ids, ["a", "c"]);
        assert!(cursor.next().is_none());

        cursor.rewind();
        assert_eq!(cursor.next().unwrap().id().as_str(), "a");
    }

    #[test]
    fn with_deleted_includes_tombstones() {
        let cursor = RecordCursor::new(view(&[("a", false), ("b", true)])).with_deleted();
        assert_eq!(cursor.count(), 2);
    }
}
