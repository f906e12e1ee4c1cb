//! Notifications for committed writes.
//!
//! The [`RecordStore`](crate::RecordStore) publishes one [`ChangeEvent`] per
//! touched record once the journal entry is durable. The sync worker listens
//! here to learn that the store went dirty without polling the disk.

use crate::types::{RecordKey, Version};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};

/// Recent events kept for [`ChangeFeed::poll`].
const DEFAULT_BACKLOG: usize = 1000;

/// What a write did to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// First write of the id.
    Insert,
    /// Later write of a live record.
    Update,
    /// Tombstone.
    Delete,
    /// Whole record swapped in by a merge or a restore.
    Replace,
}

/// One record touched by a commit.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Store generation the commit produced.
    pub generation: u64,
    /// The record touched.
    pub key: RecordKey,
    /// Record version after the commit.
    pub version: Version,
    /// What happened to it.
    pub change_type: ChangeType,
}

struct FeedState {
    listeners: Vec<Sender<ChangeEvent>>,
    backlog: VecDeque<ChangeEvent>,
}

impl FeedState {
    fn publish(&mut self, event: ChangeEvent, capacity: usize) {
        // A failed send means the receiver hung up.
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
        if capacity == 0 {
            return;
        }
        if self.backlog.len() == capacity {
            self.backlog.pop_front();
        }
        self.backlog.push_back(event);
    }
}

/// Fans committed changes out to listeners in commit order and keeps a
/// bounded backlog for late readers.
pub struct ChangeFeed {
    state: Mutex<FeedState>,
    capacity: usize,
}

impl ChangeFeed {
    /// A feed with the default backlog.
    pub fn new() -> Self {
        Self::with_max_history(DEFAULT_BACKLOG)
    }

    /// A feed whose backlog holds at most `capacity` events.
    pub fn with_max_history(capacity: usize) -> Self {
        Self {
            state: Mutex::new(FeedState {
                listeners: Vec::new(),
                backlog: VecDeque::with_capacity(capacity.min(DEFAULT_BACKLOG)),
            }),
            capacity,
        }
    }

    /// Registers a listener for events published from now on.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.state.lock().listeners.push(tx);
        rx
    }

    /// Publishes one event.
    pub fn emit(&self, event: ChangeEvent) {
        self.state.lock().publish(event, self.capacity);
    }

    /// Publishes the events of one commit under a single lock, so listeners
    /// never see another commit interleaved.
    pub fn emit_batch(&self, events: impl IntoIterator<Item = ChangeEvent>) {
        let mut state = self.state.lock();
        for event in events {
            state.publish(event, self.capacity);
        }
    }

    /// Backlog events newer than generation `after`, oldest first.
    pub fn poll(&self, after: u64, limit: usize) -> Vec<ChangeEvent> {
        let state = self.state.lock();
        let start = state.backlog.partition_point(|e| e.generation <= after);
        state.backlog.range(start..).take(limit).cloned().collect()
    }

    /// Listeners still connected.
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().listeners.len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
