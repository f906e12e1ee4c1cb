//! # Posy Core
//!
//! Local-first storage for a flower shop's catalog and orders.
//!
//! This crate provides:
//! - Typed records (catalog entries and orders) with monotonic versions
//! - The [`RecordStore`]: one durable file per collection, atomic replace,
//!   per-collection write serialization and a change feed
//! - Immutable, content-addressed [`Snapshot`]s and the [`BackupManager`]
//!   that publishes, prunes and restores them
//! - The data directory layout and its single-process lock
//! - Import of the legacy desktop JSON files
//!
//! Sync with a remote copy lives in `posy_sync_engine`; nothing in this
//! crate touches the network.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backup;
pub mod change_feed;
pub mod clock;
pub mod config;
#[cfg(feature = "std")]
pub mod dir;
pub mod error;
pub mod legacy;
pub mod record;
pub mod snapshot;
pub mod store;
pub mod types;

pub use backup::{BackupManager, RestoreReport, SnapshotInfo};
pub use change_feed::{ChangeEvent, ChangeFeed, ChangeType};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RetentionPolicy, StoreConfig};
#[cfg(feature = "std")]
pub use dir::{DataDir, LocalStore};
pub use error::{CoreError, CoreResult};
pub use legacy::{ImportReport, LegacyImporter};
pub use record::{
    CatalogRecord, Fingerprint, LineItem, OrderRecord, OrderStatus, Record, RecordMark,
};
pub use snapshot::{Snapshot, SnapshotId};
pub use store::{
    ConflictChoice, ConflictCopy, MergeCommit, RecordCursor, RecordStore, StoreState,
};
pub use types::{Collection, RecordId, RecordKey, Timestamp, Version};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
