//! Shared fixtures for posy tests.
//!
//! [`TestStore`] bundles a record store, its backups and a manual clock,
//! either in memory or in a temporary directory. [`generators`] holds the
//! proptest strategies for records and store operations.
//!
//! ```rust
//! use posy_testkit::prelude::*;
//!
//! let shop = TestStore::memory();
//! put_flower(&shop.store, "rose-red", 450);
//! assert_eq!(shop.store.list(Collection::Flowers).count(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Everything a test usually needs.
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use posy_core::{Collection, Record, RecordId, RecordKey, Timestamp, Version};
}

pub use fixtures::*;
pub use generators::*;
