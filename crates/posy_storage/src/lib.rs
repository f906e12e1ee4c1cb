//! # Posy Storage
//!
//! Storage backends for Posy.
//!
//! Backends are **opaque named-blob stores**: a flat namespace of names,
//! each holding a byte string. They know nothing about collections,
//! records or snapshots; `posy_core` owns every file format.
//!
//! ## Design Principles
//!
//! - A write replaces a whole blob atomically (write-temp, sync, rename)
//! - A write is durable before `write_atomic` returns
//! - Must be `Send + Sync` so stores can be shared across threads
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing, with a read-only switch to simulate failing disks
//! - [`FileBackend`] - A directory on the local file system
//!
//! ## Example
//!
//! ```rust
//! use posy_storage::{StorageBackend, InMemoryBackend};
//!
//! let backend = InMemoryBackend::new();
//! backend.write_atomic("colors.json", b"[]").unwrap();
//! assert_eq!(backend.read("colors.json").unwrap().as_deref(), Some(&b"[]"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{validate_name, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
