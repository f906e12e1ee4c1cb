//! Data directory management.
//!
//! ```text
//! <data_dir>/
//! ├─ LOCK              # Advisory lock: one process per data directory
//! ├─ flowers.json      # One file per collection
//! ├─ colors.json
//! ├─ bouquets.json
//! ├─ pricing.json
//! ├─ orders.json
//! ├─ conflicts.json    # Remote copies awaiting resolution
//! ├─ COMMIT            # Present only while a multi-file commit is in flight
//! ├─ sync_state.json   # Written by the sync engine
//! └─ backups/
//!    └─ snap-<ms>-<digest>.posy
//! ```

use crate::backup::BackupManager;
use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::store::RecordStore;
use fs2::FileExt;
use posy_storage::{FileBackend, StorageBackend};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LOCK_FILE: &str = "LOCK";
const SYNC_STATE_FILE: &str = "sync_state.json";

/// The data directory and the lock that guards it.
///
/// Only one `DataDir` can exist per directory at a time, across processes.
#[derive(Debug)]
pub struct DataDir {
    path: PathBuf,
    backups: PathBuf,
    _lock_file: File,
}

impl DataDir {
    /// Opens (and optionally creates) the data directory and takes its lock.
    ///
    /// # Errors
    ///
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (`DirectoryLocked`)
    /// - I/O errors occur
    pub fn open(config: &StoreConfig) -> CoreResult<Self> {
        let path = config.data_dir.as_path();
        if !path.exists() {
            if config.create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_operation(format!(
                    "data directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_operation(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DirectoryLocked);
        }

        let backups = config.backups_path();
        fs::create_dir_all(&backups)?;

        Ok(Self {
            path: path.to_path_buf(),
            backups,
            _lock_file: lock_file,
        })
    }

    /// Root of the data directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding local snapshots.
    #[must_use]
    pub fn backups_path(&self) -> &Path {
        &self.backups
    }

    /// Path of the persisted sync state.
    #[must_use]
    pub fn sync_state_path(&self) -> PathBuf {
        self.path.join(SYNC_STATE_FILE)
    }
}

/// An opened data directory: lock, record store and backups.
pub struct LocalStore {
    dir: DataDir,
    backend: Arc<FileBackend>,
    store: Arc<RecordStore>,
    backups: Arc<BackupManager>,
    config: StoreConfig,
}

impl LocalStore {
    /// Opens the data directory described by `config`.
    pub fn open(config: StoreConfig) -> CoreResult<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Opens with an explicit clock.
    pub fn open_with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> CoreResult<Self> {
        let dir = DataDir::open(&config)?;
        let backend = Arc::new(FileBackend::open(dir.path())?);
        let store = Arc::new(RecordStore::open(backend.clone(), clock)?);
        let backups_backend: Arc<dyn StorageBackend> =
            Arc::new(FileBackend::open(dir.backups_path())?);
        let backups = Arc::new(BackupManager::new(backups_backend, Arc::clone(&store)));

        tracing::info!(path = %dir.path().display(), "opened data directory");
        Ok(Self {
            dir,
            backend,
            store,
            backups,
            config,
        })
    }

    /// The data directory.
    #[must_use]
    pub fn dir(&self) -> &DataDir {
        &self.dir
    }

    /// Storage backend rooted at the data directory.
    #[must_use]
    pub fn backend(&self) -> Arc<dyn StorageBackend> {
        self.backend.clone()
    }

    /// The record store.
    #[must_use]
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// The backup manager.
    #[must_use]
    pub fn backups(&self) -> &Arc<BackupManager> {
        &self.backups
    }

    /// The configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}
