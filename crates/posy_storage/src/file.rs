//! File-based storage backend for persistent storage.

use crate::backend::{validate_name, StorageBackend, TEMP_SUFFIX};
use crate::error::{StorageError, StorageResult};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// A directory-backed storage backend.
///
/// Each blob is one file directly inside the root directory.
///
/// # Durability
///
/// `write_atomic` follows the write-then-rename pattern:
/// 1. Write to a uniquely named temporary file
/// 2. `sync_all` the temporary file
/// 3. Rename it over the target name
/// 4. Fsync the directory so the rename itself is durable
///
/// Leftover temporary files from a crash are removed by [`FileBackend::open`].
///
/// # Example
///
/// ```no_run
/// use posy_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("posy-data")).unwrap();
/// backend.write_atomic("colors.json", b"[]").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    temp_counter: AtomicU64,
}

impl FileBackend {
    /// Opens a backend rooted at `root`, creating the directory if needed.
    ///
    /// Stray temporary files left by an interrupted write are deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or read, or if
    /// `root` exists and is not a directory.
    pub fn open(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root)?;
        if !root.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("not a directory: {}", root.display()),
            )));
        }

        let backend = Self {
            root: root.to_path_buf(),
            temp_counter: AtomicU64::new(0),
        };
        backend.remove_stray_temps()?;
        Ok(backend)
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the full path of a blob.
    #[must_use]
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn remove_stray_temps(&self) -> StorageResult<()> {
        let mut removed = 0usize;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(TEMP_SUFFIX) && entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(root = %self.root.display(), removed, "removed stray temporary files");
            self.sync_directory()?;
        }
        Ok(())
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!("{name}.{}-{n}{TEMP_SUFFIX}", std::process::id()))
    }

    /// Syncs the root directory so renames and deletions are durable.
    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        let dir = File::open(&self.root)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        // NTFS journals metadata; directory handles cannot be fsynced.
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn read(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_name(name)?;
        match fs::read(self.path_of(name)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_atomic(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        validate_name(name)?;
        let temp = self.temp_path(name);

        let written = (|| -> StorageResult<()> {
            let mut file = File::create(&temp)?;
            file.write_all(data)?;
            file.sync_all()?;
            drop(file);
            fs::rename(&temp, self.path_of(name))?;
            Ok(())
        })();

        if let Err(e) = written {
            // The target is untouched; only the temp file may remain.
            let _ = fs::remove_file(&temp);
            return Err(e);
        }

        self.sync_directory()
    }

    fn remove(&self, name: &str) -> StorageResult<bool> {
        validate_name(name)?;
        match fs::remove_file(self.path_of(name)) {
            Ok(()) => {
                self.sync_directory()?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        validate_name(from)?;
        validate_name(to)?;
        match fs::rename(self.path_of(from), self.path_of(to)) {
            Ok(()) => self.sync_directory(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(from.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.ends_with(TEMP_SUFFIX) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        validate_name(name)?;
        Ok(self.path_of(name).is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("nested").join("data");

        let backend = FileBackend::open(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(backend.root(), root);
        assert!(backend.list().unwrap().is_empty());
    }

    #[test]
    fn write_then_read() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.write_atomic("flowers.json", b"{\"rose\":1}").unwrap();
        assert_eq!(
            backend.read("flowers.json").unwrap().as_deref(),
            Some(&b"{\"rose\":1}"[..])
        );
        assert!(backend.read("colors.json").unwrap().is_none());
    }

    #[test]
    fn overwrite_replaces_whole_blob() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.write_atomic("a", b"a much longer first value").unwrap();
        backend.write_atomic("a", b"short").unwrap();
        assert_eq!(backend.read("a").unwrap().as_deref(), Some(&b"short"[..]));
    }

    #[test]
    fn persistence_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let backend = FileBackend::open(dir.path()).unwrap();
            backend.write_atomic("orders.json", b"[]").unwrap();
        }
        let backend = FileBackend::open(dir.path()).unwrap();
        assert_eq!(backend.read("orders.json").unwrap().as_deref(), Some(&b"[]"[..]));
    }

    #[test]
    fn open_removes_stray_temp_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("flowers.json.1-0.tmp"), b"partial").unwrap();
        fs::write(dir.path().join("flowers.json"), b"complete").unwrap();

        let backend = FileBackend::open(dir.path()).unwrap();
        assert_eq!(backend.list().unwrap(), vec!["flowers.json".to_string()]);
        assert!(!dir.path().join("flowers.json.1-0.tmp").exists());
    }

    #[test]
    fn list_is_sorted_and_skips_directories() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        fs::create_dir(dir.path().join("backups")).unwrap();

        backend.write_atomic("b", b"2").unwrap();
        backend.write_atomic("a", b"1").unwrap();
        assert_eq!(backend.list().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn remove_reports_existence() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.write_atomic("x", b"1").unwrap();
        assert!(backend.remove("x").unwrap());
        assert!(!backend.remove("x").unwrap());
        assert!(!backend.exists("x").unwrap());
    }

    #[test]
    fn rename_replaces_target() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.write_atomic("x.pending", b"new").unwrap();
        backend.write_atomic("x", b"old").unwrap();
        backend.rename("x.pending", "x").unwrap();

        assert_eq!(backend.read("x").unwrap().as_deref(), Some(&b"new"[..]));
        assert!(!backend.exists("x.pending").unwrap());
        assert!(matches!(
            backend.rename("missing", "x"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn invalid_names_rejected() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        assert!(matches!(
            backend.write_atomic("../escape", b"x"),
            Err(StorageError::InvalidName(_))
        ));
    }
}
