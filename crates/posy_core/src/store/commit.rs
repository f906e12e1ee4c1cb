//! Staged multi-file commits.
//!
//! A commit that touches more than one file writes each new file as
//! `<name>.pending`, then publishes a `COMMIT` journal naming them, then
//! renames each pending file into place and removes the journal. The
//! journal write is the commit point: after it, recovery rolls the commit
//! forward; before it, recovery discards the pending files.

use crate::error::{CoreError, CoreResult};
use posy_storage::StorageBackend;
use serde::{Deserialize, Serialize};

/// Name of the commit journal.
pub const JOURNAL: &str = "COMMIT";

/// Suffix of staged files.
pub const PENDING_SUFFIX: &str = ".pending";

#[derive(Debug, Serialize, Deserialize)]
struct Journal {
    files: Vec<String>,
}

/// What recovery did on open.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Recovery {
    /// Pending files renamed into place from a published journal.
    pub rolled_forward: usize,
    /// Stray pending files deleted.
    pub discarded: usize,
}

fn pending_name(name: &str) -> String {
    format!("{name}{PENDING_SUFFIX}")
}

/// Writes `files` so that either all or none of them become visible.
///
/// A journal left behind by an earlier commit whose roll-forward failed is
/// finished first; otherwise its stale pending files would later be rolled
/// over this write. Callers must not commit concurrently.
pub fn commit_files(backend: &dyn StorageBackend, files: &[(String, Vec<u8>)]) -> CoreResult<()> {
    match files {
        [] => Ok(()),
        [(name, data)] => {
            if backend.exists(JOURNAL)? {
                recover(backend)?;
            }
            Ok(backend.write_atomic(name, data)?)
        }
        _ => commit_staged(backend, files),
    }
}

fn commit_staged(backend: &dyn StorageBackend, files: &[(String, Vec<u8>)]) -> CoreResult<()> {
    // Leftovers from an interrupted commit must not mix with this one.
    recover(backend)?;

    let staged = (|| -> CoreResult<()> {
        for (name, data) in files {
            backend.write_atomic(&pending_name(name), data)?;
        }
        let journal = Journal {
            files: files.iter().map(|(n, _)| n.clone()).collect(),
        };
        backend.write_atomic(JOURNAL, &serde_json::to_vec(&journal)?)?;
        Ok(())
    })();

    if let Err(e) = staged {
        for (name, _) in files {
            let _ = backend.remove(&pending_name(name));
        }
        return Err(e);
    }

    // Committed. A failure from here on is finished by recovery.
    if let Err(e) = roll_forward(backend, files.iter().map(|(n, _)| n.as_str())) {
        tracing::warn!(error = %e, "commit journal left for recovery");
    }
    Ok(())
}

fn roll_forward<'a>(
    backend: &dyn StorageBackend,
    names: impl Iterator<Item = &'a str>,
) -> CoreResult<usize> {
    let mut moved = 0;
    for name in names {
        let pending = pending_name(name);
        if backend.exists(&pending)? {
            backend.rename(&pending, name)?;
            moved += 1;
        }
    }
    backend.remove(JOURNAL)?;
    Ok(moved)
}

/// Completes or discards an interrupted commit.
pub fn recover(backend: &dyn StorageBackend) -> CoreResult<Recovery> {
    let mut recovery = Recovery::default();

    if let Some(bytes) = backend.read(JOURNAL)? {
        let journal: Journal = serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::invalid_format(format!("commit journal: {e}")))?;
        recovery.rolled_forward = roll_forward(backend, journal.files.iter().map(String::as_str))?;
        tracing::info!(files = recovery.rolled_forward, "rolled forward interrupted commit");
    }

    for name in backend.list()? {
        if name.ends_with(PENDING_SUFFIX) {
            backend.remove(&name)?;
            recovery.discarded += 1;
        }
    }
    if recovery.discarded > 0 {
        tracing::info!(files = recovery.discarded, "discarded uncommitted staged files");
    }

    Ok(recovery)
}
