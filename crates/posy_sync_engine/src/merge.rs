//! Per-record three-way merge of local and remote store states.
//!
//! Each record is compared against its mark in the sync base:
//! - identical content on both sides converges (the higher version is kept)
//! - if only one side changed since the base, that side wins
//! - if both changed, the local record stays active and the remote one is
//!   kept as a conflict copy
//!
//! Records with no base mark (never synced) fall back to versions and
//! modification times: a side wins only with a strictly higher version and
//! a modification time no older than the other side's.

use posy_core::{ConflictCopy, Record, RecordKey, RecordMark, StoreState, Timestamp};
use std::collections::{BTreeMap, BTreeSet};

/// A record changed on both sides, awaiting a manual decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConflict {
    /// The record.
    pub key: RecordKey,
    /// Local version and content digest.
    pub local: RecordMark,
    /// Remote version and content digest.
    pub remote: RecordMark,
    /// Local modification time.
    pub local_modified_at: Timestamp,
    /// Remote modification time.
    pub remote_modified_at: Timestamp,
}

/// Result of [`merge`].
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// The merged state, conflict copies included.
    pub merged: StoreState,
    /// Records taken from the remote.
    pub applied_remote: Vec<RecordKey>,
    /// Records whose local side won over a differing remote.
    pub kept_local: Vec<RecordKey>,
    /// Records changed on both sides, newly raised or still pending.
    pub conflicts: Vec<MergeConflict>,
}

impl MergeOutcome {
    /// Returns true if any conflict is pending.
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

enum Decision {
    Local,
    Remote,
    Conflict,
}

fn decide(local: &Record, remote: &Record, base: Option<&RecordMark>) -> Decision {
    if local.fingerprint() == remote.fingerprint() {
        return if remote.version() > local.version() {
            Decision::Remote
        } else {
            Decision::Local
        };
    }

    match base {
        Some(base) => {
            let local_changed = local.mark() != *base;
            let remote_changed = remote.mark() != *base;
            match (local_changed, remote_changed) {
                (_, false) => Decision::Local,
                (false, true) => Decision::Remote,
                (true, true) => Decision::Conflict,
            }
        }
        None => {
            if local.version() > remote.version() && local.modified_at() >= remote.modified_at() {
                Decision::Local
            } else if remote.version() > local.version()
                && remote.modified_at() >= local.modified_at()
            {
                Decision::Remote
            } else {
                Decision::Conflict
            }
        }
    }
}

/// Merges `remote` into `local` against the sync `base`.
///
/// `now` stamps newly raised conflicts. The result never drops either side
/// of a record: it is active, or kept as a conflict copy.
pub fn merge(
    local: &StoreState,
    remote: &StoreState,
    base: &BTreeMap<RecordKey, RecordMark>,
    now: Timestamp,
) -> MergeOutcome {
    let mut merged = local.clone();
    let mut applied_remote = Vec::new();
    let mut kept_local = Vec::new();
    let mut conflicts = Vec::new();

    let keys: BTreeSet<RecordKey> = local.keys().union(&remote.keys()).cloned().collect();
    for key in keys {
        let Some(theirs) = remote.get(&key) else {
            // Never on the remote, or the remote was reset: local stays.
            continue;
        };
        let Some(ours) = local.get(&key) else {
            merged.insert(key.collection, theirs.clone());
            merged.conflicts.remove(&key);
            applied_remote.push(key);
            continue;
        };

        match decide(ours, theirs, base.get(&key)) {
            Decision::Local => {
                merged.conflicts.remove(&key);
                if ours != theirs {
                    kept_local.push(key);
                }
            }
            Decision::Remote => {
                merged.insert(key.collection, theirs.clone());
                merged.conflicts.remove(&key);
                applied_remote.push(key);
            }
            Decision::Conflict => {
                let remote_mark = theirs.mark();
                let same_copy = merged
                    .conflicts
                    .get(&key)
                    .is_some_and(|copy| copy.remote_mark == remote_mark);
                if !same_copy {
                    merged.conflicts.insert(
                        key.clone(),
                        ConflictCopy {
                            remote: theirs.clone(),
                            local_mark: ours.mark(),
                            remote_mark,
                            detected_at: now,
                        },
                    );
                }
                conflicts.push(MergeConflict {
                    key,
                    local: ours.mark(),
                    remote: remote_mark,
                    local_modified_at: ours.modified_at(),
                    remote_modified_at: theirs.modified_at(),
                });
            }
        }
    }

    MergeOutcome {
        merged,
        applied_remote,
        kept_local,
        conflicts,
    }
}
