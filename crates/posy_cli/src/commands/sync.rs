//! Sync commands.

use super::{format_timestamp, Context};
use posy_sync_engine::{CycleOutcome, CycleTrigger};
use serde::Serialize;

/// Sync status as printed by `sync status --format json`.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Remote description, if one is configured.
    pub remote: Option<String>,
    /// Marker of the remote snapshot at the last sync.
    pub remote_marker: Option<String>,
    /// Last completed sync, in ms since the epoch.
    pub last_synced_at: Option<u64>,
    /// Records changed since the last sync.
    pub pending_changes: usize,
    /// Conflicts awaiting resolution.
    pub conflicts: usize,
    /// Newest local snapshot.
    pub latest_backup: Option<String>,
}

/// Runs one cycle.
pub fn run(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let engine = ctx.engine(ctx.sync_config())?;
    let report = engine.run_cycle(CycleTrigger::Manual)?;

    if let Some(id) = &report.snapshot {
        println!("  Local backup: {id}");
    }
    match &report.outcome {
        CycleOutcome::Skipped if !engine.has_remote() => {
            println!("✓ No remote configured; local backup only");
        }
        CycleOutcome::Skipped => println!("✓ Nothing to sync"),
        CycleOutcome::UpToDate => println!("✓ Already up to date"),
        CycleOutcome::Synced => {
            println!("✓ Synced");
            println!("  Records taken from remote: {}", report.applied_remote);
            println!("  Uploaded: {}", if report.pushed { "yes" } else { "no" });
        }
        CycleOutcome::ConflictPending(conflicts) => {
            println!("! {} records changed on both sides", conflicts.len());
            for conflict in conflicts {
                println!(
                    "  {}  local {}  remote {}",
                    conflict.key, conflict.local.version, conflict.remote.version
                );
            }
            println!("  Resolve with: posy conflicts resolve <collection/id> --local|--remote");
        }
        CycleOutcome::AuthFailed(reason) => {
            println!("! Not signed in to the remote: {reason}");
            println!("  Local data is unaffected.");
        }
        CycleOutcome::Deferred(reason) => {
            println!("! Sync deferred: {reason}");
            println!("  Local data is unaffected; the next cycle will retry.");
        }
        CycleOutcome::QuotaExceeded(reason) => {
            println!("! Remote is out of space: {reason}");
            println!("  Local data is unaffected.");
        }
        CycleOutcome::Cancelled => println!("! Sync cancelled"),
    }
    println!("  Took: {} ms", report.duration.as_millis());
    Ok(())
}

/// Shows the persisted sync state.
pub fn status(ctx: &Context, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let engine = ctx.engine(ctx.sync_config())?;
    let status = engine.status();
    let report = StatusReport {
        remote: status.remote.clone(),
        remote_marker: status
            .sync_state
            .remote_marker
            .as_ref()
            .map(|m| m.as_str().to_string()),
        last_synced_at: status.sync_state.last_synced_at.map(|t| t.as_millis()),
        pending_changes: status.pending_changes,
        conflicts: status.conflicts,
        latest_backup: ctx
            .local
            .backups()
            .latest()?
            .map(|info| info.id.to_string()),
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => {
            println!("Sync Status");
            println!("===========");
            println!(
                "  Remote: {}",
                report.remote.as_deref().unwrap_or("none (local-only)")
            );
            println!(
                "  Remote marker: {}",
                report.remote_marker.as_deref().unwrap_or("-")
            );
            println!(
                "  Last synced: {}",
                status
                    .sync_state
                    .last_synced_at
                    .map_or_else(|| "never".to_string(), format_timestamp)
            );
            println!("  Pending changes: {}", report.pending_changes);
            println!("  Conflicts: {}", report.conflicts);
            println!(
                "  Latest backup: {}",
                report.latest_backup.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

/// Forgets the sync state.
pub fn reset(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let engine = ctx.engine(ctx.sync_config())?;
    engine.reset_sync_state()?;
    println!("✓ Sync state reset; the next cycle compares every record");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{catalog, RemoteArgs};
    use posy_core::Collection;
    use posy_sync_engine::{DEFAULT_FOLDER, DEFAULT_REMOTE_FILE};

    #[test]
    fn run_without_remote_is_local_only() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::open(dir.path(), RemoteArgs::default()).unwrap();
        catalog::put(&ctx, Collection::Flowers, "tulip", &[], &[], None).unwrap();
        run(&ctx).unwrap();
        status(&ctx, "json").unwrap();
        assert_eq!(ctx.local.backups().list().unwrap().len(), 1);
    }

    #[test]
    fn run_against_a_directory_remote() {
        let data = tempfile::tempdir().unwrap();
        let share = tempfile::tempdir().unwrap();
        let remote = RemoteArgs {
            remote_dir: Some(share.path().to_path_buf()),
            ..RemoteArgs::default()
        };
        let ctx = Context::open(data.path(), remote).unwrap();
        catalog::put(&ctx, Collection::Flowers, "tulip", &[], &[], None).unwrap();

        run(&ctx).unwrap();
        assert!(share
            .path()
            .join(DEFAULT_FOLDER)
            .join(DEFAULT_REMOTE_FILE)
            .is_file());
        let engine = ctx.engine(ctx.sync_config()).unwrap();
        assert!(engine.sync_state().remote_marker.is_some());

        reset(&ctx).unwrap();
        assert!(ctx.engine(ctx.sync_config()).unwrap().sync_state().is_initial());
    }
}
