//! Backup and restore commands.

use super::{format_timestamp, CliError, Context};
use posy_core::{RetentionPolicy, SnapshotId};
use std::time::Duration;
use tracing::info;

/// Snapshots the current state.
pub fn create(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = ctx.local.backups().snapshot()?;
    println!("✓ Backup created successfully");
    println!("  Id: {}", snapshot.id);
    println!("  Records: {}", snapshot.state.len());
    println!("  Conflicts: {}", snapshot.state.conflicts.len());
    println!("  Created: {}", format_timestamp(snapshot.created_at));
    Ok(())
}

/// Lists snapshots, newest first.
pub fn list(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let snapshots = ctx.local.backups().list()?;
    println!(
        "{} snapshots in {}",
        snapshots.len(),
        ctx.local.dir().backups_path().display()
    );
    for info in &snapshots {
        println!("  {}  {}", info.id, format_timestamp(info.created_at));
    }
    Ok(())
}

/// Deletes snapshots outside the retention policy. Flags override the
/// store's default policy.
pub fn prune(
    ctx: &Context,
    keep: Option<usize>,
    max_age_days: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let policy = match (keep, max_age_days) {
        (None, None) => ctx.local.config().retention,
        (keep, age) => {
            let keep = keep.unwrap_or_else(|| ctx.local.config().retention.retain_count());
            let policy = RetentionPolicy::keep_last(keep);
            match age {
                Some(days) => policy.with_max_age(Duration::from_secs(days * 24 * 60 * 60)),
                None => policy,
            }
        }
    };
    info!(?policy, "pruning snapshots");

    let removed = ctx.local.backups().prune(&policy)?;
    println!("✓ Removed {} snapshots", removed.len());
    for id in &removed {
        println!("  {id}");
    }
    Ok(())
}

/// Restores a snapshot. The current state is snapshotted first.
pub fn restore(ctx: &Context, id: &SnapshotId, confirmed: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !confirmed {
        return Err(CliError::RestoreNotConfirmed.into());
    }
    let report = ctx.local.backups().restore(id)?;
    println!("✓ Store restored successfully");
    println!("  Restored: {}", report.restored);
    println!("  Previous state saved as: {}", report.pre_restore);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::catalog;
    use crate::commands::RemoteArgs;
    use posy_core::Collection;

    #[test]
    fn restore_needs_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::open(dir.path(), RemoteArgs::default()).unwrap();
        catalog::put(&ctx, Collection::Flowers, "tulip", &[], &[], None).unwrap();
        let snapshot = ctx.local.backups().snapshot().unwrap();
        catalog::put(&ctx, Collection::Flowers, "iris", &[], &[], None).unwrap();

        let err = restore(&ctx, &snapshot.id, false).unwrap_err();
        assert!(err.to_string().contains("--yes"));
        assert_eq!(ctx.local.store().list(Collection::Flowers).count(), 2);

        restore(&ctx, &snapshot.id, true).unwrap();
        assert_eq!(ctx.local.store().list(Collection::Flowers).count(), 1);
        // The snapshot plus the pre-restore one.
        assert_eq!(ctx.local.backups().list().unwrap().len(), 2);
    }

    #[test]
    fn prune_keeps_the_newest() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::open(dir.path(), RemoteArgs::default()).unwrap();
        for id in ["a", "b", "c"] {
            catalog::put(&ctx, Collection::Colors, id, &[], &[], None).unwrap();
            ctx.local.backups().snapshot().unwrap();
        }
        prune(&ctx, Some(1), None).unwrap();
        assert_eq!(ctx.local.backups().list().unwrap().len(), 1);
    }
}
