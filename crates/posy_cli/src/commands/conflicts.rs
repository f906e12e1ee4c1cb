//! Conflict commands.

use super::{format_timestamp, Context};
use posy_core::RecordKey;
use posy_sync_engine::Resolution;

/// Lists pending conflicts.
pub fn list(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let engine = ctx.engine(ctx.sync_config())?;
    let conflicts = engine.pending_conflicts();
    if conflicts.is_empty() {
        println!("✓ No conflicts");
        return Ok(());
    }

    println!("{} conflicts", conflicts.len());
    for conflict in &conflicts {
        println!("  {}", conflict.key);
        println!(
            "    local:  {}  modified {}",
            conflict.local.version,
            format_timestamp(conflict.local_modified_at)
        );
        println!(
            "    remote: {}  modified {}",
            conflict.remote.version,
            format_timestamp(conflict.remote_modified_at)
        );
    }
    Ok(())
}

/// Resolves one conflict, keeping the local record or taking the remote copy.
pub fn resolve(ctx: &Context, key: &RecordKey, keep_local: bool) -> Result<(), Box<dyn std::error::Error>> {
    let resolution = if keep_local {
        Resolution::KeepLocal
    } else {
        Resolution::AcceptRemote
    };
    let engine = ctx.engine(ctx.sync_config())?;
    let record = engine.resolve_conflict(key, resolution)?;
    println!("✓ Resolved {key} ({})", record.version());
    println!("  The resolution is uploaded on the next sync.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{catalog, RemoteArgs};
    use posy_core::{Collection, ConflictCopy, RecordId, StoreState};

    #[test]
    fn resolve_settles_a_stored_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::open(dir.path(), RemoteArgs::default()).unwrap();
        catalog::put(&ctx, Collection::Flowers, "rose", &["price=1".into()], &[], None).unwrap();

        let store = ctx.local.store();
        let key = RecordKey::new(Collection::Flowers, RecordId::new("rose").unwrap());
        let local = store.export_state();
        let mut remote = local.get(&key).unwrap().clone();
        if let posy_core::Record::Catalog(c) = &mut remote {
            c.attributes.insert("price".into(), serde_json::json!(2));
        }
        let mut with_conflict: StoreState = local.clone();
        with_conflict.conflicts.insert(
            key.clone(),
            ConflictCopy {
                local_mark: local.get(&key).unwrap().mark(),
                remote_mark: remote.mark(),
                detected_at: remote.modified_at(),
                remote,
            },
        );
        store.apply_merge(&local, &with_conflict).unwrap();

        list(&ctx).unwrap();
        resolve(&ctx, &key, false).unwrap();
        assert!(store.conflicts().is_empty());
        let rose = store.get(Collection::Flowers, &key.id).unwrap();
        assert_eq!(rose.as_catalog().unwrap().attributes["price"], 2);
        assert!(resolve(&ctx, &key, true).is_err());
    }
}
