//! Legacy import command.

use super::Context;
use posy_core::LegacyImporter;
use std::path::Path;
use tracing::info;

/// Imports the legacy desktop JSON files from `dir`.
pub fn run(ctx: &Context, dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !dir.is_dir() {
        return Err(format!("not a directory: {}", dir.display()).into());
    }
    info!("Importing legacy data from {:?}", dir);

    let report = LegacyImporter::new(ctx.local.store()).import_dir(dir)?;
    println!("✓ Import finished");
    println!("  Flowers: {}", report.flowers);
    println!("  Colors: {}", report.colors);
    println!("  Bouquets: {}", report.bouquets);
    println!("  Orders: {}", report.orders);
    println!("  Already present: {}", report.skipped);
    if report.invalid > 0 {
        println!("  Unreadable entries: {}", report.invalid);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::RemoteArgs;
    use posy_core::Collection;
    use std::fs;

    #[test]
    fn imports_then_skips_on_rerun() {
        let legacy = tempfile::tempdir().unwrap();
        fs::write(legacy.path().join("Flowers.json"), r#"["Rose", "Tulip"]"#).unwrap();
        fs::write(legacy.path().join("Colors.json"), r#"["Red"]"#).unwrap();

        let data = tempfile::tempdir().unwrap();
        let ctx = Context::open(data.path(), RemoteArgs::default()).unwrap();
        run(&ctx, legacy.path()).unwrap();
        run(&ctx, legacy.path()).unwrap();

        assert_eq!(ctx.local.store().list(Collection::Flowers).count(), 2);
        assert_eq!(ctx.local.store().list(Collection::Colors).count(), 1);
        assert!(run(&ctx, &legacy.path().join("missing")).is_err());
    }
}
