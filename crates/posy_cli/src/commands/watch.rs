//! Background sync until Ctrl-C.

use super::Context;
use posy_sync_engine::SyncWorker;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Runs the sync worker until interrupted, reporting each finished cycle.
pub fn run(ctx: Context, interval_secs: u64) -> Result<(), Box<dyn std::error::Error>> {
    let config = ctx
        .sync_config()
        .with_sync_interval(Some(Duration::from_secs(interval_secs.max(1))));
    let engine = Arc::new(ctx.engine(config)?);
    if !engine.has_remote() {
        println!("No remote configured; taking local backups only");
    }

    let worker = SyncWorker::spawn(Arc::clone(&engine))?;
    println!("Watching {} (Ctrl-C to stop)", ctx.local.dir().path().display());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let mut ticks = tokio::time::interval(Duration::from_secs(1));
        let mut seen = 0;
        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    break;
                }
                _ = ticks.tick() => {
                    let stats = engine.stats();
                    if stats.cycles != seen {
                        seen = stats.cycles;
                        println!(
                            "  cycle {}: {}{}",
                            stats.cycles,
                            stats.last_outcome.unwrap_or("-"),
                            stats
                                .last_error
                                .map(|e| format!(" ({e})"))
                                .unwrap_or_default()
                        );
                    }
                }
            }
        }
        Ok::<(), std::io::Error>(())
    })?;

    info!("stopping sync worker");
    worker.shutdown();
    println!("✓ Stopped");
    Ok(())
}
