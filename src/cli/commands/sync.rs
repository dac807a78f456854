//! Sync command implementation.

use std::time::Duration;

use super::Context;
use crate::cli::args::SyncCommands;
use crate::core::system_clock;
use crate::error::FarmSyncError;
use crate::features::cache::TtlCache;
use crate::features::queue::OperationQueue;
use crate::features::sync::{BackgroundSettings, DrainOutcome, Reconciler, ReconcilerConfig};
use crate::output::format_drain_outcome;

/// Execute sync subcommands.
///
/// # Errors
///
/// Returns an error if the store fails or the backend URL is invalid.
/// Failed replays are part of the report, not errors.
pub async fn sync(ctx: &Context, cmd: SyncCommands) -> Result<String, FarmSyncError> {
    let reconciler = reconciler(ctx)?;

    match cmd {
        SyncCommands::Run => {
            let outcome = reconciler.drain().await?;
            format_drain_outcome(&outcome, ctx.format)
        },
        SyncCommands::Watch { interval } => watch(ctx, &reconciler, interval).await,
    }
}

fn reconciler(ctx: &Context) -> Result<Reconciler, FarmSyncError> {
    let queue =
        OperationQueue::new(ctx.store.clone()).with_max_retries(ctx.config.sync.max_retries);
    Ok(Reconciler::with_config(
        queue,
        ctx.transport()?,
        ctx.credentials(),
        ReconcilerConfig::from(&ctx.config.sync),
    ))
}

/// Drain on a timer, printing each report, until Ctrl-C.
async fn watch(
    ctx: &Context,
    reconciler: &Reconciler,
    interval: Option<u64>,
) -> Result<String, FarmSyncError> {
    let mut settings = BackgroundSettings::from(&ctx.config.sync);
    settings.auto_sync = true;
    if let Some(secs) = interval {
        settings.interval = Duration::from_secs(secs.max(1));
    }
    tracing::info!(interval = ?settings.interval, "watching operation queue");

    let cache = TtlCache::with_clock(ctx.store.clone(), system_clock(), ctx.config.cache.ttl()?);
    let sweeper = cache.spawn_sweeper(ctx.config.cache.sweep_interval());

    let handle = reconciler.spawn(settings);
    let mut reports = handle.reports();

    loop {
        tokio::select! {
            changed = reports.changed() => {
                if changed.is_err() {
                    break;
                }
                let report = reports.borrow_and_update().clone();
                if let Some(report) = report {
                    if report.total() > 0 {
                        println!("{}", format_drain_outcome(&DrainOutcome::Completed(report), ctx.format)?);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("stopping");
                break;
            }
        }
    }

    sweeper.abort();
    handle.stop().await;
    Ok(String::new())
}
