//! Cache command implementation.

use chrono::Utc;
use serde_json::json;

use super::{parse_json_lenient, Context};
use crate::cli::args::{CacheCommands, OutputFormat};
use crate::core::system_clock;
use crate::error::FarmSyncError;
use crate::features::cache::TtlCache;
use crate::features::interceptor::ResponseCache;
use crate::output::{format_cache_entry_pretty, to_json};

/// Execute cache subcommands.
///
/// # Errors
///
/// Returns an error if the store fails.
pub async fn cache(ctx: &Context, cmd: CacheCommands) -> Result<String, FarmSyncError> {
    let cache = TtlCache::with_clock(ctx.store.clone(), system_clock(), ctx.config.cache.ttl()?);
    let format = ctx.format;

    match cmd {
        CacheCommands::Get { key } => {
            let entry = cache.get_entry(&key).await?;
            match format {
                OutputFormat::Json => to_json(&json!({
                    "key": key,
                    "hit": entry.is_some(),
                    "entry": entry,
                })),
                OutputFormat::Pretty => Ok(format_cache_entry_pretty(&key, entry.as_ref(), Utc::now())),
            }
        },
        CacheCommands::Set { key, value } => {
            cache.set(&key, &parse_json_lenient(&value)).await?;
            match format {
                OutputFormat::Json => to_json(&json!({"stored": key})),
                OutputFormat::Pretty => Ok(format!(
                    "Cached {key} for {}s",
                    cache.ttl().num_seconds()
                )),
            }
        },
        CacheCommands::Clear { key, all } => {
            let removed = match key {
                Some(key) if !all => usize::from(cache.clear(&key).await?),
                _ if all => cache.clear_all().await?,
                _ => {
                    return Err(FarmSyncError::Config(
                        "Give a key or --all".to_string(),
                    ))
                },
            };
            match format {
                OutputFormat::Json => to_json(&json!({"removed": removed})),
                OutputFormat::Pretty => Ok(format!("Removed {removed} cache entries")),
            }
        },
        CacheCommands::Sweep => {
            let removed = cache.sweep().await?;
            match format {
                OutputFormat::Json => to_json(&json!({"expired": removed})),
                OutputFormat::Pretty => Ok(format!("Swept {removed} expired entries")),
            }
        },
        CacheCommands::Reset => {
            let entries = cache.clear_all().await?;
            let generations = ResponseCache::new(ctx.store.clone()).clear_all().await?;
            tracing::info!(entries, generations = generations.len(), "cleared all caches");
            match format {
                OutputFormat::Json => to_json(&json!({
                    "entries": entries,
                    "generations": generations,
                })),
                OutputFormat::Pretty => Ok(format!(
                    "Removed {entries} cache entries and {} response generations",
                    generations.len()
                )),
            }
        },
    }
}
