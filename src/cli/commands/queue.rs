//! Operation queue command implementation.

use chrono::Utc;
use colored::Colorize;
use serde_json::{json, Value};

use super::{parse_json, Context};
use crate::cli::args::{OutputFormat, QueueCommands};
use crate::error::FarmSyncError;
use crate::features::queue::{FailOutcome, NewOperation, OperationQueue};
use crate::output::{format_operation, format_operations, format_queue_stats, to_json};

/// Execute queue subcommands.
///
/// # Errors
///
/// Returns an error if the store fails, an id is unknown, or the payload is
/// not valid JSON.
pub async fn queue(ctx: &Context, cmd: QueueCommands) -> Result<String, FarmSyncError> {
    let queue =
        OperationQueue::new(ctx.store.clone()).with_max_retries(ctx.config.sync.max_retries);
    let format = ctx.format;

    match cmd {
        QueueCommands::Add {
            op_type,
            endpoint,
            payload,
            method,
        } => {
            let payload = payload
                .as_deref()
                .map(|p| parse_json(p, "payload"))
                .transpose()?
                .unwrap_or(Value::Null);
            let mut op = NewOperation::new(op_type, endpoint, payload);
            if let Some(method) = method {
                op = op.with_method(method);
            }
            let queued = queue.enqueue(op).await?;
            match format {
                OutputFormat::Json => to_json(&queued),
                OutputFormat::Pretty => Ok(format!(
                    "{} {}",
                    "Queued".green(),
                    format_operation(&queued, format)?
                )),
            }
        },
        QueueCommands::List { r#type } => {
            let ops = match r#type {
                Some(op_type) => queue.list_by_type(op_type).await?,
                None => queue.list_pending().await?,
            };
            format_operations(&ops, Utc::now(), format)
        },
        QueueCommands::Status => format_queue_stats(&queue.stats().await?, Utc::now(), format),
        QueueCommands::Ack { id } => {
            if !queue.ack(id).await? {
                return Err(FarmSyncError::NotFound(format!("operation {id}")));
            }
            match format {
                OutputFormat::Json => to_json(&json!({"acked": id})),
                OutputFormat::Pretty => Ok(format!("Removed operation {id}")),
            }
        },
        QueueCommands::Fail { id, error } => match queue.fail(id, &error).await? {
            FailOutcome::Retrying(op) => match format {
                OutputFormat::Json => to_json(&json!({"outcome": "retrying", "operation": op})),
                OutputFormat::Pretty => Ok(format!(
                    "Operation {id} failed {} of {} times",
                    op.retry_count,
                    queue.max_retries()
                )),
            },
            FailOutcome::Evicted(op) => match format {
                OutputFormat::Json => to_json(&json!({"outcome": "evicted", "operation": op})),
                OutputFormat::Pretty => Ok(format!(
                    "{} operation {id} ({} {}) after {} failures",
                    "Evicted".red(),
                    op.method,
                    op.endpoint,
                    op.retry_count
                )),
            },
            FailOutcome::Missing => Err(FarmSyncError::NotFound(format!("operation {id}"))),
        },
        QueueCommands::Clear { force } => {
            if !force {
                return Err(FarmSyncError::Config(
                    "Use --force to clear all pending operations".to_string(),
                ));
            }
            let count = queue.clear().await?;
            match format {
                OutputFormat::Json => to_json(&json!({"cleared": count})),
                OutputFormat::Pretty => Ok(format!("Cleared {count} pending operations")),
            }
        },
    }
}
