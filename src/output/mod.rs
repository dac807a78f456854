//! Output formatting for farmsync.
//!
//! This module renders queue, cache and sync data for the terminal.

mod json;
mod pretty;

use chrono::{DateTime, Utc};

use crate::api::ApiResponse;
use crate::cli::args::OutputFormat;
use crate::error::FarmSyncError;
use crate::features::forms::FormQueueItem;
use crate::features::queue::{PendingOperation, QueueStats};
use crate::features::sync::DrainOutcome;

pub use json::*;
pub use pretty::*;

/// Format pending operations based on output format
///
/// # Errors
///
/// Returns `FarmSyncError::Parse` if JSON serialization fails.
pub fn format_operations(
    ops: &[PendingOperation],
    now: DateTime<Utc>,
    format: OutputFormat,
) -> Result<String, FarmSyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_operations_pretty(ops, now)),
        OutputFormat::Json => format_list_json(ops, "pending_operations"),
    }
}

/// Format a single operation based on output format
///
/// # Errors
///
/// Returns `FarmSyncError::Parse` if JSON serialization fails.
pub fn format_operation(op: &PendingOperation, format: OutputFormat) -> Result<String, FarmSyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_operation_pretty(op)),
        OutputFormat::Json => to_json(op),
    }
}

/// Format queue statistics based on output format
///
/// # Errors
///
/// Returns `FarmSyncError::Parse` if JSON serialization fails.
pub fn format_queue_stats(
    stats: &QueueStats,
    now: DateTime<Utc>,
    format: OutputFormat,
) -> Result<String, FarmSyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_queue_stats_pretty(stats, now)),
        OutputFormat::Json => to_json(&stats.to_value()),
    }
}

/// Format form submissions based on output format
///
/// # Errors
///
/// Returns `FarmSyncError::Parse` if JSON serialization fails.
pub fn format_forms(
    forms: &[FormQueueItem],
    now: DateTime<Utc>,
    format: OutputFormat,
) -> Result<String, FarmSyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_forms_pretty(forms, now)),
        OutputFormat::Json => format_list_json(forms, "form_queue"),
    }
}

/// Format a drain outcome based on output format
///
/// # Errors
///
/// Returns `FarmSyncError::Parse` if JSON serialization fails.
pub fn format_drain_outcome(outcome: &DrainOutcome, format: OutputFormat) -> Result<String, FarmSyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_drain_outcome_pretty(outcome)),
        OutputFormat::Json => to_json(outcome),
    }
}

/// Format a response based on output format
///
/// # Errors
///
/// Returns `FarmSyncError::Parse` if JSON serialization fails.
pub fn format_response(response: &ApiResponse, format: OutputFormat) -> Result<String, FarmSyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_response_pretty(response)),
        OutputFormat::Json => format_response_json(response),
    }
}
