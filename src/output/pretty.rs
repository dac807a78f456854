use chrono::{DateTime, Utc};
use colored::Colorize;

use crate::api::ApiResponse;
use crate::core::age_label;
use crate::features::cache::CacheEntry;
use crate::features::forms::FormQueueItem;
use crate::features::push::PushRegistration;
use crate::features::queue::{PendingOperation, QueueStats};
use crate::features::sync::{DrainOutcome, DrainReport};

/// Format pending operations as a table.
pub fn format_operations_pretty(ops: &[PendingOperation], now: DateTime<Utc>) -> String {
    if ops.is_empty() {
        return "Pending operations (0)\n  Queue is empty".to_string();
    }

    let mut output = format!("Pending operations ({})\n", ops.len());
    output.push_str(&"─".repeat(60));
    output.push('\n');

    for op in ops {
        let mut line = format!(
            "{:>4} {:<6} {:<6} {}",
            op.id().to_string().dimmed(),
            op.op_type.display_name(),
            op.method.to_string().cyan(),
            op.endpoint.bold()
        );
        line.push_str(&format!("  {}", age_label(op.enqueued_at, now).dimmed()));
        if op.retry_count > 0 {
            line.push_str(&format!("  {}", format!("retry {}", op.retry_count).yellow()));
        }
        output.push_str(&line);
        output.push('\n');
        if let Some(err) = &op.last_error {
            output.push_str(&format!("       {}\n", err.red()));
        }
    }

    output
}

/// Format a single operation.
pub fn format_operation_pretty(op: &PendingOperation) -> String {
    let mut output = format!("{} {}\n", op.method.to_string().cyan(), op.endpoint.bold());
    output.push_str(&format!("  {}: {}\n", "ID".dimmed(), op.id()));
    output.push_str(&format!("  {}: {}\n", "Type".dimmed(), op.op_type));
    output.push_str(&format!(
        "  {}: {}\n",
        "Queued".dimmed(),
        op.enqueued_at.format("%Y-%m-%d %H:%M:%S")
    ));
    if !op.payload.is_null() {
        output.push_str(&format!("  {}: {}\n", "Payload".dimmed(), op.payload));
    }
    output
}

/// Format queue statistics.
pub fn format_queue_stats_pretty(stats: &QueueStats, now: DateTime<Utc>) -> String {
    let mut lines = Vec::new();

    lines.push("Operation Queue Status".bold().to_string());
    lines.push("─".repeat(40));
    lines.push(format!(
        "  Pending:    {} {}",
        stats.pending,
        if stats.pending > 0 {
            "operations waiting".dimmed()
        } else {
            "".dimmed()
        }
    ));
    lines.push(format!(
        "  Retrying:   {} {}",
        stats.retrying,
        if stats.retrying > 0 {
            format!("of {} attempts used", stats.max_retries).yellow()
        } else {
            "".normal()
        }
    ));

    if let Some(oldest) = stats.oldest_pending {
        lines.push(format!("  Oldest:     {}", age_label(oldest, now).dimmed()));
    }

    if stats.pending > 0 {
        lines.push(String::new());
        lines.push(
            "Run 'farmsync sync run' to replay pending operations"
                .dimmed()
                .to_string(),
        );
    }

    lines.join("\n")
}

/// Format queued form submissions.
pub fn format_forms_pretty(forms: &[FormQueueItem], now: DateTime<Utc>) -> String {
    if forms.is_empty() {
        return "Forms (0)\n  No forms".to_string();
    }

    let mut output = format!("Forms ({})\n", forms.len());
    output.push_str(&"─".repeat(60));
    output.push('\n');

    for form in forms {
        let icon = if form.synced {
            "[x]".green()
        } else {
            "[ ]".white()
        };
        output.push_str(&format!(
            "{} {:>4} {}  {}\n",
            icon,
            form.id.unwrap_or_default().to_string().dimmed(),
            form.form_type.bold(),
            age_label(form.enqueued_at, now).dimmed()
        ));
    }

    output
}

/// Format a cache entry, or a miss.
pub fn format_cache_entry_pretty(key: &str, entry: Option<&CacheEntry>, now: DateTime<Utc>) -> String {
    match entry {
        Some(entry) => format!(
            "{} {}\n  {}: {}\n  {}: {}",
            "hit".green(),
            key.bold(),
            "Cached".dimmed(),
            age_label(entry.cached_at, now),
            "Value".dimmed(),
            entry.value
        ),
        None => format!("{} {}", "miss".yellow(), key.bold()),
    }
}

/// Format the result of a drain pass.
pub fn format_drain_report_pretty(report: &DrainReport) -> String {
    let mut lines = Vec::new();

    lines.push("Sync Complete".bold().to_string());
    lines.push("─".repeat(40));
    lines.push(format!("  Attempted:  {}", report.attempted));
    lines.push(format!(
        "  Succeeded:  {}",
        report.succeeded.len().to_string().green()
    ));

    if !report.failed.is_empty() {
        lines.push(format!(
            "  Failed:     {}",
            report.failed.len().to_string().red()
        ));
        for failure in &report.failed {
            lines.push(format!(
                "    {} {} {}: {}",
                failure.id.to_string().dimmed(),
                failure.op_type.display_name(),
                failure.endpoint,
                failure.error.red()
            ));
        }
    }

    if !report.deferred.is_empty() {
        lines.push(format!(
            "  Deferred:   {}",
            report.deferred.len().to_string().yellow()
        ));
    }

    if !report.evicted.is_empty() {
        lines.push(format!(
            "  Evicted:    {} {}",
            report.evicted.len().to_string().red(),
            "operations dropped after too many failures".dimmed()
        ));
    }

    lines.join("\n")
}

/// Format any drain outcome.
pub fn format_drain_outcome_pretty(outcome: &DrainOutcome) -> String {
    match outcome {
        DrainOutcome::Completed(report) => format_drain_report_pretty(report),
        DrainOutcome::Coalesced => "Sync already running".yellow().to_string(),
        DrainOutcome::Offline => "Offline; nothing replayed".yellow().to_string(),
    }
}

/// Format a fetched response.
pub fn format_response_pretty(response: &ApiResponse) -> String {
    let status = format!("{} {}", response.status, response.status_text);
    let status = if response.is_success() {
        status.green()
    } else {
        status.red()
    };
    format!("{}\n{}", status.bold(), response.body_text())
}

/// Format the local push registration.
pub fn format_push_status_pretty(registration: Option<&PushRegistration>) -> String {
    let Some(registration) = registration else {
        return format!("Push: {}", "not subscribed".dimmed());
    };

    let mut output = format!("Push: {}\n", "subscribed".green());
    output.push_str(&format!(
        "  {}: {}\n",
        "Endpoint".dimmed(),
        registration.subscription.endpoint
    ));
    if let Some(user) = &registration.user_id {
        output.push_str(&format!("  {}: {}\n", "User".dimmed(), user));
    }
    output.push_str(&format!(
        "  {}: {}\n",
        "Since".dimmed(),
        registration.created_at.format("%Y-%m-%d %H:%M")
    ));
    output
}
