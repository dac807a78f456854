//! JSON output formatting for farmsync.

use serde::Serialize;
use serde_json::json;

use crate::api::ApiResponse;
use crate::error::FarmSyncError;

/// Format a titled list as `{list, count, items}`.
///
/// # Errors
///
/// Returns `FarmSyncError::Parse` if JSON serialization fails.
pub fn format_list_json<T: Serialize>(items: &[T], list_name: &str) -> Result<String, FarmSyncError> {
    let output = json!({
        "list": list_name,
        "count": items.len(),
        "items": items
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Format a response with its body decoded as text.
///
/// # Errors
///
/// Returns `FarmSyncError::Parse` if JSON serialization fails.
pub fn format_response_json(response: &ApiResponse) -> Result<String, FarmSyncError> {
    let output = json!({
        "status": response.status,
        "status_text": response.status_text,
        "headers": response.headers,
        "body": response.body_text(),
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Generic JSON formatter for any serializable type
///
/// # Errors
///
/// Returns `FarmSyncError::Parse` if JSON serialization fails.
pub fn to_json<T: Serialize>(value: &T) -> Result<String, FarmSyncError> {
    Ok(serde_json::to_string_pretty(value)?)
}
