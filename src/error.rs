//! Error types for farmsync.
//!
//! The first six variants form the offline layer's taxonomy; the rest cover
//! configuration, parsing and I/O around it.

use thiserror::Error;

/// Errors produced by the offline resilience layer.
#[derive(Debug, Error)]
pub enum FarmSyncError {
    /// The platform refused persistent storage. Fatal to this subsystem.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A store transaction was rolled back; the single operation may be retried.
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    /// The network could not be reached (offline, DNS, timeout).
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    /// The replay target answered with a non-2xx status.
    #[error("HTTP {status}: {message}")]
    HttpApplicationError { status: u16, message: String },

    /// The user denied a permission (push notifications).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A write hit the storage quota.
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Any other database failure.
    #[error("Database error: {0}")]
    Database(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization or parsing failure.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FarmSyncError {
    /// Whether the failure is expected while offline and should drive
    /// queueing rather than be reported.
    #[must_use]
    pub const fn is_offline(&self) -> bool {
        matches!(self, Self::NetworkUnreachable(_))
    }

    /// Whether retrying the same single operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransactionAborted(_) | Self::NetworkUnreachable(_)
        )
    }
}

impl From<serde_json::Error> for FarmSyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

impl From<rusqlite::Error> for FarmSyncError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                Self::TransactionAborted(e.to_string())
            },
            Some(ErrorCode::DiskFull) => Self::QuotaExceeded(e.to_string()),
            Some(ErrorCode::CannotOpen | ErrorCode::PermissionDenied | ErrorCode::ReadOnly) => {
                Self::StorageUnavailable(e.to_string())
            },
            _ => Self::Database(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for FarmSyncError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::HttpApplicationError {
                status: status.as_u16(),
                message: e.to_string(),
            },
            None => Self::NetworkUnreachable(e.to_string()),
        }
    }
}
