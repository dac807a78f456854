//! Command implementations for farmsync.
//!
//! Each command group gets the shared [`Context`] and returns the text to
//! print.

mod cache;
mod fetch;
mod forms;
mod push;
mod queue;
mod sync;

pub use cache::cache;
pub use fetch::fetch;
pub use forms::forms;
pub use push::push;
pub use queue::queue;
pub use sync::sync;

use std::sync::Arc;

use crate::api::{CredentialProvider, HttpTransport, StaticToken, Transport};
use crate::cli::args::OutputFormat;
use crate::config::Config;
use crate::error::FarmSyncError;
use crate::storage::Store;

/// Everything a command needs: configuration, the open store and the
/// chosen output format.
pub struct Context {
    pub config: Config,
    pub store: Store,
    pub format: OutputFormat,
}

impl Context {
    #[must_use]
    pub const fn new(config: Config, store: Store, format: OutputFormat) -> Self {
        Self {
            config,
            store,
            format,
        }
    }

    /// HTTP transport for the configured backend.
    ///
    /// # Errors
    ///
    /// Returns an error if `api.base_url` is invalid.
    pub fn transport(&self) -> Result<Arc<dyn Transport>, FarmSyncError> {
        Ok(Arc::new(HttpTransport::new(&self.config.api.base_url)?))
    }

    /// Bearer credential from `FARMSYNC_TOKEN` or the config file.
    #[must_use]
    pub fn credentials(&self) -> Arc<dyn CredentialProvider> {
        Arc::new(StaticToken(self.config.token()))
    }
}

/// Parse a JSON argument, keeping plain text as a JSON string.
fn parse_json_lenient(input: &str) -> serde_json::Value {
    serde_json::from_str(input).unwrap_or_else(|_| serde_json::Value::String(input.to_string()))
}

/// Parse a JSON argument strictly.
fn parse_json(input: &str, what: &str) -> Result<serde_json::Value, FarmSyncError> {
    serde_json::from_str(input).map_err(|e| FarmSyncError::Parse(format!("Invalid {what} JSON: {e}")))
}
