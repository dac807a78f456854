//! Path resolution for farmsync configuration and data files.
//!
//! All farmsync data is stored in `~/.farmsync/`:
//! - `config.yaml` - Main configuration file
//! - `farmsync.db` - SQLite store for queues, cache entries and responses

use std::path::PathBuf;

use crate::error::FarmSyncError;

/// Paths to farmsync configuration and data files.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Root directory: `~/.farmsync/`
    pub root: PathBuf,
    /// Config file: `~/.farmsync/config.yaml`
    pub config_file: PathBuf,
    /// Database file: `~/.farmsync/farmsync.db`
    pub database: PathBuf,
}

impl Paths {
    /// Create paths based on the user's home directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self, FarmSyncError> {
        let home = std::env::var("HOME").map_err(|_| {
            FarmSyncError::Config("Could not determine home directory".to_string())
        })?;

        Ok(Self::with_root(PathBuf::from(home).join(".farmsync")))
    }

    /// Create paths with a custom root directory (useful for testing).
    #[must_use]
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            config_file: root.join("config.yaml"),
            database: root.join("farmsync.db"),
            root,
        }
    }

    /// Ensure the root directory exists.
    ///
    /// A failure here means the platform will not give us persistent
    /// storage, so it is reported as [`FarmSyncError::StorageUnavailable`].
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn ensure_dirs(&self) -> Result<(), FarmSyncError> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root).map_err(|e| {
                FarmSyncError::StorageUnavailable(format!(
                    "Failed to create directory {}: {e}",
                    self.root.display()
                ))
            })?;
        }

        Ok(())
    }
}
