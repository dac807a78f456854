//! `SQLite` database connection.
//!
//! The database is stored at `~/.farmsync/farmsync.db` and contains tables for:
//! - Pending operations
//! - Pending form submissions
//! - Cache entries
//! - Interceptor responses and the push registration

use rusqlite::Connection;

use crate::error::FarmSyncError;

use super::migrations;

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at a specific path.
    ///
    /// Creates the database file and runs migrations if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`FarmSyncError::StorageUnavailable`] if the file cannot be
    /// opened, or an error if migrations fail.
    pub fn open_at(path: &std::path::Path) -> Result<Self, FarmSyncError> {
        let conn = Connection::open(path).map_err(|e| {
            FarmSyncError::StorageUnavailable(format!(
                "Failed to open database {}: {e}",
                path.display()
            ))
        })?;

        Self::init(conn)
    }

    /// Open an in-memory database (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open_in_memory() -> Result<Self, FarmSyncError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            FarmSyncError::StorageUnavailable(format!("Failed to open in-memory database: {e}"))
        })?;

        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, FarmSyncError> {
        // WAL is a no-op for in-memory databases, which report "memory".
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))
            .map_err(|e| FarmSyncError::StorageUnavailable(format!("Failed to set journal mode: {e}")))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let db = Self { conn };
        db.migrate()?;

        Ok(db)
    }

    /// Run database migrations.
    fn migrate(&self) -> Result<(), FarmSyncError> {
        migrations::run(&self.conn)
    }

    /// Get the current schema version.
    ///
    /// # Errors
    ///
    /// Returns an error if the version cannot be read.
    pub fn schema_version(&self) -> Result<i32, FarmSyncError> {
        migrations::get_version(&self.conn)
    }

    /// Get a reference to the underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Mutable access for opening transactions.
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}
