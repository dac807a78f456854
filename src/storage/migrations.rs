//! Database migrations for farmsync.
//!
//! Each migration is a function that upgrades the schema by one version.
//! Migrations are run automatically when the database is opened, each in its
//! own transaction together with the version bump.

use rusqlite::Connection;

use crate::error::FarmSyncError;

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Get the current schema version from the database.
///
/// Returns 0 if no version has been set (new database).
pub fn get_version(conn: &Connection) -> Result<i32, FarmSyncError> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| FarmSyncError::Database(format!("Failed to get schema version: {e}")))?;

    Ok(version)
}

/// Set the schema version in the database.
fn set_version(conn: &Connection, version: i32) -> Result<(), FarmSyncError> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))
        .map_err(|e| FarmSyncError::Database(format!("Failed to set schema version: {e}")))
}

/// Run all pending migrations.
///
/// A database written by a newer build is refused rather than guessed at.
pub fn run(conn: &Connection) -> Result<(), FarmSyncError> {
    let current = get_version(conn)?;

    if current > CURRENT_VERSION {
        return Err(FarmSyncError::StorageUnavailable(format!(
            "Schema version {current} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    for version in (current + 1)..=CURRENT_VERSION {
        let tx = conn.unchecked_transaction()?;
        run_migration(&tx, version)?;
        set_version(&tx, version)?;
        tx.commit()?;
        tracing::debug!(version, "applied schema migration");
    }

    Ok(())
}

/// Run a specific migration.
fn run_migration(conn: &Connection, version: i32) -> Result<(), FarmSyncError> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(FarmSyncError::Database(format!(
            "Unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: the three offline collections.
///
/// Records are JSON documents in `body`; the key lives in its own column and
/// indexes are expression indexes over the document.
fn migrate_v1(conn: &Connection) -> Result<(), FarmSyncError> {
    conn.execute_batch(
        r"
        -- Mutating API calls waiting for replay
        CREATE TABLE IF NOT EXISTS pending_operations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            body TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_pending_operations_enqueued_at
        ON pending_operations(json_extract(body, '$.enqueued_at'));

        CREATE INDEX IF NOT EXISTS idx_pending_operations_type
        ON pending_operations(json_extract(body, '$.type'));

        -- Application form submissions
        CREATE TABLE IF NOT EXISTS form_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            body TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_form_queue_enqueued_at
        ON form_queue(json_extract(body, '$.enqueued_at'));

        CREATE INDEX IF NOT EXISTS idx_form_queue_synced
        ON form_queue(json_extract(body, '$.synced'));

        -- Keyed read cache
        CREATE TABLE IF NOT EXISTS cache_entries (
            key TEXT PRIMARY KEY,
            body TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_cache_entries_cached_at
        ON cache_entries(json_extract(body, '$.cached_at'));
        ",
    )
    .map_err(|e| FarmSyncError::Database(format!("Migration v1 failed: {e}")))
}

/// Migration v2: interceptor response cache and local push registration.
fn migrate_v2(conn: &Connection) -> Result<(), FarmSyncError> {
    conn.execute_batch(
        r"
        -- Generation-tagged responses served by the interceptor
        CREATE TABLE IF NOT EXISTS response_cache (
            generation TEXT NOT NULL,
            url TEXT NOT NULL,
            status INTEGER NOT NULL,
            status_text TEXT NOT NULL DEFAULT '',
            headers TEXT NOT NULL,
            body BLOB NOT NULL,
            stored_at INTEGER NOT NULL,
            PRIMARY KEY (generation, url)
        );

        -- At most one local push registration
        CREATE TABLE IF NOT EXISTS push_registration (
            slot INTEGER PRIMARY KEY CHECK (slot = 1),
            endpoint TEXT NOT NULL,
            p256dh TEXT NOT NULL,
            auth TEXT NOT NULL,
            user_id TEXT,
            created_at INTEGER NOT NULL
        );
        ",
    )
    .map_err(|e| FarmSyncError::Database(format!("Migration v2 failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_create_tables() {
        let conn = Connection::open_in_memory().unwrap();

        run(&conn).unwrap();

        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);

        conn.execute(
            "INSERT INTO pending_operations (body) VALUES ('{\"enqueued_at\": 1}')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO cache_entries (key, body) VALUES ('k', '{}')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO response_cache (generation, url, status, headers, body, stored_at)
             VALUES ('farmsync-v1', '/', 200, '[]', x'00', 0)",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_migration_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run(&conn).unwrap();
        run(&conn).unwrap();

        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_upgrade_from_v1_keeps_data() {
        let conn = Connection::open_in_memory().unwrap();
        migrate_v1(&conn).unwrap();
        set_version(&conn, 1).unwrap();
        conn.execute("INSERT INTO form_queue (body) VALUES ('{}')", [])
            .unwrap();

        run(&conn).unwrap();

        assert_eq!(get_version(&conn).unwrap(), 2);
        let forms: i64 = conn
            .query_row("SELECT COUNT(*) FROM form_queue", [], |row| row.get(0))
            .unwrap();
        assert_eq!(forms, 1);
        conn.execute(
            "INSERT INTO push_registration (slot, endpoint, p256dh, auth, created_at)
             VALUES (1, 'https://push.example/1', 'a', 'b', 0)",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        set_version(&conn, CURRENT_VERSION + 1).unwrap();

        let err = run(&conn).unwrap_err();
        assert!(matches!(err, FarmSyncError::StorageUnavailable(_)));
    }

    #[test]
    fn test_get_version_new_database() {
        let conn = Connection::open_in_memory().unwrap();

        assert_eq!(get_version(&conn).unwrap(), 0);
    }
}
