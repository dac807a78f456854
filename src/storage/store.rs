//! Transactional document store over `SQLite`.
//!
//! Records are serde values stored as JSON. The record's key field (`id` or
//! `key`, see [`Collection::key_field`]) is kept in its own column and put
//! back into the document on read, so callers always see complete records.

use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};

use super::collection::{Collection, Key, KeyPath};
use super::database::Database;
use crate::config::Paths;
use crate::error::FarmSyncError;

/// Shared handle to the durable store.
///
/// Clones refer to the same connection. All access is serialized through an
/// async mutex and every operation runs inside its own transaction.
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Database>>,
}

impl Store {
    /// Open (or create) the store at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`FarmSyncError::StorageUnavailable`] if the location cannot
    /// be created or opened.
    pub fn open_at(path: &Path) -> Result<Self, FarmSyncError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    FarmSyncError::StorageUnavailable(format!(
                        "Failed to create directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        Ok(Self::from_database(Database::open_at(path)?))
    }

    /// Open a fresh in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn open_in_memory() -> Result<Self, FarmSyncError> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    /// Wrap an already opened database.
    #[must_use]
    pub fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Whether two handles share the same underlying connection.
    #[must_use]
    pub fn same_handle(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.db, &other.db)
    }

    /// Current schema version.
    ///
    /// # Errors
    ///
    /// Returns an error if the version cannot be read.
    pub async fn schema_version(&self) -> Result<i32, FarmSyncError> {
        self.db.lock().await.schema_version()
    }

    /// Run `f` inside one transaction.
    ///
    /// The transaction commits only if `f` returns `Ok`; otherwise it is
    /// rolled back and has no effect.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or a store error if the transaction
    /// cannot be opened or committed.
    pub async fn transaction<F, R>(&self, f: F) -> Result<R, FarmSyncError>
    where
        F: FnOnce(&Tx<'_>) -> Result<R, FarmSyncError>,
    {
        let mut db = self.db.lock().await;
        let tx = Tx {
            tx: db.connection_mut().transaction()?,
        };
        let result = f(&tx)?;
        tx.tx.commit()?;
        Ok(result)
    }

    /// Insert a record, assigning a key for auto-increment collections.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized or stored.
    pub async fn add<T: Serialize>(
        &self,
        collection: Collection,
        record: &T,
    ) -> Result<Key, FarmSyncError> {
        self.transaction(|tx| tx.add(collection, record)).await
    }

    /// Fetch one record by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the record cannot be decoded.
    pub async fn get<T: DeserializeOwned>(
        &self,
        collection: Collection,
        key: &Key,
    ) -> Result<Option<T>, FarmSyncError> {
        self.transaction(|tx| tx.get(collection, key)).await
    }

    /// Fetch every record in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a record cannot be decoded.
    pub async fn get_all<T: DeserializeOwned>(
        &self,
        collection: Collection,
    ) -> Result<Vec<T>, FarmSyncError> {
        self.transaction(|tx| tx.get_all(collection)).await
    }

    /// Fetch every record whose indexed field equals `value`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown index or a failed query.
    pub async fn get_all_by_index<T: DeserializeOwned>(
        &self,
        collection: Collection,
        index: &str,
        value: &Value,
    ) -> Result<Vec<T>, FarmSyncError> {
        self.transaction(|tx| tx.get_all_by_index(collection, index, value))
            .await
    }

    /// Insert or replace a record by its key.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized or stored.
    pub async fn put<T: Serialize>(
        &self,
        collection: Collection,
        record: &T,
    ) -> Result<Key, FarmSyncError> {
        self.transaction(|tx| tx.put(collection, record)).await
    }

    /// Delete a record. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete(&self, collection: Collection, key: &Key) -> Result<bool, FarmSyncError> {
        self.transaction(|tx| tx.delete(collection, key)).await
    }

    /// Number of records in a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count(&self, collection: Collection) -> Result<usize, FarmSyncError> {
        self.transaction(|tx| tx.count(collection)).await
    }

    /// Remove every record from a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn clear(&self, collection: Collection) -> Result<usize, FarmSyncError> {
        self.transaction(|tx| tx.clear(collection)).await
    }
}

/// An open store transaction.
pub struct Tx<'c> {
    tx: rusqlite::Transaction<'c>,
}

impl Tx<'_> {
    /// Raw connection for tables outside the document collections.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.tx
    }

    /// Insert a record. Fails if a record with the same key exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is malformed or the insert fails.
    pub fn add<T: Serialize>(&self, collection: Collection, record: &T) -> Result<Key, FarmSyncError> {
        let (key, body) = split_record(collection, record)?;
        let table = collection.table();
        let key_col = collection.key_field();

        match key {
            Some(key) => {
                self.tx.execute(
                    &format!("INSERT INTO {table} ({key_col}, body) VALUES (?1, ?2)"),
                    params![key_param(&key), body],
                )?;
                Ok(key)
            },
            None => {
                self.tx
                    .execute(&format!("INSERT INTO {table} (body) VALUES (?1)"), [body])?;
                Ok(Key::Id(self.tx.last_insert_rowid()))
            },
        }
    }

    /// Fetch one record by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the record cannot be decoded.
    pub fn get<T: DeserializeOwned>(
        &self,
        collection: Collection,
        key: &Key,
    ) -> Result<Option<T>, FarmSyncError> {
        let sql = format!(
            "SELECT {key_col}, body FROM {table} WHERE {key_col} = ?1",
            key_col = collection.key_field(),
            table = collection.table(),
        );

        let row = self
            .tx
            .query_row(&sql, [key_param(key)], |row| {
                Ok((row.get::<_, SqlValue>(0)?, row.get::<_, String>(1)?))
            })
            .optional()?;

        row.map(|(key, body)| hydrate(collection, key, &body))
            .transpose()
    }

    /// Fetch every record in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a record cannot be decoded.
    pub fn get_all<T: DeserializeOwned>(&self, collection: Collection) -> Result<Vec<T>, FarmSyncError> {
        let sql = format!(
            "SELECT {key_col}, body FROM {table} ORDER BY {key_col} ASC",
            key_col = collection.key_field(),
            table = collection.table(),
        );
        self.query_records(collection, &sql, &[])
    }

    /// Fetch every record whose indexed field equals `value`, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown index, a non-scalar value, or a
    /// failed query.
    pub fn get_all_by_index<T: DeserializeOwned>(
        &self,
        collection: Collection,
        index: &str,
        value: &Value,
    ) -> Result<Vec<T>, FarmSyncError> {
        let path = index_path(collection, index)?;
        let sql = format!(
            "SELECT {key_col}, body FROM {table}
             WHERE json_extract(body, '{path}') = ?1
             ORDER BY {key_col} ASC",
            key_col = collection.key_field(),
            table = collection.table(),
        );
        self.query_records(collection, &sql, &[index_param(value)?])
    }

    /// Fetch every record ordered by an index, ties broken by key.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown index or a failed query.
    pub fn get_all_ordered<T: DeserializeOwned>(
        &self,
        collection: Collection,
        index: &str,
    ) -> Result<Vec<T>, FarmSyncError> {
        let path = index_path(collection, index)?;
        let sql = format!(
            "SELECT {key_col}, body FROM {table}
             ORDER BY json_extract(body, '{path}') ASC, {key_col} ASC",
            key_col = collection.key_field(),
            table = collection.table(),
        );
        self.query_records(collection, &sql, &[])
    }

    /// Insert or replace a record by its key.
    ///
    /// Records without a key in an auto-increment collection are inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is malformed or the write fails.
    pub fn put<T: Serialize>(&self, collection: Collection, record: &T) -> Result<Key, FarmSyncError> {
        let (key, body) = split_record(collection, record)?;
        let Some(key) = key else {
            return self.add(collection, record);
        };

        self.tx.execute(
            &format!(
                "INSERT INTO {table} ({key_col}, body) VALUES (?1, ?2)
                 ON CONFLICT({key_col}) DO UPDATE SET body = excluded.body",
                table = collection.table(),
                key_col = collection.key_field(),
            ),
            params![key_param(&key), body],
        )?;

        Ok(key)
    }

    /// Delete a record. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete(&self, collection: Collection, key: &Key) -> Result<bool, FarmSyncError> {
        let rows = self.tx.execute(
            &format!(
                "DELETE FROM {table} WHERE {key_col} = ?1",
                table = collection.table(),
                key_col = collection.key_field(),
            ),
            [key_param(key)],
        )?;
        Ok(rows > 0)
    }

    /// Delete every record whose indexed field is strictly below `bound`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown index or a failed delete.
    pub fn delete_below(
        &self,
        collection: Collection,
        index: &str,
        bound: &Value,
    ) -> Result<usize, FarmSyncError> {
        let path = index_path(collection, index)?;
        let rows = self.tx.execute(
            &format!(
                "DELETE FROM {table} WHERE json_extract(body, '{path}') < ?1",
                table = collection.table(),
            ),
            [index_param(bound)?],
        )?;
        Ok(rows)
    }

    /// Number of records in a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self, collection: Collection) -> Result<usize, FarmSyncError> {
        let count: i64 = self.tx.query_row(
            &format!("SELECT COUNT(*) FROM {}", collection.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Remove every record from a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn clear(&self, collection: Collection) -> Result<usize, FarmSyncError> {
        Ok(self
            .tx
            .execute(&format!("DELETE FROM {}", collection.table()), [])?)
    }

    fn query_records<T: DeserializeOwned>(
        &self,
        collection: Collection,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Vec<T>, FarmSyncError> {
        let mut stmt = self.tx.prepare(sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok((row.get::<_, SqlValue>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (key, body) = row?;
            records.push(hydrate(collection, key, &body)?);
        }
        Ok(records)
    }
}

/// Serialize a record and pull its key out of the document.
fn split_record<T: Serialize>(
    collection: Collection,
    record: &T,
) -> Result<(Option<Key>, String), FarmSyncError> {
    let mut value = serde_json::to_value(record)?;
    let Value::Object(map) = &mut value else {
        return Err(FarmSyncError::Parse(format!(
            "Records in {collection} must serialize to JSON objects"
        )));
    };

    let key = match (collection.key_path(), map.remove(collection.key_field())) {
        (_, None | Some(Value::Null)) => None,
        (KeyPath::AutoIncrement, Some(Value::Number(n))) => {
            Some(Key::Id(n.as_i64().ok_or_else(|| {
                FarmSyncError::Parse(format!("Invalid id {n} for {collection}"))
            })?))
        },
        (KeyPath::Named, Some(Value::String(s))) => Some(Key::Name(s)),
        (_, Some(other)) => {
            return Err(FarmSyncError::Parse(format!(
                "Invalid key {other} for {collection}"
            )));
        },
    };

    if key.is_none() && collection.key_path() == KeyPath::Named {
        return Err(FarmSyncError::Parse(format!(
            "Records in {collection} need a `key` field"
        )));
    }

    Ok((key, serde_json::to_string(&value)?))
}

/// Decode a stored document, restoring its key field.
fn hydrate<T: DeserializeOwned>(
    collection: Collection,
    key: SqlValue,
    body: &str,
) -> Result<T, FarmSyncError> {
    let mut value: Value = serde_json::from_str(body)?;
    if let Value::Object(map) = &mut value {
        let key = match key {
            SqlValue::Integer(id) => Value::from(id),
            SqlValue::Text(name) => Value::from(name),
            _ => Value::Null,
        };
        map.insert(collection.key_field().to_string(), key);
    }
    Ok(serde_json::from_value(value)?)
}

fn key_param(key: &Key) -> SqlValue {
    match key {
        Key::Id(id) => SqlValue::Integer(*id),
        Key::Name(name) => SqlValue::Text(name.clone()),
    }
}

fn index_path(collection: Collection, index: &str) -> Result<String, FarmSyncError> {
    if collection.has_index(index) {
        Ok(format!("$.{index}"))
    } else {
        Err(FarmSyncError::Database(format!(
            "Unknown index {index} on {collection}"
        )))
    }
}

/// Map a JSON scalar to the value `json_extract` yields for it.
fn index_param(value: &Value) -> Result<SqlValue, FarmSyncError> {
    match value {
        Value::Null => Ok(SqlValue::Null),
        Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => n.as_i64().map_or_else(
            || {
                n.as_f64()
                    .map(SqlValue::Real)
                    .ok_or_else(|| FarmSyncError::Parse(format!("Unsupported number {n}")))
            },
            |i| Ok(SqlValue::Integer(i)),
        ),
        Value::String(s) => Ok(SqlValue::Text(s.clone())),
        Value::Array(_) | Value::Object(_) => Err(FarmSyncError::Parse(
            "Index values must be JSON scalars".to_string(),
        )),
    }
}

/// One-time, race-free initialization of a shared [`Store`].
///
/// Concurrent callers wait on the same initialization and all receive the
/// resulting handle.
#[derive(Default)]
pub struct StoreCell {
    cell: OnceCell<Store>,
}

impl StoreCell {
    /// An empty cell.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Return the shared store, initializing it with `open` on first use.
    ///
    /// A failed initialization leaves the cell empty so a later call can
    /// try again.
    ///
    /// # Errors
    ///
    /// Returns the error from `open`.
    pub async fn get_or_open<F>(&self, open: F) -> Result<Store, FarmSyncError>
    where
        F: FnOnce() -> Result<Store, FarmSyncError>,
    {
        self.cell
            .get_or_try_init(|| async { open() })
            .await
            .cloned()
    }

    /// Return the shared store, opening the database at `path` on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub async fn open_at(&self, path: &Path) -> Result<Store, FarmSyncError> {
        self.get_or_open(|| Store::open_at(path)).await
    }

    /// The store, if already initialized.
    #[must_use]
    pub fn get(&self) -> Option<Store> {
        self.cell.get().cloned()
    }
}

static DEFAULT_STORE: Lazy<StoreCell> = Lazy::new(StoreCell::new);

/// Open the process-wide store at `~/.farmsync/farmsync.db`.
///
/// Every call returns a handle to the same connection.
///
/// # Errors
///
/// Returns [`FarmSyncError::StorageUnavailable`] if persistent storage
/// cannot be obtained.
pub async fn open() -> Result<Store, FarmSyncError> {
    let paths = Paths::new()?;
    paths.ensure_dirs()?;
    DEFAULT_STORE.open_at(&paths.database).await
}
