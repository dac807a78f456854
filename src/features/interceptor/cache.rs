//! Generation-tagged response cache.
//!
//! Each deployment's assets live under their own generation name. Activating
//! a generation deletes every other one.

use rusqlite::{params, OptionalExtension};

use crate::api::ApiResponse;
use crate::core::{system_clock, SharedClock};
use crate::error::FarmSyncError;
use crate::storage::{Store, Tx};

/// Stored responses keyed by generation and URL.
#[derive(Clone)]
pub struct ResponseCache {
    store: Store,
    clock: SharedClock,
}

impl ResponseCache {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self::with_clock(store, system_clock())
    }

    #[must_use]
    pub fn with_clock(store: Store, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// The cached response for `url` in `generation`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the row is corrupt.
    pub async fn lookup(
        &self,
        generation: &str,
        url: &str,
    ) -> Result<Option<ApiResponse>, FarmSyncError> {
        self.store
            .transaction(|tx| {
                let row = tx
                    .connection()
                    .query_row(
                        "SELECT status, status_text, headers, body FROM response_cache
                         WHERE generation = ?1 AND url = ?2",
                        params![generation, url],
                        |row| {
                            Ok((
                                row.get::<_, u16>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, Vec<u8>>(3)?,
                            ))
                        },
                    )
                    .optional()?;

                row.map(|(status, status_text, headers, body)| {
                    Ok(ApiResponse {
                        status,
                        status_text,
                        headers: serde_json::from_str(&headers)?,
                        body,
                        same_origin: true,
                    })
                })
                .transpose()
            })
            .await
    }

    /// Store one response, replacing an earlier one for the same URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn put(
        &self,
        generation: &str,
        url: &str,
        response: &ApiResponse,
    ) -> Result<(), FarmSyncError> {
        let stored_at = self.clock.now().timestamp_millis();
        self.store
            .transaction(|tx| insert(tx, generation, url, response, stored_at))
            .await
    }

    /// Store several responses in one transaction: all of them or none.
    ///
    /// # Errors
    ///
    /// Returns an error if any write fails; nothing is stored then.
    pub async fn put_all(
        &self,
        generation: &str,
        responses: &[(String, ApiResponse)],
    ) -> Result<(), FarmSyncError> {
        let stored_at = self.clock.now().timestamp_millis();
        self.store
            .transaction(|tx| {
                for (url, response) in responses {
                    insert(tx, generation, url, response, stored_at)?;
                }
                Ok(())
            })
            .await
    }

    /// Delete every generation except `keep`. Returns the names removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn retain_only(&self, keep: &str) -> Result<Vec<String>, FarmSyncError> {
        self.store
            .transaction(|tx| {
                let stale: Vec<String> = generations(tx)?
                    .into_iter()
                    .filter(|g| g != keep)
                    .collect();
                tx.connection()
                    .execute("DELETE FROM response_cache WHERE generation <> ?1", [keep])?;
                Ok(stale)
            })
            .await
    }

    /// Delete every generation. Returns the names removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn clear_all(&self) -> Result<Vec<String>, FarmSyncError> {
        self.store
            .transaction(|tx| {
                let removed = generations(tx)?;
                tx.connection().execute("DELETE FROM response_cache", [])?;
                Ok(removed)
            })
            .await
    }

    /// Names of all generations with stored responses.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn generations(&self) -> Result<Vec<String>, FarmSyncError> {
        self.store.transaction(|tx| generations(tx)).await
    }

    /// URLs stored in `generation`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn urls(&self, generation: &str) -> Result<Vec<String>, FarmSyncError> {
        self.store
            .transaction(|tx| {
                let mut stmt = tx.connection().prepare(
                    "SELECT url FROM response_cache WHERE generation = ?1 ORDER BY url",
                )?;
                let urls = stmt
                    .query_map([generation], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(urls)
            })
            .await
    }
}

fn insert(
    tx: &Tx<'_>,
    generation: &str,
    url: &str,
    response: &ApiResponse,
    stored_at: i64,
) -> Result<(), FarmSyncError> {
    tx.connection().execute(
        "INSERT INTO response_cache (generation, url, status, status_text, headers, body, stored_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(generation, url) DO UPDATE SET
            status = excluded.status,
            status_text = excluded.status_text,
            headers = excluded.headers,
            body = excluded.body,
            stored_at = excluded.stored_at",
        params![
            generation,
            url,
            response.status,
            response.status_text,
            serde_json::to_string(&response.headers)?,
            response.body,
            stored_at,
        ],
    )?;
    Ok(())
}

fn generations(tx: &Tx<'_>) -> Result<Vec<String>, FarmSyncError> {
    let mut stmt = tx
        .connection()
        .prepare("SELECT DISTINCT generation FROM response_cache ORDER BY generation")?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}
