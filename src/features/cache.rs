//! Keyed read cache with a fixed time-to-live.
//!
//! An entry is valid while `now - cached_at <= ttl`. Stale entries are
//! removed when read and by [`TtlCache::sweep`], which
//! [`TtlCache::spawn_sweeper`] runs on an interval.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::core::{system_clock, SharedClock};
use crate::error::FarmSyncError;
use crate::storage::{Collection, Key, Store};

/// Default time-to-live in seconds.
pub const DEFAULT_TTL_SECS: i64 = 300;

/// A cached value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Whether the entry is still fresh at `now`.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(self.cached_at) <= ttl
    }
}

/// TTL cache over the `cache_entries` collection.
#[derive(Clone)]
pub struct TtlCache {
    store: Store,
    clock: SharedClock,
    ttl: Duration,
}

impl TtlCache {
    /// Create a cache with the default TTL.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self::with_clock(store, system_clock(), Duration::seconds(DEFAULT_TTL_SECS))
    }

    /// Create a cache with an explicit clock and TTL.
    #[must_use]
    pub fn with_clock(store: Store, clock: SharedClock, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    /// The TTL in use.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Read a fresh value.
    ///
    /// A stale entry is deleted and `None` returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the value does not decode as `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, FarmSyncError> {
        match self.get_entry(key).await? {
            Some(entry) => Ok(Some(serde_json::from_value(entry.value)?)),
            None => Ok(None),
        }
    }

    /// Read a fresh entry with its timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>, FarmSyncError> {
        let now = self.clock.now();
        let ttl = self.ttl;

        self.store
            .transaction(|tx| {
                let key = Key::from(key);
                let Some(entry) = tx.get::<CacheEntry>(Collection::CacheEntries, &key)? else {
                    return Ok(None);
                };
                if entry.is_valid(now, ttl) {
                    Ok(Some(entry))
                } else {
                    tracing::debug!(key = %entry.key, "purging stale cache entry");
                    tx.delete(Collection::CacheEntries, &key)?;
                    Ok(None)
                }
            })
            .await
    }

    /// Store a value, replacing any previous one.
    ///
    /// If the store is out of space, stale entries are swept and the write
    /// is tried once more.
    ///
    /// # Errors
    ///
    /// Returns [`FarmSyncError::QuotaExceeded`] if the retry also fails for
    /// lack of space, or any other store error.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), FarmSyncError> {
        let entry = CacheEntry {
            key: key.to_string(),
            value: serde_json::to_value(value)?,
            cached_at: self.clock.now().trunc_subsecs(3),
        };

        match self.store.put(Collection::CacheEntries, &entry).await {
            Err(FarmSyncError::QuotaExceeded(reason)) => {
                let swept = self.sweep().await?;
                tracing::warn!(key, swept, %reason, "cache write hit quota, retrying after sweep");
                self.store.put(Collection::CacheEntries, &entry).await?;
                Ok(())
            },
            other => other.map(|_| ()),
        }
    }

    /// Delete stale entries. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn sweep(&self) -> Result<usize, FarmSyncError> {
        let Some(cutoff) = self.clock.now().checked_sub_signed(self.ttl) else {
            return Ok(0);
        };
        let cutoff = cutoff.timestamp_millis();
        let removed = self
            .store
            .transaction(|tx| tx.delete_below(Collection::CacheEntries, "cached_at", &json!(cutoff)))
            .await?;
        if removed > 0 {
            tracing::debug!(removed, "swept stale cache entries");
        }
        Ok(removed)
    }

    /// Remove one entry. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn clear(&self, key: &str) -> Result<bool, FarmSyncError> {
        self.store
            .delete(Collection::CacheEntries, &Key::from(key))
            .await
    }

    /// Remove every entry. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn clear_all(&self) -> Result<usize, FarmSyncError> {
        self.store.clear(Collection::CacheEntries).await
    }

    /// Every stored entry, fresh or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn entries(&self) -> Result<Vec<CacheEntry>, FarmSyncError> {
        self.store.get_all(Collection::CacheEntries).await
    }

    /// Run [`sweep`](Self::sweep) every `every` until the handle is aborted.
    ///
    /// Sweep failures are logged and the loop keeps going.
    #[must_use]
    pub fn spawn_sweeper(&self, every: StdDuration) -> JoinHandle<()> {
        let cache = self.clone();
        let every = every.max(StdDuration::from_millis(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = cache.sweep().await {
                    tracing::warn!(error = %e, "cache sweep failed");
                }
            }
        })
    }
}
