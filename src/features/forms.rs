//! Form submission queue.
//!
//! Whole form submissions captured offline, tagged with a form type so the
//! application can route them to the right handler later.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::{system_clock, SharedClock};
use crate::error::FarmSyncError;
use crate::storage::{Collection, Key, Store};

/// A queued form submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormQueueItem {
    /// Store-assigned ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Application tag, e.g. `"expense"` or `"harvest"`
    pub form_type: String,
    /// The submitted data, opaque to the queue
    #[serde(default)]
    pub form_data: Value,
    /// When the form was queued
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub enqueued_at: DateTime<Utc>,
    /// Whether the application has handled it
    pub synced: bool,
}

impl FormQueueItem {
    /// The store-assigned id, or 0 for an item not yet stored.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.id.unwrap_or(0)
    }
}

/// Queue of form submissions.
#[derive(Clone)]
pub struct FormQueue {
    store: Store,
    clock: SharedClock,
}

impl FormQueue {
    /// Create a form queue over `store`.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self::with_clock(store, system_clock())
    }

    /// Create a form queue with an explicit clock.
    #[must_use]
    pub fn with_clock(store: Store, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// Queue a form submission.
    ///
    /// # Errors
    ///
    /// Returns an error if the item cannot be saved.
    pub async fn enqueue_form(
        &self,
        form_type: &str,
        form_data: Value,
    ) -> Result<FormQueueItem, FarmSyncError> {
        let mut item = FormQueueItem {
            id: None,
            form_type: form_type.to_string(),
            form_data,
            enqueued_at: self.clock.now().trunc_subsecs(3),
            synced: false,
        };
        item.id = self.store.add(Collection::FormQueue, &item).await?.as_id();

        tracing::debug!(id = item.id(), form_type, "queued form");
        Ok(item)
    }

    /// Forms not yet handled, in id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_unsynced(&self) -> Result<Vec<FormQueueItem>, FarmSyncError> {
        self.store
            .get_all_by_index(Collection::FormQueue, "synced", &json!(false))
            .await
    }

    /// Every queued form, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_all(&self) -> Result<Vec<FormQueueItem>, FarmSyncError> {
        self.store
            .transaction(|tx| tx.get_all_ordered(Collection::FormQueue, "enqueued_at"))
            .await
    }

    /// Mark a form as handled.
    ///
    /// Returns `false` if no such form exists. Marking an already synced form
    /// again is a no-op; a form is never marked unsynced.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_synced(&self, id: i64) -> Result<bool, FarmSyncError> {
        self.store
            .transaction(|tx| {
                let Some(item) = tx.get::<FormQueueItem>(Collection::FormQueue, &Key::Id(id))?
                else {
                    return Ok(false);
                };
                if !item.synced {
                    tx.put(
                        Collection::FormQueue,
                        &FormQueueItem {
                            synced: true,
                            ..item
                        },
                    )?;
                }
                Ok(true)
            })
            .await
    }

    /// Delete forms that have been handled. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn purge_synced(&self) -> Result<usize, FarmSyncError> {
        self.store
            .transaction(|tx| {
                let synced: Vec<FormQueueItem> =
                    tx.get_all_by_index(Collection::FormQueue, "synced", &json!(true))?;
                let mut removed = 0;
                for item in &synced {
                    if tx.delete(Collection::FormQueue, &Key::Id(item.id()))? {
                        removed += 1;
                    }
                }
                Ok(removed)
            })
            .await
    }
}
