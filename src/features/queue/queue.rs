//! Pending operation queue storage and management.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::operation::{NewOperation, PendingOperation};
use crate::core::{system_clock, SharedClock};
use crate::error::FarmSyncError;
use crate::storage::{Collection, Key, Store};

/// Failed replays after which an operation is evicted.
pub const MAX_RETRIES: u32 = 3;

/// Result of recording a failed replay.
#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    /// The operation stays queued with the incremented retry count.
    Retrying(PendingOperation),
    /// The retry budget is used up; the operation was removed for good.
    Evicted(PendingOperation),
    /// No operation with that id was queued.
    Missing,
}

/// Queue of mutating API calls waiting for replay.
#[derive(Clone)]
pub struct OperationQueue {
    store: Store,
    clock: SharedClock,
    max_retries: u32,
}

impl OperationQueue {
    /// Create a queue over `store` using the system clock.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self::with_clock(store, system_clock())
    }

    /// Create a queue with an explicit clock.
    #[must_use]
    pub fn with_clock(store: Store, clock: SharedClock) -> Self {
        Self {
            store,
            clock,
            max_retries: MAX_RETRIES,
        }
    }

    /// Override the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// The retry budget in use.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Add an operation to the queue.
    ///
    /// Only touches the local store; nothing is sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation cannot be saved.
    pub async fn enqueue(&self, op: NewOperation) -> Result<PendingOperation, FarmSyncError> {
        let mut pending = PendingOperation::from_new(op, self.clock.now());
        let key = self.store.add(Collection::PendingOperations, &pending).await?;
        pending.id = key.as_id();

        tracing::debug!(
            id = pending.id(),
            method = %pending.method,
            endpoint = %pending.endpoint,
            "queued operation"
        );
        Ok(pending)
    }

    /// All queued operations, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_pending(&self) -> Result<Vec<PendingOperation>, FarmSyncError> {
        self.store
            .transaction(|tx| tx.get_all_ordered(Collection::PendingOperations, "enqueued_at"))
            .await
    }

    /// Get a specific operation by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get(&self, id: i64) -> Result<Option<PendingOperation>, FarmSyncError> {
        self.store
            .get(Collection::PendingOperations, &Key::Id(id))
            .await
    }

    /// Remove an operation after a successful replay.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn ack(&self, id: i64) -> Result<bool, FarmSyncError> {
        let removed = self
            .store
            .delete(Collection::PendingOperations, &Key::Id(id))
            .await?;
        tracing::debug!(id, removed, "acknowledged operation");
        Ok(removed)
    }

    /// Record a failed replay.
    ///
    /// The next record is computed from the stored one and written in the
    /// same transaction. An operation reaching the retry budget is deleted
    /// and returned as [`FailOutcome::Evicted`].
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails; the stored record is then
    /// unchanged.
    pub async fn fail(&self, id: i64, error: &str) -> Result<FailOutcome, FarmSyncError> {
        let max_retries = self.max_retries;
        let outcome = self
            .store
            .transaction(|tx| {
                let key = Key::Id(id);
                let Some(current) = tx.get::<PendingOperation>(Collection::PendingOperations, &key)?
                else {
                    return Ok(FailOutcome::Missing);
                };

                let next = current.failed(error);
                if next.is_exhausted(max_retries) {
                    tx.delete(Collection::PendingOperations, &key)?;
                    Ok(FailOutcome::Evicted(next))
                } else {
                    tx.put(Collection::PendingOperations, &next)?;
                    Ok(FailOutcome::Retrying(next))
                }
            })
            .await?;

        if let FailOutcome::Evicted(op) = &outcome {
            tracing::warn!(
                id,
                method = %op.method,
                endpoint = %op.endpoint,
                retries = op.retry_count,
                error,
                "operation evicted after exhausting retries"
            );
        }
        Ok(outcome)
    }

    /// Get queue statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn stats(&self) -> Result<QueueStats, FarmSyncError> {
        let pending = self.list_pending().await?;
        Ok(QueueStats {
            pending: pending.len(),
            retrying: pending.iter().filter(|op| op.retry_count > 0).count(),
            oldest_pending: pending.first().map(|op| op.enqueued_at),
            max_retries: self.max_retries,
        })
    }

    /// Whether anything is waiting for replay.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn has_pending(&self) -> Result<bool, FarmSyncError> {
        Ok(self.store.count(Collection::PendingOperations).await? > 0)
    }

    /// Operations of one type, in id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_by_type(
        &self,
        op_type: super::operation::OperationType,
    ) -> Result<Vec<PendingOperation>, FarmSyncError> {
        let value = serde_json::to_value(op_type)?;
        self.store
            .get_all_by_index(Collection::PendingOperations, "type", &value)
            .await
    }

    /// Drop every queued operation. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn clear(&self) -> Result<usize, FarmSyncError> {
        self.store.clear(Collection::PendingOperations).await
    }
}

/// Queue statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Number of queued operations
    pub pending: usize,
    /// Queued operations that have failed at least once
    pub retrying: usize,
    /// Oldest queued operation timestamp
    pub oldest_pending: Option<DateTime<Utc>>,
    /// Retry budget
    pub max_retries: u32,
}

impl QueueStats {
    /// Stats as JSON, for scripting output.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "pending": self.pending,
            "retrying": self.retrying,
            "oldest_pending": self.oldest_pending.map(|t| t.to_rfc3339()),
            "max_retries": self.max_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::core::ManualClock;
    use crate::features::queue::operation::OperationType;

    fn create_test_queue() -> (OperationQueue, ManualClock) {
        let store = Store::open_in_memory().unwrap();
        let clock = ManualClock::new(Utc::now());
        let queue = OperationQueue::with_clock(store, Arc::new(clock.clone()));
        (queue, clock)
    }

    #[tokio::test]
    async fn test_enqueue_and_get() {
        let (queue, _) = create_test_queue();

        let op = queue
            .enqueue(NewOperation::create("/api/crops", json!({"name": "maize"})))
            .await
            .unwrap();
        assert!(op.id.is_some());
        assert_eq!(op.retry_count, 0);

        let loaded = queue.get(op.id()).await.unwrap().unwrap();
        assert_eq!(loaded, op);
    }

    #[tokio::test]
    async fn test_list_pending_preserves_enqueue_order() {
        let (queue, clock) = create_test_queue();

        let mut ids = Vec::new();
        for i in 0..5 {
            let op = queue
                .enqueue(NewOperation::update(format!("/api/fields/{i}"), json!({"i": i})))
                .await
                .unwrap();
            ids.push(op.id());
            clock.advance(Duration::milliseconds(1));
        }

        let pending = queue.list_pending().await.unwrap();
        assert_eq!(pending.iter().map(PendingOperation::id).collect::<Vec<_>>(), ids);
    }

    #[tokio::test]
    async fn test_same_timestamp_keeps_insertion_order() {
        let (queue, _) = create_test_queue();

        let a = queue.enqueue(NewOperation::delete("/api/a")).await.unwrap();
        let b = queue.enqueue(NewOperation::delete("/api/b")).await.unwrap();

        let pending = queue.list_pending().await.unwrap();
        assert_eq!(pending[0].id, a.id);
        assert_eq!(pending[1].id, b.id);
    }

    #[tokio::test]
    async fn test_ack_removes() {
        let (queue, _) = create_test_queue();
        let op = queue.enqueue(NewOperation::delete("/api/crops/1")).await.unwrap();

        assert!(queue.ack(op.id()).await.unwrap());
        assert!(queue.list_pending().await.unwrap().is_empty());
        assert!(!queue.ack(op.id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_fail_increments_retry_count() {
        let (queue, _) = create_test_queue();
        let op = queue.enqueue(NewOperation::delete("/api/crops/1")).await.unwrap();

        let outcome = queue.fail(op.id(), "HTTP 500").await.unwrap();

        let FailOutcome::Retrying(next) = outcome else {
            panic!("expected retry");
        };
        assert_eq!(next.retry_count, 1);
        let stored = queue.get(op.id()).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.last_error.as_deref(), Some("HTTP 500"));
    }

    #[tokio::test]
    async fn test_evicted_after_max_retries() {
        let (queue, _) = create_test_queue();
        let doomed = queue.enqueue(NewOperation::delete("/api/a")).await.unwrap();
        let survivor = queue.enqueue(NewOperation::delete("/api/b")).await.unwrap();

        for _ in 0..MAX_RETRIES - 1 {
            assert!(matches!(
                queue.fail(doomed.id(), "down").await.unwrap(),
                FailOutcome::Retrying(_)
            ));
        }
        let last = queue.fail(doomed.id(), "down").await.unwrap();
        for _ in 0..MAX_RETRIES - 1 {
            queue.fail(survivor.id(), "down").await.unwrap();
        }

        assert!(matches!(last, FailOutcome::Evicted(ref op) if op.retry_count == MAX_RETRIES));
        let pending = queue.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, survivor.id);
        assert_eq!(pending[0].retry_count, MAX_RETRIES - 1);
    }

    #[tokio::test]
    async fn test_fail_unknown_id() {
        let (queue, _) = create_test_queue();
        assert_eq!(queue.fail(42, "x").await.unwrap(), FailOutcome::Missing);
    }

    #[tokio::test]
    async fn test_custom_retry_budget() {
        let (queue, _) = create_test_queue();
        let queue = queue.with_max_retries(1);
        let op = queue.enqueue(NewOperation::delete("/api/a")).await.unwrap();

        assert!(matches!(
            queue.fail(op.id(), "x").await.unwrap(),
            FailOutcome::Evicted(_)
        ));
    }

    #[tokio::test]
    async fn test_stats() {
        let (queue, clock) = create_test_queue();
        let first = queue.enqueue(NewOperation::delete("/api/a")).await.unwrap();
        clock.advance(Duration::seconds(5));
        queue.enqueue(NewOperation::delete("/api/b")).await.unwrap();
        queue.fail(first.id(), "x").await.unwrap();

        let stats = queue.stats().await.unwrap();

        assert_eq!(stats.pending, 2);
        assert_eq!(stats.retrying, 1);
        assert_eq!(stats.oldest_pending, Some(first.enqueued_at));
        assert_eq!(stats.to_value()["max_retries"], 3);
    }

    #[tokio::test]
    async fn test_list_by_type() {
        let (queue, _) = create_test_queue();
        queue.enqueue(NewOperation::delete("/api/a")).await.unwrap();
        queue
            .enqueue(NewOperation::create("/api/b", json!({})))
            .await
            .unwrap();

        let deletes = queue.list_by_type(OperationType::Delete).await.unwrap();
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].endpoint, "/api/a");
    }

    #[tokio::test]
    async fn test_clear() {
        let (queue, _) = create_test_queue();
        queue.enqueue(NewOperation::delete("/api/a")).await.unwrap();
        queue.enqueue(NewOperation::delete("/api/b")).await.unwrap();

        assert_eq!(queue.clear().await.unwrap(), 2);
        assert!(!queue.has_pending().await.unwrap());
    }
}
