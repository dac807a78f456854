//! Replays queued operations against the backend.
//!
//! A drain snapshots the queue, replays each operation in FIFO order and
//! records the outcome with `ack`/`fail`. Failures never stop the pass.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

use super::state::{Action, ReconcilerState, SyncEvent};
use crate::api::{CredentialProvider, Transport};
use crate::config::{OrderingPolicy, SyncConfig};
use crate::error::FarmSyncError;
use crate::features::queue::{FailOutcome, OperationQueue, OperationType, PendingOperation};

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Hard timeout for a single replay
    pub replay_timeout: Duration,
    /// How earlier failures affect later operations on the same endpoint
    pub ordering: OrderingPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for ReconcilerConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            replay_timeout: config.replay_timeout(),
            ordering: config.ordering,
        }
    }
}

/// A replay that failed but stays queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayFailure {
    pub id: i64,
    pub op_type: OperationType,
    pub endpoint: String,
    pub error: String,
    pub retry_count: u32,
}

/// Result of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DrainReport {
    /// Operations in the snapshot
    pub attempted: usize,
    /// Ids replayed and acknowledged
    pub succeeded: Vec<i64>,
    /// Failed replays still queued
    pub failed: Vec<ReplayFailure>,
    /// Operations dropped for good after their last failed replay
    pub evicted: Vec<PendingOperation>,
    /// Ids skipped because an earlier operation on the endpoint failed
    pub deferred: Vec<i64>,
}

impl DrainReport {
    /// Whether every replay in the pass succeeded.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.evicted.is_empty() && self.deferred.is_empty()
    }

    /// Total operations the pass looked at.
    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.evicted.len() + self.deferred.len()
    }
}

/// Outcome of a drain request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DrainOutcome {
    /// This request ran the pass.
    Completed(DrainReport),
    /// Another drain was already running and absorbs this request.
    Coalesced,
    /// The reconciler is offline; nothing was replayed.
    Offline,
}

impl DrainOutcome {
    /// The report, if this request ran the pass.
    #[must_use]
    pub const fn report(&self) -> Option<&DrainReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Coalesced | Self::Offline => None,
        }
    }
}

/// Single-flight drain executor.
///
/// Clones share the queue, transport and state, so a trigger on any clone
/// coalesces with a drain running on another.
#[derive(Clone)]
pub struct Reconciler {
    queue: OperationQueue,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    config: ReconcilerConfig,
    state: Arc<Mutex<ReconcilerState>>,
}

impl Reconciler {
    /// Create a reconciler with the default configuration.
    #[must_use]
    pub fn new(
        queue: OperationQueue,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self::with_config(queue, transport, credentials, ReconcilerConfig::default())
    }

    /// Create a reconciler with custom config.
    #[must_use]
    pub fn with_config(
        queue: OperationQueue,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            queue,
            transport,
            credentials,
            config,
            state: Arc::new(Mutex::new(ReconcilerState::Idle)),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ReconcilerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The queue being drained.
    #[must_use]
    pub const fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    fn apply(&self, event: SyncEvent) -> Action {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (next, action) = state.on(event);
        *state = next;
        action
    }

    /// Run one drain pass unless one is already running.
    ///
    /// # Errors
    ///
    /// Returns an error only if the queue snapshot cannot be read. Replay
    /// failures are recorded in the report.
    pub async fn drain(&self) -> Result<DrainOutcome, FarmSyncError> {
        if self.apply(SyncEvent::Trigger) == Action::Coalesce {
            tracing::debug!("drain already running, coalescing trigger");
            return Ok(DrainOutcome::Coalesced);
        }

        let _finished = FinishOnDrop(self);
        self.run_pass().await.map(DrainOutcome::Completed)
    }

    async fn run_pass(&self) -> Result<DrainReport, FarmSyncError> {
        let snapshot = self.queue.list_pending().await?;
        let mut report = DrainReport {
            attempted: snapshot.len(),
            ..DrainReport::default()
        };
        if snapshot.is_empty() {
            return Ok(report);
        }

        tracing::info!(pending = snapshot.len(), "draining operation queue");
        let token = self.credentials.bearer_token();
        let mut blocked: HashSet<String> = HashSet::new();

        for op in snapshot {
            let id = op.id();
            // A create posts to a collection and names no existing resource.
            let ordered = self.config.ordering == OrderingPolicy::PerEndpoint
                && op.op_type != OperationType::Create;
            if ordered && blocked.contains(&op.endpoint) {
                tracing::debug!(id, endpoint = %op.endpoint, "deferring behind failed operation");
                report.deferred.push(id);
                continue;
            }

            match self.replay(&op, token.as_deref()).await {
                Ok(()) => {
                    tracing::debug!(id, method = %op.method, endpoint = %op.endpoint, "replayed");
                    if let Err(e) = self.queue.ack(id).await {
                        tracing::warn!(id, error = %e, "failed to acknowledge replayed operation");
                    }
                    report.succeeded.push(id);
                },
                Err(err) => {
                    let error = err.to_string();
                    tracing::debug!(id, endpoint = %op.endpoint, %error, "replay failed");
                    if ordered {
                        blocked.insert(op.endpoint.clone());
                    }
                    match self.queue.fail(id, &error).await {
                        Ok(FailOutcome::Retrying(next)) => report.failed.push(ReplayFailure {
                            id,
                            op_type: next.op_type,
                            endpoint: next.endpoint,
                            error,
                            retry_count: next.retry_count,
                        }),
                        Ok(FailOutcome::Evicted(evicted)) => report.evicted.push(evicted),
                        Ok(FailOutcome::Missing) => {},
                        Err(e) => {
                            tracing::warn!(id, error = %e, "failed to record replay failure");
                        },
                    }
                },
            }
        }

        tracing::info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            evicted = report.evicted.len(),
            deferred = report.deferred.len(),
            "drain finished"
        );
        Ok(report)
    }

    async fn replay(&self, op: &PendingOperation, token: Option<&str>) -> Result<(), FarmSyncError> {
        let request = op.to_request(token)?;
        let timeout = self.config.replay_timeout;

        let response = tokio::time::timeout(timeout, self.transport.send(&request))
            .await
            .map_err(|_| {
                FarmSyncError::NetworkUnreachable(format!(
                    "replay timed out after {}s",
                    timeout.as_secs_f64()
                ))
            })??;

        if response.is_success() {
            Ok(())
        } else {
            Err(FarmSyncError::HttpApplicationError {
                status: response.status,
                message: response.status_text,
            })
        }
    }
}

struct FinishOnDrop<'a>(&'a Reconciler);

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        self.0.apply(SyncEvent::Finished);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    use super::*;
    use crate::api::fake::FakeTransport;
    use crate::api::{HttpMethod, StaticToken};
    use crate::core::ManualClock;
    use crate::features::queue::NewOperation;
    use crate::storage::Store;

    struct Fixture {
        queue: OperationQueue,
        clock: ManualClock,
        transport: Arc<FakeTransport>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = ManualClock::default();
            let queue =
                OperationQueue::with_clock(Store::open_in_memory().unwrap(), Arc::new(clock.clone()));
            Self {
                queue,
                clock,
                transport: Arc::new(FakeTransport::new()),
            }
        }

        fn reconciler(&self, config: ReconcilerConfig) -> Reconciler {
            Reconciler::with_config(
                self.queue.clone(),
                self.transport.clone(),
                Arc::new(StaticToken(Some("tok".to_string()))),
                config,
            )
        }

        async fn enqueue(&self, op: NewOperation) -> PendingOperation {
            let op = self.queue.enqueue(op).await.unwrap();
            self.clock.advance(ChronoDuration::milliseconds(1));
            op
        }
    }

    fn report(outcome: DrainOutcome) -> DrainReport {
        match outcome {
            DrainOutcome::Completed(report) => report,
            other => panic!("expected a completed drain, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_success_then_failure_leaves_failed_op() {
        let fx = Fixture::new();
        fx.transport.respond(HttpMethod::Post, "/api/crops", 201, "{}");
        fx.transport.respond(HttpMethod::Post, "/api/expenses", 500, "");
        let op1 = fx.enqueue(NewOperation::create("/api/crops", json!({"n": 1}))).await;
        let op2 = fx.enqueue(NewOperation::create("/api/expenses", json!({"n": 2}))).await;

        let report = report(fx.reconciler(ReconcilerConfig::default()).drain().await.unwrap());

        assert_eq!(report.succeeded, vec![op1.id()]);
        assert_eq!(report.failed.len(), 1);
        let pending = fx.queue.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, op2.id);
        assert_eq!(pending[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_replay_carries_bearer_and_payload() {
        let fx = Fixture::new();
        fx.transport.respond(HttpMethod::Put, "/api/fields/9", 200, "{}");
        fx.enqueue(NewOperation::update("/api/fields/9", json!({"acres": 12}))).await;

        fx.reconciler(ReconcilerConfig::default()).drain().await.unwrap();

        let calls = fx.transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].header("Authorization"), Some("Bearer tok"));
        assert_eq!(calls[0].body.as_deref(), Some(br#"{"acres":12}"#.as_slice()));
    }

    #[tokio::test]
    async fn test_failure_does_not_block_other_endpoints() {
        let fx = Fixture::new();
        fx.transport.unreachable(HttpMethod::Delete, "/api/a");
        fx.transport.respond(HttpMethod::Delete, "/api/b", 204, "");
        fx.enqueue(NewOperation::delete("/api/a")).await;
        let b = fx.enqueue(NewOperation::delete("/api/b")).await;

        let report = report(fx.reconciler(ReconcilerConfig::default()).drain().await.unwrap());

        assert_eq!(report.succeeded, vec![b.id()]);
        assert!(report.failed[0].error.contains("unreachable"));
    }

    #[tokio::test]
    async fn test_per_endpoint_ordering_defers_later_ops() {
        let fx = Fixture::new();
        fx.transport.respond(HttpMethod::Put, "/api/crops/1", 503, "");
        let first = fx.enqueue(NewOperation::update("/api/crops/1", json!({"v": 1}))).await;
        let second = fx.enqueue(NewOperation::update("/api/crops/1", json!({"v": 2}))).await;

        let report = report(fx.reconciler(ReconcilerConfig::default()).drain().await.unwrap());

        assert_eq!(report.failed[0].id, first.id());
        assert_eq!(report.deferred, vec![second.id()]);
        assert_eq!(fx.transport.call_count(HttpMethod::Put, "/api/crops/1"), 1);
        let pending = fx.queue.list_pending().await.unwrap();
        assert_eq!(pending[1].retry_count, 0);
    }

    #[tokio::test]
    async fn test_failed_create_does_not_defer_other_creates() {
        let fx = Fixture::new();
        fx.transport.respond(HttpMethod::Post, "/api/crops", 400, "");
        let first = fx.enqueue(NewOperation::create("/api/crops", json!({"name": ""}))).await;
        let second = fx.enqueue(NewOperation::create("/api/crops", json!({"name": "Maize"}))).await;

        let report = report(fx.reconciler(ReconcilerConfig::default()).drain().await.unwrap());

        assert!(report.deferred.is_empty());
        assert_eq!(
            report.failed.iter().map(|f| f.id).collect::<Vec<_>>(),
            vec![first.id(), second.id()]
        );
        assert_eq!(fx.transport.call_count(HttpMethod::Post, "/api/crops"), 2);
    }

    #[tokio::test]
    async fn test_independent_ordering_replays_everything() {
        let fx = Fixture::new();
        fx.transport.respond(HttpMethod::Put, "/api/crops/1", 503, "");
        fx.enqueue(NewOperation::update("/api/crops/1", json!({"v": 1}))).await;
        fx.enqueue(NewOperation::update("/api/crops/1", json!({"v": 2}))).await;
        let config = ReconcilerConfig {
            ordering: OrderingPolicy::Independent,
            ..ReconcilerConfig::default()
        };

        let report = report(fx.reconciler(config).drain().await.unwrap());

        assert_eq!(report.failed.len(), 2);
        assert!(report.deferred.is_empty());
    }

    #[tokio::test]
    async fn test_eviction_is_reported() {
        let fx = Fixture::new();
        fx.transport.respond(HttpMethod::Post, "/api/sales", 400, "");
        let op = fx.enqueue(NewOperation::create("/api/sales", json!({}))).await;
        let reconciler = fx.reconciler(ReconcilerConfig::default());

        for _ in 0..2 {
            reconciler.drain().await.unwrap();
        }
        let last = report(reconciler.drain().await.unwrap());

        assert_eq!(last.evicted.len(), 1);
        assert_eq!(last.evicted[0].id, op.id);
        assert!(fx.queue.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_drains_are_single_flight() {
        let fx = Fixture::new();
        fx.transport.respond(HttpMethod::Post, "/api/a", 200, "");
        fx.transport.respond(HttpMethod::Post, "/api/b", 200, "");
        fx.transport.set_delay(Duration::from_millis(20));
        fx.enqueue(NewOperation::create("/api/a", json!({}))).await;
        fx.enqueue(NewOperation::create("/api/b", json!({}))).await;
        let reconciler = fx.reconciler(ReconcilerConfig::default());
        let other = reconciler.clone();

        let (a, b) = tokio::join!(reconciler.drain(), other.drain());

        let outcomes = [a.unwrap(), b.unwrap()];
        assert_eq!(
            outcomes.iter().filter(|o| **o == DrainOutcome::Coalesced).count(),
            1
        );
        assert_eq!(fx.transport.call_count(HttpMethod::Post, "/api/a"), 1);
        assert_eq!(fx.transport.call_count(HttpMethod::Post, "/api/b"), 1);
        assert_eq!(reconciler.state(), ReconcilerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_replay_times_out() {
        let fx = Fixture::new();
        fx.transport.hang(HttpMethod::Post, "/api/slow");
        fx.enqueue(NewOperation::create("/api/slow", json!({}))).await;
        let config = ReconcilerConfig {
            replay_timeout: Duration::from_secs(15),
            ..ReconcilerConfig::default()
        };

        let report = report(fx.reconciler(config).drain().await.unwrap());

        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].error.contains("timed out"));
        assert_eq!(fx.queue.list_pending().await.unwrap()[0].retry_count, 1);
    }

    #[test]
    fn test_zero_replay_timeout_is_clamped() {
        let config = ReconcilerConfig::from(&SyncConfig {
            replay_timeout_secs: 0,
            ..SyncConfig::default()
        });

        assert_eq!(config.replay_timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_ops_enqueued_mid_drain_wait_for_next_pass() {
        let fx = Fixture::new();
        fx.transport.respond(HttpMethod::Post, "/api/a", 200, "");
        fx.transport.respond(HttpMethod::Post, "/api/late", 200, "");
        fx.transport.set_delay(Duration::from_millis(20));
        fx.enqueue(NewOperation::create("/api/a", json!({}))).await;
        let reconciler = fx.reconciler(ReconcilerConfig::default());

        let late = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            fx.queue
                .enqueue(NewOperation::create("/api/late", json!({})))
                .await
                .unwrap()
        };
        let (outcome, late) = tokio::join!(reconciler.drain(), late);

        assert_eq!(report(outcome.unwrap()).attempted, 1);
        assert_eq!(fx.queue.list_pending().await.unwrap()[0].id, late.id);
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let fx = Fixture::new();
        let report = report(fx.reconciler(ReconcilerConfig::default()).drain().await.unwrap());
        assert_eq!(report.total(), 0);
        assert!(report.all_succeeded());
        assert!(fx.transport.calls().is_empty());
    }
}
