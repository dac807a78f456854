//! Background reconciler task.
//!
//! The task owns the connectivity flag and the periodic timer. The
//! foreground talks to it through a [`ReconcilerHandle`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::reconciler::{DrainOutcome, DrainReport, Reconciler};
use crate::config::SyncConfig;
use crate::error::FarmSyncError;

type DrainReply = oneshot::Sender<Result<DrainOutcome, FarmSyncError>>;

/// Commands for the background task.
#[derive(Debug)]
pub enum SyncCommand {
    /// Drain now, optionally reporting the outcome.
    SyncNow(Option<DrainReply>),
    /// Connectivity changed. Going online triggers a drain.
    SetOnline(bool),
    /// Stop the task.
    Stop,
}

/// Settings for the background task.
#[derive(Debug, Clone)]
pub struct BackgroundSettings {
    /// Time between periodic drains while online
    pub interval: Duration,
    /// Whether the periodic timer runs at all
    pub auto_sync: bool,
    /// Connectivity at start
    pub online: bool,
}

impl From<&SyncConfig> for BackgroundSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            interval: config.interval(),
            auto_sync: config.auto_sync,
            online: true,
        }
    }
}

/// Handle to a running background reconciler.
pub struct ReconcilerHandle {
    tx: mpsc::Sender<SyncCommand>,
    reports: watch::Receiver<Option<DrainReport>>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Request a drain without waiting for it.
    ///
    /// A full command channel means drains are already queued up, so the
    /// trigger is dropped.
    pub fn trigger(&self) {
        if self.tx.try_send(SyncCommand::SyncNow(None)).is_err() {
            tracing::debug!("sync trigger dropped");
        }
    }

    /// Request a drain and wait for its outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the task has stopped or the drain failed.
    pub async fn sync_now(&self) -> Result<DrainOutcome, FarmSyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(SyncCommand::SyncNow(Some(reply))).await?;
        rx.await.map_err(|_| stopped())?
    }

    /// Report a connectivity change.
    ///
    /// # Errors
    ///
    /// Returns an error if the task has stopped.
    pub async fn set_online(&self, online: bool) -> Result<(), FarmSyncError> {
        self.send(SyncCommand::SetOnline(online)).await
    }

    /// Receiver that sees the report of every completed drain.
    #[must_use]
    pub fn reports(&self) -> watch::Receiver<Option<DrainReport>> {
        self.reports.clone()
    }

    /// A cloneable sender for other components (the interceptor's sync event).
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<SyncCommand> {
        self.tx.clone()
    }

    /// Stop the task and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.tx.send(SyncCommand::Stop).await;
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "reconciler task ended abnormally");
        }
    }

    async fn send(&self, command: SyncCommand) -> Result<(), FarmSyncError> {
        self.tx.send(command).await.map_err(|_| stopped())
    }
}

fn stopped() -> FarmSyncError {
    FarmSyncError::Config("reconciler task has stopped".to_string())
}

impl Reconciler {
    /// Start the background task.
    ///
    /// Drains run on their own tasks so the command loop stays responsive;
    /// overlapping triggers coalesce through the reconciler's state.
    #[must_use]
    pub fn spawn(&self, settings: BackgroundSettings) -> ReconcilerHandle {
        let (tx, mut rx) = mpsc::channel(32);
        let (report_tx, reports) = watch::channel(None);
        let report_tx = Arc::new(report_tx);
        let reconciler = self.clone();

        let task = tokio::spawn(async move {
            let mut online = settings.online;
            let mut ticker = interval(settings.interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick(), if settings.auto_sync && online => {
                        tracing::debug!("periodic sync");
                        reconciler.spawn_drain(&report_tx, None);
                    }

                    command = rx.recv() => match command {
                        Some(SyncCommand::SyncNow(reply)) => {
                            if online {
                                tracing::info!("sync requested");
                                reconciler.spawn_drain(&report_tx, reply);
                            } else if let Some(reply) = reply {
                                let _ = reply.send(Ok(DrainOutcome::Offline));
                            }
                        }
                        Some(SyncCommand::SetOnline(now_online)) => {
                            let was_online = std::mem::replace(&mut online, now_online);
                            if now_online && !was_online {
                                tracing::info!("connectivity restored, draining");
                                reconciler.spawn_drain(&report_tx, None);
                            } else if !now_online && was_online {
                                tracing::warn!("offline, operations will queue");
                            }
                        }
                        Some(SyncCommand::Stop) | None => {
                            tracing::info!("reconciler stopping");
                            break;
                        }
                    },
                }
            }
        });

        ReconcilerHandle { tx, reports, task }
    }

    fn spawn_drain(
        &self,
        reports: &Arc<watch::Sender<Option<DrainReport>>>,
        reply: Option<DrainReply>,
    ) {
        let reconciler = self.clone();
        let reports = Arc::clone(reports);
        tokio::spawn(async move {
            let result = reconciler.drain().await;
            match &result {
                Ok(DrainOutcome::Completed(report)) => {
                    reports.send_replace(Some(report.clone()));
                },
                Ok(_) => {},
                Err(e) => tracing::warn!(error = %e, "drain failed"),
            }
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::api::fake::FakeTransport;
    use crate::api::{HttpMethod, StaticToken};
    use crate::features::queue::{NewOperation, OperationQueue};
    use crate::storage::Store;

    fn setup() -> (Reconciler, Arc<FakeTransport>) {
        let queue = OperationQueue::new(Store::open_in_memory().unwrap());
        let transport = Arc::new(FakeTransport::new());
        let reconciler = Reconciler::new(queue, transport.clone(), Arc::new(StaticToken(None)));
        (reconciler, transport)
    }

    fn manual(online: bool) -> BackgroundSettings {
        BackgroundSettings {
            interval: Duration::from_secs(30),
            auto_sync: false,
            online,
        }
    }

    #[tokio::test]
    async fn test_sync_now_replies_with_report() {
        let (reconciler, transport) = setup();
        transport.respond(HttpMethod::Post, "/api/crops", 201, "");
        reconciler
            .queue()
            .enqueue(NewOperation::create("/api/crops", json!({})))
            .await
            .unwrap();
        let handle = reconciler.spawn(manual(true));

        let outcome = handle.sync_now().await.unwrap();

        assert_eq!(outcome.report().unwrap().succeeded.len(), 1);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_sync_now_while_offline_does_nothing() {
        let (reconciler, transport) = setup();
        reconciler
            .queue()
            .enqueue(NewOperation::delete("/api/crops/1"))
            .await
            .unwrap();
        let handle = reconciler.spawn(manual(false));

        assert_eq!(handle.sync_now().await.unwrap(), DrainOutcome::Offline);
        assert!(transport.calls().is_empty());
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_going_online_triggers_drain() {
        let (reconciler, transport) = setup();
        transport.respond(HttpMethod::Delete, "/api/crops/1", 204, "");
        reconciler
            .queue()
            .enqueue(NewOperation::delete("/api/crops/1"))
            .await
            .unwrap();
        let handle = reconciler.spawn(manual(false));
        let mut reports = handle.reports();

        handle.set_online(true).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), reports.changed())
            .await
            .unwrap()
            .unwrap();

        let report = reports.borrow().clone().unwrap();
        assert_eq!(report.succeeded.len(), 1);
        assert!(reconciler.queue().list_pending().await.unwrap().is_empty());
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_timer_drains_while_online() {
        let (reconciler, transport) = setup();
        transport.respond(HttpMethod::Post, "/api/a", 200, "");
        let handle = reconciler.spawn(BackgroundSettings {
            interval: Duration::from_secs(30),
            auto_sync: true,
            online: true,
        });
        let mut reports = handle.reports();

        // First tick fires at startup on an empty queue.
        reports.changed().await.unwrap();
        reconciler
            .queue()
            .enqueue(NewOperation::create("/api/a", json!({})))
            .await
            .unwrap();
        reports.changed().await.unwrap();

        assert_eq!(reports.borrow().as_ref().unwrap().succeeded.len(), 1);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_zero_interval_keeps_task_alive() {
        let (reconciler, transport) = setup();
        transport.respond(HttpMethod::Post, "/api/crops", 201, "");
        reconciler
            .queue()
            .enqueue(NewOperation::create("/api/crops", json!({})))
            .await
            .unwrap();
        let handle = reconciler.spawn(BackgroundSettings {
            interval: Duration::ZERO,
            auto_sync: false,
            online: true,
        });

        let outcome = handle.sync_now().await.unwrap();

        assert_eq!(outcome.report().unwrap().succeeded.len(), 1);
        handle.stop().await;
    }

    #[test]
    fn test_settings_from_zero_config_interval() {
        let config = SyncConfig {
            interval_secs: 0,
            ..SyncConfig::default()
        };

        assert_eq!(BackgroundSettings::from(&config).interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_stopped_handle_errors() {
        let (reconciler, _) = setup();
        let handle = reconciler.spawn(manual(true));
        let sender = handle.sender();
        handle.stop().await;

        assert!(sender.send(SyncCommand::Stop).await.is_err());
    }
}
