//! Background task that delivers interceptor events.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::notification::{ClickOutcome, Notification};
use super::worker::{ControlMessage, Interceptor, WorkerState};
use crate::api::{ApiRequest, ApiResponse};
use crate::error::FarmSyncError;
use crate::features::sync::DrainOutcome;

type Reply<T> = oneshot::Sender<Result<T, FarmSyncError>>;

/// Events delivered to the interceptor task, each with a reply channel.
#[derive(Debug)]
pub enum InterceptorEvent {
    Install(Reply<WorkerState>),
    Activate(Reply<WorkerState>),
    Fetch(ApiRequest, Reply<ApiResponse>),
    Push(Option<Vec<u8>>, Reply<Notification>),
    NotificationClick {
        notification: Notification,
        action: Option<String>,
        reply: Reply<ClickOutcome>,
    },
    Sync(String, Reply<Option<DrainOutcome>>),
    Message(ControlMessage, Reply<()>),
}

impl Interceptor {
    /// Start delivering events on a background task.
    ///
    /// Lifecycle events (install, activate, messages) run one at a time in
    /// arrival order. Fetch, push, click and sync events each get their own
    /// task.
    #[must_use]
    pub fn spawn(self) -> InterceptorHandle {
        let (tx, mut rx) = mpsc::channel::<InterceptorEvent>(64);

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    InterceptorEvent::Install(reply) => {
                        let _ = reply.send(self.install().await);
                    },
                    InterceptorEvent::Activate(reply) => {
                        let _ = reply.send(self.activate().await);
                    },
                    InterceptorEvent::Message(message, reply) => {
                        let _ = reply.send(self.message(message).await);
                    },
                    InterceptorEvent::Fetch(request, reply) => {
                        let worker = self.clone();
                        tokio::spawn(async move {
                            let _ = reply.send(worker.fetch(&request).await);
                        });
                    },
                    InterceptorEvent::Push(payload, reply) => {
                        let worker = self.clone();
                        tokio::spawn(async move {
                            let _ = reply.send(worker.push(payload.as_deref()).await);
                        });
                    },
                    InterceptorEvent::NotificationClick {
                        notification,
                        action,
                        reply,
                    } => {
                        let worker = self.clone();
                        tokio::spawn(async move {
                            let outcome = worker
                                .notification_click(&notification, action.as_deref())
                                .await;
                            let _ = reply.send(outcome);
                        });
                    },
                    InterceptorEvent::Sync(tag, reply) => {
                        let worker = self.clone();
                        tokio::spawn(async move {
                            let _ = reply.send(worker.sync(&tag).await);
                        });
                    },
                }
            }
            tracing::debug!("interceptor task finished");
        });

        InterceptorHandle { tx, task }
    }
}

/// Foreground handle to a running interceptor.
pub struct InterceptorHandle {
    tx: mpsc::Sender<InterceptorEvent>,
    task: JoinHandle<()>,
}

impl InterceptorHandle {
    async fn call<T>(
        &self,
        event: impl FnOnce(Reply<T>) -> InterceptorEvent,
    ) -> Result<T, FarmSyncError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(event(reply)).await.map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    /// Install the configured generation.
    ///
    /// # Errors
    ///
    /// Returns an error if the task has stopped or activation fails.
    pub async fn install(&self) -> Result<WorkerState, FarmSyncError> {
        self.call(InterceptorEvent::Install).await
    }

    /// Activate the waiting generation.
    ///
    /// # Errors
    ///
    /// Returns an error if the task has stopped or activation fails.
    pub async fn activate(&self) -> Result<WorkerState, FarmSyncError> {
        self.call(InterceptorEvent::Activate).await
    }

    /// Route a request through the interceptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the task has stopped or a non-`GET` request fails.
    pub async fn fetch(&self, request: ApiRequest) -> Result<ApiResponse, FarmSyncError> {
        self.call(|reply| InterceptorEvent::Fetch(request, reply)).await
    }

    /// Deliver a push payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the task has stopped or the notification cannot
    /// be shown.
    pub async fn push(&self, payload: Option<Vec<u8>>) -> Result<Notification, FarmSyncError> {
        self.call(|reply| InterceptorEvent::Push(payload, reply)).await
    }

    /// Deliver a notification click.
    ///
    /// # Errors
    ///
    /// Returns an error if the task has stopped or the platform fails.
    pub async fn notification_click(
        &self,
        notification: Notification,
        action: Option<String>,
    ) -> Result<ClickOutcome, FarmSyncError> {
        self.call(|reply| InterceptorEvent::NotificationClick {
            notification,
            action,
            reply,
        })
        .await
    }

    /// Deliver a background-sync event.
    ///
    /// # Errors
    ///
    /// Returns an error if the task or the reconciler has stopped.
    pub async fn sync(&self, tag: &str) -> Result<Option<DrainOutcome>, FarmSyncError> {
        let tag = tag.to_string();
        self.call(|reply| InterceptorEvent::Sync(tag, reply)).await
    }

    /// Post a control message.
    ///
    /// # Errors
    ///
    /// Returns an error if the task has stopped or the message fails.
    pub async fn message(&self, message: ControlMessage) -> Result<(), FarmSyncError> {
        self.call(|reply| InterceptorEvent::Message(message, reply)).await
    }

    /// Close the event channel and wait for the task to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "interceptor task ended abnormally");
        }
    }
}

fn stopped() -> FarmSyncError {
    FarmSyncError::Config("interceptor task has stopped".to_string())
}
