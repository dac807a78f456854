//! Request interception and cache-generation lifecycle.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use super::cache::ResponseCache;
use super::notification::{handle_click, ClickOutcome, Notification, NotificationPlatform};
use crate::api::{ApiRequest, ApiResponse, Destination, HttpMethod, Transport};
use crate::config::InterceptorConfig;
use crate::error::FarmSyncError;
use crate::features::sync::{DrainOutcome, SyncCommand};

/// Lifecycle of the interceptor's cache generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// No generation installed yet.
    #[default]
    Uninstalled,
    /// Precaching a new generation.
    Installing,
    /// Installed, waiting for activation.
    Waiting,
    /// Serving from the active generation.
    Active,
}

/// Messages the application can post to the interceptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate the waiting generation now.
    SkipWaiting,
    /// Add these URLs to the active cache.
    CacheUrls { urls: Vec<String> },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Default)]
struct Lifecycle {
    state: WorkerState,
    active: Option<String>,
    waiting: Option<String>,
}

/// Cache-first request handler with generation management, push display and
/// background-sync forwarding.
#[derive(Clone)]
pub struct Interceptor {
    transport: Arc<dyn Transport>,
    cache: ResponseCache,
    platform: Arc<dyn NotificationPlatform>,
    config: InterceptorConfig,
    sync: Option<mpsc::Sender<SyncCommand>>,
    lifecycle: Arc<Mutex<Lifecycle>>,
}

impl Interceptor {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: ResponseCache,
        platform: Arc<dyn NotificationPlatform>,
        config: InterceptorConfig,
    ) -> Self {
        Self {
            transport,
            cache,
            platform,
            config,
            sync: None,
            lifecycle: Arc::new(Mutex::new(Lifecycle::default())),
        }
    }

    /// Forward background-sync events to a reconciler.
    #[must_use]
    pub fn with_sync(mut self, sync: mpsc::Sender<SyncCommand>) -> Self {
        self.sync = Some(sync);
        self
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.lifecycle().state
    }

    /// The generation requests are served from.
    #[must_use]
    pub fn active_generation(&self) -> Option<String> {
        self.lifecycle().active.clone()
    }

    /// The response cache.
    #[must_use]
    pub const fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Install the configured generation: precache its URLs and leave it
    /// waiting, or activate it straight away when skip-waiting is set.
    ///
    /// A failed precache is logged and install still completes.
    ///
    /// # Errors
    ///
    /// Returns an error only if activation fails.
    pub async fn install(&self) -> Result<WorkerState, FarmSyncError> {
        let generation = self.config.generation.clone();
        self.lifecycle().state = WorkerState::Installing;

        match self.fetch_all(&self.config.precache).await {
            Ok(responses) => {
                if let Err(e) = self.cache.put_all(&generation, &responses).await {
                    tracing::error!(%generation, error = %e, "precache failed");
                } else {
                    tracing::info!(%generation, urls = responses.len(), "precached");
                }
            },
            Err(e) => tracing::error!(%generation, error = %e, "precache failed"),
        }

        {
            let mut lifecycle = self.lifecycle();
            lifecycle.state = WorkerState::Waiting;
            lifecycle.waiting = Some(generation);
        }

        if self.config.skip_waiting {
            self.activate().await
        } else {
            Ok(WorkerState::Waiting)
        }
    }

    /// Activate the waiting generation and delete every other one.
    ///
    /// # Errors
    ///
    /// Returns an error if the old generations cannot be deleted.
    pub async fn activate(&self) -> Result<WorkerState, FarmSyncError> {
        let generation = {
            let lifecycle = self.lifecycle();
            let Some(waiting) = lifecycle.waiting.clone() else {
                return Ok(lifecycle.state);
            };
            waiting
        };

        for old in self.cache.retain_only(&generation).await? {
            tracing::info!(generation = %old, "deleted old cache generation");
        }

        let mut lifecycle = self.lifecycle();
        lifecycle.active = Some(generation);
        lifecycle.waiting = None;
        lifecycle.state = WorkerState::Active;
        Ok(WorkerState::Active)
    }

    /// Pick up the configured generation left by an earlier process, or
    /// install it if nothing is stored for it yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be read or activation fails.
    pub async fn resume(&self) -> Result<WorkerState, FarmSyncError> {
        let generation = self.config.generation.clone();
        if !self.cache.generations().await?.contains(&generation) {
            return self.install().await;
        }

        tracing::debug!(%generation, "resuming stored generation");
        self.lifecycle().waiting = Some(generation);
        self.activate().await
    }

    /// Handle an outgoing request.
    ///
    /// `GET`s are served cache-first from the active generation. Other
    /// methods go straight to the network and are never queued here.
    ///
    /// # Errors
    ///
    /// Only non-`GET` requests fail, with the transport's error.
    pub async fn fetch(&self, request: &ApiRequest) -> Result<ApiResponse, FarmSyncError> {
        if request.method != HttpMethod::Get {
            return self.transport.send(request).await;
        }

        let generation = self.active_generation();
        if let Some(generation) = &generation {
            match self.cache.lookup(generation, &request.url).await {
                Ok(Some(hit)) => {
                    tracing::trace!(url = %request.url, "cache hit");
                    return Ok(hit);
                },
                Ok(None) => {},
                Err(e) => tracing::warn!(url = %request.url, error = %e, "cache lookup failed"),
            }
        }

        match self.transport.send(request).await {
            Ok(response) => {
                if let Some(generation) = &generation {
                    if response.status == 200 && response.same_origin {
                        if let Err(e) = self.cache.put(generation, &request.url, &response).await {
                            tracing::warn!(url = %request.url, error = %e, "failed to cache response");
                        }
                    }
                }
                Ok(response)
            },
            Err(e) => {
                tracing::debug!(url = %request.url, error = %e, "network failed, using fallback");
                Ok(self.offline_fallback(request, generation.as_deref()).await)
            },
        }
    }

    async fn offline_fallback(&self, request: &ApiRequest, generation: Option<&str>) -> ApiResponse {
        if request.destination == Destination::Document {
            if let Some(generation) = generation {
                match self.cache.lookup(generation, &self.config.root_document).await {
                    Ok(Some(root)) => return root,
                    Ok(None) => {},
                    Err(e) => tracing::warn!(error = %e, "root document lookup failed"),
                }
            }
        }
        ApiResponse::offline()
    }

    /// Fetch every URL; any failure or non-OK status fails the whole set.
    async fn fetch_all(&self, urls: &[String]) -> Result<Vec<(String, ApiResponse)>, FarmSyncError> {
        let mut responses = Vec::with_capacity(urls.len());
        for url in urls {
            let response = self.transport.send(&ApiRequest::get(url.clone())).await?;
            if !response.is_success() {
                return Err(FarmSyncError::HttpApplicationError {
                    status: response.status,
                    message: format!("{url}: {}", response.status_text),
                });
            }
            responses.push((url.clone(), response));
        }
        Ok(responses)
    }

    /// Show a notification for a push payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform cannot show it.
    pub async fn push(&self, payload: Option<&[u8]>) -> Result<Notification, FarmSyncError> {
        let notification = Notification::from_push(payload);
        tracing::debug!(title = %notification.title, "push received");
        self.platform.show(&notification).await?;
        Ok(notification)
    }

    /// Handle a click on a shown notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform fails.
    pub async fn notification_click(
        &self,
        notification: &Notification,
        action: Option<&str>,
    ) -> Result<ClickOutcome, FarmSyncError> {
        handle_click(self.platform.as_ref(), notification, action).await
    }

    /// Handle a background-sync event.
    ///
    /// Returns `None` when the tag is not ours or no reconciler is attached.
    ///
    /// # Errors
    ///
    /// Returns an error if the reconciler has stopped or its drain failed.
    pub async fn sync(&self, tag: &str) -> Result<Option<DrainOutcome>, FarmSyncError> {
        if tag != self.config.sync_tag {
            tracing::debug!(tag, "ignoring unknown sync tag");
            return Ok(None);
        }
        let Some(sync) = &self.sync else {
            return Ok(None);
        };

        let (reply, rx) = oneshot::channel();
        let stopped = || FarmSyncError::Config("reconciler task has stopped".to_string());
        sync.send(SyncCommand::SyncNow(Some(reply)))
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?.map(Some)
    }

    /// Handle a control message.
    ///
    /// # Errors
    ///
    /// Returns an error if activation fails, or if any URL of a
    /// `CACHE_URLS` message cannot be fetched; nothing is cached then.
    pub async fn message(&self, message: ControlMessage) -> Result<(), FarmSyncError> {
        match message {
            ControlMessage::SkipWaiting => {
                self.activate().await?;
            },
            ControlMessage::CacheUrls { urls } => {
                let generation = self
                    .active_generation()
                    .unwrap_or_else(|| self.config.generation.clone());
                let responses = self.fetch_all(&urls).await?;
                self.cache.put_all(&generation, &responses).await?;
                tracing::info!(%generation, urls = responses.len(), "cached urls");
            },
            ControlMessage::Unknown => tracing::debug!("ignoring unknown message"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeTransport;
    use crate::features::interceptor::notification::MockNotificationPlatform;
    use crate::storage::Store;

    fn config(skip_waiting: bool) -> InterceptorConfig {
        InterceptorConfig {
            precache: vec!["/".to_string(), "/dashboard".to_string()],
            skip_waiting,
            ..InterceptorConfig::default()
        }
    }

    fn interceptor(transport: &Arc<FakeTransport>, config: InterceptorConfig) -> Interceptor {
        Interceptor::new(
            transport.clone(),
            ResponseCache::new(Store::open_in_memory().unwrap()),
            Arc::new(MockNotificationPlatform::new()),
            config,
        )
    }

    fn online_site() -> Arc<FakeTransport> {
        let transport = Arc::new(FakeTransport::new());
        transport.respond(HttpMethod::Get, "/", 200, "<html>home</html>");
        transport.respond(HttpMethod::Get, "/dashboard", 200, "<html>dash</html>");
        transport
    }

    #[tokio::test]
    async fn test_install_with_skip_waiting_activates() {
        let transport = online_site();
        let interceptor = interceptor(&transport, config(true));

        assert_eq!(interceptor.install().await.unwrap(), WorkerState::Active);
        assert_eq!(interceptor.active_generation().as_deref(), Some("farmsync-v1"));
        assert_eq!(
            interceptor.cache().urls("farmsync-v1").await.unwrap(),
            vec!["/", "/dashboard"]
        );
    }

    #[tokio::test]
    async fn test_install_waits_without_skip_waiting() {
        let transport = online_site();
        let interceptor = interceptor(&transport, config(false));

        assert_eq!(interceptor.install().await.unwrap(), WorkerState::Waiting);
        assert!(interceptor.active_generation().is_none());

        interceptor.message(ControlMessage::SkipWaiting).await.unwrap();
        assert_eq!(interceptor.state(), WorkerState::Active);
    }

    #[tokio::test]
    async fn test_precache_failure_still_installs() {
        let transport = Arc::new(FakeTransport::new());
        transport.set_offline(true);
        let interceptor = interceptor(&transport, config(true));

        assert_eq!(interceptor.install().await.unwrap(), WorkerState::Active);
        assert!(interceptor.cache().urls("farmsync-v1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_activation_deletes_old_generations() {
        let transport = online_site();
        let store = Store::open_in_memory().unwrap();
        let cache = ResponseCache::new(store);
        cache
            .put("farmsync-v0", "/", &ApiResponse::text(200, "OK", "stale"))
            .await
            .unwrap();
        let interceptor = Interceptor::new(
            transport.clone(),
            cache,
            Arc::new(MockNotificationPlatform::new()),
            config(true),
        );

        interceptor.install().await.unwrap();

        assert_eq!(
            interceptor.cache().generations().await.unwrap(),
            vec!["farmsync-v1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_resume_reuses_stored_generation() {
        let transport = online_site();
        let store = Store::open_in_memory().unwrap();
        let first = Interceptor::new(
            transport.clone(),
            ResponseCache::new(store.clone()),
            Arc::new(MockNotificationPlatform::new()),
            config(true),
        );
        first.resume().await.unwrap();
        let precache_fetches = transport.call_count(HttpMethod::Get, "/dashboard");

        let second = Interceptor::new(
            transport.clone(),
            ResponseCache::new(store),
            Arc::new(MockNotificationPlatform::new()),
            config(true),
        );

        assert_eq!(second.resume().await.unwrap(), WorkerState::Active);
        assert_eq!(transport.call_count(HttpMethod::Get, "/dashboard"), precache_fetches);
        transport.set_offline(true);
        let hit = second.fetch(&ApiRequest::get("/dashboard")).await.unwrap();
        assert_eq!(hit.body_text(), "<html>dash</html>");
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let transport = online_site();
        let interceptor = interceptor(&transport, config(true));
        interceptor.install().await.unwrap();
        let before = transport.calls().len();

        let response = interceptor.fetch(&ApiRequest::get("/dashboard")).await.unwrap();

        assert_eq!(response.body_text(), "<html>dash</html>");
        assert_eq!(transport.calls().len(), before);
    }

    #[tokio::test]
    async fn test_miss_is_fetched_and_cached() {
        let transport = online_site();
        transport.respond(HttpMethod::Get, "/api/crops", 200, "[]");
        let interceptor = interceptor(&transport, config(true));
        interceptor.install().await.unwrap();

        interceptor.fetch(&ApiRequest::get("/api/crops")).await.unwrap();
        transport.set_offline(true);
        let response = interceptor.fetch(&ApiRequest::get("/api/crops")).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body_text(), "[]");
    }

    #[tokio::test]
    async fn test_non_ok_and_cross_origin_are_not_cached() {
        let transport = online_site();
        transport.respond(HttpMethod::Get, "/api/missing", 404, "");
        transport.respond_cross_origin(HttpMethod::Get, "https://cdn.example/x.js", 200, "x");
        let interceptor = interceptor(&transport, config(true));
        interceptor.install().await.unwrap();

        interceptor.fetch(&ApiRequest::get("/api/missing")).await.unwrap();
        interceptor
            .fetch(&ApiRequest::get("https://cdn.example/x.js"))
            .await
            .unwrap();

        assert_eq!(
            interceptor.cache().urls("farmsync-v1").await.unwrap(),
            vec!["/", "/dashboard"]
        );
    }

    #[tokio::test]
    async fn test_offline_navigation_gets_root_document() {
        let transport = online_site();
        let interceptor = interceptor(&transport, config(true));
        interceptor.install().await.unwrap();
        transport.set_offline(true);

        let response = interceptor.fetch(&ApiRequest::navigate("/fields/7")).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body_text(), "<html>home</html>");
    }

    #[tokio::test]
    async fn test_offline_other_request_gets_503() {
        let transport = online_site();
        let interceptor = interceptor(&transport, config(true));
        interceptor.install().await.unwrap();
        transport.set_offline(true);

        let response = interceptor.fetch(&ApiRequest::get("/api/weather")).await.unwrap();

        assert_eq!(response.status, 503);
        assert_eq!(response.body_text(), "Offline");
    }

    #[tokio::test]
    async fn test_writes_pass_through() {
        let transport = online_site();
        transport.set_offline(true);
        let interceptor = interceptor(&transport, config(true));

        let err = interceptor
            .fetch(&ApiRequest::new(HttpMethod::Post, "/api/crops"))
            .await
            .unwrap_err();

        assert!(err.is_offline());
    }

    #[tokio::test]
    async fn test_cache_urls_is_all_or_nothing() {
        let transport = online_site();
        transport.respond(HttpMethod::Get, "/reports", 200, "r");
        let interceptor = interceptor(&transport, config(true));
        interceptor.install().await.unwrap();

        let result = interceptor
            .message(ControlMessage::CacheUrls {
                urls: vec!["/reports".to_string(), "/nope".to_string()],
            })
            .await;
        assert!(result.is_err());
        assert!(!interceptor
            .cache()
            .urls("farmsync-v1")
            .await
            .unwrap()
            .contains(&"/reports".to_string()));

        interceptor
            .message(ControlMessage::CacheUrls {
                urls: vec!["/reports".to_string()],
            })
            .await
            .unwrap();
        assert!(interceptor
            .cache()
            .urls("farmsync-v1")
            .await
            .unwrap()
            .contains(&"/reports".to_string()));
    }

    #[test]
    fn test_control_message_wire_format() {
        let skip: ControlMessage = serde_json::from_str(r#"{"type":"SKIP_WAITING"}"#).unwrap();
        assert_eq!(skip, ControlMessage::SkipWaiting);

        let urls: ControlMessage =
            serde_json::from_str(r#"{"type":"CACHE_URLS","urls":["/a"]}"#).unwrap();
        assert_eq!(
            urls,
            ControlMessage::CacheUrls {
                urls: vec!["/a".to_string()]
            }
        );

        let other: ControlMessage = serde_json::from_str(r#"{"type":"PING"}"#).unwrap();
        assert_eq!(other, ControlMessage::Unknown);
    }

    #[tokio::test]
    async fn test_push_shows_notification() {
        let mut platform = MockNotificationPlatform::new();
        platform
            .expect_show()
            .withf(|n: &Notification| n.title == "Rain expected")
            .times(1)
            .returning(|_| Ok(()));
        let interceptor = Interceptor::new(
            Arc::new(FakeTransport::new()),
            ResponseCache::new(Store::open_in_memory().unwrap()),
            Arc::new(platform),
            config(true),
        );

        let shown = interceptor
            .push(Some(br#"{"title":"Rain expected"}"#))
            .await
            .unwrap();

        assert_eq!(shown.body, "You have a new notification");
    }

    #[tokio::test]
    async fn test_sync_event_without_reconciler() {
        let transport = online_site();
        let interceptor = interceptor(&transport, config(true));

        assert_eq!(interceptor.sync("sync-farm-data").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sync_event_triggers_drain() {
        let (tx, mut rx) = mpsc::channel(1);
        let transport = online_site();
        let interceptor = interceptor(&transport, config(true)).with_sync(tx);

        let responder = tokio::spawn(async move {
            if let Some(SyncCommand::SyncNow(Some(reply))) = rx.recv().await {
                reply.send(Ok(DrainOutcome::Coalesced)).unwrap();
            }
        });

        assert_eq!(
            interceptor.sync("sync-farm-data").await.unwrap(),
            Some(DrainOutcome::Coalesced)
        );
        assert_eq!(interceptor.sync("other-tag").await.unwrap(), None);
        responder.await.unwrap();
    }
}
