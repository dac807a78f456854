//! Scriptable in-process transport for tests.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::client::Transport;
use super::types::{ApiRequest, ApiResponse, HttpMethod};
use crate::error::FarmSyncError;

#[derive(Clone)]
enum Route {
    Respond(u16, Vec<u8>, bool),
    Unreachable,
    Hang,
}

/// Transport whose answers are configured per method and URL.
///
/// Unknown routes answer 404. Every call is recorded.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<(HttpMethod, String), Route>>,
    calls: Mutex<Vec<ApiRequest>>,
    offline: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, method: HttpMethod, url: &str, status: u16, body: &str) {
        self.route(method, url, Route::Respond(status, body.as_bytes().to_vec(), true));
    }

    pub fn respond_cross_origin(&self, method: HttpMethod, url: &str, status: u16, body: &str) {
        self.route(method, url, Route::Respond(status, body.as_bytes().to_vec(), false));
    }

    pub fn unreachable(&self, method: HttpMethod, url: &str) {
        self.route(method, url, Route::Unreachable);
    }

    pub fn hang(&self, method: HttpMethod, url: &str) {
        self.route(method, url, Route::Hang);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, method: HttpMethod, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }

    fn route(&self, method: HttpMethod, url: &str, route: Route) {
        self.routes
            .lock()
            .unwrap()
            .insert((method, url.to_string()), route);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, FarmSyncError> {
        self.calls.lock().unwrap().push(request.clone());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(FarmSyncError::NetworkUnreachable("offline".to_string()));
        }

        let route = self
            .routes
            .lock()
            .unwrap()
            .get(&(request.method, request.url.clone()))
            .cloned();

        match route {
            Some(Route::Respond(status, body, same_origin)) => Ok(ApiResponse {
                status,
                status_text: String::new(),
                headers: Vec::new(),
                body,
                same_origin,
            }),
            Some(Route::Unreachable) => Err(FarmSyncError::NetworkUnreachable(format!(
                "{} unreachable",
                request.url
            ))),
            Some(Route::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(FarmSyncError::NetworkUnreachable("hung".to_string()))
            },
            None => Ok(ApiResponse::text(404, "Not Found", "")),
        }
    }
}
