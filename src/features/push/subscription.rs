//! Push subscription types and the platform/backend seams.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::{ApiRequest, CredentialProvider, HttpMethod, Transport};
use crate::error::FarmSyncError;

pub const SUBSCRIBE_ENDPOINT: &str = "/api/notifications/push/subscribe";
pub const UNSUBSCRIBE_ENDPOINT: &str = "/api/notifications/push/unsubscribe";

/// Notification permission as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Granted,
    Denied,
    /// The user dismissed the prompt without deciding.
    Default,
}

/// A push endpoint with raw key material, as minted by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSubscription {
    pub endpoint: String,
    pub p256dh: Vec<u8>,
    pub auth: Vec<u8>,
}

/// Base64 key material of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

/// Subscription in the shape the backend expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: PushKeys,
}

impl From<&RawSubscription> for PushSubscription {
    fn from(raw: &RawSubscription) -> Self {
        Self {
            endpoint: raw.endpoint.clone(),
            keys: PushKeys {
                p256dh: STANDARD.encode(&raw.p256dh),
                auth: STANDARD.encode(&raw.auth),
            },
        }
    }
}

/// The locally persisted registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushRegistration {
    pub subscription: PushSubscription,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Decode a URL-safe base64 VAPID application-server key.
///
/// # Errors
///
/// Returns a configuration error if the key is not valid base64.
pub fn decode_vapid_key(key: &str) -> Result<Vec<u8>, FarmSyncError> {
    URL_SAFE_NO_PAD
        .decode(key.trim().trim_end_matches('='))
        .map_err(|e| FarmSyncError::Config(format!("Invalid VAPID public key: {e}")))
}

/// Permission prompts and endpoint minting supplied by the host.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushPlatform: Send + Sync {
    /// Ask the user for notification permission (or report the standing
    /// decision).
    async fn request_permission(&self) -> Result<Permission, FarmSyncError>;

    /// The platform's current subscription, if any.
    async fn existing_subscription(&self) -> Result<Option<RawSubscription>, FarmSyncError>;

    /// Mint a new subscription bound to `application_server_key`.
    async fn subscribe(&self, application_server_key: &[u8])
        -> Result<RawSubscription, FarmSyncError>;

    /// Drop the platform subscription. Returns whether one existed.
    async fn unsubscribe(&self) -> Result<bool, FarmSyncError>;
}

/// Where subscriptions are registered.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriptionBackend: Send + Sync {
    async fn register(&self, subscription: &PushSubscription) -> Result<(), FarmSyncError>;

    async fn unregister(&self, endpoint: &str) -> Result<(), FarmSyncError>;
}

/// Backend reached over the FarmSync HTTP API.
pub struct HttpSubscriptionBackend {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpSubscriptionBackend {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            transport,
            credentials,
        }
    }

    async fn send(&self, request: ApiRequest) -> Result<(), FarmSyncError> {
        let token = self.credentials.bearer_token();
        let response = self
            .transport
            .send(&request.with_bearer(token.as_deref()))
            .await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(FarmSyncError::HttpApplicationError {
                status: response.status,
                message: response.body_text(),
            })
        }
    }
}

#[async_trait]
impl SubscriptionBackend for HttpSubscriptionBackend {
    async fn register(&self, subscription: &PushSubscription) -> Result<(), FarmSyncError> {
        let body = serde_json::to_value(subscription)?;
        self.send(ApiRequest::json(HttpMethod::Post, SUBSCRIBE_ENDPOINT, &body)?)
            .await
    }

    async fn unregister(&self, endpoint: &str) -> Result<(), FarmSyncError> {
        let body = json!({ "endpoint": endpoint });
        self.send(ApiRequest::json(HttpMethod::Delete, UNSUBSCRIBE_ENDPOINT, &body)?)
            .await
    }
}

/// Platform for hosts that obtain the endpoint out of band, such as the CLI.
///
/// Permission counts as granted because the user asked for the
/// subscription explicitly.
#[derive(Debug, Clone, Default)]
pub struct StaticPushPlatform {
    subscription: Option<RawSubscription>,
}

impl StaticPushPlatform {
    #[must_use]
    pub const fn new(subscription: Option<RawSubscription>) -> Self {
        Self { subscription }
    }

    /// Build from base64 key material.
    ///
    /// # Errors
    ///
    /// Returns a parse error if either key is not valid base64.
    pub fn from_base64(endpoint: &str, p256dh: &str, auth: &str) -> Result<Self, FarmSyncError> {
        let decode = |value: &str, name: &str| {
            STANDARD
                .decode(value)
                .or_else(|_| URL_SAFE_NO_PAD.decode(value.trim_end_matches('=')))
                .map_err(|e| FarmSyncError::Parse(format!("Invalid {name} key: {e}")))
        };
        Ok(Self::new(Some(RawSubscription {
            endpoint: endpoint.to_string(),
            p256dh: decode(p256dh, "p256dh")?,
            auth: decode(auth, "auth")?,
        })))
    }
}

#[async_trait]
impl PushPlatform for StaticPushPlatform {
    async fn request_permission(&self) -> Result<Permission, FarmSyncError> {
        Ok(Permission::Granted)
    }

    async fn existing_subscription(&self) -> Result<Option<RawSubscription>, FarmSyncError> {
        Ok(self.subscription.clone())
    }

    async fn subscribe(&self, _key: &[u8]) -> Result<RawSubscription, FarmSyncError> {
        self.subscription
            .clone()
            .ok_or_else(|| FarmSyncError::Config("No push endpoint supplied".to_string()))
    }

    async fn unsubscribe(&self) -> Result<bool, FarmSyncError> {
        Ok(self.subscription.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeTransport;
    use crate::api::StaticToken;

    #[test]
    fn test_decode_vapid_key_accepts_padding() {
        let key = URL_SAFE_NO_PAD.encode([1_u8, 2, 3, 250, 251]);
        assert_eq!(decode_vapid_key(&key).unwrap(), vec![1, 2, 3, 250, 251]);
        assert_eq!(decode_vapid_key(&format!("{key}=")).unwrap().len(), 5);
        assert!(matches!(
            decode_vapid_key("not base64!"),
            Err(FarmSyncError::Config(_))
        ));
    }

    #[test]
    fn test_subscription_wire_shape() {
        let raw = RawSubscription {
            endpoint: "https://push.example/abc".to_string(),
            p256dh: vec![0xfb, 0xff],
            auth: vec![1, 2, 3],
        };

        let value = serde_json::to_value(PushSubscription::from(&raw)).unwrap();

        assert_eq!(value["endpoint"], "https://push.example/abc");
        assert_eq!(value["keys"]["p256dh"], "+/8=");
        assert_eq!(value["keys"]["auth"], "AQID");
    }

    #[tokio::test]
    async fn test_http_backend_routes() {
        let transport = std::sync::Arc::new(FakeTransport::new());
        transport.respond(HttpMethod::Post, SUBSCRIBE_ENDPOINT, 200, "{}");
        transport.respond(HttpMethod::Delete, UNSUBSCRIBE_ENDPOINT, 500, "boom");
        let backend =
            HttpSubscriptionBackend::new(transport.clone(), Arc::new(StaticToken(Some("t".into()))));
        let subscription = PushSubscription {
            endpoint: "https://push.example/1".to_string(),
            keys: PushKeys {
                p256dh: "a".to_string(),
                auth: "b".to_string(),
            },
        };

        backend.register(&subscription).await.unwrap();
        let err = backend.unregister("https://push.example/1").await.unwrap_err();

        assert!(matches!(err, FarmSyncError::HttpApplicationError { status: 500, .. }));
        let calls = transport.calls();
        assert_eq!(calls[0].header("Authorization"), Some("Bearer t"));
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(calls[1].body.as_deref().unwrap()).unwrap(),
            json!({"endpoint": "https://push.example/1"})
        );
    }

    #[tokio::test]
    async fn test_static_platform_from_base64() {
        let platform = StaticPushPlatform::from_base64("https://push.example/1", "AQID", "BAU=").unwrap();
        let raw = platform.existing_subscription().await.unwrap().unwrap();
        assert_eq!(raw.p256dh, vec![1, 2, 3]);
        assert_eq!(raw.auth, vec![4, 5]);
    }
}
