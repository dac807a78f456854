//! Push message normalization and notification clicks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::FarmSyncError;

pub const DEFAULT_TITLE: &str = "FarmSync Notification";
pub const DEFAULT_BODY: &str = "You have a new notification";
pub const DEFAULT_ICON: &str = "/favicon.ico";
pub const DEFAULT_TAG: &str = "farmsync-notification";
pub const DEFAULT_URL: &str = "/dashboard";

/// A button shown on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// A notification ready to be shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub require_interaction: bool,
    pub data: Value,
    pub actions: Vec<NotificationAction>,
}

impl Default for Notification {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            body: DEFAULT_BODY.to_string(),
            icon: DEFAULT_ICON.to_string(),
            badge: DEFAULT_ICON.to_string(),
            tag: DEFAULT_TAG.to_string(),
            require_interaction: false,
            data: json!({ "url": DEFAULT_URL }),
            actions: vec![
                NotificationAction {
                    action: "view".to_string(),
                    title: "View".to_string(),
                },
                NotificationAction {
                    action: "dismiss".to_string(),
                    title: "Dismiss".to_string(),
                },
            ],
        }
    }
}

impl Notification {
    /// Build a notification from a raw push payload.
    ///
    /// JSON fields that are missing, empty or `false` take the defaults, as
    /// does JSON that is not an object. A payload that is not JSON at all
    /// becomes the body text.
    #[must_use]
    pub fn from_push(payload: Option<&[u8]>) -> Self {
        let mut notification = Self::default();
        let Some(payload) = payload else {
            return notification;
        };

        match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Object(fields)) => {
                let text = |name: &str, fallback: &mut String| {
                    if let Some(value) = fields.get(name).and_then(Value::as_str) {
                        if !value.is_empty() {
                            *fallback = value.to_string();
                        }
                    }
                };
                text("title", &mut notification.title);
                text("body", &mut notification.body);
                text("icon", &mut notification.icon);
                text("badge", &mut notification.badge);
                text("tag", &mut notification.tag);
                notification.require_interaction = fields
                    .get("requireInteraction")
                    .is_some_and(is_truthy);
                if let Some(data) = fields.get("data").filter(|d| is_truthy(d)) {
                    notification.data = data.clone();
                }
            },
            Ok(_) => {},
            Err(_) => {
                let text = String::from_utf8_lossy(payload);
                if !text.is_empty() {
                    notification.body = text.into_owned();
                }
            },
        }
        notification
    }

    /// Where a click on the notification leads.
    #[must_use]
    pub fn url(&self) -> &str {
        self.data
            .get("url")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .unwrap_or(DEFAULT_URL)
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Result of a notification click.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "url", rename_all = "snake_case")]
pub enum ClickOutcome {
    /// A window was opened at the URL.
    Opened(String),
    /// The notification was closed without further action.
    Dismissed,
}

/// Notification display and window handling supplied by the host.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationPlatform: Send + Sync {
    /// Show a notification.
    async fn show(&self, notification: &Notification) -> Result<(), FarmSyncError>;

    /// Close a notification by tag.
    async fn close(&self, tag: &str) -> Result<(), FarmSyncError>;

    /// Open (or focus) an application window at `url`.
    async fn open_window(&self, url: &str) -> Result<(), FarmSyncError>;
}

/// Platform that only logs, for hosts without a notification surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPlatform;

#[async_trait]
impl NotificationPlatform for LogPlatform {
    async fn show(&self, notification: &Notification) -> Result<(), FarmSyncError> {
        tracing::info!(title = %notification.title, body = %notification.body, "notification");
        Ok(())
    }

    async fn close(&self, tag: &str) -> Result<(), FarmSyncError> {
        tracing::debug!(tag, "notification closed");
        Ok(())
    }

    async fn open_window(&self, url: &str) -> Result<(), FarmSyncError> {
        tracing::info!(url, "open window");
        Ok(())
    }
}

/// Handle a click on `notification`.
///
/// The notification is always closed. `"view"` or no action opens its URL;
/// `"dismiss"` and unknown actions do nothing more.
///
/// # Errors
///
/// Returns an error if the platform cannot close the notification or open
/// the window.
pub async fn handle_click(
    platform: &dyn NotificationPlatform,
    notification: &Notification,
    action: Option<&str>,
) -> Result<ClickOutcome, FarmSyncError> {
    platform.close(&notification.tag).await?;

    match action {
        None | Some("" | "view") => {
            let url = notification.url().to_string();
            platform.open_window(&url).await?;
            Ok(ClickOutcome::Opened(url))
        },
        Some(_) => Ok(ClickOutcome::Dismissed),
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::*;

    #[test]
    fn test_missing_payload_uses_defaults() {
        let n = Notification::from_push(None);
        assert_eq!(n.title, DEFAULT_TITLE);
        assert_eq!(n.body, DEFAULT_BODY);
        assert_eq!(n.badge, "/favicon.ico");
        assert_eq!(n.tag, "farmsync-notification");
        assert!(!n.require_interaction);
        assert_eq!(n.url(), "/dashboard");
        assert_eq!(n.actions.len(), 2);
    }

    #[test]
    fn test_json_payload_overrides_fields() {
        let payload = br#"{"title":"Frost warning","body":"Cover seedlings","requireInteraction":true,"data":{"url":"/weather"}}"#;

        let n = Notification::from_push(Some(payload));

        assert_eq!(n.title, "Frost warning");
        assert_eq!(n.body, "Cover seedlings");
        assert_eq!(n.icon, DEFAULT_ICON);
        assert!(n.require_interaction);
        assert_eq!(n.url(), "/weather");
    }

    #[test]
    fn test_empty_strings_fall_back() {
        let n = Notification::from_push(Some(br#"{"title":"","tag":""}"#));
        assert_eq!(n.title, DEFAULT_TITLE);
        assert_eq!(n.tag, DEFAULT_TAG);
    }

    #[test]
    fn test_data_without_url_opens_dashboard() {
        let n = Notification::from_push(Some(br#"{"data":{"alertId":4}}"#));
        assert_eq!(n.data["alertId"], 4);
        assert_eq!(n.url(), DEFAULT_URL);
    }

    #[test]
    fn test_unparsable_payload_becomes_body() {
        let n = Notification::from_push(Some(b"Irrigation finished"));
        assert_eq!(n.title, DEFAULT_TITLE);
        assert_eq!(n.body, "Irrigation finished");
    }

    #[test]
    fn test_json_scalar_payload_keeps_defaults() {
        for payload in [br#""hello""#.as_slice(), b"42", b"[1,2]", b"null"] {
            let n = Notification::from_push(Some(payload));
            assert_eq!(n.title, DEFAULT_TITLE);
            assert_eq!(n.body, DEFAULT_BODY);
        }
    }

    #[tokio::test]
    async fn test_view_click_opens_url() {
        let mut platform = MockNotificationPlatform::new();
        platform.expect_close().returning(|_| Ok(()));
        platform
            .expect_open_window()
            .with(eq("/weather"))
            .times(1)
            .returning(|_| Ok(()));
        let n = Notification::from_push(Some(br#"{"data":{"url":"/weather"}}"#));

        let outcome = handle_click(&platform, &n, Some("view")).await.unwrap();

        assert_eq!(outcome, ClickOutcome::Opened("/weather".to_string()));
    }

    #[tokio::test]
    async fn test_click_without_action_opens_default() {
        let mut platform = MockNotificationPlatform::new();
        platform.expect_close().returning(|_| Ok(()));
        platform
            .expect_open_window()
            .with(eq("/dashboard"))
            .times(1)
            .returning(|_| Ok(()));

        let outcome = handle_click(&platform, &Notification::default(), None)
            .await
            .unwrap();

        assert_eq!(outcome, ClickOutcome::Opened("/dashboard".to_string()));
    }

    #[tokio::test]
    async fn test_dismiss_only_closes() {
        let mut platform = MockNotificationPlatform::new();
        platform
            .expect_close()
            .with(eq("farmsync-notification"))
            .times(1)
            .returning(|_| Ok(()));
        platform.expect_open_window().never();

        let outcome = handle_click(&platform, &Notification::default(), Some("dismiss"))
            .await
            .unwrap();

        assert_eq!(outcome, ClickOutcome::Dismissed);
    }
}
