//! Push subscription command implementation.

use std::sync::Arc;

use serde_json::json;

use super::Context;
use crate::cli::args::{OutputFormat, PushCommands};
use crate::error::FarmSyncError;
use crate::features::push::{HttpSubscriptionBackend, StaticPushPlatform, SubscriptionManager};
use crate::output::{format_push_status_pretty, to_json};

/// Execute push subcommands.
///
/// # Errors
///
/// Returns an error if the store fails, the keys are not base64, or the
/// backend rejects the subscription.
pub async fn push(ctx: &Context, cmd: PushCommands) -> Result<String, FarmSyncError> {
    let platform = match &cmd {
        PushCommands::Subscribe {
            endpoint,
            p256dh,
            auth,
        } => StaticPushPlatform::from_base64(endpoint, p256dh, auth)?,
        PushCommands::Unsubscribe | PushCommands::Status => StaticPushPlatform::default(),
    };
    let backend = HttpSubscriptionBackend::new(ctx.transport()?, ctx.credentials());
    let manager = SubscriptionManager::new(
        ctx.store.clone(),
        Arc::new(platform),
        Arc::new(backend),
        &ctx.config.push,
    );

    match cmd {
        PushCommands::Subscribe { .. } => {
            let registration = manager.subscribe().await?;
            match ctx.format {
                OutputFormat::Json => to_json(&registration),
                OutputFormat::Pretty => Ok(format_push_status_pretty(Some(&registration))),
            }
        },
        PushCommands::Unsubscribe => {
            let removed = manager.unsubscribe().await?;
            match ctx.format {
                OutputFormat::Json => to_json(&json!({"unsubscribed": removed})),
                OutputFormat::Pretty if removed => Ok("Push subscription removed".to_string()),
                OutputFormat::Pretty => Ok("No push subscription".to_string()),
            }
        },
        PushCommands::Status => {
            let registration = manager.status().await?;
            match ctx.format {
                OutputFormat::Json => to_json(&json!({
                    "subscribed": registration.is_some(),
                    "registration": registration,
                })),
                OutputFormat::Pretty => Ok(format_push_status_pretty(registration.as_ref())),
            }
        },
    }
}
