//! Durable push registration.

use std::sync::Arc;

use chrono::{SubsecRound, TimeZone, Utc};
use rusqlite::{params, OptionalExtension};

use super::subscription::{
    decode_vapid_key, Permission, PushKeys, PushPlatform, PushRegistration, PushSubscription,
    SubscriptionBackend,
};
use crate::config::PushConfig;
use crate::core::{system_clock, SharedClock};
use crate::error::FarmSyncError;
use crate::storage::{Store, Tx};

/// Registers and revokes this device's push endpoint.
pub struct SubscriptionManager {
    store: Store,
    platform: Arc<dyn PushPlatform>,
    backend: Arc<dyn SubscriptionBackend>,
    vapid_public_key: Option<String>,
    user_id: Option<String>,
    clock: SharedClock,
}

impl SubscriptionManager {
    #[must_use]
    pub fn new(
        store: Store,
        platform: Arc<dyn PushPlatform>,
        backend: Arc<dyn SubscriptionBackend>,
        config: &PushConfig,
    ) -> Self {
        Self {
            store,
            platform,
            backend,
            vapid_public_key: config.vapid_public_key.clone(),
            user_id: config.user_id.clone(),
            clock: system_clock(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Subscribe this device to push notifications.
    ///
    /// An existing local registration is returned unchanged without talking
    /// to the platform or the backend again.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` unless permission is granted, a
    /// configuration error if a new endpoint is needed but no VAPID key is
    /// configured, or the backend's error if registration fails. Nothing is
    /// persisted on error.
    pub async fn subscribe(&self) -> Result<PushRegistration, FarmSyncError> {
        match self.platform.request_permission().await? {
            Permission::Granted => {},
            other => {
                return Err(FarmSyncError::PermissionDenied(format!(
                    "notification permission is {other:?}"
                )))
            },
        }

        if let Some(existing) = self.status().await? {
            tracing::debug!(endpoint = %existing.subscription.endpoint, "push already registered");
            return Ok(existing);
        }

        let raw = match self.platform.existing_subscription().await? {
            Some(raw) => raw,
            None => {
                let key = self.vapid_public_key.as_deref().ok_or_else(|| {
                    FarmSyncError::Config("push.vapid_public_key is not set".to_string())
                })?;
                self.platform.subscribe(&decode_vapid_key(key)?).await?
            },
        };
        let subscription = PushSubscription::from(&raw);

        self.backend.register(&subscription).await?;

        let registration = PushRegistration {
            subscription,
            user_id: self.user_id.clone(),
            created_at: self.clock.now().trunc_subsecs(3),
        };
        let stored = registration.clone();
        self.store
            .transaction(move |tx| save(tx, &stored))
            .await?;

        tracing::info!(endpoint = %registration.subscription.endpoint, "push subscription registered");
        Ok(registration)
    }

    /// Remove the local registration, then revoke it with the platform and
    /// the backend. Returns whether a local registration existed.
    ///
    /// # Errors
    ///
    /// Returns an error only if the local store fails. Platform and backend
    /// failures are logged.
    pub async fn unsubscribe(&self) -> Result<bool, FarmSyncError> {
        let removed = self.store.transaction(take).await?;

        match self.platform.unsubscribe().await {
            Ok(existed) => tracing::debug!(existed, "platform subscription dropped"),
            Err(e) => tracing::warn!(error = %e, "failed to drop platform subscription"),
        }

        if let Some(registration) = &removed {
            let endpoint = &registration.subscription.endpoint;
            if let Err(e) = self.backend.unregister(endpoint).await {
                tracing::warn!(error = %e, endpoint = %endpoint, "failed to unregister push subscription");
            }
        }

        Ok(removed.is_some())
    }

    /// The local registration, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn status(&self) -> Result<Option<PushRegistration>, FarmSyncError> {
        self.store.transaction(load).await
    }
}

fn load(tx: &Tx<'_>) -> Result<Option<PushRegistration>, FarmSyncError> {
    let row = tx
        .connection()
        .query_row(
            "SELECT endpoint, p256dh, auth, user_id, created_at FROM push_registration WHERE slot = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?;

    row.map(|(endpoint, p256dh, auth, user_id, created_at)| {
        let created_at = Utc
            .timestamp_millis_opt(created_at)
            .single()
            .ok_or_else(|| FarmSyncError::Parse(format!("bad timestamp {created_at}")))?;
        Ok(PushRegistration {
            subscription: PushSubscription {
                endpoint,
                keys: PushKeys { p256dh, auth },
            },
            user_id,
            created_at,
        })
    })
    .transpose()
}

fn save(tx: &Tx<'_>, registration: &PushRegistration) -> Result<(), FarmSyncError> {
    tx.connection().execute(
        "INSERT OR REPLACE INTO push_registration (slot, endpoint, p256dh, auth, user_id, created_at)
         VALUES (1, ?1, ?2, ?3, ?4, ?5)",
        params![
            registration.subscription.endpoint,
            registration.subscription.keys.p256dh,
            registration.subscription.keys.auth,
            registration.user_id,
            registration.created_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

fn take(tx: &Tx<'_>) -> Result<Option<PushRegistration>, FarmSyncError> {
    let existing = load(tx)?;
    tx.connection()
        .execute("DELETE FROM push_registration WHERE slot = 1", [])?;
    Ok(existing)
}
