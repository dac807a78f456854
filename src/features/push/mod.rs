//! Push subscription management.
//!
//! [`SubscriptionManager`] keeps at most one registration per device and
//! mirrors it to the backend.

mod manager;
mod subscription;

pub use manager::SubscriptionManager;
pub use subscription::{
    decode_vapid_key, HttpSubscriptionBackend, Permission, PushKeys, PushPlatform,
    PushRegistration, PushSubscription, RawSubscription, StaticPushPlatform, SubscriptionBackend,
    SUBSCRIBE_ENDPOINT, UNSUBSCRIBE_ENDPOINT,
};
