//! Network interceptor.
//!
//! Sits between the application and the network: serves `GET`s cache-first
//! from the active cache generation, falls back to the cached root document
//! or a synthesized `503` when offline, shows push notifications and
//! forwards background-sync events to the reconciler.

pub mod cache;
pub mod handle;
pub mod notification;
pub mod worker;

pub use cache::ResponseCache;
pub use handle::{InterceptorEvent, InterceptorHandle};
pub use notification::{
    handle_click, ClickOutcome, LogPlatform, Notification, NotificationAction, NotificationPlatform,
};
pub use worker::{ControlMessage, Interceptor, WorkerState};
