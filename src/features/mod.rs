//! The offline resilience features.
//!
//! - Operation queue for mutating API calls
//! - Form queue for application form submissions
//! - TTL read cache
//! - Sync reconciler that replays the operation queue
//! - Network interceptor with a generation-tagged response cache
//! - Push subscription management

pub mod cache;
pub mod forms;
pub mod interceptor;
pub mod push;
pub mod queue;
pub mod sync;
