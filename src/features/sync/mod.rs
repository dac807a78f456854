//! Sync reconciler for queued operations.
//!
//! Drains the operation queue against the backend when connectivity returns,
//! on a timer while online, or on request. At most one drain runs at a time;
//! triggers arriving during a drain are absorbed by it.

pub mod background;
pub mod reconciler;
pub mod state;

pub use background::{BackgroundSettings, ReconcilerHandle, SyncCommand};
pub use reconciler::{DrainOutcome, DrainReport, Reconciler, ReconcilerConfig, ReplayFailure};
pub use state::{Action, ReconcilerState, SyncEvent};
