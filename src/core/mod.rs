//! Core abstractions for farmsync.
//!
//! Shared utilities used across features.

mod clock;

pub use clock::{age_label, system_clock, Clock, ManualClock, SharedClock, SystemClock};
