//! farmsync - offline resilience for the FarmSync record keeper
//!
//! This crate keeps a farm record-keeping client usable without a network:
//! writes are queued durably and replayed in order when connectivity
//! returns, reads are cached with a time-to-live, and an interceptor serves
//! cached responses when the backend is unreachable.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod api;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod features;
pub mod output;
pub mod storage;

pub use cli::args::{Cli, Commands, OutputFormat};
pub use error::FarmSyncError;
pub use features::cache::TtlCache;
pub use features::forms::FormQueue;
pub use features::queue::{NewOperation, OperationQueue, OperationType, PendingOperation};
pub use features::sync::{DrainOutcome, DrainReport, Reconciler};
pub use storage::Store;
