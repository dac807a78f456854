//! Durable local store for farmsync.
//!
//! This module provides SQLite-based persistence for:
//! - Pending operations (mutating API calls waiting for replay)
//! - Pending form submissions
//! - Cache entries
//! - Interceptor responses and the push registration

mod collection;
mod database;
mod migrations;
mod store;

pub use collection::{Collection, Key, KeyPath};
pub use database::Database;
pub use migrations::CURRENT_VERSION;
pub use store::{open, Store, StoreCell, Tx};
