//! Command-line interface for farmsync.

pub mod args;
pub mod commands;
