//! Configuration management for farmsync.
//!
//! This module handles loading configuration from `~/.farmsync/`.

mod paths;
mod settings;

pub use paths::Paths;
pub use settings::{
    ApiConfig, CacheConfig, ColorSetting, Config, GeneralConfig, InterceptorConfig,
    OrderingPolicy, PushConfig, SyncConfig,
};
