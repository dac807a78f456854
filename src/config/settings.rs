//! Configuration settings for farmsync.
//!
//! Settings are loaded from `~/.farmsync/config.yaml`. Every section and
//! field is optional; missing values fall back to the defaults below.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::args::OutputFormat;
use crate::config::Paths;
use crate::error::FarmSyncError;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// General settings.
    pub general: GeneralConfig,
    /// Backend API settings.
    pub api: ApiConfig,
    /// Sync reconciler settings.
    pub sync: SyncConfig,
    /// TTL cache settings.
    pub cache: CacheConfig,
    /// Network interceptor settings.
    pub interceptor: InterceptorConfig,
    /// Push subscription settings.
    pub push: PushConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default output format.
    #[serde(default = "default_output_format")]
    pub default_output: OutputFormat,
    /// Color output setting.
    #[serde(default = "default_color")]
    pub color: ColorSetting,
}

/// Color output setting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColorSetting {
    /// Auto-detect based on terminal.
    #[default]
    Auto,
    /// Always use colors.
    Always,
    /// Never use colors.
    Never,
}

/// Backend API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL that relative endpoints are resolved against. Also the
    /// origin used to decide which responses are cacheable.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer credential used for replays. `FARMSYNC_TOKEN` overrides it.
    #[serde(default)]
    pub token: Option<String>,
}

/// How a drain treats later operations on an endpoint whose earlier
/// operation failed in the same pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderingPolicy {
    /// Replay every operation regardless of earlier failures.
    Independent,
    /// Defer later updates and deletes on an endpoint whose earlier
    /// operation failed until the next pass. Creates are never deferred.
    #[default]
    PerEndpoint,
}

/// Sync reconciler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between periodic drains while online.
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,
    /// Failed replays before an operation is evicted.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Hard timeout for a single replay.
    #[serde(default = "default_replay_timeout")]
    pub replay_timeout_secs: u64,
    /// Same-endpoint ordering policy.
    #[serde(default)]
    pub ordering: OrderingPolicy,
    /// Run the periodic timer at all.
    #[serde(default = "default_true")]
    pub auto_sync: bool,
}

/// TTL cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum entry age in seconds.
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
    /// Seconds between background sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Network interceptor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptorConfig {
    /// Name of the current cache generation.
    #[serde(default = "default_generation")]
    pub generation: String,
    /// URLs stored into a new generation on install.
    #[serde(default = "default_precache")]
    pub precache: Vec<String>,
    /// Document served to navigation requests while offline.
    #[serde(default = "default_root_document")]
    pub root_document: String,
    /// Activate a freshly installed generation without waiting.
    #[serde(default = "default_true")]
    pub skip_waiting: bool,
    /// Background sync tag that triggers a drain.
    #[serde(default = "default_sync_tag")]
    pub sync_tag: String,
}

/// Push subscription settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PushConfig {
    /// VAPID application-server public key (URL-safe base64).
    #[serde(default)]
    pub vapid_public_key: Option<String>,
    /// User that owns the subscription.
    #[serde(default)]
    pub user_id: Option<String>,
}

// Default value functions for serde
const fn default_output_format() -> OutputFormat {
    OutputFormat::Pretty
}

const fn default_color() -> ColorSetting {
    ColorSetting::Auto
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

const fn default_sync_interval() -> u64 {
    30
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_replay_timeout() -> u64 {
    15
}

const fn default_true() -> bool {
    true
}

const fn default_ttl() -> u64 {
    300
}

const fn default_sweep_interval() -> u64 {
    60
}

fn default_generation() -> String {
    "farmsync-v1".to_string()
}

fn default_precache() -> Vec<String> {
    ["/", "/dashboard", "/static/css/main.css", "/static/js/main.js"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn default_root_document() -> String {
    "/".to_string()
}

fn default_sync_tag() -> String {
    "sync-farm-data".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_output: default_output_format(),
            color: default_color(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sync_interval(),
            max_retries: default_max_retries(),
            replay_timeout_secs: default_replay_timeout(),
            ordering: OrderingPolicy::default(),
            auto_sync: default_true(),
        }
    }
}

impl SyncConfig {
    /// Interval between periodic drains, at least one second.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    /// Hard timeout for one replay, at least one second.
    #[must_use]
    pub fn replay_timeout(&self) -> Duration {
        Duration::from_secs(self.replay_timeout_secs.max(1))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl CacheConfig {
    /// Maximum entry age.
    ///
    /// # Errors
    ///
    /// Returns `FarmSyncError::Config` if `ttl_secs` does not fit a
    /// `chrono::Duration`.
    pub fn ttl(&self) -> Result<chrono::Duration, FarmSyncError> {
        i64::try_from(self.ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                FarmSyncError::Config(format!("cache.ttl_secs {} is out of range", self.ttl_secs))
            })
    }

    /// Interval between sweeps, at least one second.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            generation: default_generation(),
            precache: default_precache(),
            root_document: default_root_document(),
            skip_waiting: default_true(),
            sync_tag: default_sync_tag(),
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self, FarmSyncError> {
        let paths = Paths::new()?;
        Self::load_from_path(&paths.config_file)
    }

    /// Load configuration from a specific path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, FarmSyncError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            FarmSyncError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config: Self = serde_yaml::from_str(&contents).map_err(|e| {
            FarmSyncError::Config(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the background tasks cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `FarmSyncError::Config` naming the first bad field.
    pub fn validate(&self) -> Result<(), FarmSyncError> {
        let positive = [
            ("sync.interval_secs", self.sync.interval_secs),
            ("sync.replay_timeout_secs", self.sync.replay_timeout_secs),
            ("sync.max_retries", u64::from(self.sync.max_retries)),
            ("cache.ttl_secs", self.cache.ttl_secs),
            ("cache.sweep_interval_secs", self.cache.sweep_interval_secs),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(FarmSyncError::Config(format!("{field} must be greater than zero")));
        }
        self.cache.ttl().map(|_| ())
    }

    /// Save configuration to a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save_to_path(&self, path: &std::path::Path) -> Result<(), FarmSyncError> {
        let contents = serde_yaml::to_string(self)
            .map_err(|e| FarmSyncError::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, contents).map_err(|e| {
            FarmSyncError::Config(format!(
                "Failed to write config file {}: {e}",
                path.display()
            ))
        })
    }

    /// The bearer token for replays, preferring `FARMSYNC_TOKEN`.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        std::env::var("FARMSYNC_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| self.api.token.clone())
    }
}
