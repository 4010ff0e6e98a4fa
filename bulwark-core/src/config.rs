//! TOML configuration for the defaults used across the crate
//!
//! Every section is optional; a missing key keeps its default. Durations are
//! written in human form:
//!
//! ```toml
//! [retry]
//! max_retries = 5
//! base_delay = "250ms"
//!
//! [cache]
//! ttl = "10m"
//!
//! [offline]
//! overflow = "reject-new"
//! ```
//!
//! Call-site option records still win; the configuration only seeds them.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::logging::{
    EnvironmentInfo, LoggerConfig, DEFAULT_LOG_CAPACITY, DEFAULT_RECENT_CAPACITY, LOG_STORAGE_KEY,
};
use crate::notify::NotificationConfig;
use crate::recovery::{
    CacheOptions, OfflineQueueConfig, OverflowPolicy, RetryOptions, DEFAULT_CACHE_CAPACITY,
    DEFAULT_CACHE_TTL, DEFAULT_OFFLINE_CAPACITY,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BulwarkConfig {
    /// Retry defaults
    pub retry: RetryConfig,

    /// Recovery cache
    pub cache: CacheConfig,

    /// Offline queue
    pub offline: OfflineConfig,

    /// Error logger
    pub logger: LoggerSection,

    /// Toasts and the connectivity banner
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Upper bound for any single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Multiplier applied per attempt
    pub backoff_factor: f64,

    /// Add up to 10% random jitter
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let defaults = RetryOptions::default();
        Self {
            max_retries: defaults.max_retries,
            base_delay: defaults.base_delay,
            max_delay: defaults.max_delay,
            backoff_factor: defaults.backoff_factor,
            jitter: defaults.jitter,
        }
    }
}

impl RetryConfig {
    pub fn options(&self) -> RetryOptions {
        RetryOptions {
            max_retries: self.max_retries,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            backoff_factor: self.backoff_factor,
            jitter: self.jitter,
            ..RetryOptions::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries kept before the oldest write is evicted
    pub capacity: usize,

    /// Time an entry stays fresh
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Serve stale values while refreshing in the background
    pub stale_while_revalidate: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
            ttl: DEFAULT_CACHE_TTL,
            stale_while_revalidate: true,
        }
    }
}

impl CacheConfig {
    pub fn options(&self) -> CacheOptions {
        CacheOptions {
            ttl: self.ttl,
            stale_while_revalidate: self.stale_while_revalidate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Maximum queued operations
    pub capacity: usize,

    /// Behaviour when the queue is full
    pub overflow: OverflowPolicy,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_OFFLINE_CAPACITY,
            overflow: OverflowPolicy::default(),
        }
    }
}

impl OfflineConfig {
    pub fn queue_config(&self) -> OfflineQueueConfig {
        OfflineQueueConfig {
            capacity: self.capacity,
            overflow: self.overflow,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerSection {
    /// Entries kept in the ring buffer
    pub capacity: usize,

    /// Errors kept in the stats `recent` list
    pub recent_capacity: usize,

    /// Force debug mode on or off
    pub debug: Option<bool>,

    /// Persist the buffer to the key-value store
    pub persist: bool,

    /// Key the buffer is stored under
    pub storage_key: String,

    /// Host facts recorded on every entry
    pub environment: EnvironmentInfo,
}

impl Default for LoggerSection {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_LOG_CAPACITY,
            recent_capacity: DEFAULT_RECENT_CAPACITY,
            debug: None,
            persist: true,
            storage_key: LOG_STORAGE_KEY.to_string(),
            environment: EnvironmentInfo::default(),
        }
    }
}

impl LoggerSection {
    pub fn logger_config(&self, query: Option<String>) -> LoggerConfig {
        LoggerConfig {
            capacity: self.capacity,
            recent_capacity: self.recent_capacity,
            debug: self.debug,
            query,
            persist: self.persist,
            storage_key: self.storage_key.clone(),
            environment: self.environment.clone(),
        }
    }
}

impl BulwarkConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: BulwarkConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: BulwarkConfig = toml::from_str(&contents)?;
        config.apply_env_overrides();
        config.validate()?;

        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Apply `BULWARK_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("BULWARK_DEBUG") {
            match value.to_ascii_lowercase().as_str() {
                "1" | "true" => self.logger.debug = Some(true),
                "0" | "false" => self.logger.debug = Some(false),
                _ => {}
            }
        }
        if let Ok(value) = std::env::var("BULWARK_LOG_CAPACITY") {
            if let Ok(capacity) = value.parse() {
                self.logger.capacity = capacity;
            }
        }
        if let Ok(value) = std::env::var("BULWARK_MAX_RETRIES") {
            if let Ok(retries) = value.parse() {
                self.retry.max_retries = retries;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.backoff_factor.is_nan() || self.retry.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.backoff_factor must be >= 1.0".to_string(),
            ));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(ConfigError::Invalid(
                "retry.base_delay must not exceed retry.max_delay".to_string(),
            ));
        }

        let capacities = [
            ("cache.capacity", self.cache.capacity),
            ("offline.capacity", self.offline.capacity),
            ("logger.capacity", self.logger.capacity),
            ("logger.recent_capacity", self.logger.recent_capacity),
            ("notifications.max_toasts", self.notifications.max_toasts),
        ];
        if let Some((name, _)) = capacities.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{} must be greater than 0", name)));
        }

        if self.logger.storage_key.is_empty() {
            return Err(ConfigError::Invalid(
                "logger.storage_key cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
