//! Client configuration.
//!
//! Defaults are the values of the production deployment; every field can be
//! overridden through `STOCKBOOK_*` environment variables.

use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_SERVICE_URL: &str = "https://ysschyjbqwmifewacrvo.supabase.co";
pub const DEFAULT_TABLE: &str = "books";
pub const DEFAULT_BUCKET: &str = "book-images";
pub const DEFAULT_INIT_FUNCTION: &str = "init_books_table";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
    #[error("{0} cannot be empty")]
    Empty(&'static str),
}

/// Retry schedule for collection loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total fetch attempts before falling back to sample data.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles per attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the zero-based `attempt` failed:
    /// `base_delay * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

/// The part of the configuration the inventory sync needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub table: String,
    pub retry: RetryPolicy,
    /// `Cache-Control` max-age (seconds) for uploaded images.
    pub cache_control: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            retry: RetryPolicy::default(),
            cache_control: "3600".to_string(),
        }
    }
}

/// Full client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub service_url: String,
    /// Public (anon) access key sent with every request.
    pub api_key: String,
    pub table: String,
    pub bucket: String,
    pub init_function: String,
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
    pub cache_control: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let sync = SyncConfig::default();
        Self {
            service_url: DEFAULT_SERVICE_URL.to_string(),
            api_key: String::new(),
            table: sync.table,
            bucket: DEFAULT_BUCKET.to_string(),
            init_function: DEFAULT_INIT_FUNCTION.to_string(),
            poll_interval: Duration::from_secs(30),
            retry: sync.retry,
            cache_control: sync.cache_control,
        }
    }
}

impl ClientConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup (used by `from_env` and tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string());

        if let Some(url) = text("STOCKBOOK_SERVICE_URL") {
            if url.is_empty() {
                return Err(ConfigError::Empty("STOCKBOOK_SERVICE_URL"));
            }
            config.service_url = url.trim_end_matches('/').to_string();
        }
        if let Some(key) = text("STOCKBOOK_API_KEY") {
            config.api_key = key;
        }
        if let Some(table) = text("STOCKBOOK_TABLE").filter(|t| !t.is_empty()) {
            config.table = table;
        }
        if let Some(bucket) = text("STOCKBOOK_BUCKET").filter(|b| !b.is_empty()) {
            config.bucket = bucket;
        }
        if let Some(function) = text("STOCKBOOK_INIT_FUNCTION").filter(|f| !f.is_empty()) {
            config.init_function = function;
        }
        if let Some(secs) = number(&lookup, "STOCKBOOK_POLL_INTERVAL_SECS")? {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(attempts) = number(&lookup, "STOCKBOOK_RETRY_ATTEMPTS")? {
            config.retry.max_attempts = u32::try_from(attempts.max(1)).unwrap_or(u32::MAX);
        }
        if let Some(ms) = number(&lookup, "STOCKBOOK_RETRY_BASE_MS")? {
            config.retry.base_delay = Duration::from_millis(ms);
        }

        Ok(config)
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            table: self.table.clone(),
            retry: self.retry,
            cache_control: self.cache_control.clone(),
        }
    }
}

fn number<F>(lookup: &F, var: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { var, value: raw }),
    }
}
