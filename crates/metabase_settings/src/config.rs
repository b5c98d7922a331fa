use metabase_error::error::SettingsError;
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::env;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_RETRY_ATTEMPTS: usize = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Settings used to build a MetabaseClient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        ClientSettings {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Bounded retry policy applied by callers that opt into retries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl RetrySettings {
    pub fn new(max_attempts: usize, delay: Duration) -> Result<Self, SettingsError> {
        if max_attempts == 0 {
            return Err(SettingsError::Error(
                "max_attempts must be greater than zero".to_string(),
            ));
        }

        Ok(RetrySettings {
            max_attempts,
            delay,
        })
    }
}

/// MetabaseConfig is the top level configuration for the client and the cli.
/// Values are read from METABASE_* environment variables, falling back to defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetabaseConfig {
    pub app_name: String,
    pub app_version: String,
    pub metabase_url: String,
    pub timeout_secs: u64,
    pub retry_attempts: usize,
    pub retry_delay_ms: u64,
    pub log_level: String,
}

impl Default for MetabaseConfig {
    fn default() -> Self {
        MetabaseConfig::from_lookup(|key| env::var(key).ok())
    }
}

impl MetabaseConfig {
    pub fn new() -> Self {
        MetabaseConfig::default()
    }

    /// Build a config from an arbitrary key lookup. `Default` uses the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_or = |key: &str, default: u64| -> u64 {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        // zero attempts would make every retry call fail, treat it as unset
        let retry_attempts = lookup("METABASE_RETRY_ATTEMPTS")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_RETRY_ATTEMPTS);

        MetabaseConfig {
            app_name: "metabase-card".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            metabase_url: lookup("METABASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout_secs: parse_or("METABASE_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS),
            retry_attempts,
            retry_delay_ms: parse_or("METABASE_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS),
            log_level: lookup("METABASE_LOG_LEVEL")
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.metabase_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    pub fn retry_settings(&self) -> RetrySettings {
        RetrySettings {
            max_attempts: self.retry_attempts,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}
