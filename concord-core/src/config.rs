//! Configuration
//!
//! Every struct has sensible defaults, a `from_env()` constructor that parses
//! environment variables and falls back to the default on absence or parse
//! failure, and `with_*` builders for tests and composition roots.

use crate::constants::*;
use crate::error::ConfigError;
use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

// ============================================================================
// BACKING STORE
// ============================================================================

/// Connection settings for the backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    /// Endpoint, e.g. `redis://127.0.0.1:6379`.
    pub url: String,
    /// Optional password injected into the URL when connecting.
    pub password: Option<String>,
    /// Upper bound on every round trip.
    pub command_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
            password: None,
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
        }
    }
}

impl RedisConfig {
    /// Environment variables:
    /// - `REDIS_URL` (default: `redis://127.0.0.1:6379`)
    /// - `REDIS_PASSWORD` (optional)
    /// - `CONCORD_REDIS_COMMAND_TIMEOUT_MS` (default: 5000)
    pub fn from_env() -> Self {
        let url = std::env::var("REDIS_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());
        let password = std::env::var("REDIS_PASSWORD")
            .ok()
            .filter(|s| !s.is_empty());
        let command_timeout = Duration::from_millis(env_parse(
            "CONCORD_REDIS_COMMAND_TIMEOUT_MS",
            DEFAULT_COMMAND_TIMEOUT_MS,
        ));

        Self {
            url,
            password,
            command_timeout,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// The URL handed to the client, with the password spliced in when the
    /// URL carries no credentials of its own.
    pub fn connection_url(&self) -> String {
        let Some(password) = self.password.as_deref() else {
            return self.url.clone();
        };
        let Some((scheme, rest)) = self.url.split_once("://") else {
            return self.url.clone();
        };
        if rest.contains('@') {
            return self.url.clone();
        }
        format!("{scheme}://:{password}@{rest}")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "REDIS_URL".to_string(),
            });
        }
        if !(self.url.starts_with("redis://")
            || self.url.starts_with("rediss://")
            || self.url.starts_with("redis+unix://")
            || self.url.starts_with("unix://"))
        {
            return Err(ConfigError::Invalid {
                field: "REDIS_URL".to_string(),
                value: self.url.clone(),
                reason: "expected a redis:// or rediss:// URL".to_string(),
            });
        }
        if self.command_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "CONCORD_REDIS_COMMAND_TIMEOUT_MS".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// COALESCING
// ============================================================================

/// Pump timings for coalesced registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoalescingConfig {
    pub flush_interval: Duration,
    pub refresh_interval: Duration,
}

impl Default for CoalescingConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            refresh_interval: Duration::from_millis(DEFAULT_REFRESH_INTERVAL_MS),
        }
    }
}

impl CoalescingConfig {
    /// Environment variables:
    /// - `CONCORD_FLUSH_INTERVAL_MS` (default: 100)
    /// - `CONCORD_REFRESH_INTERVAL_MS` (default: 200)
    pub fn from_env() -> Self {
        Self {
            flush_interval: Duration::from_millis(env_parse(
                "CONCORD_FLUSH_INTERVAL_MS",
                DEFAULT_FLUSH_INTERVAL_MS,
            )),
            refresh_interval: Duration::from_millis(env_parse(
                "CONCORD_REFRESH_INTERVAL_MS",
                DEFAULT_REFRESH_INTERVAL_MS,
            )),
        }
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Both intervals must be non-zero; `tokio::time::interval` panics on zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "flush_interval".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.refresh_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "refresh_interval".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// LOCK / ID
// ============================================================================

/// Distributed lock settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    pub ttl: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECS),
        }
    }
}

impl LockConfig {
    /// `CONCORD_LOCK_TTL_SECS` (default: 30)
    pub fn from_env() -> Self {
        Self {
            ttl: Duration::from_secs(env_parse("CONCORD_LOCK_TTL_SECS", DEFAULT_LOCK_TTL_SECS)),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Identity counter settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdConfig {
    pub start: u32,
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            start: DEFAULT_ID_START,
        }
    }
}

impl IdConfig {
    /// `CONCORD_ID_START` (default: 1000000000)
    pub fn from_env() -> Self {
        Self {
            start: env_parse("CONCORD_ID_START", DEFAULT_ID_START),
        }
    }

    pub fn with_start(mut self, start: u32) -> Self {
        self.start = start;
        self
    }
}
