//! Tracing subscriber setup
//!
//! Library code only emits `tracing` events. Binaries that embed the
//! registries call [`init_tracing`] once at startup.

use crate::error::ConfigError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" | "" => Ok(Self::Pretty),
            other => Err(ConfigError::Invalid {
                field: "CONCORD_LOG_FORMAT".to_string(),
                value: other.to_string(),
                reason: "expected json or pretty".to_string(),
            }),
        }
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event.
    pub service_name: String,
    /// Filter directive used when `RUST_LOG` is unset.
    pub default_filter: String,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "concord".to_string(),
            default_filter: "concord=info,info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl TelemetryConfig {
    /// Environment variables:
    /// - `CONCORD_SERVICE_NAME` (default: `concord`)
    /// - `CONCORD_LOG_FILTER` (default: `concord=info,info`)
    /// - `CONCORD_LOG_FORMAT`: `json` or `pretty` (default: `pretty`)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_name: std::env::var("CONCORD_SERVICE_NAME")
                .unwrap_or(defaults.service_name),
            default_filter: std::env::var("CONCORD_LOG_FILTER")
                .unwrap_or(defaults.default_filter),
            format: std::env::var("CONCORD_LOG_FORMAT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.format),
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), ConfigError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    result.map_err(|e| ConfigError::Invalid {
        field: "tracing subscriber".to_string(),
        value: config.service_name.clone(),
        reason: e.to_string(),
    })?;

    tracing::info!(
        service_name = config.service_name,
        format = ?config.format,
        "Telemetry initialized"
    );
    Ok(())
}
