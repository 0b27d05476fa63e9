//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `8080`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `text` or `json` (default: `text`)
/// - `LOCK_SWEEP_INTERVAL_MS` — expiry sweep period (default: `1000`)
/// - `LOCK_MAX_TTL_SECONDS` — longest TTL a lock may request (default: `3600`)
/// - `SAGA_DEFAULT_STEP_TIMEOUT_SECONDS` — timeout for steps that omit one (default: `30`)
/// - `SAGA_MAX_STEP_TIMEOUT_SECONDS` — longest timeout a step may request (default: `86400`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub sweep_interval: Duration,
    pub max_lock_ttl: Duration,
    pub default_step_timeout: Duration,
    pub max_step_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_parse("PORT").unwrap_or(defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: env_parse("LOG_FORMAT").unwrap_or(defaults.log_format),
            sweep_interval: env_parse("LOCK_SWEEP_INTERVAL_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.sweep_interval),
            max_lock_ttl: env_parse("LOCK_MAX_TTL_SECONDS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_lock_ttl),
            default_step_timeout: env_parse("SAGA_DEFAULT_STEP_TIMEOUT_SECONDS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_step_timeout),
            max_step_timeout: env_parse("SAGA_MAX_STEP_TIMEOUT_SECONDS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_step_timeout),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            sweep_interval: lock_manager::DEFAULT_SWEEP_INTERVAL,
            max_lock_ttl: lock_manager::DEFAULT_MAX_TTL,
            default_step_timeout: saga::DEFAULT_STEP_TIMEOUT,
            max_step_timeout: saga::MAX_STEP_TIMEOUT,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
