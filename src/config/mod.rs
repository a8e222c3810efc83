use std::env;
use std::time::Duration;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub polling: PollingConfig,
}

/// SpecWeaver API configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
}

/// Background polling configuration
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Interval between run refresh/fetch pairs.
    pub run_interval_ms: u64,
    /// Interval for independent metrics polling; 0 disables it.
    pub metrics_interval_ms: u64,
}

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let backend = BackendConfig {
            base_url: env::var("SPECWEAVER_API_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_env("REQUEST_TIMEOUT_MS").unwrap_or(30000),
        };

        let polling = PollingConfig {
            run_interval_ms: parse_env("POLL_INTERVAL_MS").unwrap_or(2000),
            metrics_interval_ms: parse_env("METRICS_POLL_INTERVAL_MS").unwrap_or(0),
        };

        let config = Config {
            backend,
            logging,
            request,
            polling,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the client cannot run with
    pub fn validate(&self) -> Result<(), AppError> {
        let url = &self.backend.base_url;
        if url.is_empty() || !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AppError::Config {
                message: format!("SPECWEAVER_API_URL must be an http(s) URL, got '{}'", url),
            });
        }
        if self.polling.run_interval_ms == 0 {
            return Err(AppError::Config {
                message: "POLL_INTERVAL_MS must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_env(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { timeout_ms: 30000 }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            run_interval_ms: 2000,
            metrics_interval_ms: 0,
        }
    }
}

impl PollingConfig {
    /// Run polling interval as a `Duration`
    pub fn run_interval(&self) -> Duration {
        Duration::from_millis(self.run_interval_ms)
    }

    /// Metrics polling interval, if enabled
    pub fn metrics_interval(&self) -> Option<Duration> {
        (self.metrics_interval_ms > 0).then(|| Duration::from_millis(self.metrics_interval_ms))
    }
}
