use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3000";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_CONCURRENCY: usize = 3;

pub const API_URL_ENV: &str = "API_URL";
pub const REQUEST_TIMEOUT_ENV: &str = "RUNPOD_REQUEST_TIMEOUT";

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Invalid API URL {0}: {1}")]
    InvalidApiUrl(String, String),

    #[error("Readiness max_attempts must be at least 1")]
    NoReadinessAttempts,

    #[error("Concurrency must be at least 1")]
    NoConcurrency,
}

/// Worker configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Base URL of the dependent service. Jobs are posted to `{api_url}/{endpoint}`.
    pub api_url: String,
    /// Total timeout applied to every forwarded request, in seconds. 0 disables it.
    pub request_timeout_secs: u64,
    pub readiness: ReadinessConfig,
    pub retry: RetryConfig,
    /// Number of jobs handled in parallel.
    pub concurrency: usize,
    /// Listener for incoming jobs
    pub listener: Listener,
    /// Listener for health and readiness endpoints
    pub admin_listener: Listener,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_url: DEFAULT_API_URL.into(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            readiness: ReadinessConfig::default(),
            retry: RetryConfig::default(),
            concurrency: DEFAULT_CONCURRENCY,
            listener: Listener {
                host: "127.0.0.1".into(),
                port: 8000,
            },
            admin_listener: Listener {
                host: "127.0.0.1".into(),
                port: 8001,
            },
        }
    }
}

impl Config {
    /// Overlays the environment variables the worker has always honoured.
    ///
    /// A `RUNPOD_REQUEST_TIMEOUT` that is not an integer resets the timeout to the
    /// default instead of failing startup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(API_URL_ENV) {
            self.api_url = url;
        }

        if let Some(raw) = lookup(REQUEST_TIMEOUT_ENV) {
            self.request_timeout_secs = match raw.trim().parse() {
                Ok(secs) => secs,
                Err(_) => {
                    tracing::warn!(
                        value = raw.as_str(),
                        "{REQUEST_TIMEOUT_ENV} is not an integer, using default"
                    );
                    DEFAULT_REQUEST_TIMEOUT_SECS
                }
            };
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        let url = Url::parse(&self.api_url)
            .map_err(|e| ValidationError::InvalidApiUrl(self.api_url.clone(), e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ValidationError::InvalidApiUrl(
                self.api_url.clone(),
                format!("unsupported scheme {}", url.scheme()),
            ));
        }

        if self.readiness.max_attempts == 0 {
            return Err(ValidationError::NoReadinessAttempts);
        }

        if self.concurrency == 0 {
            return Err(ValidationError::NoConcurrency);
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.api_url.trim_end_matches('/'))
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Startup readiness gate settings. All durations are in milliseconds.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReadinessConfig {
    pub max_attempts: u32,
    /// Timeout for a single health check, independent of the request timeout.
    pub attempt_timeout_ms: u64,
    /// Pause between failed health checks.
    pub interval_ms: u64,
    /// Pause after the first healthy answer, before jobs are accepted.
    pub settle_delay_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        ReadinessConfig {
            max_attempts: 240,
            attempt_timeout_ms: 1000,
            interval_ms: 1000,
            settle_delay_ms: 1000,
        }
    }
}

impl ReadinessConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Retry policy for forwarded requests.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    /// The backoff exponent stops growing here, bounding the longest delay.
    pub max_backoff_exponent: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 5,
            backoff_base_ms: 1000,
            max_backoff_exponent: 3,
        }
    }
}

impl RetryConfig {
    /// Delay before retrying after the given zero-based attempt failed.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(self.max_backoff_exponent);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(2_u64.saturating_pow(exponent)))
    }
}
