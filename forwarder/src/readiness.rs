use crate::backoff::Sleeper;
use crate::config::ReadinessConfig;
use crate::metrics_defs::READINESS_ATTEMPTS;
use reqwest::StatusCode;
use shared::counter;
use std::sync::Arc;

pub const NOT_READY_MESSAGE: &str = "Service failed to become ready after maximum attempts";

/// Outcome of the startup readiness gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessResult {
    pub ready: bool,
    pub error: Option<String>,
    /// Health checks issued before the gate decided.
    pub attempts: u32,
}

/// Polls the dependent service's health endpoint until it answers 200 or the
/// attempt budget runs out.
pub struct ReadinessProber {
    config: ReadinessConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl ReadinessProber {
    pub fn new(config: ReadinessConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        ReadinessProber { config, sleeper }
    }

    /// Never fails: exhaustion and setup errors come back as `ready == false` so
    /// the caller can register the fallback handler instead.
    pub async fn probe(&self, health_url: &str, max_attempts: u32) -> ReadinessResult {
        // Owned by this call and dropped on every return path, so the probe does not
        // depend on the shared session existing yet.
        let client = match reqwest::Client::builder()
            .timeout(self.config.attempt_timeout())
            .danger_accept_invalid_certs(true)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                tracing::error!("could not build health check client: {e}");
                return ReadinessResult {
                    ready: false,
                    error: Some(format!("could not build health check client: {e}")),
                    attempts: 0,
                };
            }
        };

        for attempt in 1..=max_attempts {
            counter!(READINESS_ATTEMPTS).increment(1);

            match client.get(health_url).send().await {
                Ok(response) if response.status() == StatusCode::OK => {
                    tracing::info!(attempt, "dependent service is healthy");
                    self.sleeper.sleep(self.config.settle_delay()).await;
                    return ReadinessResult {
                        ready: true,
                        error: None,
                        attempts: attempt,
                    };
                }
                Ok(response) => {
                    tracing::info!(
                        attempt,
                        status = response.status().as_u16(),
                        "Service not ready yet. Waiting..."
                    );
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    tracing::info!(attempt, "Service not ready yet. Waiting...");
                }
                Err(e) => {
                    tracing::warn!(attempt, "health check failed: {e}");
                }
            }

            self.sleeper.sleep(self.config.interval()).await;
        }

        tracing::error!(max_attempts, "{NOT_READY_MESSAGE}");
        ReadinessResult {
            ready: false,
            error: Some(NOT_READY_MESSAGE.into()),
            attempts: max_attempts,
        }
    }
}
