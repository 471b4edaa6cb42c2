use crate::config::DEFAULT_CONCURRENCY;
use crate::job::{self, Job};
use crate::proxy::Forwarder;
use serde_json::{Value, json};
use std::sync::Arc;

pub const STARTUP_FAILED_MESSAGE: &str = "service failed to start";

/// The handler registered with the job intake once the readiness gate decided.
#[derive(Clone)]
pub enum Dispatcher {
    /// The dependent service came up; jobs are validated and forwarded.
    Ready(Arc<Forwarder>),
    /// The dependent service never became healthy; every job gets an error.
    Failed,
}

impl Dispatcher {
    /// Always produces an envelope: the forwarded JSON on success, `{"error": ...}` otherwise.
    pub async fn handle(&self, job: &Job) -> Value {
        match self {
            Dispatcher::Ready(forwarder) => handle(forwarder, job).await,
            Dispatcher::Failed => init_failed(job),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Dispatcher::Ready(_))
    }
}

pub async fn handle(forwarder: &Forwarder, job: &Job) -> Value {
    let request = match job::validate(job.input.as_ref()) {
        Ok(request) => request,
        Err(e) => {
            tracing::info!(job_id = job.id.as_deref(), "rejected job: {e}");
            return json!({ "error": e.to_string() });
        }
    };

    match forwarder.forward(&request.endpoint, &request.body).await {
        Ok(value) => value,
        Err(e) => {
            tracing::error!(
                job_id = job.id.as_deref(),
                endpoint = request.endpoint.as_str(),
                "job failed: {e}"
            );
            json!({ "error": e.to_string() })
        }
    }
}

pub fn init_failed(_job: &Job) -> Value {
    json!({ "error": STARTUP_FAILED_MESSAGE })
}

/// Static admission control: how many jobs may run in parallel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyController {
    capacity: usize,
}

impl ConcurrencyController {
    pub fn new(capacity: usize) -> Self {
        ConcurrencyController { capacity }
    }

    /// Ignores the current level; the capacity never changes.
    pub fn desired_concurrency(&self, _current: usize) -> usize {
        self.capacity
    }
}

impl Default for ConcurrencyController {
    fn default() -> Self {
        ConcurrencyController::new(DEFAULT_CONCURRENCY)
    }
}
