use crate::dispatcher::{ConcurrencyController, Dispatcher};
use crate::errors::ServerError;
use crate::job::Job;
use crate::metrics_defs::JOBS_INFLIGHT;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use serde_json::{Value, json};
use shared::gauge;
use shared::http::{ResponseBody, make_json_response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Semaphore;

#[derive(Serialize)]
struct JobResult {
    id: String,
    status: &'static str,
    output: Value,
}

/// Counts a job as in flight until dropped, including when the client goes away
/// and hyper drops the handler future mid-job.
struct InflightGuard {
    inflight: Arc<AtomicUsize>,
}

impl InflightGuard {
    fn new(inflight: Arc<AtomicUsize>) -> Self {
        let current = inflight.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!(JOBS_INFLIGHT).set(current as f64);
        InflightGuard { inflight }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let current = self.inflight.fetch_sub(1, Ordering::Relaxed) - 1;
        gauge!(JOBS_INFLIGHT).set(current as f64);
    }
}

/// Local job intake: `POST /run` and `POST /runsync` take `{"id"?, "input"}` and
/// answer with the dispatcher's envelope once the job completes.
pub struct JobService {
    dispatcher: Dispatcher,
    permits: Arc<Semaphore>,
    next_id: Arc<AtomicU64>,
    inflight: Arc<AtomicUsize>,
}

impl JobService {
    pub fn new(dispatcher: Dispatcher, controller: ConcurrencyController) -> Self {
        let capacity = controller.desired_concurrency(0);
        tracing::info!(capacity, "accepting jobs");

        JobService {
            dispatcher,
            permits: Arc::new(Semaphore::new(capacity)),
            next_id: Arc::new(AtomicU64::new(1)),
            inflight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Service<Request<Incoming>> for JobService {
    type Response = Response<ResponseBody>;
    type Error = ServerError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let dispatcher = self.dispatcher.clone();
        let permits = self.permits.clone();
        let next_id = self.next_id.clone();
        let inflight = self.inflight.clone();

        Box::pin(async move {
            match req.uri().path() {
                "/run" | "/runsync" => {}
                _ => {
                    return Ok(make_json_response(
                        StatusCode::NOT_FOUND,
                        &json!({"error": "not found"}),
                    ));
                }
            }
            if req.method() != Method::POST {
                return Ok(make_json_response(
                    StatusCode::METHOD_NOT_ALLOWED,
                    &json!({"error": "method not allowed"}),
                ));
            }

            let bytes = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    tracing::warn!("failed to read job body: {e}");
                    return Ok(make_json_response(
                        StatusCode::BAD_REQUEST,
                        &json!({"error": "Failed to read request body"}),
                    ));
                }
            };
            let job: Job = match serde_json::from_slice(&bytes) {
                Ok(job) => job,
                Err(_) => {
                    return Ok(make_json_response(
                        StatusCode::BAD_REQUEST,
                        &json!({"error": "Invalid JSON format in request"}),
                    ));
                }
            };
            let id = job
                .id
                .clone()
                .unwrap_or_else(|| format!("local-{}", next_id.fetch_add(1, Ordering::Relaxed)));

            // Only fails if the semaphore is closed.
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return Ok(make_json_response(
                        StatusCode::SERVICE_UNAVAILABLE,
                        &json!({"error": "worker is shutting down"}),
                    ));
                }
            };

            let _inflight = InflightGuard::new(inflight);
            tracing::debug!(job_id = id.as_str(), "job started");
            let output = dispatcher.handle(&job).await;

            Ok(make_json_response(
                StatusCode::OK,
                &JobResult {
                    id,
                    status: "COMPLETED",
                    output,
                },
            ))
        })
    }
}
