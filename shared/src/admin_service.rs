use crate::http::{ResponseBody, make_json_response};
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde_json::json;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

/// Liveness and readiness endpoints for orchestrators.
///
/// `/health` answers as long as the process is serving. `/ready` reflects the
/// `is_ready` callback, which the worker wires to its startup readiness gate.
pub struct AdminService<F, E> {
    is_ready: F,
    _error: PhantomData<E>,
}

impl<F, E> AdminService<F, E>
where
    F: Fn() -> bool,
{
    pub fn new(is_ready: F) -> Self {
        Self {
            is_ready,
            _error: PhantomData,
        }
    }
}

impl<F, E> Service<Request<Incoming>> for AdminService<F, E>
where
    F: Fn() -> bool + Send + Sync + 'static,
    E: Send + 'static,
{
    type Response = Response<ResponseBody>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let is_ready = (self.is_ready)();

        Box::pin(async move {
            if req.method() != Method::GET {
                return Ok(make_json_response(
                    StatusCode::METHOD_NOT_ALLOWED,
                    &json!({"error": "method not allowed"}),
                ));
            }

            let res = match req.uri().path() {
                "/health" => make_json_response(StatusCode::OK, &json!({"status": "ok"})),
                "/ready" => match is_ready {
                    true => make_json_response(StatusCode::OK, &json!({"status": "ready"})),
                    false => make_json_response(
                        StatusCode::SERVICE_UNAVAILABLE,
                        &json!({"status": "not ready"}),
                    ),
                },
                _ => make_json_response(StatusCode::NOT_FOUND, &json!({"error": "not found"})),
            };
            Ok(res)
        })
    }
}
