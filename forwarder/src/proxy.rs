use crate::backoff::Sleeper;
use crate::config::RetryConfig;
use crate::errors::{ForwardError, Result, TransportErrorKind};
use crate::metrics_defs::{FORWARD_DURATION, FORWARD_REQUESTS, FORWARD_RETRIES};
use crate::session::Session;
use reqwest::StatusCode;
use serde_json::Value;
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;

/// The dependent service answers these while it is (re)starting.
const RETRIABLE_STATUS_CODES: &[StatusCode] = &[
    StatusCode::BAD_GATEWAY,         // 502
    StatusCode::SERVICE_UNAVAILABLE, // 503
    StatusCode::GATEWAY_TIMEOUT,     // 504
];

/// Per-call bookkeeping, discarded once the call resolves.
#[derive(Debug, Default)]
struct RetryState {
    attempt: u32,
    last_status: Option<u16>,
    last_error: Option<String>,
}

enum Attempt {
    Done(Value),
    Transient(ForwardError),
    Fatal(ForwardError),
}

/// Forwards job bodies to the dependent service over the shared session.
pub struct Forwarder {
    base_url: String,
    session: Arc<Session>,
    retry: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl Forwarder {
    pub fn new(
        base_url: &str,
        session: Arc<Session>,
        retry: RetryConfig,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Forwarder {
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
            retry,
            sleeper,
        }
    }

    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// POSTs `body` to `{base_url}/{endpoint}` and returns the parsed JSON answer.
    ///
    /// 502/503/504 and transport failures are retried with capped exponential
    /// backoff. Any other non-200 status and malformed 200 bodies fail at once.
    pub async fn forward(&self, endpoint: &str, body: &Value) -> Result<Value> {
        let started = Instant::now();
        let result = self.forward_with_retries(endpoint, body).await;

        histogram!(FORWARD_DURATION).record(started.elapsed().as_secs_f64());
        let outcome = match &result {
            Ok(_) => "success",
            Err(ForwardError::InvalidJson) => "invalid_json",
            Err(ForwardError::Status { .. }) => "status",
            Err(ForwardError::Transport { .. }) => "transport",
            Err(ForwardError::Session(_)) => "session",
        };
        counter!(FORWARD_REQUESTS, "outcome" => outcome).increment(1);

        result
    }

    async fn forward_with_retries(&self, endpoint: &str, body: &Value) -> Result<Value> {
        let client = self.session.client().await?;
        let url = self.endpoint_url(endpoint);
        let mut state = RetryState::default();

        loop {
            let err = match self.attempt(client, &url, body).await {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fatal(err) => {
                    tracing::warn!(endpoint, attempt = state.attempt, "{err}");
                    return Err(err);
                }
                Attempt::Transient(err) => err,
            };

            let reason = match &err {
                ForwardError::Status { status, .. } => {
                    state.last_status = Some(*status);
                    status.to_string()
                }
                ForwardError::Transport { kind, .. } => kind.as_str().to_string(),
                _ => "other".to_string(),
            };
            state.last_error = Some(err.to_string());

            if state.attempt >= self.retry.max_retries {
                tracing::error!(
                    endpoint,
                    attempts = state.attempt + 1,
                    last_status = ?state.last_status,
                    last_error = state.last_error.as_deref(),
                    "giving up on request"
                );
                return Err(err);
            }

            let delay = self.retry.backoff_delay(state.attempt);
            tracing::warn!(
                endpoint,
                attempt = state.attempt,
                delay_ms = delay.as_millis() as u64,
                "{err}, retrying"
            );
            counter!(FORWARD_RETRIES, "reason" => reason).increment(1);

            self.sleeper.sleep(delay).await;
            state.attempt += 1;
        }
    }

    async fn attempt(&self, client: &reqwest::Client, url: &str, body: &Value) -> Attempt {
        let response = match client.post(url).json(body).send().await {
            Ok(response) => response,
            Err(e) => return transport_failure(e),
        };

        let status = response.status();
        if status == StatusCode::OK {
            let bytes = match response.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => return transport_failure(e),
            };
            return match serde_json::from_slice(&bytes) {
                Ok(value) => Attempt::Done(value),
                Err(_) => Attempt::Fatal(ForwardError::InvalidJson),
            };
        }

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => return transport_failure(e),
        };
        let err = ForwardError::Status {
            status: status.as_u16(),
            body: text,
        };

        if RETRIABLE_STATUS_CODES.contains(&status) {
            Attempt::Transient(err)
        } else {
            Attempt::Fatal(err)
        }
    }
}

/// Refused, reset and timed out connections are retried. Anything reqwest cannot
/// place in those (malformed responses, builder or decode errors) fails at once.
fn transport_failure(err: reqwest::Error) -> Attempt {
    let err = ForwardError::transport(err);
    match err {
        ForwardError::Transport {
            kind: TransportErrorKind::Unknown,
            ..
        } => Attempt::Fatal(err),
        _ => Attempt::Transient(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{GarbageUpstream, MockUpstream, RecordingSleeper, unused_url};
    use serde_json::json;
    use std::time::Duration;

    fn forwarder(base_url: &str, sleeper: Arc<RecordingSleeper>) -> Forwarder {
        let session = Arc::new(Session::new(Duration::from_secs(5)));
        Forwarder::new(base_url, session, RetryConfig::default(), sleeper)
    }

    #[tokio::test]
    async fn test_success_is_returned_verbatim() {
        let upstream = MockUpstream::spawn(vec![(200, r#"{"x":1}"#)]).await;
        let sleeper = Arc::new(RecordingSleeper::default());

        let result = forwarder(&upstream.url(), sleeper.clone())
            .forward("prompt", &json!({"seed": 42}))
            .await
            .unwrap();

        assert_eq!(result, json!({"x": 1}));
        assert_eq!(upstream.hits(), 1);
        assert!(sleeper.delays().is_empty());

        let request = &upstream.requests()[0];
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/prompt");
        let sent: Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(sent, json!({"seed": 42}));
    }

    #[tokio::test]
    async fn test_retries_transient_status_then_succeeds() {
        let upstream = MockUpstream::spawn(vec![
            (503, "loading model"),
            (503, "loading model"),
            (200, r#"{"ok":true}"#),
        ])
        .await;
        let sleeper = Arc::new(RecordingSleeper::default());

        let result = forwarder(&upstream.url(), sleeper.clone())
            .forward("prompt", &json!({}))
            .await
            .unwrap();

        assert_eq!(result, json!({"ok": true}));
        assert_eq!(upstream.hits(), 3);
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn test_transient_status_exhausts_retries() {
        let upstream = MockUpstream::spawn(vec![(503, "unavailable")]).await;
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = forwarder(&upstream.url(), sleeper.clone())
            .forward("prompt", &json!({}))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("HTTP_503"));
        assert_eq!(
            err.to_string(),
            "Request failed - reason: HTTP_503 unavailable"
        );
        // One initial attempt plus five retries.
        assert_eq!(upstream.hits(), 6);
        let delays: Vec<u64> = sleeper.delays().iter().map(|d| d.as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 8]);
    }

    #[tokio::test]
    async fn test_mixed_gateway_errors_are_all_retried() {
        let upstream = MockUpstream::spawn(vec![
            (502, "bad gateway"),
            (504, "timeout"),
            (200, "[1,2,3]"),
        ])
        .await;
        let sleeper = Arc::new(RecordingSleeper::default());

        let result = forwarder(&upstream.url(), sleeper.clone())
            .forward("run", &json!(null))
            .await
            .unwrap();

        assert_eq!(result, json!([1, 2, 3]));
        assert_eq!(sleeper.delays().len(), 2);
    }

    #[tokio::test]
    async fn test_non_retriable_status_fails_immediately() {
        let upstream = MockUpstream::spawn(vec![(404, "no such endpoint"), (200, "{}")]).await;
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = forwarder(&upstream.url(), sleeper.clone())
            .forward("missing", &json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, ForwardError::Status { status: 404, .. }));
        assert!(err.to_string().contains("HTTP_404"));
        assert_eq!(upstream.hits(), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_server_error_outside_retry_set_is_fatal() {
        let upstream = MockUpstream::spawn(vec![(500, "boom")]).await;
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = forwarder(&upstream.url(), sleeper.clone())
            .forward("prompt", &json!({}))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Request failed - reason: HTTP_500 boom");
        assert_eq!(upstream.hits(), 1);
    }

    #[tokio::test]
    async fn test_malformed_success_body_is_not_retried() {
        let upstream = MockUpstream::spawn(vec![(200, "<html>oops</html>")]).await;
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = forwarder(&upstream.url(), sleeper.clone())
            .forward("prompt", &json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, ForwardError::InvalidJson));
        assert_eq!(err.to_string(), "Invalid JSON response from server");
        assert_eq!(upstream.hits(), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_connection_refused_is_retried_then_fatal() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let session = Arc::new(Session::new(Duration::from_secs(5)));
        let retry = RetryConfig {
            max_retries: 2,
            ..Default::default()
        };
        let forwarder = Forwarder::new(&unused_url(), session, retry, sleeper.clone());

        let err = forwarder.forward("prompt", &json!({})).await.unwrap_err();

        match &err {
            ForwardError::Transport { kind, .. } => assert_eq!(*kind, TransportErrorKind::Connect),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().starts_with("Request failed: "));
        assert_eq!(sleeper.delays().len(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_response_is_not_retried() {
        let upstream = GarbageUpstream::spawn(b"SSH-2.0-OpenSSH_9.6\r\n\r\n").await;
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = forwarder(&upstream.url(), sleeper.clone())
            .forward("prompt", &json!({}))
            .await
            .unwrap_err();

        match &err {
            ForwardError::Transport { kind, .. } => assert_eq!(*kind, TransportErrorKind::Unknown),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(upstream.connections(), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_zero_timeout_means_no_timeout() {
        let upstream = MockUpstream::spawn(vec![(200, r#"{"ok":true}"#)]).await;
        let sleeper = Arc::new(RecordingSleeper::default());
        let session = Arc::new(Session::new(Duration::ZERO));
        let forwarder = Forwarder::new(
            &upstream.url(),
            session,
            RetryConfig::default(),
            sleeper.clone(),
        );

        let result = forwarder.forward("prompt", &json!({})).await.unwrap();

        assert_eq!(result, json!({"ok": true}));
        assert_eq!(upstream.hits(), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[test]
    fn test_endpoint_url_joins_cleanly() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let forwarder = forwarder("http://127.0.0.1:3000/", sleeper);
        assert_eq!(
            forwarder.endpoint_url("prompt"),
            "http://127.0.0.1:3000/prompt"
        );
        assert_eq!(
            forwarder.endpoint_url("/history/abc"),
            "http://127.0.0.1:3000/history/abc"
        );
    }
}
