use crate::errors::SessionError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;

/// Process-wide pooled HTTP client for talking to the dependent service.
///
/// The client is built at most once. Concurrent first callers wait for the one
/// in-flight build; later callers get the existing client without locking.
/// Certificate verification is disabled since the peer is a local process.
/// A zero request timeout disables the total timeout.
pub struct Session {
    request_timeout: Duration,
    client: OnceCell<reqwest::Client>,
    builds: AtomicUsize,
}

impl Session {
    pub fn new(request_timeout: Duration) -> Self {
        Session {
            request_timeout,
            client: OnceCell::new(),
            builds: AtomicUsize::new(0),
        }
    }

    pub async fn client(&self) -> Result<&reqwest::Client, SessionError> {
        self.client
            .get_or_try_init(|| async {
                self.builds.fetch_add(1, Ordering::Relaxed);
                let mut builder = reqwest::Client::builder()
                    .danger_accept_invalid_certs(true)
                    .pool_idle_timeout(Duration::from_secs(90))
                    .tcp_nodelay(true);
                if !self.request_timeout.is_zero() {
                    builder = builder.timeout(self.request_timeout);
                }
                let client = builder.build()?;
                tracing::debug!(timeout = ?self.request_timeout, "created HTTP session");
                Ok::<_, SessionError>(client)
            })
            .await
    }

    pub fn is_initialized(&self) -> bool {
        self.client.initialized()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// How many times the client has been built. Always 0 or 1.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }
}
