pub mod backoff;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod job;
pub mod metrics_defs;
pub mod proxy;
pub mod readiness;
pub mod server;
pub mod session;

#[cfg(test)]
mod testutils;

use backoff::{Sleeper, TokioSleeper};
use dispatcher::{ConcurrencyController, Dispatcher};
use errors::ServerError;
use proxy::Forwarder;
use readiness::{ReadinessProber, ReadinessResult};
use server::JobService;
use session::Session;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Serves admin endpoints right away, waits for the dependent service, then
/// serves jobs until a listener fails.
///
/// The readiness gate finishes before the job listener is bound. If it gives up,
/// the fallback handler is registered so every job is answered with an error.
pub async fn run(config: config::Config) -> Result<(), ServerError> {
    let ready = Arc::new(AtomicBool::new(false));

    let admin_ready = ready.clone();
    let admin_service =
        AdminService::<_, ServerError>::new(move || admin_ready.load(Ordering::Relaxed));
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    let job_task = async {
        let sleeper = Arc::new(TokioSleeper);
        let prober = ReadinessProber::new(config.readiness.clone(), sleeper.clone());
        let readiness = prober
            .probe(&config.health_url(), config.readiness.max_attempts)
            .await;

        let session = Arc::new(Session::new(config.request_timeout()));
        let dispatcher = select_dispatcher(&config, &readiness, session, sleeper).await;
        ready.store(dispatcher.is_ready(), Ordering::Relaxed);

        let job_service =
            JobService::new(dispatcher, ConcurrencyController::new(config.concurrency));
        run_http_service(&config.listener.host, config.listener.port, job_service).await
    };

    tokio::try_join!(admin_task, job_task)?;
    Ok(())
}

/// Picks the handler to register once the readiness gate decided. Never fails:
/// a session that cannot be built also yields the fallback handler.
async fn select_dispatcher(
    config: &config::Config,
    readiness: &ReadinessResult,
    session: Arc<Session>,
    sleeper: Arc<dyn Sleeper>,
) -> Dispatcher {
    if !readiness.ready {
        tracing::error!(
            error = readiness.error.as_deref(),
            attempts = readiness.attempts,
            "dependent service never became ready, registering fallback handler"
        );
        return Dispatcher::Failed;
    }

    if let Err(e) = session.client().await {
        tracing::error!("could not create HTTP session, registering fallback handler: {e}");
        return Dispatcher::Failed;
    }

    tracing::info!("API service is ready, starting job handler");
    Dispatcher::Ready(Arc::new(Forwarder::new(
        &config.api_url,
        session,
        config.retry.clone(),
        sleeper,
    )))
}
