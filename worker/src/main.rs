mod config;

use clap::{Args, Parser};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Args)]
struct ConfigArgs {
    /// Path to a YAML config file. Defaults apply when omitted.
    #[arg(long, env = "WORKER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Parser)]
#[command(about = "Forwards jobs to a local inference service once it is healthy")]
enum CliCommand {
    /// Wait for the dependent service, then serve jobs
    Run(ConfigArgs),
    /// Print the resolved configuration and exit
    CheckConfig(ConfigArgs),
}

fn load_config(args: &ConfigArgs) -> Result<Config, ConfigError> {
    match &args.config {
        Some(path) => Config::from_file(path),
        None => Ok(Config::default()),
    }
}

fn init_logging(logging: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let guard = logging
        .and_then(|l| l.sentry_dsn.as_deref())
        .map(|dsn| {
            sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    ..Default::default()
                },
            ))
        });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(guard.is_some().then(sentry::integrations::tracing::layer))
        .init();

    guard
}

fn init_metrics(metrics_config: &MetricsConfig) {
    let recorder = match StatsdBuilder::from(
        metrics_config.statsd_host.clone(),
        metrics_config.statsd_port,
    )
    .build(Some(&metrics_config.prefix))
    {
        Ok(recorder) => recorder,
        Err(e) => {
            tracing::warn!("metrics disabled, could not build statsd recorder: {e}");
            return;
        }
    };

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("metrics recorder was already installed");
        return;
    }
    shared::metrics_defs::describe_all(forwarder::metrics_defs::ALL_METRICS);
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();
    let args = match &cli {
        CliCommand::Run(args) | CliCommand::CheckConfig(args) => args,
    };

    let config = match load_config(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let _sentry = init_logging(config.common.logging.as_ref());

    let forwarder_config = match config.resolve_forwarder(|key| std::env::var(key).ok()) {
        Ok(forwarder_config) => forwarder_config,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match cli {
        CliCommand::CheckConfig(_) => {
            println!("{forwarder_config:#?}");
            ExitCode::SUCCESS
        }
        CliCommand::Run(_) => {
            if let Some(metrics_config) = &config.common.metrics {
                init_metrics(metrics_config);
            }

            let rt = match tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::error!("could not start runtime: {e}");
                    return ExitCode::FAILURE;
                }
            };

            tracing::info!(api_url = forwarder_config.api_url.as_str(), "starting worker");
            match rt.block_on(forwarder::run(forwarder_config)) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    tracing::error!("worker stopped: {e}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}
