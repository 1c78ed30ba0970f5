mod config;

use clap::{Parser, Subcommand};
use config::{Config, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "yakusu", about = "Japanese to English translation service")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, default_value = "yakusu.yaml")]
    config_path: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve the translate endpoint
    Translator,
    /// Only run the scheduled translation
    ScheduledJob,
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    let _sentry_guard = init_logging(config.common.logging.as_ref());

    if let Some(metrics_config) = &config.common.metrics {
        init_metrics(metrics_config);
    }

    let Some(translator_config) = config.translator else {
        tracing::error!("missing translator section in {:?}", cli.config_path);
        process::exit(1);
    };

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "could not start runtime");
            process::exit(1);
        }
    };

    let result = match cli.command {
        CliCommand::Translator => {
            tracing::info!("Starting translator");
            rt.block_on(translator::run(translator_config))
        }
        CliCommand::ScheduledJob => {
            tracing::info!("Starting scheduled job");
            rt.block_on(translator::run_scheduled_job(translator_config))
        }
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "exiting");
        process::exit(1);
    }
}

/// Installs the fmt subscriber, forwarding events to Sentry when a DSN is set.
/// The returned guard flushes Sentry on drop.
fn init_logging(config: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let guard = config
        .and_then(|c| c.sentry_dsn.as_deref().map(|dsn| (dsn, c.environment.clone())))
        .map(|(dsn, environment)| {
            sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    environment: environment.map(Into::into),
                    ..Default::default()
                },
            ))
        });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(sentry_layer)
        .init();

    guard
}

fn init_metrics(config: &MetricsConfig) {
    let recorder = match StatsdBuilder::from(&config.statsd_host, config.statsd_port)
        .build(Some("yakusu"))
    {
        Ok(recorder) => recorder,
        Err(e) => {
            tracing::error!(error = %e, "could not build statsd recorder, metrics disabled");
            return;
        }
    };

    if let Err(e) = metrics::set_global_recorder(recorder) {
        tracing::error!(error = %e, "could not install metrics recorder");
        return;
    }

    shared::metrics_defs::describe_all(translator::metrics_defs::ALL_METRICS);
}
