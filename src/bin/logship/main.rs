// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, ValueEnum};
use std::process::ExitCode;
use std::time::Duration;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::metadata::LevelFilter;
use tracing::{error, info, warn};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use logship::init::args::ShipperRun;
use logship::init::config::ShipperConfig;
use logship::init::shipper::Shipper;
use logship::init::wait::{self, TaskSet};

#[derive(Debug, Parser)]
#[command(name = "logship")]
#[command(bin_name = "logship")]
#[command(version, about, long_about = None)]
struct Arguments {
    #[arg(value_enum, long, env = "LOGSHIP_LOG_FORMAT", default_value = "text")]
    /// Log format
    log_format: LogFormatArg,

    #[command(flatten)]
    run: ShipperRun,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    let _guard = match setup_logging(&opt.log_format) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ERROR: failed to setup logging: {}", e);
            return ExitCode::from(1);
        }
    };

    let config = match load_config(&opt.run) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration.");
            return ExitCode::from(1);
        }
    };

    match run_shipper(config) {
        Ok(_) => {}
        Err(e) => {
            error!(error = %e, "Failed to run shipper.");
            return ExitCode::from(1);
        }
    }

    ExitCode::SUCCESS
}

fn load_config(run: &ShipperRun) -> Result<ShipperConfig, BoxError> {
    let path = run
        .config
        .as_ref()
        .ok_or("a configuration file is required, set --config or LOGSHIP_CONFIG")?;

    let mut config = ShipperConfig::load(path)?;
    if let Some(event_log) = &run.event_log {
        config.event_log = event_log.clone();
    }
    config.validate()?;

    info!(
        config = ?path,
        event_log = ?config.event_log,
        checkpoint = ?config.checkpoint_path,
        "Loaded configuration"
    );
    Ok(config)
}

#[tokio::main]
async fn run_shipper(config: ShipperConfig) -> Result<(), BoxError> {
    let mut join_set = TaskSet::new();

    let cancel_token = CancellationToken::new();
    {
        let token = cancel_token.clone();
        wait::spawn_named(&mut join_set, "shipper", async move {
            Shipper::new(config).run(token).await
        });
    }

    select! {
        r = signal_wait() => {
            r?;
            info!("Shutdown signal received.");
            cancel_token.cancel();
        },
        e = wait::wait_for_any_task(&mut join_set) => {
            match e {
                Ok(_) => warn!("Unexpected early exit of shipper."),
                Err(e) => return Err(e),
            }
        },
    }

    // The shipper bounds its own task shutdown; this only guards against a
    // stuck publisher close.
    wait::drain_tasks(&mut join_set, Duration::from_secs(10)).await?;

    Ok(())
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

fn setup_logging(log_format: &LogFormatArg) -> Result<LoggerGuard, BoxError> {
    LogTracer::init()?;

    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?
        .add_directive("lapin=warn".parse()?)
        .add_directive("amq_protocol=warn".parse()?);

    if *log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);

        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        use std::io;
        use std::io::IsTerminal;

        // Skip color codes when not in a terminal
        let use_ansi = io::stdout().is_terminal();

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .with_ansi(use_ansi)
            .compact();

        let subscriber = Registry::default().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(guard)
}

async fn signal_wait() -> std::io::Result<()> {
    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_int = signal(SignalKind::interrupt())?;

    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
    Ok(())
}
