//! labfeed - real-time clinical event feed
//!
//! Command-line entry point: watches broadcast channels and logs every
//! validated instrument result.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use labfeed_config::{Config, ConfigLoader, ConfigValidator, LogFormat, LoggingConfig};
use labfeed_core::FeedClient;
use labfeed_protocols::{EventEnvelope, ListenerError};

use cli::{Cli, Commands};

/// Initialize tracing from the logging section.
///
/// `RUST_LOG` takes precedence over `logging.level`. With
/// `logging.directory` set, a plain-text copy goes to a daily rolling file.
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let console = match logging.format {
        LogFormat::Pretty => fmt::layer().with_target(true).with_ansi(true).boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    };

    let file = match &logging.directory {
        Some(dir) => {
            let dir = ConfigLoader::expand_path(&dir.to_string_lossy());
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;

            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("labfeed")
                .filename_suffix("log")
                .max_log_files(30)
                .build(&dir)?;

            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Keeps the background writer alive for the life of the process.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .with(env_filter)
        .init();

    Ok(())
}

/// Resolve the configuration: explicit path, else the per-user file, else
/// defaults. Command-line credentials override the file.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            let path = ConfigLoader::expand_path(path);
            ConfigLoader::load(&path)
                .with_context(|| format!("loading configuration from {}", path.display()))?
        }
        None => match ConfigLoader::default_path().filter(|p| p.exists()) {
            Some(path) => ConfigLoader::load(&path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => Config::default(),
        },
    };

    if let Some(app_key) = &cli.app_key {
        config.broadcast.app_key = app_key.clone();
    }
    if let Some(cluster) = &cli.cluster {
        config.broadcast.cluster = cluster.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config.logging)?;

    match cli.command {
        Commands::Watch { channels } => run_watch(config, channels).await,
        Commands::CheckConfig => check_config(&config),
    }
}

/// Subscribe to every channel and log results until Ctrl-C.
async fn run_watch(config: Config, channels: Vec<String>) -> Result<()> {
    info!("Starting labfeed v{}", env!("CARGO_PKG_VERSION"));

    let client = FeedClient::new(config)?;

    let mut handles = Vec::with_capacity(channels.len());
    for channel in &channels {
        let handle = client.subscribe(channel.as_str(), log_envelope)?;
        info!(channel = %channel, "Subscribed");
        handles.push(handle);
    }

    let mut states = client.state_changes();
    let state_task = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            if state.is_transitioning() {
                debug!(state = %state, "Connection state");
            } else {
                info!(state = %state, "Connection state");
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("Shutting down");

    drop(handles);
    client.shutdown().await;
    state_task.abort();

    let stats = client.stats();
    info!(
        dispatched = stats.dispatched,
        dropped = stats.dropped,
        listener_failures = stats.listener_failures,
        "Feed statistics"
    );
    Ok(())
}

fn log_envelope(envelope: &EventEnvelope) -> Result<(), ListenerError> {
    info!(
        result_id = envelope.result.id,
        visit_id = envelope.visit_id(),
        patient_id = envelope.patient_id(),
        patient = %envelope.patient.name,
        reported = envelope.result.reported_count(),
        locked = ?envelope.result_is_locked(),
        "Instrument result"
    );
    Ok(())
}

fn check_config(config: &Config) -> Result<()> {
    let result = ConfigValidator::validate(config);

    for warning in &result.warnings {
        warn!(path = %warning.path, "{}", warning.message);
        println!("warning: {}: {}", warning.path, warning.message);
    }

    if !result.is_valid() {
        for error in &result.errors {
            println!("error: {}: {}", error.path, error.message);
        }
        anyhow::bail!("configuration is invalid ({} errors)", result.errors.len());
    }

    println!("configuration OK");
    Ok(())
}
