//! incidentd - durable task queue and watcher for incident workflows.
//!
//! Main entry point for the incidentd CLI.

mod cli;
mod cmd_queue;
mod register;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use incidentd_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig};
use incidentd_workqueue::{CancellationToken, Watcher};

use crate::cli::{Cli, Commands};

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let console = fmt::layer().with_target(true).with_ansi(true);

    if !logging.file_enabled {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .init();
        return Ok(());
    }

    let log_dir = logging.resolved_log_dir();
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("incidentd")
        .filename_suffix("log")
        .max_log_files(logging.max_log_files)
        .build(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Keeps the writer flushing for the life of the process.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(())
}

/// Load and validate the configuration. Warnings are printed, errors abort.
fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config = ConfigLoader::load_or_default(path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;

    let result = ConfigValidator::validate(&config);
    for warning in &result.warnings {
        eprintln!("config warning: {}: {}", warning.path, warning.message);
    }
    if !result.is_valid() {
        for error in &result.errors {
            eprintln!("config error: {}: {}", error.path, error.message);
        }
        bail!("Invalid configuration in {}", path.display());
    }
    Ok(config)
}

async fn watch(config: Config) -> anyhow::Result<()> {
    let queue = cmd_queue::open_queue(&config).await?;
    let registry = Arc::new(register::build_registry(&config).await?);
    if registry.is_empty() {
        warn!("No task handlers configured; every task falls under the unknown-task policy");
    }

    let watcher = Watcher::new(queue, registry, config.queue.clone());
    let cancel = CancellationToken::new();

    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, finishing current task");
            signal.cancel();
        }
    });

    watcher.run(cancel).await;

    let snapshot = watcher.metrics().snapshot();
    info!(
        cycles = snapshot.cycles,
        completed = snapshot.completed,
        handler_failures = snapshot.handler_failures,
        dead_lettered = snapshot.dead_lettered,
        dropped = snapshot.dropped,
        avg_handler_ms = snapshot.avg_handler_time_ms(),
        "Watcher exited after {}s",
        snapshot.uptime_secs
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    init_tracing(&config.logging)?;

    match cli.command.unwrap_or(Commands::Watch) {
        Commands::Watch => watch(config).await,
        Commands::Enqueue {
            tasks,
            data,
            fail_fast,
        } => {
            let batch = cmd_queue::parse_batch(tasks, data)?;
            let queue = cmd_queue::open_queue(&config).await?;
            cmd_queue::enqueue(queue, batch, fail_fast).await
        }
        Commands::Stats => {
            let queue = cmd_queue::open_queue(&config).await?;
            cmd_queue::stats(&queue).await
        }
        Commands::List { status, limit } => {
            let queue = cmd_queue::open_queue(&config).await?;
            cmd_queue::list(&queue, &status, limit).await
        }
        Commands::Show { id } => {
            let queue = cmd_queue::open_queue(&config).await?;
            cmd_queue::show(&queue, &id).await
        }
        Commands::Notifications { status, limit } => {
            cmd_queue::notifications(&config, status.as_deref(), limit).await
        }
    }
}
