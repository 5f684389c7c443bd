//! Conflux Worker
//!
//! A stateless process that executes pipeline jobs.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Executors: explicit registry of plugin executors, migrated at startup
//! - Consumer: reserves jobs from the work queue and reports completions on
//!   the event bus
//!
//! Several workers may consume the same queue.

mod config;
mod consumer;
mod executor;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::consumer::JobConsumer;
use crate::executor::{EchoExecutor, ExecutorRegistry};
use conflux_broker::{EventBus, RedisQueue, WorkQueue};
use conflux_core::ExecutorRegistration;

#[derive(Parser)]
#[command(name = "conflux-worker")]
#[command(about = "Conflux pipeline worker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Consume jobs from the work queue (default)
    Run,
    /// Roll every registered executor back, then exit
    MigrateDown {
        /// Version to roll back from
        #[arg(long)]
        from: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conflux_worker=info,conflux_broker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Conflux Worker");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(
        "Loaded configuration: worker_id={}, queue={}",
        config.worker_id, config.queue_name
    );

    let registry = build_registry()?;
    let names = registry.names();
    info!("Registered {} executor(s)", names.len());
    for name in names {
        info!("  - {}", name);
    }

    if let Some(Command::MigrateDown { from }) = cli.command {
        registry
            .migrate_down_all(&from)
            .await
            .context("Executor rollback failed")?;
        info!("Rolled back executors from version {}", from);
        return Ok(());
    }

    // Executors must be ready before any job is taken
    registry
        .migrate_up_all(&config.table_prefix)
        .await
        .context("Executor migration failed")?;

    let bus = Arc::new(
        EventBus::redis(&config.redis_url)
            .await
            .context("Failed to connect event bus")?,
    );
    let queue = RedisQueue::connect(&config.redis_url, &config.queue_name)
        .await
        .context("Failed to connect work queue")?
        .with_consumer(&config.worker_id, config.lease_ttl);

    let recovered = queue
        .recover_processing()
        .await
        .context("Failed to recover abandoned jobs")?;
    if recovered > 0 {
        warn!("Requeued {} job(s) abandoned by stopped workers", recovered);
    }

    match queue.stats().await {
        Ok(stats) => info!("Queue {}", stats),
        Err(e) => warn!("Failed to read queue stats: {}", e),
    }

    let consumer = Arc::new(JobConsumer::new(
        config,
        Arc::new(queue),
        bus.clone(),
        Arc::new(registry),
    ));

    if let Err(e) = consumer.run(shutdown_signal()).await {
        error!("Consumer error: {:#}", e);
        return Err(e);
    }

    bus.shutdown();
    Ok(())
}

/// Builds the registry of executors this worker can run
fn build_registry() -> Result<ExecutorRegistry> {
    let mut registry = ExecutorRegistry::new();
    registry.register(ExecutorRegistration::new(
        "echo",
        "Echo",
        Arc::new(EchoExecutor),
    ))?;
    Ok(registry)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
