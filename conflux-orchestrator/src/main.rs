use std::sync::Arc;

use anyhow::Context;
use conflux_broker::{EventBus, RedisQueue, WorkQueue};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::repository::{MemorySessionStore, PgSessionStore, SessionStore};
use crate::service::TaskService;

pub mod api;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conflux_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Conflux Orchestrator...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let store: Arc<dyn SessionStore> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = db::create_pool(database_url)
                .await
                .context("Failed to create database pool")?;
            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            Arc::new(PgSessionStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, sessions are kept in memory only");
            Arc::new(MemorySessionStore::new())
        }
    };

    tracing::info!("Connecting to Redis at {}", config.redis_url);

    let bus = Arc::new(
        EventBus::redis(&config.redis_url)
            .await
            .context("Failed to connect event bus")?,
    );
    let queue = RedisQueue::connect(&config.redis_url, &config.queue_name)
        .await
        .context("Failed to connect work queue")?;
    match queue.stats().await {
        Ok(stats) => tracing::info!("Queue {}", stats),
        Err(e) => tracing::warn!("Failed to read queue stats: {}", e),
    }

    let service = Arc::new(
        TaskService::new(store, Arc::new(queue), bus.clone())
            .with_max_attempts(config.job_max_attempts),
    );
    service
        .subscribe()
        .await
        .context("Failed to subscribe to completion events")?;

    // Build router with all API endpoints
    let app = api::create_router(service);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    bus.shutdown();
    tracing::info!("Orchestrator stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
