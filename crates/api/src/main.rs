use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};

use mentor_push_api::app::{create_app, AppState, Backends};
use mentor_push_api::config::{Config, RegistryBackend};
use mentor_push_api::jobs::{HistoryResyncJob, JobScheduler, PoolMetricsJob};
use mentor_push_api::middleware;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load()?;

    middleware::logging::init_logging(&config.logging);
    middleware::init_metrics()?;

    info!("Starting mentor push service v{}", env!("CARGO_PKG_VERSION"));

    let pool = if config.push.registry_backend == RegistryBackend::Postgres {
        let pool = persistence::db::create_pool(&config.database.pool_config()).await?;
        info!("Running database migrations...");
        persistence::db::run_migrations(&pool).await?;
        info!("Migrations completed");
        Some(pool)
    } else {
        None
    };

    let addr = config.socket_addr()?;
    let backends = Backends::from_config(&config, pool.as_ref()).await?;
    let state = AppState::new(config, pool.clone(), backends).await?;

    let mut scheduler = JobScheduler::new();
    if let Some(pool) = &pool {
        scheduler.register(PoolMetricsJob::new(pool.clone()));
    }
    if state.config.push.history_resync_secs > 0 {
        scheduler.register(HistoryResyncJob::new(
            state.pipeline.history().clone(),
            state.config.push.history_resync_secs,
        ));
    }
    scheduler.start();

    let app = create_app(state);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    scheduler.wait_for_shutdown(Duration::from_secs(5)).await;
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
