/// Server setup and initialization
///
/// Wires together storage, registry, node runners and HTTP routes into the Axum app.

use crate::{
    api::{create_pipeline_routes, create_run_routes, AppState, RunTable},
    config::Config,
    pipeline::{registry::PipelineRegistry, storage::PipelineStorage},
    runtime::{
        coordinator::EngineServices,
        runners::{HttpTransformService, NodeRunners},
    },
};
use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Build the router over an already initialized state
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(create_pipeline_routes())
        .merge(create_run_routes())
        .with_state(state)
}

/// Create the main Axum application with all routes
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("📁 Ensuring data directory exists: {}", config.database.data_dir);
    std::fs::create_dir_all(&config.database.data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory: {}", e))?;

    tracing::info!("📋 Initializing pipeline storage");
    let pool = SqlitePoolOptions::new()
        .connect(&config.database.url())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open pipeline database: {}", e))?;
    let storage = PipelineStorage::new(pool);
    storage.init_schema().await?;

    tracing::info!("📊 Initializing pipeline registry");
    let registry = Arc::new(PipelineRegistry::new(Arc::new(storage.clone())));
    registry
        .init_from_store()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load pipelines from storage: {}", e))?;

    tracing::info!("⚙️ Initializing node runners (transform: {})", config.engine.transform_url);
    let transform = HttpTransformService::new(
        config.engine.transform_url.clone(),
        config.engine.transform_timeout(),
    )?;
    let runners = NodeRunners::new(Arc::new(transform))
        .with_integration_timeout(config.engine.integration_timeout());
    let services = EngineServices::new(
        runners,
        Arc::new(storage.clone()),
        Arc::new(storage.clone()),
    );

    let state = AppState {
        storage,
        registry,
        services,
        runs: RunTable::default(),
    };

    tracing::info!("✅ Application initialized successfully");
    Ok(create_router(state))
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting pipeloom server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}
