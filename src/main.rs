/// pipeloom server entry point
///
/// Serves:
/// - Pipeline management API at /api/pipelines/*
/// - Run control, uploads and artifacts at /api/runs/*
/// - Health check at /healthz

use pipeloom::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to 0.0.0.0:3004 and ./data, overridable through PIPELOOM_* variables
    let config = Config::default();

    start_server(config).await
}
