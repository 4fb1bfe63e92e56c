/// Pipeline management REST API endpoints
///
/// CRUD for pipeline definitions with hot-reload into the registry, interactive
/// connection validation and run start. Definitions are validated as graphs before
/// they are stored.

use crate::{
    api::runs::RunTable,
    pipeline::{
        graph::Graph,
        registry::PipelineRegistry,
        storage::{PipelineStorage, PipelineStore},
        types::{EdgeSpec, Pipeline},
    },
    runtime::coordinator::EngineServices,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Pipeline storage for persistence
    pub storage: PipelineStorage,
    /// Hot-reload registry of validated graphs
    pub registry: Arc<PipelineRegistry>,
    /// Runners, trace sink and history shared by every run
    pub services: EngineServices,
    /// Coordinators and live runs
    pub runs: RunTable,
}

/// Error response: status plus `{ "error": message }`
pub type ApiError = (StatusCode, Json<Value>);

pub fn api_error(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}

fn internal(context: &str, e: anyhow::Error) -> ApiError {
    tracing::error!("{}: {}", context, e);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, context)
}

#[derive(Debug, Serialize)]
pub struct PipelineResponse {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct PipelineRequest {
    pub pipeline: Pipeline,
}

pub fn create_pipeline_routes() -> Router<AppState> {
    Router::new()
        .route("/api/pipelines", post(create_pipeline).get(list_pipelines))
        .route(
            "/api/pipelines/{id}",
            get(get_pipeline).put(update_pipeline).delete(delete_pipeline),
        )
        .route("/api/pipelines/{id}/connections", post(validate_connection))
        .route("/api/pipelines/{id}/runs", post(start_run))
}

fn validate(pipeline: &Pipeline) -> Result<(), ApiError> {
    if pipeline.id.is_empty() || pipeline.name.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "pipeline id and name are required"));
    }
    Graph::from_pipeline(pipeline).map_err(|e| {
        tracing::warn!("❌ Rejected pipeline '{}': {}", pipeline.id, e);
        api_error(StatusCode::BAD_REQUEST, e)
    })?;
    Ok(())
}

async fn persist(state: &AppState, pipeline: &Pipeline) -> Result<(), ApiError> {
    state
        .storage
        .save(pipeline)
        .await
        .map_err(|e| internal("Failed to save pipeline", e))?;
    state
        .registry
        .reload(&pipeline.id)
        .await
        .map_err(|e| internal("Failed to reload pipeline into registry", e))?;
    Ok(())
}

/// POST /api/pipelines
/// Body: { "pipeline": { "id": "...", "name": "...", "nodes": [...], "edges": [...] } }
async fn create_pipeline(
    State(state): State<AppState>,
    Json(payload): Json<PipelineRequest>,
) -> Result<Json<PipelineResponse>, ApiError> {
    let pipeline = payload.pipeline;
    validate(&pipeline)?;

    match state.storage.load(&pipeline.id).await {
        Ok(Some(_)) => return Err(api_error(StatusCode::CONFLICT, "pipeline already exists")),
        Ok(None) => {}
        Err(e) => return Err(internal("Failed to look up pipeline", e)),
    }

    persist(&state, &pipeline).await?;
    tracing::info!("🔥 Created pipeline: {} ({})", pipeline.id, pipeline.name);

    Ok(Json(PipelineResponse {
        id: pipeline.id.clone(),
        message: format!("Pipeline '{}' created successfully", pipeline.name),
    }))
}

/// GET /api/pipelines
async fn list_pipelines(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let pipelines = state
        .storage
        .list_metadata()
        .await
        .map_err(|e| internal("Failed to list pipelines", e))?;
    Ok(Json(json!({ "pipelines": pipelines })))
}

/// GET /api/pipelines/{id}
async fn get_pipeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Pipeline>, ApiError> {
    match state.storage.load(&id).await {
        Ok(Some(pipeline)) => Ok(Json(pipeline)),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, "pipeline not found")),
        Err(e) => Err(internal("Failed to get pipeline", e)),
    }
}

/// PUT /api/pipelines/{id}
async fn update_pipeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<PipelineRequest>,
) -> Result<Json<PipelineResponse>, ApiError> {
    let mut pipeline = payload.pipeline;
    pipeline.id = id.clone();
    validate(&pipeline)?;

    match state.storage.load(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(api_error(StatusCode::NOT_FOUND, "pipeline not found")),
        Err(e) => return Err(internal("Failed to look up pipeline", e)),
    }

    persist(&state, &pipeline).await?;
    tracing::info!("🔥 Hot-reloaded pipeline: {} ({})", pipeline.id, pipeline.name);

    Ok(Json(PipelineResponse {
        id: pipeline.id.clone(),
        message: format!("Pipeline '{}' updated successfully", pipeline.name),
    }))
}

/// DELETE /api/pipelines/{id}
async fn delete_pipeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.registry.remove(&id);
    state.runs.retire(&id).await;

    match state.storage.delete(&id).await {
        Ok(true) => {
            tracing::info!("Deleted pipeline: {}", id);
            Ok(Json(json!({ "message": "Pipeline deleted successfully" })))
        }
        Ok(false) => Err(api_error(StatusCode::NOT_FOUND, "pipeline not found")),
        Err(e) => Err(internal("Failed to delete pipeline", e)),
    }
}

/// POST /api/pipelines/{id}/connections
/// Body: { "source": "...", "target": "...", "targetPort": "bottom" }
async fn validate_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(edge): Json<EdgeSpec>,
) -> Result<Json<Value>, ApiError> {
    let graph = state
        .registry
        .get(&id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "pipeline not found"))?;

    graph.validate_connection(&edge).map_err(|e| {
        tracing::debug!("🚫 Connection {} -> {} rejected: {}", edge.source, edge.target, e);
        api_error(StatusCode::UNPROCESSABLE_ENTITY, e)
    })?;

    Ok(Json(json!({ "valid": true })))
}

/// POST /api/pipelines/{id}/runs
/// Returns: { "run_id": "...", "states": { node_id: { "state": "idle" } } }
async fn start_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let graph = state
        .registry
        .get(&id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "pipeline not found"))?;

    let handle = state.runs.start(&id, graph, &state.services).await;
    tracing::info!("📥 Run {} requested for pipeline {}", handle.id(), id);

    Ok(Json(json!({
        "run_id": handle.id(),
        "states": handle.states(),
    })))
}
