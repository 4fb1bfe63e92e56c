/// Run control endpoints
///
/// Observes live runs, resolves manual uploads, aborts runs and serves the
/// artifacts a node produced.

use crate::{
    api::pipelines::{api_error, ApiError, AppState},
    error::UploadProtocolError,
    pipeline::graph::Graph,
    runtime::{
        coordinator::{EngineServices, ExecutionCoordinator, RunHandle},
        runners::UploadedFile,
    },
};
use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Runs kept per pipeline, newest first; older handles are evicted
pub const RETAINED_RUNS: usize = 16;

/// One coordinator per pipeline plus the most recent runs started through the API
#[derive(Clone)]
pub struct RunTable {
    coordinators: Arc<RwLock<HashMap<String, ExecutionCoordinator>>>,
    runs: Arc<RwLock<RunLog>>,
    retained: usize,
}

#[derive(Default)]
struct RunLog {
    handles: HashMap<Uuid, RunHandle>,
    /// Start order of each pipeline's runs, oldest at the front
    order: HashMap<String, VecDeque<Uuid>>,
}

impl Default for RunTable {
    fn default() -> Self {
        Self::with_retention(RETAINED_RUNS)
    }
}

impl RunTable {
    /// Keep at most `retained` runs (at least one) per pipeline
    pub fn with_retention(retained: usize) -> Self {
        Self {
            coordinators: Arc::default(),
            runs: Arc::default(),
            retained: retained.max(1),
        }
    }

    /// Start a run of `graph`; an in-flight run of the same pipeline is aborted
    ///
    /// A new coordinator replaces the old one when the registry holds a newer graph.
    pub async fn start(
        &self,
        pipeline_id: &str,
        graph: Arc<Graph>,
        services: &EngineServices,
    ) -> RunHandle {
        let handle = {
            let mut coordinators = self.coordinators.write().await;
            let stale = coordinators
                .get(pipeline_id)
                .is_some_and(|c| !std::ptr::eq(c.graph(), graph.as_ref()));
            if stale {
                if let Some(old) = coordinators.remove(pipeline_id) {
                    old.abort_run();
                }
            }
            coordinators
                .entry(pipeline_id.to_string())
                .or_insert_with(|| {
                    ExecutionCoordinator::new(pipeline_id, graph, services.clone())
                })
                .start()
        };

        let mut runs = self.runs.write().await;
        let RunLog { handles, order } = &mut *runs;
        let started = order.entry(pipeline_id.to_string()).or_default();
        started.push_back(handle.id());
        while started.len() > self.retained {
            if let Some(evicted) = started.pop_front() {
                tracing::debug!("🧹 Evicting run {} of pipeline '{}'", evicted, pipeline_id);
                handles.remove(&evicted);
            }
        }
        handles.insert(handle.id(), handle.clone());
        handle
    }

    pub async fn get(&self, run_id: Uuid) -> Option<RunHandle> {
        self.runs.read().await.handles.get(&run_id).cloned()
    }

    /// Number of run handles currently held
    pub async fn run_count(&self) -> usize {
        self.runs.read().await.handles.len()
    }

    /// Abort and forget everything belonging to a deleted pipeline
    pub async fn retire(&self, pipeline_id: &str) {
        if let Some(coordinator) = self.coordinators.write().await.remove(pipeline_id) {
            coordinator.abort_run();
        }
        let mut runs = self.runs.write().await;
        runs.order.remove(pipeline_id);
        runs.handles
            .retain(|_, handle| handle.pipeline_id() != pipeline_id);
    }
}

pub fn create_run_routes() -> Router<AppState> {
    Router::new()
        .route("/api/runs/{run_id}", get(get_run))
        .route("/api/runs/{run_id}/history", get(run_history))
        .route("/api/runs/{run_id}/abort", post(abort_run))
        .route("/api/runs/{run_id}/nodes/{node_id}/upload", post(upload))
        .route("/api/runs/{run_id}/nodes/{node_id}/artifacts", get(list_artifacts))
        .route(
            "/api/runs/{run_id}/nodes/{node_id}/artifacts/{name}",
            get(download_artifact),
        )
        .route("/api/traces/{node_id}", get(node_traces))
}

async fn lookup(state: &AppState, run_id: Uuid) -> Result<RunHandle, ApiError> {
    state.runs.get(run_id).await.ok_or_else(|| {
        tracing::warn!("❌ Unknown run: {}", run_id);
        api_error(StatusCode::NOT_FOUND, "run not found")
    })
}

/// GET /api/runs/{run_id}
async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let handle = lookup(&state, run_id).await?;
    if !handle.is_current() {
        // Node states on the board already belong to the newer run
        return Err(api_error(
            StatusCode::GONE,
            format!("run {run_id} was superseded by a newer run"),
        ));
    }
    Ok(Json(json!({
        "run_id": handle.id(),
        "pipeline_id": handle.pipeline_id(),
        "finished": handle.is_finished(),
        "states": handle.states(),
    })))
}

/// GET /api/runs/{run_id}/history
/// Persisted entries, available after the run handle has been evicted
async fn run_history(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let entries = state
        .storage
        .history_for_run(&run_id.to_string())
        .await
        .map_err(|e| {
            tracing::error!("❌ Failed to read history of run {}: {}", run_id, e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to read run history")
        })?;
    Ok(Json(json!({ "run_id": run_id, "entries": entries })))
}

/// GET /api/traces/{node_id}
/// Artifact trace rows recorded for a node id, across runs
async fn node_traces(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let traces = state.storage.traces_for_node(&node_id).await.map_err(|e| {
        tracing::error!("❌ Failed to read traces of '{}': {}", node_id, e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to read traces")
    })?;
    Ok(Json(json!({ "node_id": node_id, "traces": traces })))
}

/// POST /api/runs/{run_id}/abort
async fn abort_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let handle = lookup(&state, run_id).await?;
    handle.abort();
    Ok(Json(json!({ "message": "Run aborted" })))
}

/// POST /api/runs/{run_id}/nodes/{node_id}/upload
/// Body: multipart form, every part carrying a file name is one uploaded file
async fn upload(
    State(state): State<AppState>,
    Path((run_id, node_id)): Path<(Uuid, String)>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let handle = lookup(&state, run_id).await?;

    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?
    {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let payload = field
            .bytes()
            .await
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
        files.push(UploadedFile::new(name, payload));
    }
    tracing::debug!("📎 Received {} file(s) for '{}'", files.len(), node_id);

    let count = files.len();
    handle.resolve_upload(&node_id, files).map_err(|e| {
        let status = match e {
            UploadProtocolError::AlreadyResolved(_) => StatusCode::CONFLICT,
            UploadProtocolError::NotAwaiting(_) => StatusCode::NOT_FOUND,
            UploadProtocolError::Closed(_) => StatusCode::GONE,
        };
        api_error(status, e)
    })?;

    Ok(Json(json!({ "node_id": node_id, "files": count })))
}

/// GET /api/runs/{run_id}/nodes/{node_id}/artifacts
async fn list_artifacts(
    State(state): State<AppState>,
    Path((run_id, node_id)): Path<(Uuid, String)>,
) -> Result<Json<Value>, ApiError> {
    let handle = lookup(&state, run_id).await?;
    let artifacts = handle.outputs(&node_id).unwrap_or_default();
    let listed: Vec<Value> = artifacts
        .iter()
        .map(|a| {
            json!({
                "name": a.name(),
                "kind": a.kind(),
                "size": a.len(),
                "produced_by": a.produced_by(),
            })
        })
        .collect();
    Ok(Json(json!({ "node_id": node_id, "artifacts": listed })))
}

/// GET /api/runs/{run_id}/nodes/{node_id}/artifacts/{name}
async fn download_artifact(
    State(state): State<AppState>,
    Path((run_id, node_id, name)): Path<(Uuid, String, String)>,
) -> Result<Response, ApiError> {
    let handle = lookup(&state, run_id).await?;
    let artifact = handle
        .outputs(&node_id)
        .unwrap_or_default()
        .into_iter()
        .find(|a| a.name() == name)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "artifact not found"))?;

    let disposition = format!("attachment; filename=\"{}\"", artifact.name());
    Ok((
        [
            (header::CONTENT_TYPE, artifact.kind().mime().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.payload().clone(),
    )
        .into_response())
}
