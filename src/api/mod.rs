/// HTTP API Layer
///
/// REST endpoints for pipeline management and run control:
/// - Pipeline CRUD and connection validation
/// - Run start, status, abort
/// - Manual upload resolution and artifact download

// Pipeline management endpoints (POST/GET/PUT/DELETE) and run start
pub mod pipelines;

// Run observation, upload and artifact endpoints
pub mod runs;

// Re-export router builders
pub use pipelines::{create_pipeline_routes, AppState};
pub use runs::{create_run_routes, RunTable};
