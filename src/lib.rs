/// pipeloom: runtime for visual file-processing pipelines
///
/// Validates pipeline graphs drawn on a canvas and executes them: manual upload
/// triggers, AI transforms, HTTP integrations, CSV append loops and multi-sheet
/// exports, with per-node run state observable while the run progresses.

// Core configuration and setup
pub mod config;

// Error taxonomy shared across layers
pub mod error;

// Pipeline definitions, validated graphs, storage and registry
pub mod pipeline;

// Graph scheduler, node runners and run state
pub mod runtime;

// HTTP API layer - pipeline management and run control
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{GraphError, NodeError, UploadProtocolError};
pub use pipeline::{EdgeSpec, Graph, NodeConfig, NodeSpec, Pipeline};
pub use runtime::{Artifact, ExecutionCoordinator, RunHandle, RunReport, RunState};
pub use server::start_server;
