/// Pipeline Definition Layer
///
/// Pipeline definitions as the canvas saves them, the validated runtime graph built
/// from them, SQLite persistence and a hot-reload registry of validated graphs.

// Node, edge and artifact-kind definitions
pub mod types;

// Validated, immutable runtime graph
pub mod graph;

// SQLite persistence for definitions, run history and artifact traces
pub mod storage;

// Hot-reload registry using ArcSwap
pub mod registry;

pub use graph::Graph;
pub use registry::PipelineRegistry;
pub use storage::{PipelineMetadata, PipelineStorage, PipelineStore};
pub use types::{
    ArtifactKind, EdgeSpec, InputPort, NodeCategory, NodeConfig, NodeId, NodeSpec, Pipeline,
};
