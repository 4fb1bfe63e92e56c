/// Runtime Execution Engine
///
/// Schedules a validated pipeline graph: per-node run state, artifact flow between
/// connected nodes, the manual upload handshake and run cancellation.

// Immutable file payloads and the per-node input view
pub mod artifact;

// RunState machine and the per-graph state board
pub mod state;

// Artifact tracing and append-only run history
pub mod trace;
pub mod history;

// One runner per node category
pub mod runners;

// Graph scheduler driving a single run
pub mod coordinator;

pub use artifact::{Artifact, InputGroup, NodeInputs};
pub use coordinator::{start_run, EngineServices, ExecutionCoordinator, RunHandle, RunReport};
pub use history::{HistoryStatus, MemoryRunHistory, RunHistory, RunHistoryEntry};
pub use runners::{NodeRunner, NodeRunners, RunnerContext, UploadedFile};
pub use state::{NodeStatus, RunState, StateBoard, StateChange};
pub use trace::{Direction, LogTraceSink, MemoryTraceSink, TraceSink};
