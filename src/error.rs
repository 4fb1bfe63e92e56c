/// Error taxonomy for graph construction, node execution and the upload protocol
///
/// Structural problems (`GraphError`) are raised before a run starts. Node-level
/// failures (`NodeError`) are contained by the coordinator and only ever surface as
/// node state. `UploadProtocolError` signals a UI/engine desynchronization and is
/// returned loudly to whoever tried to resolve the upload.

use crate::pipeline::types::{ArtifactKind, NodeId};
use thiserror::Error;

/// Graph validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("edge {from} -> {target} references missing node '{missing}'")]
    DanglingEdge {
        from: NodeId,
        target: NodeId,
        missing: NodeId,
    },

    #[error("duplicate node id: {0}")]
    DuplicateNode(NodeId),

    #[error("self-loop on node '{0}' is only allowed through the feedback port")]
    SelfLoop(NodeId),

    #[error("forward edges form a cycle through node '{0}'")]
    Cycle(NodeId),

    #[error("cannot connect {from} ({output:?}) to {target}: accepts {accepted:?}")]
    IncompatibleConnection {
        from: NodeId,
        target: NodeId,
        output: ArtifactKind,
        accepted: Vec<ArtifactKind>,
    },
}

/// Failures local to a single node execution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("node '{node}' has no input artifacts: {detail}")]
    MissingInput { node: NodeId, detail: String },

    #[error("runner failure: {0}")]
    Runner(String),

    #[error("run aborted")]
    Cancelled,
}

impl NodeError {
    pub fn missing_input(node: &str, detail: impl Into<String>) -> Self {
        Self::MissingInput {
            node: node.to_string(),
            detail: detail.into(),
        }
    }

    pub fn runner(message: impl std::fmt::Display) -> Self {
        Self::Runner(message.to_string())
    }
}

/// Violations of the one-shot upload handshake
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadProtocolError {
    #[error("upload for node '{0}' was already resolved")]
    AlreadyResolved(NodeId),

    #[error("node '{0}' is not awaiting an upload")]
    NotAwaiting(NodeId),

    #[error("upload wait for node '{0}' was dropped before resolution")]
    Closed(NodeId),
}
