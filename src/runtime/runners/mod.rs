/// Node runners, one per node category
///
/// Every runner implements `NodeRunner::execute`. The coordinator picks the runner
/// through `NodeRunners::runner_for`, a plain match over `NodeCategory`.

pub mod action;
pub mod feedback;
pub mod integration;
pub mod output;
pub mod trigger;

use crate::error::NodeError;
use crate::pipeline::types::{ArtifactKind, NodeCategory, NodeSpec};
use crate::runtime::artifact::{Artifact, NodeInputs};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

pub use action::{ActionRunner, HttpTransformService, TransformRequest, TransformResponse, TransformService};
pub use feedback::FeedbackRunner;
pub use integration::IntegrationRunner;
pub use output::{JsonWorkbookEncoder, OutputRunner, Sheet, Workbook, WorkbookEncoder};
pub use trigger::TriggerRunner;

/// A file handed over by the UI to resolve a manual upload
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub kind: Option<ArtifactKind>,
    pub payload: Bytes,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            payload: payload.into(),
        }
    }
}

/// Per-invocation context handed to a runner
#[derive(Debug, Default)]
pub struct RunnerContext {
    /// Files received through the node's upload wait handle (interactive triggers only)
    pub uploaded: Option<Vec<UploadedFile>>,
}

#[async_trait]
pub trait NodeRunner: Send + Sync {
    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
        ctx: RunnerContext,
    ) -> Result<Vec<Artifact>, NodeError>;
}

/// The closed set of runners the coordinator dispatches to
pub struct NodeRunners {
    trigger: TriggerRunner,
    action: ActionRunner,
    output: OutputRunner,
    feedback: FeedbackRunner,
    integration: IntegrationRunner,
}

impl NodeRunners {
    pub fn new(transform: Arc<dyn TransformService>) -> Self {
        Self {
            trigger: TriggerRunner,
            action: ActionRunner::new(transform),
            output: OutputRunner::default(),
            feedback: FeedbackRunner,
            integration: IntegrationRunner::default(),
        }
    }

    pub fn with_workbook_encoder(mut self, encoder: Arc<dyn WorkbookEncoder>) -> Self {
        self.output = OutputRunner::new(encoder);
        self
    }

    pub fn with_integration_timeout(mut self, timeout: Duration) -> Self {
        self.integration = IntegrationRunner::with_timeout(timeout);
        self
    }

    pub fn runner_for(&self, category: NodeCategory) -> &dyn NodeRunner {
        match category {
            NodeCategory::Trigger => &self.trigger,
            NodeCategory::Action => &self.action,
            NodeCategory::Output => &self.output,
            NodeCategory::Loop => &self.feedback,
            NodeCategory::Integration => &self.integration,
        }
    }
}
