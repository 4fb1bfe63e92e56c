#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use pipeloom::pipeline::types::{
    ActionConfig, ArtifactKind, EdgeSpec, InlineFile, LoopConfig, NodeConfig, NodeSpec,
    OutputConfig, TriggerConfig, FEEDBACK_PORT,
};
use pipeloom::pipeline::Graph;
use pipeloom::runtime::runners::{NodeRunners, TransformRequest, TransformResponse, TransformService};
use pipeloom::runtime::{
    Artifact, EngineServices, MemoryRunHistory, MemoryTraceSink, NodeStatus, RunHandle, RunState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Transformation stand-in driven by the prompt text
///
/// - `fail` returns an error
/// - `empty` returns no artifacts
/// - `sleep:<ms>` waits before echoing
/// - anything else echoes the first input as `<prompt>.csv`
#[derive(Default)]
pub struct MockTransform {
    calls: AtomicUsize,
    requests: Mutex<Vec<TransformRequest>>,
}

impl MockTransform {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| r.prompt_text.clone())
            .collect()
    }
}

#[async_trait]
impl TransformService for MockTransform {
    async fn transform(&self, request: TransformRequest) -> Result<TransformResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let prompt = request.prompt_text.as_str();
        if prompt == "fail" {
            anyhow::bail!("model refused the request");
        }
        if prompt == "empty" {
            return Ok(TransformResponse::default());
        }
        let name = match prompt.strip_prefix("sleep:") {
            Some(ms) => {
                tokio::time::sleep(Duration::from_millis(ms.parse().unwrap_or(0))).await;
                "slept"
            }
            None => prompt,
        };

        let first = request.input_artifacts[0].clone();
        Ok(TransformResponse {
            output_artifacts: vec![Artifact::new(
                format!("{name}.csv"),
                ArtifactKind::Csv,
                first.payload().clone(),
                "mock",
            )],
        })
    }
}

pub struct Harness {
    pub services: EngineServices,
    pub transform: Arc<MockTransform>,
    pub traces: Arc<MemoryTraceSink>,
    pub history: Arc<MemoryRunHistory>,
}

pub fn harness() -> Harness {
    let transform = Arc::new(MockTransform::default());
    let traces = Arc::new(MemoryTraceSink::new());
    let history = Arc::new(MemoryRunHistory::new());
    let services = EngineServices::new(
        NodeRunners::new(transform.clone()),
        traces.clone(),
        history.clone(),
    );
    Harness {
        services,
        transform,
        traces,
        history,
    }
}

pub fn graph(nodes: Vec<NodeSpec>, edges: Vec<EdgeSpec>) -> Arc<Graph> {
    Arc::new(Graph::build(nodes, edges).unwrap())
}

pub fn upload(id: &str, y: f64) -> NodeSpec {
    NodeSpec::new(id, NodeConfig::Trigger(TriggerConfig::ManualUpload { accept: vec![] })).at(0.0, y)
}

pub fn inline(id: &str, y: f64, files: &[(&str, &str)]) -> NodeSpec {
    let files = files
        .iter()
        .map(|(name, content)| InlineFile {
            name: name.to_string(),
            kind: None,
            content: content.to_string(),
            encoding: Default::default(),
        })
        .collect();
    NodeSpec::new(id, NodeConfig::Trigger(TriggerConfig::Inline { files })).at(0.0, y)
}

pub fn action(id: &str, prompt: &str) -> NodeSpec {
    NodeSpec::new(
        id,
        NodeConfig::Action(ActionConfig {
            prompt: prompt.into(),
            output_type: ArtifactKind::Csv,
            use_template: false,
            output_name: None,
        }),
    )
}

pub fn export(id: &str, sheet_names: &[&str]) -> NodeSpec {
    NodeSpec::new(
        id,
        NodeConfig::Output(OutputConfig {
            file_name: None,
            sheet_names: sheet_names.iter().map(|s| s.to_string()).collect(),
        }),
    )
}

pub fn append(id: &str) -> NodeSpec {
    NodeSpec::new(id, NodeConfig::Loop(LoopConfig::default()))
}

pub fn edge(source: &str, target: &str) -> EdgeSpec {
    EdgeSpec::new(source, target)
}

pub fn feedback(source: &str, target: &str) -> EdgeSpec {
    EdgeSpec::new(source, target).into_port(FEEDBACK_PORT)
}

/// Wait until `node` reaches `state`, failing the test after two seconds
pub async fn reach(handle: &RunHandle, node: &str, state: RunState) -> NodeStatus {
    let mut rx = handle.subscribe(node).expect("unknown node");
    let reached = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let status = rx.borrow_and_update().clone();
            if status.state == state {
                return status;
            }
            rx.changed().await.expect("state board dropped");
        }
    })
    .await;
    reached.unwrap_or_else(|_| panic!("'{node}' never reached {state:?}"))
}

/// `RunHandle::wait` with a test timeout
pub async fn settle(handle: &RunHandle) -> pipeloom::RunReport {
    tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("run did not settle")
}
