/// Action runner (AI transform)
///
/// Sends the working set of input artifacts, the node's prompt and an output kind
/// hint to a transformation service and emits whatever artifacts come back. The
/// remote call is the runner's only suspension point. Failures are not retried.

use crate::error::NodeError;
use crate::pipeline::types::{ArtifactKind, NodeConfig, NodeSpec};
use crate::runtime::artifact::{Artifact, NodeInputs};
use crate::runtime::runners::{NodeRunner, RunnerContext};
use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Request sent to the transformation service
#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub input_artifacts: Vec<Artifact>,
    pub prompt_text: String,
    pub output_kind_hint: ArtifactKind,
    pub template_artifact: Option<Artifact>,
}

/// Artifacts returned by the transformation service
#[derive(Debug, Clone, Default)]
pub struct TransformResponse {
    pub output_artifacts: Vec<Artifact>,
}

/// Opaque async transformation collaborator
#[async_trait]
pub trait TransformService: Send + Sync {
    async fn transform(&self, request: TransformRequest) -> Result<TransformResponse>;
}

pub struct ActionRunner {
    service: Arc<dyn TransformService>,
}

impl ActionRunner {
    pub fn new(service: Arc<dyn TransformService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl NodeRunner for ActionRunner {
    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
        _ctx: RunnerContext,
    ) -> Result<Vec<Artifact>, NodeError> {
        let NodeConfig::Action(config) = &node.config else {
            return Err(NodeError::runner("action runner received a non-action node"));
        };

        let working_set = inputs
            .first_available()
            .ok_or_else(|| NodeError::missing_input(&node.id, "no upstream artifacts"))?;

        let template_artifact = if config.use_template {
            let template = inputs
                .template()
                .ok_or_else(|| NodeError::missing_input(&node.id, "template input is empty"))?;
            Some(template.clone())
        } else {
            None
        };

        tracing::debug!(
            "🤖 Action '{}' transforming {} artifact(s) into {:?}",
            node.id,
            working_set.len(),
            config.output_type
        );

        let response = self
            .service
            .transform(TransformRequest {
                input_artifacts: working_set.to_vec(),
                prompt_text: config.prompt.clone(),
                output_kind_hint: config.output_type,
                template_artifact,
            })
            .await
            .map_err(|e| NodeError::runner(format!("transformation failed: {e:#}")))?;

        if response.output_artifacts.is_empty() {
            return Err(NodeError::runner("transformation returned no artifacts"));
        }

        let rename = match response.output_artifacts.len() {
            1 => config.output_name.as_deref(),
            _ => None,
        };
        Ok(response
            .output_artifacts
            .iter()
            .map(|a| a.reissue(&node.id, rename))
            .collect())
    }
}

/// Wire shape of the transformation route's JSON response
#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    outputs: Vec<WireArtifact>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireArtifact {
    name: String,
    #[serde(default)]
    kind: Option<ArtifactKind>,
    /// base64 encoded payload
    content: String,
}

/// Transformation service reached over HTTP multipart
///
/// POSTs `prompt`, `output_type`, every input as a `files` part and an optional
/// `template` part. Expects `{ "outputs": [{ "name", "kind", "content" }] }` or
/// `{ "error": "..." }`.
#[derive(Debug, Clone)]
pub struct HttpTransformService {
    client: reqwest::Client,
    url: String,
}

impl HttpTransformService {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    fn part(artifact: &Artifact) -> Result<Part> {
        Ok(Part::bytes(artifact.payload().to_vec())
            .file_name(artifact.name().to_string())
            .mime_str(artifact.kind().mime())?)
    }
}

#[async_trait]
impl TransformService for HttpTransformService {
    async fn transform(&self, request: TransformRequest) -> Result<TransformResponse> {
        let mut form = Form::new()
            .text("prompt", request.prompt_text)
            .text("output_type", request.output_kind_hint.extension());
        for artifact in &request.input_artifacts {
            form = form.part("files", Self::part(artifact)?);
        }
        if let Some(template) = &request.template_artifact {
            form = form.part("template", Self::part(template)?);
        }

        tracing::debug!("🚀 Sending transform request to {}", self.url);
        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Transform request failed: {}", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read transform response: {}", e))?;

        let wire: WireResponse = serde_json::from_str(&body).map_err(|e| {
            anyhow::anyhow!("Malformed transform response (status {}): {}", status, e)
        })?;
        if let Some(error) = wire.error {
            return Err(anyhow::anyhow!("Transform service error: {}", error));
        }
        if !status.is_success() {
            return Err(anyhow::anyhow!("Transform service returned {}", status));
        }

        let output_artifacts = wire
            .outputs
            .into_iter()
            .map(|out| {
                let payload = STANDARD.decode(out.content.trim()).map_err(|e| {
                    anyhow::anyhow!("Output '{}' is not valid base64: {}", out.name, e)
                })?;
                let kind = out
                    .kind
                    .unwrap_or_else(|| ArtifactKind::from_file_name(&out.name));
                Ok(Artifact::new(out.name, kind, payload, String::new()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(TransformResponse { output_artifacts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{ActionConfig, InputPort};
    use crate::runtime::artifact::InputGroup;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<TransformRequest>>,
    }

    #[async_trait]
    impl TransformService for Recording {
        async fn transform(&self, request: TransformRequest) -> Result<TransformResponse> {
            self.seen.lock().push(request.clone());
            Ok(TransformResponse {
                output_artifacts: vec![Artifact::new(
                    "raw.csv",
                    ArtifactKind::Csv,
                    "a\n1\n",
                    "remote",
                )],
            })
        }
    }

    fn action(use_template: bool) -> NodeSpec {
        NodeSpec::new(
            "clean",
            NodeConfig::Action(ActionConfig {
                prompt: "dedupe rows".into(),
                output_type: ArtifactKind::Csv,
                use_template,
                output_name: Some("out.csv".into()),
            }),
        )
    }

    fn group(source: &str, port: InputPort, names: &[&str]) -> InputGroup {
        InputGroup {
            source: source.into(),
            port,
            artifacts: names
                .iter()
                .map(|n| Artifact::new(*n, ArtifactKind::Csv, "x\n", source))
                .collect(),
        }
    }

    #[tokio::test]
    async fn uses_first_available_group_and_template() {
        let service = Arc::new(Recording::default());
        let runner = ActionRunner::new(service.clone());
        let inputs = NodeInputs::new(vec![
            group("empty", InputPort::Primary, &[]),
            group("bom", InputPort::Primary, &["bom.csv"]),
            group("other", InputPort::Primary, &["other.csv"]),
            group("tpl", InputPort::Template, &["layout.csv"]),
        ]);

        let out = runner
            .execute(&action(true), &inputs, RunnerContext::default())
            .await
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name(), "out.csv");
        assert_eq!(out[0].produced_by(), "clean");

        let seen = service.seen.lock();
        assert_eq!(seen[0].input_artifacts.len(), 1);
        assert_eq!(seen[0].input_artifacts[0].name(), "bom.csv");
        assert_eq!(seen[0].prompt_text, "dedupe rows");
        assert_eq!(
            seen[0].template_artifact.as_ref().map(Artifact::name),
            Some("layout.csv")
        );
    }

    #[tokio::test]
    async fn empty_inputs_are_missing_input() {
        let runner = ActionRunner::new(Arc::new(Recording::default()));
        let err = runner
            .execute(&action(false), &NodeInputs::default(), RunnerContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::MissingInput { .. }));
    }
}
