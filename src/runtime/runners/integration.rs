/// Integration runner
///
/// Calls a third-party HTTP endpoint. For POST/PUT/PATCH the node's primary input
/// artifacts are sent as multipart `files` parts; the response body becomes a single
/// artifact. Non-success statuses fail the node.

use crate::error::NodeError;
use crate::pipeline::types::{ArtifactKind, NodeConfig, NodeSpec};
use crate::runtime::artifact::{Artifact, NodeInputs};
use crate::runtime::runners::{NodeRunner, RunnerContext};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct IntegrationRunner {
    client: reqwest::Client,
}

impl Default for IntegrationRunner {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }
}

impl IntegrationRunner {
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("⚠️ Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self { client }
    }
}

#[async_trait]
impl NodeRunner for IntegrationRunner {
    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
        _ctx: RunnerContext,
    ) -> Result<Vec<Artifact>, NodeError> {
        let NodeConfig::Integration(config) = &node.config else {
            return Err(NodeError::runner("integration runner received a non-integration node"));
        };

        let artifacts = inputs.all_primary();
        if artifacts.is_empty() {
            return Err(NodeError::missing_input(&node.id, "nothing to send"));
        }

        let method = config.method.to_uppercase();
        tracing::debug!("🌍 Integration '{}': {} {}", node.id, method, config.url);

        let mut request = match method.as_str() {
            "GET" => self.client.get(&config.url),
            "POST" => self.client.post(&config.url),
            "PUT" => self.client.put(&config.url),
            "PATCH" => self.client.patch(&config.url),
            "DELETE" => self.client.delete(&config.url),
            _ => return Err(NodeError::runner(format!("unsupported HTTP method: {method}"))),
        };

        for (key, value) in &config.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        if matches!(method.as_str(), "POST" | "PUT" | "PATCH") {
            let mut form = Form::new();
            for artifact in &artifacts {
                let part = Part::bytes(artifact.payload().to_vec())
                    .file_name(artifact.name().to_string())
                    .mime_str(artifact.kind().mime())
                    .map_err(NodeError::runner)?;
                form = form.part("files", part);
            }
            request = request.multipart(form);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::runner(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| NodeError::runner(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(NodeError::runner(format!(
                "{} {} returned {}",
                method, config.url, status
            )));
        }

        let kind = config.output_kind.unwrap_or_else(|| {
            content_type
                .as_deref()
                .map(ArtifactKind::from_content_type)
                .unwrap_or(ArtifactKind::Binary)
        });
        let name = config
            .output_name
            .clone()
            .unwrap_or_else(|| format!("{}.{}", node.id, kind.extension()));

        tracing::info!("✅ Integration '{}' completed (status: {})", node.id, status);
        Ok(vec![Artifact::new(name, kind, body, node.id.as_str())])
    }
}
