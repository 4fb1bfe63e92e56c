/// Trigger runner
///
/// Manual-upload triggers turn the files received through the coordinator's wait
/// handle into artifacts. Inline triggers emit the files embedded in their settings.

use crate::error::NodeError;
use crate::pipeline::types::{
    ArtifactKind, ContentEncoding, InlineFile, NodeConfig, NodeSpec, TriggerConfig,
};
use crate::runtime::artifact::{Artifact, NodeInputs};
use crate::runtime::runners::{NodeRunner, RunnerContext, UploadedFile};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};

#[derive(Debug, Default, Clone, Copy)]
pub struct TriggerRunner;

#[async_trait]
impl NodeRunner for TriggerRunner {
    async fn execute(
        &self,
        node: &NodeSpec,
        _inputs: &NodeInputs,
        ctx: RunnerContext,
    ) -> Result<Vec<Artifact>, NodeError> {
        let NodeConfig::Trigger(config) = &node.config else {
            return Err(NodeError::runner("trigger runner received a non-trigger node"));
        };

        match config {
            TriggerConfig::ManualUpload { accept } => {
                let files = ctx
                    .uploaded
                    .ok_or_else(|| NodeError::runner("no upload was received"))?;
                tracing::debug!("📥 Trigger '{}' received {} file(s)", node.id, files.len());
                accept_uploads(&node.id, accept, files)
            }
            TriggerConfig::Inline { files } => files
                .iter()
                .map(|file| decode_inline(&node.id, file))
                .collect(),
        }
    }
}

fn accept_uploads(
    node_id: &str,
    accept: &[ArtifactKind],
    files: Vec<UploadedFile>,
) -> Result<Vec<Artifact>, NodeError> {
    if files.is_empty() {
        return Err(NodeError::runner("upload contained no files"));
    }

    files
        .into_iter()
        .map(|file| {
            let kind = file
                .kind
                .unwrap_or_else(|| ArtifactKind::from_file_name(&file.name));
            if !accept.is_empty() && !accept.contains(&kind) {
                return Err(NodeError::runner(format!(
                    "'{}' is {:?}, accepted: {:?}",
                    file.name, kind, accept
                )));
            }
            Ok(Artifact::new(file.name, kind, file.payload, node_id))
        })
        .collect()
}

fn decode_inline(node_id: &str, file: &InlineFile) -> Result<Artifact, NodeError> {
    let payload = match file.encoding {
        ContentEncoding::Utf8 => file.content.clone().into_bytes(),
        ContentEncoding::Base64 => STANDARD
            .decode(file.content.trim())
            .map_err(|e| NodeError::runner(format!("'{}' is not valid base64: {}", file.name, e)))?,
    };
    let kind = file
        .kind
        .unwrap_or_else(|| ArtifactKind::from_file_name(&file.name));
    Ok(Artifact::new(file.name.clone(), kind, payload, node_id))
}
