/// Loop runner: CSV append with feedback
///
/// A single accumulation pass. Primary inputs are appended in upstream order, then
/// any artifacts delivered over an armed feedback edge. Header rows identical to the
/// first input's header are dropped from later inputs.

use crate::error::NodeError;
use crate::pipeline::types::{ArtifactKind, NodeConfig, NodeSpec};
use crate::runtime::artifact::{Artifact, NodeInputs};
use crate::runtime::runners::{NodeRunner, RunnerContext};
use async_trait::async_trait;

const DEFAULT_OUTPUT: &str = "appended.csv";

#[derive(Debug, Default, Clone, Copy)]
pub struct FeedbackRunner;

#[async_trait]
impl NodeRunner for FeedbackRunner {
    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
        _ctx: RunnerContext,
    ) -> Result<Vec<Artifact>, NodeError> {
        let NodeConfig::Loop(config) = &node.config else {
            return Err(NodeError::runner("loop runner received a non-loop node"));
        };

        let mut parts = inputs.all_primary();
        if parts.is_empty() {
            return Err(NodeError::missing_input(&node.id, "nothing to append"));
        }
        let feedback = inputs.feedback();
        if !feedback.is_empty() {
            tracing::debug!("🔁 Loop '{}' appending {} feedback artifact(s)", node.id, feedback.len());
        }
        parts.extend(feedback);

        let payload = append_csv(&parts)?;
        let name = config.output_name.as_deref().unwrap_or(DEFAULT_OUTPUT);
        Ok(vec![Artifact::new(name, ArtifactKind::Csv, payload, node.id.as_str())])
    }
}

fn append_csv(parts: &[Artifact]) -> Result<Vec<u8>, NodeError> {
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(Vec::new());
    let mut header: Option<csv::StringRecord> = None;

    for artifact in parts {
        if artifact.kind() != ArtifactKind::Csv {
            return Err(NodeError::runner(format!(
                "cannot append '{}' of kind {:?}",
                artifact.name(),
                artifact.kind()
            )));
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(artifact.payload().as_ref());

        for (i, record) in reader.records().enumerate() {
            let record =
                record.map_err(|e| NodeError::runner(format!("'{}': {}", artifact.name(), e)))?;
            let repeated_header = header
                .as_ref()
                .is_some_and(|h| i == 0 && h.iter().eq(record.iter()));
            if repeated_header {
                continue;
            }
            if header.is_none() {
                header = Some(record.clone());
            }
            writer
                .write_record(&record)
                .map_err(|e| NodeError::runner(format!("failed to write row: {e}")))?;
        }
    }

    writer
        .into_inner()
        .map_err(|e| NodeError::runner(format!("failed to flush csv: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{InputPort, LoopConfig};
    use crate::runtime::artifact::InputGroup;

    fn csv(name: &str, body: &str) -> Artifact {
        Artifact::new(name, ArtifactKind::Csv, body.to_string(), "src")
    }

    fn node() -> NodeSpec {
        NodeSpec::new("append", NodeConfig::Loop(LoopConfig::default()))
    }

    #[tokio::test]
    async fn appends_primary_then_feedback_without_repeating_headers() {
        let inputs = NodeInputs::new(vec![
            InputGroup {
                source: "a".into(),
                port: InputPort::Primary,
                artifacts: vec![csv("a.csv", "pn,qty\nR1,2\n")],
            },
            InputGroup {
                source: "b".into(),
                port: InputPort::Primary,
                artifacts: vec![csv("b.csv", "pn,qty\nC3,5\n")],
            },
            InputGroup {
                source: "body".into(),
                port: InputPort::Feedback,
                artifacts: vec![csv("prev.csv", "pn,qty\nU9,1\n")],
            },
        ]);

        let out = FeedbackRunner
            .execute(&node(), &inputs, RunnerContext::default())
            .await
            .unwrap();
        assert_eq!(out[0].name(), "appended.csv");
        assert_eq!(out[0].text(), Some("pn,qty\nR1,2\nC3,5\nU9,1\n"));
    }

    #[tokio::test]
    async fn non_csv_input_fails() {
        let inputs = NodeInputs::new(vec![InputGroup {
            source: "a".into(),
            port: InputPort::Primary,
            artifacts: vec![Artifact::new("x.json", ArtifactKind::Json, "[]", "a")],
        }]);
        let err = FeedbackRunner
            .execute(&node(), &inputs, RunnerContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Runner(_)));
    }
}
