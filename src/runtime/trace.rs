/// Artifact trace sink
///
/// Records every artifact flowing into or out of a node. Recording is one-way and
/// best-effort: implementations must return immediately and swallow their own
/// failures.

use crate::runtime::artifact::Artifact;
use parking_lot::Mutex;
use serde::Serialize;

/// Direction of an artifact relative to the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

pub trait TraceSink: Send + Sync {
    fn record(&self, node_id: &str, direction: Direction, artifact: &Artifact);
}

/// Writes traces to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTraceSink;

impl TraceSink for LogTraceSink {
    fn record(&self, node_id: &str, direction: Direction, artifact: &Artifact) {
        tracing::debug!(
            "🧾 {} {} '{}' ({:?}, {} bytes)",
            node_id,
            direction.as_str(),
            artifact.name(),
            artifact.kind(),
            artifact.len()
        );
    }
}

/// One recorded trace
#[derive(Debug, Clone)]
pub struct TraceRecord {
    pub node_id: String,
    pub direction: Direction,
    pub artifact: Artifact,
}

/// Keeps traces in memory
#[derive(Debug, Default)]
pub struct MemoryTraceSink {
    records: Mutex<Vec<TraceRecord>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().clone()
    }
}

impl TraceSink for MemoryTraceSink {
    fn record(&self, node_id: &str, direction: Direction, artifact: &Artifact) {
        self.records.lock().push(TraceRecord {
            node_id: node_id.to_string(),
            direction,
            artifact: artifact.clone(),
        });
    }
}
