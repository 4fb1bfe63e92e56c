/// Append-only run history
///
/// One entry per finished node execution, independent of the live `RunState`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Done,
    Error,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    pub run_id: String,
    pub pipeline_id: String,
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: HistoryStatus,
    pub input_file_name: Option<String>,
    pub output_file_name: Option<String>,
}

#[async_trait]
pub trait RunHistory: Send + Sync {
    async fn append(&self, entry: RunHistoryEntry) -> Result<()>;
}

/// Keeps history entries in memory
#[derive(Debug, Default)]
pub struct MemoryRunHistory {
    entries: Mutex<Vec<RunHistoryEntry>>,
}

impl MemoryRunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<RunHistoryEntry> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl RunHistory for MemoryRunHistory {
    async fn append(&self, entry: RunHistoryEntry) -> Result<()> {
        self.entries.lock().push(entry);
        Ok(())
    }
}
