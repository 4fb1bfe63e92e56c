/// SQLite persistence layer
///
/// Stores pipeline definitions as JSON, the append-only run history and the artifact
/// trace log. Definitions keep indexed id/name columns next to the JSON document.

use crate::pipeline::types::Pipeline;
use crate::runtime::artifact::Artifact;
use crate::runtime::history::{HistoryStatus, RunHistory, RunHistoryEntry};
use crate::runtime::trace::{Direction, TraceSink};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqlitePool, Row};

/// Store of pipeline definitions
#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Pipeline>>;
    async fn save(&self, pipeline: &Pipeline) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn list_all(&self) -> Result<Vec<Pipeline>>;
}

/// SQLite-backed storage manager
#[derive(Debug, Clone)]
pub struct PipelineStorage {
    pool: SqlitePool,
}

/// Basic pipeline metadata for listing operations
#[derive(Debug, Serialize)]
pub struct PipelineMetadata {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

/// One persisted artifact trace row
#[derive(Debug, Clone, Serialize)]
pub struct StoredTrace {
    pub node_id: String,
    pub direction: String,
    pub file_name: String,
    pub kind: String,
    pub size: i64,
    pub recorded_at: String,
}

impl PipelineStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes; safe to call multiple times
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipelines (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                definition JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_pipelines_name ON pipelines(name)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS run_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                pipeline_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                status TEXT NOT NULL,
                input_file_name TEXT,
                output_file_name TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_run_history_run ON run_history(run_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS artifact_traces (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                node_id TEXT NOT NULL,
                direction TEXT NOT NULL,
                file_name TEXT NOT NULL,
                kind TEXT NOT NULL,
                size INTEGER NOT NULL,
                recorded_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// List pipelines, most recently updated first
    pub async fn list_metadata(&self) -> Result<Vec<PipelineMetadata>> {
        let rows = sqlx::query(
            "SELECT id, name, created_at, updated_at FROM pipelines ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| PipelineMetadata {
                id: row.get("id"),
                name: row.get("name"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// History entries of one run in append order
    pub async fn history_for_run(&self, run_id: &str) -> Result<Vec<RunHistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, pipeline_id, node_id, timestamp, status, input_file_name, output_file_name
            FROM run_history WHERE run_id = ? ORDER BY id
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let timestamp: String = row.get("timestamp");
            let status: String = row.get("status");
            entries.push(RunHistoryEntry {
                run_id: row.get("run_id"),
                pipeline_id: row.get("pipeline_id"),
                node_id: row.get("node_id"),
                timestamp: DateTime::parse_from_rfc3339(&timestamp)?.with_timezone(&Utc),
                status: match status.as_str() {
                    "done" => HistoryStatus::Done,
                    _ => HistoryStatus::Error,
                },
                input_file_name: row.get("input_file_name"),
                output_file_name: row.get("output_file_name"),
            });
        }
        Ok(entries)
    }

    pub async fn insert_trace(
        &self,
        node_id: &str,
        direction: Direction,
        file_name: &str,
        kind: &str,
        size: usize,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO artifact_traces (node_id, direction, file_name, kind, size) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(node_id)
        .bind(direction.as_str())
        .bind(file_name)
        .bind(kind)
        .bind(size as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn traces_for_node(&self, node_id: &str) -> Result<Vec<StoredTrace>> {
        let rows = sqlx::query(
            r#"
            SELECT node_id, direction, file_name, kind, size, recorded_at
            FROM artifact_traces WHERE node_id = ? ORDER BY id
            "#,
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| StoredTrace {
                node_id: row.get("node_id"),
                direction: row.get("direction"),
                file_name: row.get("file_name"),
                kind: row.get("kind"),
                size: row.get("size"),
                recorded_at: row.get("recorded_at"),
            })
            .collect())
    }
}

#[async_trait]
impl PipelineStore for PipelineStorage {
    async fn load(&self, id: &str) -> Result<Option<Pipeline>> {
        let row = sqlx::query("SELECT definition FROM pipelines WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition: String = row.get("definition");
                Ok(Some(serde_json::from_str(&definition)?))
            }
            None => Ok(None),
        }
    }

    /// Upsert; bumps `updated_at`
    async fn save(&self, pipeline: &Pipeline) -> Result<()> {
        let definition = serde_json::to_string(pipeline)?;

        sqlx::query(
            r#"
            INSERT INTO pipelines (id, name, definition, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&pipeline.id)
        .bind(&pipeline.name)
        .bind(&definition)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pipelines WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_all(&self) -> Result<Vec<Pipeline>> {
        let rows = sqlx::query("SELECT id, definition FROM pipelines ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let mut pipelines = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let definition: String = row.get("definition");
            match serde_json::from_str(&definition) {
                Ok(pipeline) => pipelines.push(pipeline),
                Err(e) => tracing::warn!("⚠️ Skipping unreadable pipeline '{}': {}", id, e),
            }
        }
        Ok(pipelines)
    }
}

#[async_trait]
impl RunHistory for PipelineStorage {
    async fn append(&self, entry: RunHistoryEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO run_history
                (run_id, pipeline_id, node_id, timestamp, status, input_file_name, output_file_name)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.run_id)
        .bind(&entry.pipeline_id)
        .bind(&entry.node_id)
        .bind(entry.timestamp.to_rfc3339())
        .bind(entry.status.as_str())
        .bind(&entry.input_file_name)
        .bind(&entry.output_file_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

impl TraceSink for PipelineStorage {
    /// Fire-and-forget insert; dropped when called outside a tokio runtime
    fn record(&self, node_id: &str, direction: Direction, artifact: &Artifact) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("⚠️ No runtime to record trace for '{}'", node_id);
            return;
        };
        let storage = self.clone();
        let node_id = node_id.to_string();
        let file_name = artifact.name().to_string();
        let kind = artifact.kind().extension().to_string();
        let size = artifact.len();
        handle.spawn(async move {
            if let Err(e) = storage
                .insert_trace(&node_id, direction, &file_name, &kind, size)
                .await
            {
                tracing::warn!("⚠️ Failed to record trace for '{}': {}", node_id, e);
            }
        });
    }
}
