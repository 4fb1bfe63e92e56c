/// Output runner (multi-sheet export)
///
/// Fans in every artifact from every upstream node, in upstream order, and merges
/// them into one composite workbook artifact with one sheet per input.

use crate::error::NodeError;
use crate::pipeline::types::{ArtifactKind, NodeConfig, NodeSpec};
use crate::runtime::artifact::{Artifact, NodeInputs};
use crate::runtime::runners::{NodeRunner, RunnerContext};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

/// Encodes a workbook into the bytes of the exported file
pub trait WorkbookEncoder: Send + Sync {
    fn kind(&self) -> ArtifactKind;
    fn encode(&self, workbook: &Workbook) -> Result<Bytes>;
}

/// Serializes the workbook as a JSON document
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonWorkbookEncoder;

impl WorkbookEncoder for JsonWorkbookEncoder {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Json
    }

    fn encode(&self, workbook: &Workbook) -> Result<Bytes> {
        Ok(serde_json::to_vec_pretty(workbook)?.into())
    }
}

pub struct OutputRunner {
    encoder: Arc<dyn WorkbookEncoder>,
}

impl Default for OutputRunner {
    fn default() -> Self {
        Self::new(Arc::new(JsonWorkbookEncoder))
    }
}

impl OutputRunner {
    pub fn new(encoder: Arc<dyn WorkbookEncoder>) -> Self {
        Self { encoder }
    }
}

#[async_trait]
impl NodeRunner for OutputRunner {
    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
        _ctx: RunnerContext,
    ) -> Result<Vec<Artifact>, NodeError> {
        let NodeConfig::Output(config) = &node.config else {
            return Err(NodeError::runner("output runner received a non-output node"));
        };

        let artifacts = inputs.all_primary();
        if artifacts.is_empty() {
            return Err(NodeError::missing_input(&node.id, "nothing to export"));
        }

        let fallbacks: Vec<String> = artifacts.iter().map(|a| a.stem().to_string()).collect();
        let names = unique_sheet_names(&config.sheet_names, &fallbacks);

        let sheets = artifacts
            .iter()
            .zip(names)
            .map(|(artifact, name)| {
                Ok(Sheet {
                    name,
                    rows: tabulate(artifact)?,
                })
            })
            .collect::<Result<Vec<_>, NodeError>>()?;
        let workbook = Workbook { sheets };

        let payload = self
            .encoder
            .encode(&workbook)
            .map_err(|e| NodeError::runner(format!("failed to encode workbook: {e:#}")))?;
        let kind = self.encoder.kind();
        let file_name = config
            .file_name
            .clone()
            .unwrap_or_else(|| format!("export.{}", kind.extension()));

        tracing::info!(
            "📦 Output '{}' merged {} sheet(s) into {}",
            node.id,
            workbook.sheets.len(),
            file_name
        );
        Ok(vec![Artifact::new(file_name, kind, payload, node.id.as_str())])
    }
}

/// Sheet names for each input, positional from `requested`, falling back per input,
/// with duplicates suffixed `_1`, `_2`, ...
pub fn unique_sheet_names(requested: &[String], fallbacks: &[String]) -> Vec<String> {
    let mut used = HashSet::new();
    fallbacks
        .iter()
        .enumerate()
        .map(|(i, fallback)| {
            let base = requested
                .get(i)
                .map(|n| n.trim())
                .filter(|n| !n.is_empty())
                .unwrap_or(fallback.as_str());

            let mut name = base.to_string();
            let mut suffix = 1;
            while used.contains(&name) {
                name = format!("{base}_{suffix}");
                suffix += 1;
            }
            used.insert(name.clone());
            name
        })
        .collect()
}

fn tabulate(artifact: &Artifact) -> Result<Vec<Vec<String>>, NodeError> {
    match artifact.kind() {
        ArtifactKind::Csv | ArtifactKind::Text => parse_csv(artifact),
        ArtifactKind::Json => parse_json_rows(artifact),
        other => Err(NodeError::runner(format!(
            "cannot export '{}' of kind {:?} as a sheet",
            artifact.name(),
            other
        ))),
    }
}

fn parse_csv(artifact: &Artifact) -> Result<Vec<Vec<String>>, NodeError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(artifact.payload().as_ref());
    reader
        .records()
        .map(|record| {
            record
                .map(|r| r.iter().map(str::to_string).collect())
                .map_err(|e| NodeError::runner(format!("'{}': {}", artifact.name(), e)))
        })
        .collect()
}

/// Array of objects -> header row + one row per object
fn parse_json_rows(artifact: &Artifact) -> Result<Vec<Vec<String>>, NodeError> {
    let value: Value = serde_json::from_slice(artifact.payload())
        .map_err(|e| NodeError::runner(format!("'{}': {}", artifact.name(), e)))?;
    let Value::Array(items) = value else {
        return Err(NodeError::runner(format!(
            "'{}' must be a JSON array to export",
            artifact.name()
        )));
    };

    let mut header: Vec<String> = Vec::new();
    for item in &items {
        if let Value::Object(map) = item {
            for key in map.keys() {
                if !header.contains(key) {
                    header.push(key.clone());
                }
            }
        }
    }

    let cell = |v: Option<&Value>| match v {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };

    let mut rows = vec![header.clone()];
    for item in &items {
        let row = match item {
            Value::Object(map) => header.iter().map(|k| cell(map.get(k))).collect(),
            scalar => vec![cell(Some(scalar))],
        };
        rows.push(row);
    }
    Ok(rows)
}
