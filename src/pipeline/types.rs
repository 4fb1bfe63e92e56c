/// Core pipeline type definitions
///
/// Defines the persisted shape of a pipeline: nodes, edges and the category-specific
/// configuration each node carries. These types are serialized to JSON for storage
/// and validated into a `Graph` before every run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Node identifier, unique within one pipeline
pub type NodeId = String;

/// Target port name that marks an edge as a feedback (back) edge
pub const FEEDBACK_PORT: &str = "bottom";

/// Target port name that routes an artifact into an action node's template slot
pub const TEMPLATE_PORT: &str = "template";

/// A complete pipeline definition as drawn on the canvas
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Unique pipeline identifier (e.g., "bom-cleanup")
    pub id: String,
    /// Human-readable pipeline name
    pub name: String,
    /// Nodes in declaration order
    pub nodes: Vec<NodeSpec>,
    /// Directed connections between nodes
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

/// Declared content kind of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Csv,
    Json,
    Xlsx,
    Docx,
    Pdf,
    Text,
    Image,
    Video,
    Binary,
}

impl ArtifactKind {
    /// Guess the kind from a file extension (case-insensitive)
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Self::Csv,
            "json" => Self::Json,
            "xlsx" | "xls" => Self::Xlsx,
            "docx" => Self::Docx,
            "pdf" => Self::Pdf,
            "txt" | "md" => Self::Text,
            "png" | "jpg" | "jpeg" | "gif" | "webp" => Self::Image,
            "mp4" | "mov" | "webm" | "mkv" => Self::Video,
            _ => Self::Binary,
        }
    }

    /// Guess the kind from a file name's extension
    pub fn from_file_name(name: &str) -> Self {
        match name.rsplit_once('.') {
            Some((_, ext)) => Self::from_extension(ext),
            None => Self::Binary,
        }
    }

    /// Guess the kind from an HTTP content type
    pub fn from_content_type(content_type: &str) -> Self {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "text/csv" => Self::Csv,
            "application/json" => Self::Json,
            "application/pdf" => Self::Pdf,
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => Self::Xlsx,
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Self::Docx
            }
            m if m.starts_with("text/") => Self::Text,
            m if m.starts_with("image/") => Self::Image,
            m if m.starts_with("video/") => Self::Video,
            _ => Self::Binary,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Xlsx => "xlsx",
            Self::Docx => "docx",
            Self::Pdf => "pdf",
            Self::Text => "txt",
            Self::Image => "png",
            Self::Video => "mp4",
            Self::Binary => "bin",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Json => "application/json",
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Self::Pdf => "application/pdf",
            Self::Text => "text/plain",
            Self::Image => "image/png",
            Self::Video => "video/mp4",
            Self::Binary => "application/octet-stream",
        }
    }
}

/// Node category, one runner per variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    Trigger,
    Action,
    Output,
    Loop,
    Integration,
}

impl NodeCategory {
    /// Whether the node must receive at least one upstream artifact to run
    pub fn requires_input(&self) -> bool {
        !matches!(self, Self::Trigger)
    }
}

/// Canvas position, only used for root ordering by the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Declared compatibility of a node's inputs and output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoContract {
    /// Accepted input kinds
    pub inputs: Vec<ArtifactKind>,
    /// Produced output kind
    pub output: ArtifactKind,
}

/// A single vertex of the pipeline graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique node identifier within the pipeline (e.g., "upload-bom")
    pub id: NodeId,
    /// Optional display label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Canvas position; `y` orders independent roots
    #[serde(default)]
    pub position: Position,
    /// Optional input/output contract; absence is permissive
    #[serde(default, rename = "ioContract", skip_serializing_if = "Option::is_none")]
    pub io_contract: Option<IoContract>,
    /// Category-specific configuration
    pub config: NodeConfig,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            id: id.into(),
            label: None,
            position: Position::default(),
            io_contract: None,
            config,
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }

    pub fn with_contract(mut self, inputs: Vec<ArtifactKind>, output: ArtifactKind) -> Self {
        self.io_contract = Some(IoContract { inputs, output });
        self
    }

    pub fn category(&self) -> NodeCategory {
        self.config.category()
    }

    /// Interactive nodes need a human to supply files before they can complete
    pub fn is_interactive(&self) -> bool {
        matches!(
            self.config,
            NodeConfig::Trigger(TriggerConfig::ManualUpload { .. })
        )
    }
}

/// Category-specific node configuration
///
/// Serialized adjacently tagged: `{ "category": "action", "settings": { ... } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "category", content = "settings", rename_all = "snake_case")]
pub enum NodeConfig {
    Trigger(TriggerConfig),
    Action(ActionConfig),
    Output(OutputConfig),
    Loop(LoopConfig),
    Integration(IntegrationConfig),
}

impl NodeConfig {
    pub fn category(&self) -> NodeCategory {
        match self {
            Self::Trigger(_) => NodeCategory::Trigger,
            Self::Action(_) => NodeCategory::Action,
            Self::Output(_) => NodeCategory::Output,
            Self::Loop(_) => NodeCategory::Loop,
            Self::Integration(_) => NodeCategory::Integration,
        }
    }
}

/// Trigger nodes start a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Waits for a human to upload one or more files
    /// Expected settings: { "mode": "manual_upload", "accept": ["csv", "xlsx"] }
    ManualUpload {
        #[serde(default)]
        accept: Vec<ArtifactKind>,
    },
    /// Emits files embedded in the definition without waiting
    /// Expected settings: { "mode": "inline", "files": [{ "name": "seed.csv", "content": "a,b" }] }
    Inline { files: Vec<InlineFile> },
}

/// A file embedded in an inline trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineFile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ArtifactKind>,
    pub content: String,
    #[serde(default)]
    pub encoding: ContentEncoding,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    #[default]
    Utf8,
    Base64,
}

/// AI transform configuration
/// Expected settings: { "prompt": "normalize part numbers", "output_type": "csv", "use_template": false }
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    pub prompt: String,
    #[serde(default = "default_output_type")]
    pub output_type: ArtifactKind,
    #[serde(default)]
    pub use_template: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
}

fn default_output_type() -> ArtifactKind {
    ArtifactKind::Csv
}

/// Export configuration
/// Expected settings: { "file_name": "report.xlsx", "sheet_names": ["Parts", "Prices"] }
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default)]
    pub sheet_names: Vec<String>,
}

/// CSV append with feedback
/// Expected settings: { "output_name": "accumulated.csv" }
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
}

/// Third-party HTTP integration
/// Expected settings: { "url": "https://api.example.com/enrich", "method": "POST", "headers": {...} }
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_kind: Option<ArtifactKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
}

fn default_method() -> String {
    "POST".to_string()
}

/// Directed connection between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeSpec {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<String>,
}

/// Which input slot of the target an edge feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputPort {
    Primary,
    Template,
    Feedback,
}

impl EdgeSpec {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            source_port: None,
            target_port: None,
        }
    }

    pub fn into_port(mut self, port: impl Into<String>) -> Self {
        self.target_port = Some(port.into());
        self
    }

    pub fn input_port(&self) -> InputPort {
        match self.target_port.as_deref() {
            Some(FEEDBACK_PORT) => InputPort::Feedback,
            Some(TEMPLATE_PORT) => InputPort::Template,
            _ => InputPort::Primary,
        }
    }

    pub fn is_feedback(&self) -> bool {
        self.input_port() == InputPort::Feedback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_config_round_trips_adjacently_tagged() {
        let node: NodeSpec = serde_json::from_value(json!({
            "id": "upload",
            "position": { "x": 0.0, "y": 10.0 },
            "config": {
                "category": "trigger",
                "settings": { "mode": "manual_upload", "accept": ["csv"] }
            }
        }))
        .unwrap();

        assert_eq!(node.category(), NodeCategory::Trigger);
        assert!(node.is_interactive());

        let action: NodeSpec = serde_json::from_value(json!({
            "id": "clean",
            "config": { "category": "action", "settings": { "prompt": "dedupe" } }
        }))
        .unwrap();
        match action.config {
            NodeConfig::Action(cfg) => {
                assert_eq!(cfg.output_type, ArtifactKind::Csv);
                assert!(!cfg.use_template);
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn edge_ports_classify_inputs() {
        let edge: EdgeSpec = serde_json::from_value(json!({
            "source": "a", "target": "b", "targetPort": "bottom"
        }))
        .unwrap();
        assert!(edge.is_feedback());
        assert_eq!(
            EdgeSpec::new("a", "b").into_port("template").input_port(),
            InputPort::Template
        );
        assert_eq!(EdgeSpec::new("a", "b").input_port(), InputPort::Primary);
    }

    #[test]
    fn kinds_from_names_and_content_types() {
        assert_eq!(ArtifactKind::from_file_name("bom.CSV"), ArtifactKind::Csv);
        assert_eq!(ArtifactKind::from_file_name("noext"), ArtifactKind::Binary);
        assert_eq!(
            ArtifactKind::from_content_type("application/json; charset=utf-8"),
            ArtifactKind::Json
        );
        assert_eq!(ArtifactKind::from_content_type("text/markdown"), ArtifactKind::Text);
    }
}
