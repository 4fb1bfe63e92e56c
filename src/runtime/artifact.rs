/// Artifacts and resolved node inputs
///
/// An artifact is an immutable named payload. The payload is a `Bytes` buffer, so
/// fanning an artifact out to several consumers shares the buffer instead of copying
/// it; a consumer that wants to change the data must copy it into a new artifact.

use crate::pipeline::types::{ArtifactKind, InputPort, NodeId};
use bytes::Bytes;

/// Immutable typed payload passed along an edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    name: String,
    kind: ArtifactKind,
    payload: Bytes,
    produced_by: NodeId,
}

impl Artifact {
    pub fn new(
        name: impl Into<String>,
        kind: ArtifactKind,
        payload: impl Into<Bytes>,
        produced_by: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            payload: payload.into(),
            produced_by: produced_by.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn produced_by(&self) -> &str {
        &self.produced_by
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// File name without its extension
    pub fn stem(&self) -> &str {
        match self.name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.name,
        }
    }

    /// Payload as UTF-8, if it is valid text
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Same payload attributed to another node, optionally renamed
    pub fn reissue(&self, produced_by: &str, name: Option<&str>) -> Self {
        Self {
            name: name.map_or_else(|| self.name.clone(), str::to_string),
            kind: self.kind,
            payload: self.payload.clone(),
            produced_by: produced_by.to_string(),
        }
    }
}

/// Artifacts delivered over the edges from one upstream node
#[derive(Debug, Clone)]
pub struct InputGroup {
    pub source: NodeId,
    pub port: InputPort,
    pub artifacts: Vec<Artifact>,
}

/// Resolved inputs of one node, in edge declaration order
#[derive(Debug, Clone, Default)]
pub struct NodeInputs {
    groups: Vec<InputGroup>,
}

impl NodeInputs {
    pub fn new(groups: Vec<InputGroup>) -> Self {
        Self { groups }
    }

    pub fn groups(&self) -> &[InputGroup] {
        &self.groups
    }

    fn port(&self, port: InputPort) -> impl Iterator<Item = &InputGroup> {
        self.groups.iter().filter(move |g| g.port == port)
    }

    /// Primary groups, one per upstream node
    pub fn primary(&self) -> impl Iterator<Item = &InputGroup> {
        self.port(InputPort::Primary)
    }

    /// First primary upstream that produced anything
    pub fn first_available(&self) -> Option<&[Artifact]> {
        self.primary()
            .find(|g| !g.artifacts.is_empty())
            .map(|g| g.artifacts.as_slice())
    }

    /// Every primary artifact, in upstream order (fan-in)
    pub fn all_primary(&self) -> Vec<Artifact> {
        self.primary()
            .flat_map(|g| g.artifacts.iter().cloned())
            .collect()
    }

    pub fn template(&self) -> Option<&Artifact> {
        self.port(InputPort::Template)
            .flat_map(|g| g.artifacts.iter())
            .next()
    }

    /// Artifacts delivered over armed feedback edges
    pub fn feedback(&self) -> Vec<Artifact> {
        self.port(InputPort::Feedback)
            .flat_map(|g| g.artifacts.iter().cloned())
            .collect()
    }

    pub fn has_primary(&self) -> bool {
        self.primary().any(|g| !g.artifacts.is_empty())
    }

    /// Every artifact of every group
    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.groups.iter().flat_map(|g| g.artifacts.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv(name: &str, from: &str) -> Artifact {
        Artifact::new(name, ArtifactKind::Csv, format!("{name}\n"), from)
    }

    #[test]
    fn first_available_skips_empty_groups() {
        let inputs = NodeInputs::new(vec![
            InputGroup { source: "a".into(), port: InputPort::Primary, artifacts: vec![] },
            InputGroup {
                source: "t".into(),
                port: InputPort::Template,
                artifacts: vec![csv("tpl.csv", "t")],
            },
            InputGroup {
                source: "b".into(),
                port: InputPort::Primary,
                artifacts: vec![csv("b1.csv", "b"), csv("b2.csv", "b")],
            },
        ]);

        let first = inputs.first_available().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].name(), "b1.csv");
        assert_eq!(inputs.template().map(Artifact::name), Some("tpl.csv"));
        assert!(inputs.has_primary());
        assert_eq!(inputs.iter().count(), 3);
    }

    #[test]
    fn reissue_shares_the_payload_buffer() {
        let original = csv("bom.csv", "upload");
        let copy = original.reissue("clean", Some("out.csv"));
        assert_eq!(copy.produced_by(), "clean");
        assert_eq!(copy.name(), "out.csv");
        assert_eq!(copy.payload().as_ptr(), original.payload().as_ptr());
        assert_eq!(original.stem(), "bom");
    }
}
