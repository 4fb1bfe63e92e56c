/// Validated runtime graph
///
/// Converts a pipeline definition into an immutable graph with id lookups, ordered
/// incoming/outgoing edge lists and a petgraph DAG of the forward edges. Feedback
/// edges are kept in the edge list but never enter the DAG, so they cannot create
/// cycles or dependency waits.

use crate::error::GraphError;
use crate::pipeline::types::{EdgeSpec, NodeId, NodeSpec, Pipeline};
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Immutable graph for one run invocation
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<NodeSpec>,
    edges: Vec<EdgeSpec>,
    /// node id -> position in `nodes`
    index: HashMap<NodeId, usize>,
    /// node id -> indices into `edges`, in declaration order
    incoming: HashMap<NodeId, Vec<usize>>,
    outgoing: HashMap<NodeId, Vec<usize>>,
    /// Forward edges only
    dag: DiGraph<NodeId, ()>,
    dag_index: HashMap<NodeId, NodeIndex>,
}

impl Graph {
    /// Build and validate a graph from node and edge specs
    ///
    /// Rejects duplicate ids, dangling edges, non-feedback self-loops and forward
    /// cycles. IoContracts are deliberately not checked here so that definitions saved
    /// under older contracts stay loadable.
    pub fn build(nodes: Vec<NodeSpec>, edges: Vec<EdgeSpec>) -> Result<Self, GraphError> {
        tracing::debug!("🏗️ Building graph with {} nodes and {} edges", nodes.len(), edges.len());

        let mut index = HashMap::with_capacity(nodes.len());
        let mut dag = DiGraph::new();
        let mut dag_index = HashMap::with_capacity(nodes.len());

        for (pos, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), pos).is_some() {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
            dag_index.insert(node.id.clone(), dag.add_node(node.id.clone()));
        }

        let mut incoming: HashMap<NodeId, Vec<usize>> = HashMap::new();
        let mut outgoing: HashMap<NodeId, Vec<usize>> = HashMap::new();

        for (pos, edge) in edges.iter().enumerate() {
            for end in [&edge.source, &edge.target] {
                if !index.contains_key(end) {
                    return Err(GraphError::DanglingEdge {
                        from: edge.source.clone(),
                        target: edge.target.clone(),
                        missing: end.clone(),
                    });
                }
            }
            if edge.source == edge.target && !edge.is_feedback() {
                return Err(GraphError::SelfLoop(edge.source.clone()));
            }

            incoming.entry(edge.target.clone()).or_default().push(pos);
            outgoing.entry(edge.source.clone()).or_default().push(pos);

            if !edge.is_feedback() {
                dag.add_edge(dag_index[&edge.source], dag_index[&edge.target], ());
            }
        }

        if let Err(cycle) = toposort(&dag, None) {
            let node = dag[cycle.node_id()].clone();
            tracing::error!("❌ Forward edges form a cycle through '{}'", node);
            return Err(GraphError::Cycle(node));
        }

        Ok(Self {
            nodes,
            edges,
            index,
            incoming,
            outgoing,
            dag,
            dag_index,
        })
    }

    /// Build the graph for a persisted pipeline definition
    pub fn from_pipeline(pipeline: &Pipeline) -> Result<Self, GraphError> {
        Self::build(pipeline.nodes.clone(), pipeline.edges.clone())
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.index.get(id).map(|&pos| &self.nodes[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Nodes in declaration order
    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    pub fn edges(&self) -> &[EdgeSpec] {
        &self.edges
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.iter().map(|n| &n.id)
    }

    /// Edges targeting `id`, in declaration order
    pub fn incoming(&self, id: &str) -> impl Iterator<Item = &EdgeSpec> {
        self.incoming
            .get(id)
            .into_iter()
            .flatten()
            .map(move |&pos| &self.edges[pos])
    }

    /// Nodes that must be `Done` before `id` may run (feedback sources excluded)
    pub fn upstream(&self, id: &str) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        self.incoming(id)
            .filter(|e| !e.is_feedback())
            .filter(|e| seen.insert(e.source.as_str()))
            .map(|e| e.source.clone())
            .collect()
    }

    /// Direct successors of `id` over any edge, deduplicated
    pub fn downstream(&self, id: &str) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        self.outgoing
            .get(id)
            .into_iter()
            .flatten()
            .map(|&pos| &self.edges[pos])
            .filter(|e| seen.insert(e.target.as_str()))
            .map(|e| e.target.clone())
            .collect()
    }

    /// Roots (no forward edge targets them) ordered by a caller-supplied comparator
    ///
    /// A node reached only through feedback edges is a root. The sort is stable, so
    /// equal keys keep declaration order.
    pub fn roots_by<F>(&self, mut compare: F) -> Vec<NodeId>
    where
        F: FnMut(&NodeSpec, &NodeSpec) -> Ordering,
    {
        let mut roots: Vec<&NodeSpec> = self
            .nodes
            .iter()
            .filter(|n| self.incoming(&n.id).all(EdgeSpec::is_feedback))
            .collect();
        roots.sort_by(|a, b| compare(a, b));
        roots.into_iter().map(|n| n.id.clone()).collect()
    }

    /// Roots ordered by ascending vertical canvas position
    pub fn roots(&self) -> Vec<NodeId> {
        self.roots_by(|a, b| a.position.y.total_cmp(&b.position.y))
    }

    /// Split ordered roots into (interactive, autonomous), each keeping root order
    pub fn partition_roots(&self) -> (Vec<NodeId>, Vec<NodeId>) {
        self.roots()
            .into_iter()
            .partition(|id| self.node(id).is_some_and(NodeSpec::is_interactive))
    }

    /// One valid execution order over the forward edges
    pub fn topological_order(&self) -> Vec<NodeId> {
        // Cycles were rejected in `build`.
        toposort(&self.dag, None)
            .map(|order| order.into_iter().map(|idx| self.dag[idx].clone()).collect())
            .unwrap_or_default()
    }

    /// Validate a new edge proposed interactively against this graph
    ///
    /// On top of the structural checks of `build`, enforces declared IoContracts when
    /// both ends declare one.
    pub fn validate_connection(&self, edge: &EdgeSpec) -> Result<(), GraphError> {
        let source = self.node(&edge.source).ok_or_else(|| GraphError::DanglingEdge {
            from: edge.source.clone(),
            target: edge.target.clone(),
            missing: edge.source.clone(),
        })?;
        let target = self.node(&edge.target).ok_or_else(|| GraphError::DanglingEdge {
            from: edge.source.clone(),
            target: edge.target.clone(),
            missing: edge.target.clone(),
        })?;

        if !edge.is_feedback() {
            if source.id == target.id {
                return Err(GraphError::SelfLoop(source.id.clone()));
            }
            let from = self.dag_index[&target.id];
            let to = self.dag_index[&source.id];
            if has_path_connecting(&self.dag, from, to, None) {
                return Err(GraphError::Cycle(target.id.clone()));
            }
        }

        if let (Some(out), Some(accepts)) = (&source.io_contract, &target.io_contract) {
            if !accepts.inputs.contains(&out.output) {
                return Err(GraphError::IncompatibleConnection {
                    from: source.id.clone(),
                    target: target.id.clone(),
                    output: out.output,
                    accepted: accepts.inputs.clone(),
                });
            }
        }

        Ok(())
    }
}
