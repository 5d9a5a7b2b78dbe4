use crate::{Error, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Dense node id in `0..node_count`.
pub type NodeId = usize;

/// Read-only graph oracle consumed by samplers and trainers.
///
/// All methods take `&self` and implementations must tolerate concurrent
/// readers: training fans batches out over a thread pool and every worker
/// queries the same graph.
pub trait Graph: Send + Sync {
    /// Number of nodes. Node ids are `0..node_count()`.
    fn node_count(&self) -> usize;

    /// Out-degree of `node`. Unknown nodes have degree 0.
    fn degree(&self, node: NodeId) -> usize;

    /// Visit each out-neighbor of `node` with the relationship weight.
    ///
    /// Unweighted graphs report a weight of `1.0`.
    fn for_each_neighbor(&self, node: NodeId, visitor: &mut dyn FnMut(NodeId, f64));

    /// Numeric property array stored on `node` under `key`.
    fn node_property(&self, node: NodeId, key: &str) -> Option<&[f64]>;

    /// Collect the out-neighbors of `node` as `(target, weight)` pairs.
    fn neighbors(&self, node: NodeId) -> Vec<(NodeId, f64)> {
        let mut out = Vec::with_capacity(self.degree(node));
        self.for_each_neighbor(node, &mut |target, weight| out.push((target, weight)));
        out
    }
}

/// How relationships passed to [`AdjacencyGraph::add_relationship`] are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Orientation {
    /// Store `source -> target` only.
    #[default]
    Natural,
    /// Store `source -> target` and `target -> source`.
    Undirected,
}

/// In-memory graph over dense node ids.
///
/// Uses petgraph's directed graph internally; undirected graphs store both
/// directions. Degrees are cached so that [`Graph::degree`] is O(1), which
/// matters for degree-biased negative sampling over all nodes.
///
/// # Example
///
/// ```rust
/// use lattix_graph::{AdjacencyGraph, Graph, Orientation};
///
/// let mut graph = AdjacencyGraph::new(2, Orientation::Natural);
/// graph.add_weighted_relationship(0, 1, 2.5).unwrap();
/// graph.set_node_property(0, "features", vec![1.0, 0.0]).unwrap();
///
/// assert_eq!(graph.neighbors(0), vec![(1, 2.5)]);
/// assert_eq!(graph.node_property(0, "features"), Some(&[1.0, 0.0][..]));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjacencyGraph {
    graph: DiGraph<BTreeMap<String, Vec<f64>>, f64>,
    orientation: Orientation,
    degrees: Vec<usize>,
}

impl AdjacencyGraph {
    /// Create a graph with `node_count` isolated nodes.
    pub fn new(node_count: usize, orientation: Orientation) -> Self {
        let mut graph = DiGraph::with_capacity(node_count, 0);
        for _ in 0..node_count {
            graph.add_node(BTreeMap::new());
        }
        Self {
            graph,
            orientation,
            degrees: vec![0; node_count],
        }
    }

    /// Build a graph from unweighted `(source, target)` pairs.
    pub fn from_edges(
        node_count: usize,
        edges: &[(NodeId, NodeId)],
        orientation: Orientation,
    ) -> Result<Self> {
        let mut graph = Self::new(node_count, orientation);
        for &(source, target) in edges {
            graph.add_relationship(source, target)?;
        }
        Ok(graph)
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Number of stored (directed) relationships.
    pub fn relationship_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Add an unweighted relationship (weight `1.0`).
    pub fn add_relationship(&mut self, source: NodeId, target: NodeId) -> Result<()> {
        self.add_weighted_relationship(source, target, 1.0)
    }

    /// Add a relationship carrying `weight`.
    ///
    /// Weights must be finite; undirected self-loops are stored once.
    pub fn add_weighted_relationship(
        &mut self,
        source: NodeId,
        target: NodeId,
        weight: f64,
    ) -> Result<()> {
        let s = self.index(source)?;
        let t = self.index(target)?;
        if !weight.is_finite() {
            return Err(Error::InvalidRelationship(format!(
                "({source})-[{weight}]->({target}): weight must be finite"
            )));
        }

        self.graph.add_edge(s, t, weight);
        self.degrees[source] += 1;
        if self.orientation == Orientation::Undirected && source != target {
            self.graph.add_edge(t, s, weight);
            self.degrees[target] += 1;
        }
        Ok(())
    }

    /// Store a numeric property array on `node`, replacing any previous value.
    pub fn set_node_property(
        &mut self,
        node: NodeId,
        key: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<()> {
        let idx = self.index(node)?;
        self.graph[idx].insert(key.into(), values);
        Ok(())
    }

    /// Access the underlying petgraph graph.
    pub fn as_petgraph(&self) -> &DiGraph<BTreeMap<String, Vec<f64>>, f64> {
        &self.graph
    }

    fn index(&self, node: NodeId) -> Result<NodeIndex> {
        if node < self.graph.node_count() {
            Ok(NodeIndex::new(node))
        } else {
            Err(Error::NodeNotFound {
                node,
                node_count: self.graph.node_count(),
            })
        }
    }
}

impl Graph for AdjacencyGraph {
    fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    fn degree(&self, node: NodeId) -> usize {
        self.degrees.get(node).copied().unwrap_or(0)
    }

    fn for_each_neighbor(&self, node: NodeId, visitor: &mut dyn FnMut(NodeId, f64)) {
        if node >= self.graph.node_count() {
            return;
        }
        for edge in self.graph.edges(NodeIndex::new(node)) {
            visitor(edge.target().index(), *edge.weight());
        }
    }

    fn node_property(&self, node: NodeId, key: &str) -> Option<&[f64]> {
        if node >= self.graph.node_count() {
            return None;
        }
        self.graph[NodeIndex::new(node)]
            .get(key)
            .map(Vec::as_slice)
    }
}
