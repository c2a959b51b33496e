//! # Graph Store
//!
//! Owns the weighted, undirected co-occurrence graph and the per-node
//! enrichment attributes. The structure is fixed once built: nodes and edges
//! are only added through [`GraphBuilder`] (or a [`GraphSnapshot`]), after which
//! the only mutation is set-once attribute writes.
//!
//! ## Layout
//!
//! The structure lives in a `petgraph` [`UnGraph`] with the track id as node
//! weight and the co-occurrence count as edge weight. Nodes are addressed by
//! a dense [`NodeIndex`] in insertion order; nodes are never removed, so it
//! matches the petgraph index. Edges are inserted in `(low, high)` order,
//! which keeps neighbor iteration (and anything seeded from it) stable
//! across runs.
//!
//! ```
//! use trackgraph::graph::GraphStore;
//!
//! let graph = GraphStore::from_edges(&[("a", "b", 3.0), ("b", "c", 1.0)])?;
//! assert_eq!(graph.node_count(), 3);
//! assert_eq!(graph.weight_between("a", "b"), Some(3.0));
//! # Ok::<(), trackgraph::GraphError>(())
//! ```

use crate::attributes::{keys, AttributeBag, AttributeValue};
use crate::error::{GraphError, Result};
use log::{debug, warn};
use petgraph::algo::connected_components;
use petgraph::graph::{NodeIndex as GraphIndex, UnGraph};
use petgraph::visit::{
    Bfs, EdgeRef, IntoNeighbors, IntoNodeIdentifiers, NodeIndexable, Visitable,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Dense node position in insertion order, equal to the petgraph index.
pub type NodeIndex = usize;

/// One weighted edge as stored in a persisted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source: String,
    pub target: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

const fn default_weight() -> f64 {
    1.0
}

/// Serialized form of the co-occurrence graph handed over by the loader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub edges: Vec<EdgeRecord>,
}

/// One row of the display-name side table.
///
/// Field names follow the columns of the exported song data file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRecord {
    pub song_id: String,
    pub song_name: String,
    pub artist_name: String,
    pub album_name: String,
    pub artist_uri: String,
    pub album_uri: String,
}

/// Outcome of [`GraphStore::join_names`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinReport {
    pub matched: usize,
    pub unknown: usize,
}

/// Incremental construction of a [`GraphStore`].
#[derive(Debug, Default)]
pub struct GraphBuilder {
    ids: Vec<String>,
    index: HashMap<String, NodeIndex>,
    edges: BTreeMap<(NodeIndex, NodeIndex), f64>,
}

impl GraphBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, returning its index. Re-adding an id is a no-op.
    pub fn add_node(&mut self, id: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.ids.len();
        self.ids.push(id.to_string());
        self.index.insert(id.to_string(), idx);
        idx
    }

    /// Add an undirected edge, creating endpoints as needed.
    ///
    /// A repeated pair keeps the last weight.
    ///
    /// # Errors
    ///
    /// `InvalidEdge` for self loops and negative or non-finite weights.
    pub fn add_edge(&mut self, source: &str, target: &str, weight: f64) -> Result<()> {
        if source == target {
            return Err(GraphError::InvalidEdge {
                from: source.to_string(),
                to: target.to_string(),
                reason: "self loops are not allowed".to_string(),
            });
        }
        if !weight.is_finite() || weight < 0.0 {
            return Err(GraphError::InvalidEdge {
                from: source.to_string(),
                to: target.to_string(),
                reason: format!("weight must be finite and >= 0, got {weight}"),
            });
        }

        let a = self.add_node(source);
        let b = self.add_node(target);
        let key = (a.min(b), a.max(b));
        if let Some(previous) = self.edges.insert(key, weight) {
            warn!("Duplicate edge {source} -- {target}: weight {previous} replaced by {weight}");
        }
        Ok(())
    }

    #[must_use]
    pub fn build(self) -> GraphStore {
        let mut graph = UnGraph::with_capacity(self.ids.len(), self.edges.len());
        let mut index = HashMap::with_capacity(self.ids.len());
        for id in self.ids {
            let node = graph.add_node(id.clone());
            index.insert(id, node);
        }
        for (&(a, b), &w) in &self.edges {
            graph.add_edge(GraphIndex::new(a), GraphIndex::new(b), w);
        }

        debug!(
            "Built graph with {} nodes and {} edges",
            graph.node_count(),
            graph.edge_count()
        );

        GraphStore {
            attributes: vec![AttributeBag::new(); graph.node_count()],
            graph,
            index,
        }
    }
}

/// The in-memory co-occurrence graph.
#[derive(Debug, Clone)]
pub struct GraphStore {
    graph: UnGraph<String, f64>,
    index: HashMap<String, GraphIndex>,
    attributes: Vec<AttributeBag>,
}

impl GraphStore {
    /// Build from a deserialized snapshot.
    ///
    /// Listed nodes come first (in order), then nodes first seen on an edge.
    ///
    /// # Errors
    ///
    /// Fails on the first invalid edge.
    pub fn from_snapshot(snapshot: &GraphSnapshot) -> Result<Self> {
        let mut builder = GraphBuilder::new();
        for id in &snapshot.nodes {
            builder.add_node(id);
        }
        for edge in &snapshot.edges {
            builder.add_edge(&edge.source, &edge.target, edge.weight)?;
        }
        Ok(builder.build())
    }

    /// Build from `(source, target, weight)` triples.
    ///
    /// # Errors
    ///
    /// Fails on the first invalid edge.
    pub fn from_edges(edges: &[(&str, &str, f64)]) -> Result<Self> {
        let mut builder = GraphBuilder::new();
        for &(s, t, w) in edges {
            builder.add_edge(s, t, w)?;
        }
        Ok(builder.build())
    }

    /// The underlying petgraph graph, for algorithms this crate does not wrap.
    #[must_use]
    pub const fn as_petgraph(&self) -> &UnGraph<String, f64> {
        &self.graph
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Node ids in index order.
    pub fn ids(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.graph.raw_nodes().iter().map(|node| node.weight.as_str())
    }

    /// Id of the node at `idx`.
    ///
    /// # Panics
    ///
    /// If `idx` is out of range.
    #[must_use]
    pub fn id(&self, idx: NodeIndex) -> &str {
        &self.graph[GraphIndex::new(idx)]
    }

    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).map(|node| node.index())
    }

    /// # Errors
    ///
    /// `UnknownNode` when `id` is not in the graph.
    pub fn require_index(&self, id: &str) -> Result<NodeIndex> {
        self.index_of(id)
            .ok_or_else(|| GraphError::UnknownNode(id.to_string()))
    }

    /// Neighbors of `idx` with edge weights.
    pub fn neighbors(&self, idx: NodeIndex) -> impl Iterator<Item = (NodeIndex, f64)> + '_ {
        let node = GraphIndex::new(idx);
        self.graph.edges(node).map(move |edge| {
            let other = if edge.source() == node { edge.target() } else { edge.source() };
            (other.index(), *edge.weight())
        })
    }

    #[must_use]
    pub fn degree(&self, idx: NodeIndex) -> usize {
        self.graph.edges(GraphIndex::new(idx)).count()
    }

    /// Sum of incident edge weights.
    #[must_use]
    pub fn weighted_degree(&self, idx: NodeIndex) -> f64 {
        self.graph.edges(GraphIndex::new(idx)).map(|edge| *edge.weight()).sum()
    }

    #[must_use]
    pub fn weight(&self, a: NodeIndex, b: NodeIndex) -> Option<f64> {
        self.graph
            .find_edge(GraphIndex::new(a), GraphIndex::new(b))
            .map(|edge| self.graph[edge])
    }

    #[must_use]
    pub fn weight_between(&self, a: &str, b: &str) -> Option<f64> {
        self.weight(self.index_of(a)?, self.index_of(b)?)
    }

    /// Every edge once, as `(low, high, weight)` with `low < high`.
    pub fn edges(&self) -> impl Iterator<Item = (NodeIndex, NodeIndex, f64)> + '_ {
        self.graph.edge_references().map(|edge| {
            let (a, b) = (edge.source().index(), edge.target().index());
            (a.min(b), a.max(b), *edge.weight())
        })
    }

    /// Connected components, each sorted by index, ordered by smallest member.
    #[must_use]
    pub fn connected_components(&self) -> Vec<Vec<NodeIndex>> {
        label_components(&self.graph)
    }

    #[must_use]
    pub fn component_count(&self) -> usize {
        connected_components(&self.graph)
    }

    /// Whether the graph is one component.
    ///
    /// # Errors
    ///
    /// `EmptyGraph` on a graph without nodes, where connectivity is undefined.
    pub fn is_connected(&self) -> Result<bool> {
        if self.is_empty() {
            return Err(GraphError::EmptyGraph);
        }
        Ok(self.component_count() == 1)
    }

    /// Enrichment attributes of `id`.
    ///
    /// # Errors
    ///
    /// `UnknownNode` when `id` is not in the graph.
    pub fn attributes(&self, id: &str) -> Result<&AttributeBag> {
        Ok(&self.attributes[self.require_index(id)?])
    }

    #[must_use]
    pub fn attributes_at(&self, idx: NodeIndex) -> &AttributeBag {
        &self.attributes[idx]
    }

    /// Set an enrichment field unless it is already set.
    ///
    /// Returns whether the value was written.
    ///
    /// # Errors
    ///
    /// `UnknownNode` when `id` is not in the graph.
    pub fn set_attribute_once(
        &mut self,
        id: &str,
        key: &str,
        value: impl Into<AttributeValue>,
    ) -> Result<bool> {
        let idx = self.require_index(id)?;
        Ok(self.set_attribute_once_at(idx, key, value))
    }

    pub(crate) fn set_attribute_once_at(
        &mut self,
        idx: NodeIndex,
        key: &str,
        value: impl Into<AttributeValue>,
    ) -> bool {
        let written = self.attributes[idx].set_once(key, value);
        if !written {
            debug!("Attribute '{key}' already set on {}, keeping first value", self.id(idx));
        }
        written
    }

    /// Join the display-name side table onto the graph.
    ///
    /// Rows for ids that are not graph nodes are counted and skipped.
    pub fn join_names(&mut self, records: &[NameRecord]) -> JoinReport {
        let mut report = JoinReport::default();
        for record in records {
            let Some(idx) = self.index_of(&record.song_id) else {
                report.unknown += 1;
                continue;
            };
            self.set_attribute_once_at(idx, keys::TRACK_NAME, record.song_name.as_str());
            self.set_attribute_once_at(idx, keys::ARTIST_NAME, record.artist_name.as_str());
            self.set_attribute_once_at(idx, keys::ALBUM_NAME, record.album_name.as_str());
            self.set_attribute_once_at(idx, keys::ARTIST_URI, record.artist_uri.as_str());
            self.set_attribute_once_at(idx, keys::ALBUM_URI, record.album_uri.as_str());
            report.matched += 1;
        }
        if report.unknown > 0 {
            warn!("{} name rows reference nodes that are not in the graph", report.unknown);
        }
        debug!("Joined {} name rows", report.matched);
        report
    }
}

/// Breadth-first component labelling over any petgraph view.
///
/// Members are dense indices, each component sorted, components ordered by
/// smallest member.
pub(crate) fn label_components<G>(graph: G) -> Vec<Vec<NodeIndex>>
where
    G: IntoNeighbors + IntoNodeIdentifiers + NodeIndexable + Visitable,
{
    let mut seen = vec![false; graph.node_bound()];
    let mut components = Vec::new();

    for start in graph.node_identifiers() {
        if seen[graph.to_index(start)] {
            continue;
        }
        let mut bfs = Bfs::new(graph, start);
        let mut component = Vec::new();
        while let Some(node) = bfs.next(graph) {
            let i = graph.to_index(node);
            seen[i] = true;
            component.push(i);
        }
        component.sort_unstable();
        components.push(component);
    }
    components
}
