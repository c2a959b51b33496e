//! # Community Detection
//!
//! Two ways of splitting the co-occurrence graph into groups of tracks that
//! tend to be played together:
//!
//! - **Louvain**: greedy modularity maximization with multilevel aggregation.
//!   Fast, randomized by node visiting order.
//! - **Girvan–Newman**: divisive. Repeatedly deletes the edge with the highest
//!   shortest-path betweenness until the graph falls apart into the requested
//!   number of components. Deterministic, but cubic-ish, so it is meant for
//!   small graphs.
//!
//! Both return a [`Partition`] whose communities are ordered by their earliest
//! node (graph insertion order), with members in insertion order. A node's
//! community index is its position in that list.

use crate::cancel::Cancellation;
use crate::derived::{DerivedField, DerivedStore, NodeMap};
use crate::error::{GraphError, Result};
use crate::graph::{label_components, GraphStore, NodeIndex};
use crate::metrics::ShortestPathDag;
use log::{debug, info, warn};
use petgraph::graph::NodeIndex as GraphIndex;
use petgraph::stable_graph::StableUnGraph;
use petgraph::visit::{EdgeRef, IntoEdgeReferences, NodeIndexable};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Betweenness values closer than this are treated as a tie.
const BETWEENNESS_TIE_EPSILON: f64 = 1e-12;

/// Girvan–Newman working copy. Removing edges keeps node indices stable.
type WorkingGraph = StableUnGraph<(), ()>;

/// Tunables for both detectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunityConfig {
    /// Louvain resolution. Above 1 favors smaller communities.
    pub resolution: f64,
    /// Minimum modularity gain for Louvain to keep aggregating.
    pub threshold: f64,
    /// Cap on Louvain aggregation levels.
    pub max_levels: usize,
    /// Girvan–Newman stops once this many components exist.
    pub target_communities: usize,
    /// Girvan–Newman removal bound; `None` means the edge count.
    pub max_iterations: Option<usize>,
}

impl Default for CommunityConfig {
    fn default() -> Self {
        Self {
            resolution: 1.0,
            threshold: 1e-7,
            max_levels: 32,
            target_communities: 10,
            max_iterations: None,
        }
    }
}

/// Disjoint node sets covering the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    communities: Vec<Vec<String>>,
}

impl Partition {
    /// Group nodes by label, ordering groups by their first node.
    fn from_labels(graph: &GraphStore, labels: &[usize]) -> Self {
        let mut slot: HashMap<usize, usize> = HashMap::new();
        let mut communities: Vec<Vec<String>> = Vec::new();
        for (idx, &label) in labels.iter().enumerate() {
            let position = *slot.entry(label).or_insert_with(|| {
                communities.push(Vec::new());
                communities.len() - 1
            });
            communities[position].push(graph.id(idx).to_string());
        }
        Self { communities }
    }

    fn from_components(graph: &GraphStore, components: &[Vec<NodeIndex>]) -> Self {
        let communities = components
            .iter()
            .map(|c| c.iter().map(|&idx| graph.id(idx).to_string()).collect())
            .collect();
        Self { communities }
    }

    #[must_use]
    pub fn communities(&self) -> &[Vec<String>] {
        &self.communities
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.communities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.communities.is_empty()
    }

    /// Community index of every node.
    #[must_use]
    pub fn membership(&self) -> NodeMap<usize> {
        self.communities
            .iter()
            .enumerate()
            .flat_map(|(i, c)| c.iter().map(move |id| (id.clone(), i)))
            .collect()
    }

    #[must_use]
    pub fn community_of(&self, node: &str) -> Option<usize> {
        self.communities
            .iter()
            .position(|c| c.iter().any(|id| id == node))
    }

    /// Per-node labels, checking that every node appears exactly once.
    fn labels_for(&self, graph: &GraphStore) -> Result<Vec<usize>> {
        let mut labels = vec![usize::MAX; graph.node_count()];
        for (i, community) in self.communities.iter().enumerate() {
            for id in community {
                let idx = graph.require_index(id)?;
                if labels[idx] != usize::MAX {
                    return Err(GraphError::InvalidParameter(format!(
                        "node {id} appears in more than one community"
                    )));
                }
                labels[idx] = i;
            }
        }
        if let Some(missing) = labels.iter().position(|&l| l == usize::MAX) {
            return Err(GraphError::InvalidParameter(format!(
                "node {} is not in any community",
                graph.id(missing)
            )));
        }
        Ok(labels)
    }
}

/// Girvan–Newman result with the removal history.
#[derive(Debug, Clone, PartialEq)]
pub struct GirvanNewmanTrace {
    pub partition: Partition,
    /// Removed edges in order, as lexically ordered id pairs.
    pub removed_edges: Vec<(String, String)>,
}

/// Runs community detection over one graph.
#[derive(Debug, Clone)]
pub struct CommunityDetector<'g> {
    graph: &'g GraphStore,
    config: CommunityConfig,
    cancel: Cancellation,
}

impl<'g> CommunityDetector<'g> {
    #[must_use]
    pub fn new(graph: &'g GraphStore) -> Self {
        Self::with_config(graph, CommunityConfig::default())
    }

    #[must_use]
    pub fn with_config(graph: &'g GraphStore, config: CommunityConfig) -> Self {
        Self {
            graph,
            config,
            cancel: Cancellation::new(),
        }
    }

    /// Attach a cancellation handle checked between Girvan–Newman iterations.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &CommunityConfig {
        &self.config
    }

    /// Louvain communities at `resolution`.
    ///
    /// Node visiting order comes from `rng`, so a seeded source gives a
    /// reproducible partition. A graph without edge weight yields singletons.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for a negative or non-finite resolution.
    pub fn louvain<R: Rng + ?Sized>(&self, resolution: f64, rng: &mut R) -> Result<Partition> {
        if !resolution.is_finite() || resolution < 0.0 {
            return Err(GraphError::InvalidParameter(format!(
                "louvain resolution must be finite and >= 0, got {resolution}"
            )));
        }

        let n = self.graph.node_count();
        let singletons: Vec<usize> = (0..n).collect();
        let mut level_graph = LevelGraph::from_store(self.graph);
        let m = level_graph.total_weight();
        if m <= 0.0 {
            debug!("Louvain on a graph without edge weight, returning singletons");
            return Ok(Partition::from_labels(self.graph, &singletons));
        }

        let mut modularity = level_graph.modularity(&singletons, resolution);
        let mut assignment = singletons;
        let mut levels = 0;

        loop {
            let (membership, count, improved) = level_graph.one_level(m, resolution, rng);
            if levels > 0 && !improved {
                break;
            }
            for label in &mut assignment {
                *label = membership[*label];
            }
            levels += 1;

            let new_modularity = level_graph.modularity(&membership, resolution);
            debug!("Louvain level {levels}: {count} communities, modularity {new_modularity:.6}");
            if new_modularity - modularity <= self.config.threshold {
                break;
            }
            modularity = new_modularity;
            if levels >= self.config.max_levels {
                warn!("Louvain hit the {} level cap", self.config.max_levels);
                break;
            }
            level_graph = level_graph.aggregate(&membership, count);
        }

        let partition = Partition::from_labels(self.graph, &assignment);
        info!("Louvain found {} communities in {levels} levels", partition.len());
        Ok(partition)
    }

    /// Louvain at the configured resolution.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for a negative or non-finite resolution.
    pub fn louvain_configured<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Partition> {
        self.louvain(self.config.resolution, rng)
    }

    /// Girvan–Newman split into the configured number of communities.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for a zero target, `Cancelled` when the handle fires.
    pub fn girvan_newman_configured(&self) -> Result<Partition> {
        self.girvan_newman(self.config.target_communities)
    }

    /// Girvan–Newman split into at least `target` components, where reachable.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for a zero target, `Cancelled` when the handle fires.
    pub fn girvan_newman(&self, target: usize) -> Result<Partition> {
        Ok(self.girvan_newman_traced(target)?.partition)
    }

    /// [`girvan_newman`](Self::girvan_newman) plus the edges it removed.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for a zero target, `Cancelled` when the handle fires.
    pub fn girvan_newman_traced(&self, target: usize) -> Result<GirvanNewmanTrace> {
        if target == 0 {
            return Err(GraphError::InvalidParameter(
                "girvan-newman target community count must be >= 1".to_string(),
            ));
        }

        let mut work = WorkingGraph::from(
            self.graph
                .as_petgraph()
                .map(|_, _| (), |_, _| ()),
        );
        let bound = self.config.max_iterations.unwrap_or(work.edge_count());
        let mut removed_edges = Vec::new();
        let mut components = label_components(&work);

        while components.len() < target && work.edge_count() > 0 {
            if removed_edges.len() >= bound {
                warn!("Girvan-Newman stopped at the {bound} iteration bound");
                break;
            }
            self.cancel.check("girvan_newman")?;

            let betweenness = edge_betweenness(&work);
            let Some((a, b)) = self.pick_edge(&betweenness) else {
                break;
            };
            if let Some(edge) = work.find_edge(GraphIndex::new(a), GraphIndex::new(b)) {
                work.remove_edge(edge);
            }
            removed_edges.push(self.lexical_pair(a, b));

            components = label_components(&work);
            debug!(
                "Girvan-Newman removed {} -- {}, {} components",
                self.graph.id(a),
                self.graph.id(b),
                components.len()
            );
        }

        let partition = Partition::from_components(self.graph, &components);
        info!(
            "Girvan-Newman produced {} communities after removing {} edges",
            partition.len(),
            removed_edges.len()
        );
        Ok(GirvanNewmanTrace {
            partition,
            removed_edges,
        })
    }

    fn lexical_pair(&self, a: NodeIndex, b: NodeIndex) -> (String, String) {
        let (x, y) = (self.graph.id(a), self.graph.id(b));
        if x <= y {
            (x.to_string(), y.to_string())
        } else {
            (y.to_string(), x.to_string())
        }
    }

    /// Highest-betweenness edge, ties going to the smallest id pair.
    fn pick_edge(&self, betweenness: &BTreeMap<(NodeIndex, NodeIndex), f64>) -> Option<(NodeIndex, NodeIndex)> {
        let mut best: Option<((NodeIndex, NodeIndex), f64)> = None;
        for (&edge, &score) in betweenness {
            best = match best {
                None => Some((edge, score)),
                Some((current, top)) => {
                    if score > top + BETWEENNESS_TIE_EPSILON {
                        Some((edge, score))
                    } else if (score - top).abs() <= BETWEENNESS_TIE_EPSILON
                        && self.lexical_pair(edge.0, edge.1) < self.lexical_pair(current.0, current.1)
                    {
                        Some((edge, top.max(score)))
                    } else {
                        Some((current, top))
                    }
                }
            };
        }
        best.map(|(edge, _)| edge)
    }

    /// Newman–Girvan modularity of `partition` at `resolution`.
    ///
    /// Returns 0 for a graph without edge weight.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` when the partition does not cover every node
    /// exactly once, `UnknownNode` for ids outside the graph.
    pub fn modularity(&self, partition: &Partition, resolution: f64) -> Result<f64> {
        let labels = partition.labels_for(self.graph)?;
        let level_graph = LevelGraph::from_store(self.graph);
        if level_graph.total_weight() <= 0.0 {
            return Ok(0.0);
        }
        Ok(level_graph.modularity(&labels, resolution))
    }

    /// Write each node's community index into `derived`.
    pub fn annotate(&self, partition: &Partition, derived: &mut DerivedStore) {
        let ids: NodeMap<i64> = partition
            .membership()
            .into_iter()
            .map(|(id, c)| (id, i64::try_from(c).unwrap_or(i64::MAX)))
            .collect();
        derived.record(DerivedField::Community, ids);
    }
}

/// Edge betweenness over unweighted hops, keyed by `(low, high)`.
///
/// Values are not halved; only their order matters here.
fn edge_betweenness(work: &WorkingGraph) -> BTreeMap<(NodeIndex, NodeIndex), f64> {
    let n = work.node_bound();
    let mut scores: BTreeMap<(NodeIndex, NodeIndex), f64> = work
        .edge_references()
        .map(|edge| {
            let (a, b) = (edge.source().index(), edge.target().index());
            ((a.min(b), a.max(b)), 0.0)
        })
        .collect();

    for source in 0..n {
        let dag = ShortestPathDag::from_source(n, source, |v| {
            work.neighbors(GraphIndex::new(v)).map(|w| w.index())
        });
        let mut delta = vec![0.0_f64; n];
        for &w in dag.order.iter().rev() {
            for &v in &dag.predecessors[w] {
                let credit = dag.sigma[v] / dag.sigma[w] * (1.0 + delta[w]);
                if let Some(score) = scores.get_mut(&(v.min(w), v.max(w))) {
                    *score += credit;
                }
                delta[v] += credit;
            }
        }
    }
    scores
}

/// Weighted graph at one Louvain level. Self loops hold the weight folded in
/// from earlier levels.
#[derive(Debug, Clone)]
struct LevelGraph {
    adjacency: Vec<Vec<(usize, f64)>>,
    self_loops: Vec<f64>,
}

impl LevelGraph {
    fn from_store(graph: &GraphStore) -> Self {
        let adjacency = (0..graph.node_count())
            .map(|v| graph.neighbors(v).collect::<Vec<_>>())
            .collect();
        Self {
            adjacency,
            self_loops: vec![0.0; graph.node_count()],
        }
    }

    fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Weighted degree, self loops counted twice.
    fn degree(&self, v: usize) -> f64 {
        self.adjacency[v].iter().map(|&(_, w)| w).sum::<f64>() + 2.0 * self.self_loops[v]
    }

    /// Sum of edge weights, each edge once.
    fn total_weight(&self) -> f64 {
        let edges: f64 = self
            .adjacency
            .iter()
            .enumerate()
            .flat_map(|(v, list)| list.iter().filter(move |&&(w, _)| v < w))
            .map(|&(_, w)| w)
            .sum();
        edges + self.self_loops.iter().sum::<f64>()
    }

    fn modularity(&self, labels: &[usize], resolution: f64) -> f64 {
        let m = self.total_weight();
        if m <= 0.0 {
            return 0.0;
        }
        let mut internal: HashMap<usize, f64> = HashMap::new();
        let mut degree_sum: HashMap<usize, f64> = HashMap::new();
        for v in 0..self.node_count() {
            let c = labels[v];
            *degree_sum.entry(c).or_default() += self.degree(v);
            *internal.entry(c).or_default() += self.self_loops[v];
            for &(w, weight) in &self.adjacency[v] {
                if v < w && labels[w] == c {
                    *internal.entry(c).or_default() += weight;
                }
            }
        }
        degree_sum
            .iter()
            .map(|(c, &d)| {
                let l = internal.get(c).copied().unwrap_or(0.0);
                l / m - resolution * (d / (2.0 * m)).powi(2)
            })
            .sum()
    }

    /// One local-moving phase.
    ///
    /// Returns compacted labels (ordered by earliest node), the community
    /// count, and whether any node moved.
    fn one_level<R: Rng + ?Sized>(
        &self,
        m: f64,
        resolution: f64,
        rng: &mut R,
    ) -> (Vec<usize>, usize, bool) {
        let n = self.node_count();
        let degrees: Vec<f64> = (0..n).map(|v| self.degree(v)).collect();
        let mut community: Vec<usize> = (0..n).collect();
        let mut totals = degrees.clone();
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(rng);

        let two_m_sq = 2.0 * m * m;
        let mut improved = false;
        let mut moves = 1;
        while moves > 0 {
            moves = 0;
            for &u in &order {
                let links = self.community_links(u, &community);
                let degree = degrees[u];
                let home = community[u];
                totals[home] -= degree;

                let home_links = links
                    .iter()
                    .find(|&&(c, _)| c == home)
                    .map_or(0.0, |&(_, w)| w);
                let remove_cost = -home_links / m + resolution * totals[home] * degree / two_m_sq;

                let mut best = home;
                let mut best_gain = 0.0;
                for &(c, w) in &links {
                    let gain = remove_cost + w / m - resolution * totals[c] * degree / two_m_sq;
                    if gain > best_gain {
                        best_gain = gain;
                        best = c;
                    }
                }

                totals[best] += degree;
                if best != home {
                    community[u] = best;
                    moves += 1;
                    improved = true;
                }
            }
        }

        let mut compact: HashMap<usize, usize> = HashMap::new();
        let labels: Vec<usize> = community
            .iter()
            .map(|c| {
                let next = compact.len();
                *compact.entry(*c).or_insert(next)
            })
            .collect();
        (labels, compact.len(), improved)
    }

    /// Weight from `u` into each neighboring community, in first-seen order.
    fn community_links(&self, u: usize, community: &[usize]) -> Vec<(usize, f64)> {
        let mut links: Vec<(usize, f64)> = Vec::new();
        let mut slot: HashMap<usize, usize> = HashMap::new();
        for &(v, w) in &self.adjacency[u] {
            let c = community[v];
            match slot.get(&c) {
                Some(&i) => links[i].1 += w,
                None => {
                    slot.insert(c, links.len());
                    links.push((c, w));
                }
            }
        }
        links
    }

    /// Collapse each community into one node.
    fn aggregate(&self, labels: &[usize], count: usize) -> Self {
        let mut self_loops = vec![0.0; count];
        let mut between: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for v in 0..self.node_count() {
            let cv = labels[v];
            self_loops[cv] += self.self_loops[v];
            for &(w, weight) in &self.adjacency[v] {
                if v >= w {
                    continue;
                }
                let cw = labels[w];
                if cv == cw {
                    self_loops[cv] += weight;
                } else {
                    *between.entry((cv.min(cw), cv.max(cw))).or_default() += weight;
                }
            }
        }
        let mut adjacency = vec![Vec::new(); count];
        for (&(a, b), &w) in &between {
            adjacency[a].push((b, w));
            adjacency[b].push((a, w));
        }
        Self {
            adjacency,
            self_loops,
        }
    }
}
