//! # Graph Metrics
//!
//! Structural metrics over the whole co-occurrence graph. Every metric has a
//! pure form returning a [`NodeMap`] (or a scalar), and the per-node ones can
//! be written into a [`DerivedStore`] through [`MetricsEngine::annotate`].
//!
//! ## Path semantics
//!
//! Betweenness, closeness, eccentricity, diameter and average path length
//! count hops and ignore edge weights. Eigenvector centrality and PageRank use
//! the weights.
//!
//! ## Connectivity
//!
//! Eccentricity, diameter and average path length are only defined on a
//! connected graph. They fail with [`GraphError::DisconnectedGraph`]; callers
//! are expected to check [`GraphStore::is_connected`] first, not to swallow
//! the error.
//!
//! ## Iteration caps
//!
//! Eigenvector centrality and PageRank stop at their iteration budget and
//! return the current estimate with a warning. Hitting the cap is never an
//! error.

use crate::cancel::Cancellation;
use crate::derived::{DerivedField, DerivedStore, NodeMap};
use crate::error::{GraphError, Result};
use crate::graph::{GraphStore, NodeIndex};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::ops::RangeInclusive;

const UNREACHED: usize = usize::MAX;

/// Tunables for the iterative metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub eigenvector_tolerance: f64,
    pub eigenvector_max_iterations: usize,
    pub pagerank_alpha: f64,
    pub pagerank_tolerance: f64,
    pub pagerank_max_iterations: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            eigenvector_tolerance: 1e-6,
            eigenvector_max_iterations: 100,
            pagerank_alpha: 0.85,
            pagerank_tolerance: 1e-3,
            pagerank_max_iterations: 100,
        }
    }
}

/// Graph-level numbers gathered by [`MetricsEngine::annotate_all`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub node_count: usize,
    pub edge_count: usize,
    pub component_count: usize,
    pub average_degree: f64,
    pub average_clustering: f64,
    /// `None` when the graph is disconnected.
    pub diameter: Option<usize>,
    /// `None` when the graph is disconnected.
    pub average_path_length: Option<f64>,
}

/// Computes metrics over one graph.
#[derive(Debug, Clone)]
pub struct MetricsEngine<'g> {
    graph: &'g GraphStore,
    config: MetricsConfig,
    cancel: Cancellation,
}

impl<'g> MetricsEngine<'g> {
    #[must_use]
    pub fn new(graph: &'g GraphStore) -> Self {
        Self::with_config(graph, MetricsConfig::default())
    }

    #[must_use]
    pub fn with_config(graph: &'g GraphStore, config: MetricsConfig) -> Self {
        Self {
            graph,
            config,
            cancel: Cancellation::new(),
        }
    }

    /// Attach a cancellation handle checked between metrics.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &MetricsConfig {
        &self.config
    }

    fn to_node_map<T>(&self, values: Vec<T>) -> NodeMap<T> {
        self.graph.ids().map(str::to_string).zip(values).collect()
    }

    /// Degree divided by `|V| - 1`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn degree_centrality(&self) -> NodeMap<f64> {
        let n = self.graph.node_count();
        if n <= 1 {
            return self.to_node_map(vec![1.0; n]);
        }
        let scale = 1.0 / (n - 1) as f64;
        let values = (0..n)
            .map(|v| self.graph.degree(v) as f64 * scale)
            .collect();
        self.to_node_map(values)
    }

    /// Exact betweenness via Brandes' algorithm, sources fanned out over rayon.
    ///
    /// Normalized to [0, 1]; graphs with fewer than three nodes score 0.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn betweenness_centrality(&self) -> NodeMap<f64> {
        let n = self.graph.node_count();
        if n < 3 {
            return self.to_node_map(vec![0.0; n]);
        }

        let graph = self.graph;
        let raw = (0..n)
            .into_par_iter()
            .map(|s| {
                let dag = ShortestPathDag::from_source(n, s, |v| {
                    graph.neighbors(v).map(|(w, _)| w)
                });
                dag.dependencies()
            })
            .reduce(
                || vec![0.0; n],
                |mut acc, delta| {
                    for (a, d) in acc.iter_mut().zip(delta) {
                        *a += d;
                    }
                    acc
                },
            );

        // Every unordered pair is visited from both ends.
        let scale = 1.0 / ((n - 1) * (n - 2)) as f64;
        self.to_node_map(raw.into_iter().map(|b| b * scale).collect())
    }

    /// Closeness scaled by the reachable fraction of the graph.
    ///
    /// `(r-1)/sum_d * (r-1)/(n-1)` where `r` counts nodes reachable from `v`
    /// (itself included). Isolated nodes score 0.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn closeness_centrality(&self) -> NodeMap<f64> {
        let n = self.graph.node_count();
        let graph = self.graph;
        let values = (0..n)
            .into_par_iter()
            .map(|v| {
                let dist = bfs_distances(graph, v);
                let (reachable, total) = dist
                    .iter()
                    .filter(|&&d| d != UNREACHED)
                    .fold((0_usize, 0_usize), |(r, t), &d| (r + 1, t + d));
                if total == 0 || n <= 1 {
                    return 0.0;
                }
                let others = (reachable - 1) as f64;
                (others / total as f64) * (others / (n - 1) as f64)
            })
            .collect();
        self.to_node_map(values)
    }

    /// Weighted eigenvector centrality by power iteration.
    ///
    /// Iterates `x <- (I + A) x`, L2-normalized, until the L1 change between
    /// iterates falls below `tolerance` or the configured budget runs out.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for a non-positive tolerance.
    #[allow(clippy::cast_precision_loss)]
    pub fn eigenvector_centrality(&self, tolerance: f64) -> Result<NodeMap<f64>> {
        if !(tolerance > 0.0) {
            return Err(GraphError::InvalidParameter(format!(
                "eigenvector tolerance must be > 0, got {tolerance}"
            )));
        }
        let n = self.graph.node_count();
        if n == 0 {
            return Ok(NodeMap::new());
        }

        let mut x = vec![1.0 / n as f64; n];
        for iteration in 0..self.config.eigenvector_max_iterations {
            let last = x.clone();
            for (v, &xv) in last.iter().enumerate() {
                for (u, w) in self.graph.neighbors(v) {
                    x[u] += xv * w;
                }
            }
            let norm = x.iter().map(|xi| xi * xi).sum::<f64>().sqrt();
            if norm > 0.0 {
                x.iter_mut().for_each(|xi| *xi /= norm);
            }
            let err: f64 = x.iter().zip(&last).map(|(a, b)| (a - b).abs()).sum();
            if err < tolerance {
                debug!("Eigenvector centrality converged after {} iterations", iteration + 1);
                return Ok(self.to_node_map(x));
            }
        }

        warn!(
            "Eigenvector centrality hit the {} iteration cap, returning current estimate",
            self.config.eigenvector_max_iterations
        );
        Ok(self.to_node_map(x))
    }

    /// Weighted PageRank by damped power iteration.
    ///
    /// Nodes whose incident weight sums to zero are dangling; their mass is
    /// spread uniformly. Converged when the L1 delta drops below
    /// `|V| * tolerance`; otherwise the estimate after `max_iterations` is
    /// returned.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for `alpha` outside [0, 1], a non-positive tolerance
    /// or a zero iteration budget.
    #[allow(clippy::cast_precision_loss)]
    pub fn page_rank(
        &self,
        alpha: f64,
        tolerance: f64,
        max_iterations: usize,
    ) -> Result<NodeMap<f64>> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(GraphError::InvalidParameter(format!(
                "pagerank alpha must be within [0, 1], got {alpha}"
            )));
        }
        if !(tolerance > 0.0) || max_iterations == 0 {
            return Err(GraphError::InvalidParameter(format!(
                "pagerank needs tolerance > 0 and max_iterations > 0, got {tolerance} / {max_iterations}"
            )));
        }
        let n = self.graph.node_count();
        if n == 0 {
            return Ok(NodeMap::new());
        }

        let uniform = 1.0 / n as f64;
        let out_weight: Vec<f64> = (0..n).map(|v| self.graph.weighted_degree(v)).collect();
        let dangling: Vec<NodeIndex> = (0..n).filter(|&v| out_weight[v] == 0.0).collect();
        let threshold = n as f64 * tolerance;

        let mut x = vec![uniform; n];
        for iteration in 0..max_iterations {
            let last = x.clone();
            let dangling_mass: f64 = dangling.iter().map(|&v| last[v]).sum();
            let base = alpha * dangling_mass * uniform + (1.0 - alpha) * uniform;
            x.iter_mut().for_each(|xi| *xi = base);
            for (v, &xv) in last.iter().enumerate() {
                if out_weight[v] == 0.0 {
                    continue;
                }
                let share = alpha * xv / out_weight[v];
                for (u, w) in self.graph.neighbors(v) {
                    x[u] += share * w;
                }
            }
            let err: f64 = x.iter().zip(&last).map(|(a, b)| (a - b).abs()).sum();
            if err < threshold {
                debug!("PageRank converged after {} iterations", iteration + 1);
                return Ok(self.to_node_map(x));
            }
        }

        warn!("PageRank hit the {max_iterations} iteration cap, returning current estimate");
        Ok(self.to_node_map(x))
    }

    fn require_connected(&self) -> Result<()> {
        if self.graph.is_empty() {
            return Err(GraphError::EmptyGraph);
        }
        let components = self.graph.component_count();
        if components != 1 {
            return Err(GraphError::DisconnectedGraph { components });
        }
        Ok(())
    }

    /// Greatest hop distance from each node.
    ///
    /// # Errors
    ///
    /// `DisconnectedGraph` or `EmptyGraph`.
    pub fn eccentricity(&self) -> Result<NodeMap<i64>> {
        self.require_connected()?;
        let graph = self.graph;
        let values: Vec<i64> = (0..graph.node_count())
            .into_par_iter()
            .map(|v| {
                let farthest = bfs_distances(graph, v).into_iter().max().unwrap_or(0);
                i64::try_from(farthest).unwrap_or(i64::MAX)
            })
            .collect();
        Ok(self.to_node_map(values))
    }

    /// Largest eccentricity.
    ///
    /// # Errors
    ///
    /// `DisconnectedGraph` or `EmptyGraph`.
    pub fn diameter(&self) -> Result<usize> {
        self.require_connected()?;
        let graph = self.graph;
        Ok((0..graph.node_count())
            .into_par_iter()
            .map(|v| bfs_distances(graph, v).into_iter().max().unwrap_or(0))
            .max()
            .unwrap_or(0))
    }

    /// Mean hop distance over all ordered pairs of distinct nodes.
    ///
    /// # Errors
    ///
    /// `DisconnectedGraph` or `EmptyGraph`.
    #[allow(clippy::cast_precision_loss)]
    pub fn average_path_length(&self) -> Result<f64> {
        self.require_connected()?;
        let n = self.graph.node_count();
        if n == 1 {
            return Ok(0.0);
        }
        let graph = self.graph;
        let total: usize = (0..n)
            .into_par_iter()
            .map(|v| bfs_distances(graph, v).into_iter().sum::<usize>())
            .sum();
        Ok(total as f64 / (n * (n - 1)) as f64)
    }

    /// Mean local clustering coefficient over all nodes.
    ///
    /// Nodes with fewer than two neighbors count as 0.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_clustering(&self) -> f64 {
        let n = self.graph.node_count();
        if n == 0 {
            return 0.0;
        }
        let total: f64 = (0..n).map(|v| self.local_clustering(v)).sum();
        total / n as f64
    }

    #[allow(clippy::cast_precision_loss)]
    fn local_clustering(&self, v: NodeIndex) -> f64 {
        let neighbors: Vec<NodeIndex> = self.graph.neighbors(v).map(|(n, _)| n).collect();
        let k = neighbors.len();
        if k < 2 {
            return 0.0;
        }
        let mut triangles = 0_usize;
        for (i, &a) in neighbors.iter().enumerate() {
            for &b in &neighbors[i + 1..] {
                if self.graph.weight(a, b).is_some() {
                    triangles += 1;
                }
            }
        }
        2.0 * triangles as f64 / (k * (k - 1)) as f64
    }

    /// Mean number of neighbors.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_degree(&self) -> f64 {
        let n = self.graph.node_count();
        if n == 0 {
            return 0.0;
        }
        2.0 * self.graph.edge_count() as f64 / n as f64
    }

    /// Core number of every node (largest `k` whose k-core contains it).
    #[must_use]
    pub fn core_numbers(&self) -> NodeMap<usize> {
        self.to_node_map(core_numbers(self.graph))
    }

    /// Size of the k-core for each `k` in `ks`, as `(k, node_count)`.
    #[must_use]
    pub fn k_core_sizes(&self, ks: RangeInclusive<usize>) -> Vec<(usize, usize)> {
        let cores = core_numbers(self.graph);
        ks.map(|k| (k, cores.iter().filter(|&&c| c >= k).count()))
            .collect()
    }

    /// Compute one per-node metric and overwrite its field in `derived`.
    ///
    /// # Errors
    ///
    /// Propagates the metric's own error; `InvalidParameter` for
    /// [`DerivedField::Community`], which only the community detector writes.
    pub fn annotate(&self, field: DerivedField, derived: &mut DerivedStore) -> Result<()> {
        match field {
            DerivedField::DegreeCentrality => derived.record(field, self.degree_centrality()),
            DerivedField::BetweennessCentrality => {
                derived.record(field, self.betweenness_centrality());
            }
            DerivedField::ClosenessCentrality => {
                derived.record(field, self.closeness_centrality());
            }
            DerivedField::EigenvectorCentrality => {
                derived.record(field, self.eigenvector_centrality(self.config.eigenvector_tolerance)?);
            }
            DerivedField::Eccentricity => derived.record(field, self.eccentricity()?),
            DerivedField::PageRank => derived.record(
                field,
                self.page_rank(
                    self.config.pagerank_alpha,
                    self.config.pagerank_tolerance,
                    self.config.pagerank_max_iterations,
                )?,
            ),
            DerivedField::Community => {
                return Err(GraphError::InvalidParameter(
                    "community ids are written by the community detector".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Run every per-node metric plus the graph-level summary.
    ///
    /// Cancellation is checked between metrics. Eccentricity and the path
    /// statistics run only when the graph is connected; otherwise they are
    /// skipped with a warning and left out of the summary.
    ///
    /// # Errors
    ///
    /// `Cancelled` when the handle fires, or a metric's own error.
    pub fn annotate_all(&self, derived: &mut DerivedStore) -> Result<MetricsSummary> {
        info!(
            "Computing metrics for {} nodes / {} edges",
            self.graph.node_count(),
            self.graph.edge_count()
        );

        for field in [
            DerivedField::DegreeCentrality,
            DerivedField::BetweennessCentrality,
            DerivedField::ClosenessCentrality,
            DerivedField::EigenvectorCentrality,
            DerivedField::PageRank,
        ] {
            self.cancel.check(field.key())?;
            self.annotate(field, derived)?;
        }

        let components = self.graph.component_count();
        let (diameter, average_path_length) = if components == 1 {
            self.cancel.check(DerivedField::Eccentricity.key())?;
            let eccentricity = self.eccentricity()?;
            let diameter = eccentricity
                .values()
                .copied()
                .max()
                .and_then(|d| usize::try_from(d).ok());
            derived.record(DerivedField::Eccentricity, eccentricity);

            self.cancel.check("average_path_length")?;
            (diameter, Some(self.average_path_length()?))
        } else {
            warn!(
                "Graph has {components} components; skipping eccentricity, diameter and average path length"
            );
            (None, None)
        };

        self.cancel.check("average_clustering")?;
        Ok(MetricsSummary {
            node_count: self.graph.node_count(),
            edge_count: self.graph.edge_count(),
            component_count: components,
            average_degree: self.average_degree(),
            average_clustering: self.average_clustering(),
            diameter,
            average_path_length,
        })
    }
}

/// Hop distances from `source`; `UNREACHED` marks other components.
fn bfs_distances(graph: &GraphStore, source: NodeIndex) -> Vec<usize> {
    let mut dist = vec![UNREACHED; graph.node_count()];
    dist[source] = 0;
    let mut queue = VecDeque::from([source]);
    while let Some(v) = queue.pop_front() {
        let next = dist[v] + 1;
        for (w, _) in graph.neighbors(v) {
            if dist[w] == UNREACHED {
                dist[w] = next;
                queue.push_back(w);
            }
        }
    }
    dist
}

/// Batagelj–Zaversnik style peeling with a lazy min-heap.
fn core_numbers(graph: &GraphStore) -> Vec<usize> {
    let n = graph.node_count();
    let mut degree: Vec<usize> = (0..n).map(|v| graph.degree(v)).collect();
    let mut removed = vec![false; n];
    let mut core = vec![0; n];
    let mut heap: BinaryHeap<Reverse<(usize, NodeIndex)>> =
        (0..n).map(|v| Reverse((degree[v], v))).collect();
    let mut current = 0;

    while let Some(Reverse((d, v))) = heap.pop() {
        if removed[v] || d != degree[v] {
            continue;
        }
        removed[v] = true;
        current = current.max(d);
        core[v] = current;
        for (w, _) in graph.neighbors(v) {
            if !removed[w] {
                degree[w] -= 1;
                heap.push(Reverse((degree[w], w)));
            }
        }
    }
    core
}

/// Single-source shortest-path DAG over unweighted hops (Brandes forward pass).
pub(crate) struct ShortestPathDag {
    pub(crate) source: NodeIndex,
    /// Number of shortest paths from the source to each node.
    pub(crate) sigma: Vec<f64>,
    /// Predecessors on shortest paths.
    pub(crate) predecessors: Vec<Vec<NodeIndex>>,
    /// Nodes in non-decreasing distance order.
    pub(crate) order: Vec<NodeIndex>,
}

impl ShortestPathDag {
    pub(crate) fn from_source<F, I>(node_count: usize, source: NodeIndex, neighbors: F) -> Self
    where
        F: Fn(NodeIndex) -> I,
        I: Iterator<Item = NodeIndex>,
    {
        let mut sigma = vec![0.0_f64; node_count];
        let mut dist = vec![UNREACHED; node_count];
        let mut predecessors: Vec<Vec<NodeIndex>> = vec![Vec::new(); node_count];
        let mut order = Vec::with_capacity(node_count);

        sigma[source] = 1.0;
        dist[source] = 0;
        let mut queue = VecDeque::from([source]);

        while let Some(v) = queue.pop_front() {
            order.push(v);
            let next = dist[v] + 1;
            for w in neighbors(v) {
                if dist[w] == UNREACHED {
                    dist[w] = next;
                    queue.push_back(w);
                }
                if dist[w] == next {
                    sigma[w] += sigma[v];
                    predecessors[w].push(v);
                }
            }
        }

        Self {
            source,
            sigma,
            predecessors,
            order,
        }
    }

    /// Backward pass: dependency of the source on every node.
    pub(crate) fn dependencies(&self) -> Vec<f64> {
        let mut delta = vec![0.0_f64; self.sigma.len()];
        for &w in self.order.iter().rev() {
            for &v in &self.predecessors[w] {
                delta[v] += self.sigma[v] / self.sigma[w] * (1.0 + delta[w]);
            }
        }
        delta[self.source] = 0.0;
        delta
    }
}
