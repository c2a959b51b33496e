//! # Recommendation Walk
//!
//! Produces a sequence of track recommendations by walking the co-occurrence
//! graph from a seed track.
//!
//! ## Step rule
//!
//! Each hop either teleports (with `teleport_probability`) to a uniformly
//! drawn node outside the avoid window, or steps to the best neighbor outside
//! the window. "Best" is the heaviest edge, or with `use_context` the neighbor
//! whose attribute vector is most cosine-similar to the current node's. Ties
//! are broken uniformly at random.
//!
//! ## Avoid window
//!
//! The last `walk_length` visited nodes (the seed included) cannot be picked
//! again by a teleport or a step. When nothing is eligible the
//! [`FallbackPolicy`] decides what happens.
//!
//! All randomness comes from the caller's `Rng`, so a seeded source replays
//! the same walk.

use crate::attributes::{keys, AttributeBag};
use crate::derived::AttributeView;
use crate::error::{GraphError, Result};
use crate::graph::{GraphStore, NodeIndex};
use log::{debug, trace};
use rand::seq::{IteratorRandom, SliceRandom};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// What to do when a hop finds no eligible node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Uniform draw over every node, ignoring the avoid window.
    #[default]
    AnyNode,
    /// Uniform draw outside the avoid window; the walk ends if that is empty.
    OutsideAvoidWindow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkConfig {
    /// Number of hops after the seed.
    pub walk_length: usize,
    pub teleport_probability: f64,
    /// Rank neighbors by attribute similarity instead of edge weight.
    pub use_context: bool,
    /// Numeric attributes forming the similarity vector.
    pub attribute_keys: Vec<String>,
    pub fallback: FallbackPolicy,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            walk_length: 10,
            teleport_probability: 0.0,
            use_context: false,
            attribute_keys: keys::AUDIO_FEATURES.iter().map(|k| (*k).to_string()).collect(),
            fallback: FallbackPolicy::AnyNode,
        }
    }
}

impl WalkConfig {
    /// # Errors
    ///
    /// `InvalidParameter` for a zero walk length, a teleport probability
    /// outside [0, 1], or context mode without attribute keys.
    pub fn validate(&self) -> Result<()> {
        if self.walk_length == 0 {
            return Err(GraphError::InvalidParameter(
                "walk_length must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.teleport_probability) {
            return Err(GraphError::InvalidParameter(format!(
                "teleport_probability must be within [0, 1], got {}",
                self.teleport_probability
            )));
        }
        if self.use_context && self.attribute_keys.is_empty() {
            return Err(GraphError::InvalidParameter(
                "use_context needs at least one attribute key".to_string(),
            ));
        }
        Ok(())
    }
}

/// How a visited node was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveKind {
    Seed,
    Step,
    Teleport,
    Fallback,
}

/// One entry of a walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    /// 0 for the seed.
    pub step: usize,
    pub node: String,
    pub kind: MoveKind,
    /// Attributes as seen at visit time.
    pub attributes: AttributeBag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkState {
    Walking,
    Teleporting,
    Stepping,
    Terminated,
}

/// FIFO of recently visited nodes with a fixed capacity.
#[derive(Debug)]
struct AvoidWindow {
    entries: VecDeque<NodeIndex>,
    capacity: usize,
}

impl AvoidWindow {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    fn contains(&self, idx: NodeIndex) -> bool {
        self.entries.contains(&idx)
    }

    fn push(&mut self, idx: NodeIndex) {
        self.entries.push_back(idx);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }
}

/// Cosine similarity, 0 when either vector has zero norm.
#[must_use]
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|y| y * y).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Walk-based recommender over one graph.
#[derive(Debug, Clone)]
pub struct RecommendationWalker<'g> {
    graph: &'g GraphStore,
    config: WalkConfig,
}

impl<'g> RecommendationWalker<'g> {
    /// # Errors
    ///
    /// `InvalidParameter` when `config` does not validate.
    pub fn new(graph: &'g GraphStore, config: WalkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { graph, config })
    }

    #[must_use]
    pub const fn config(&self) -> &WalkConfig {
        &self.config
    }

    /// Walk from `seed`, returning the seed followed by up to `walk_length`
    /// recommendations.
    ///
    /// # Errors
    ///
    /// `UnknownNode` for a seed outside the graph. In context mode a missing
    /// or non-numeric attribute on a candidate fails with
    /// `MissingAttribute` / `AttributeType`.
    pub fn walk<V, R>(&self, seed: &str, view: &V, rng: &mut R) -> Result<Vec<Visit>>
    where
        V: AttributeView + ?Sized,
        R: Rng + ?Sized,
    {
        let start = self.graph.require_index(seed)?;
        let mut window = AvoidWindow::new(self.config.walk_length);
        window.push(start);

        let mut visits = Vec::with_capacity(self.config.walk_length + 1);
        visits.push(self.visit(0, start, MoveKind::Seed, view));

        let mut current = start;
        let mut state = WalkState::Walking;
        for step in 1..=self.config.walk_length {
            let previous = state;
            state = self.choose_move(rng);
            trace!("{previous:?} -> {state:?} at step {step}");

            let candidate = match state {
                WalkState::Teleporting => {
                    self.teleport(&window, rng).map(|n| (n, MoveKind::Teleport))
                }
                WalkState::Stepping => {
                    self.step(current, &window, view, rng)?.map(|n| (n, MoveKind::Step))
                }
                WalkState::Walking | WalkState::Terminated => None,
            };
            let chosen = match candidate {
                Some(hit) => Some(hit),
                None => self.fallback(&window, rng).map(|n| (n, MoveKind::Fallback)),
            };
            let Some((next, kind)) = chosen else {
                debug!("No eligible node at step {step}, ending walk");
                trace!("{state:?} -> {:?}", WalkState::Terminated);
                state = WalkState::Terminated;
                break;
            };

            window.push(next);
            visits.push(self.visit(step, next, kind, view));
            current = next;
            state = WalkState::Walking;
        }

        if state == WalkState::Walking {
            trace!("{state:?} -> {:?} after {} steps", WalkState::Terminated, visits.len() - 1);
        }
        debug!("Walk from {seed} produced {} visits", visits.len());
        Ok(visits)
    }

    /// Bernoulli draw between a teleport and a neighbor step.
    fn choose_move<R: Rng + ?Sized>(&self, rng: &mut R) -> WalkState {
        if rng.gen_bool(self.config.teleport_probability) {
            WalkState::Teleporting
        } else {
            WalkState::Stepping
        }
    }

    fn visit<V: AttributeView + ?Sized>(&self, step: usize, idx: NodeIndex, kind: MoveKind, view: &V) -> Visit {
        Visit {
            step,
            node: self.graph.id(idx).to_string(),
            kind,
            attributes: view.snapshot(idx),
        }
    }

    fn teleport<R: Rng + ?Sized>(&self, window: &AvoidWindow, rng: &mut R) -> Option<NodeIndex> {
        (0..self.graph.node_count())
            .filter(|&n| !window.contains(n))
            .choose(rng)
    }

    fn fallback<R: Rng + ?Sized>(&self, window: &AvoidWindow, rng: &mut R) -> Option<NodeIndex> {
        match self.config.fallback {
            FallbackPolicy::AnyNode => (0..self.graph.node_count()).choose(rng),
            FallbackPolicy::OutsideAvoidWindow => self.teleport(window, rng),
        }
    }

    /// Best neighbor outside the window, ties drawn uniformly.
    fn step<V, R>(&self, current: NodeIndex, window: &AvoidWindow, view: &V, rng: &mut R) -> Result<Option<NodeIndex>>
    where
        V: AttributeView + ?Sized,
        R: Rng + ?Sized,
    {
        let candidates: Vec<(NodeIndex, f64)> = self
            .graph
            .neighbors(current)
            .filter(|&(n, _)| !window.contains(n))
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }

        let scored: Vec<(NodeIndex, f64)> = if self.config.use_context {
            let origin = self.context_vector(current, view)?;
            candidates
                .iter()
                .map(|&(n, _)| Ok((n, cosine_similarity(&origin, &self.context_vector(n, view)?))))
                .collect::<Result<_>>()?
        } else {
            candidates
        };

        let best = scored.iter().map(|&(_, s)| s).fold(f64::NEG_INFINITY, f64::max);
        let tied: Vec<NodeIndex> = scored
            .iter()
            .filter(|&&(_, s)| s == best)
            .map(|&(n, _)| n)
            .collect();
        Ok(tied.choose(rng).copied())
    }

    fn context_vector<V: AttributeView + ?Sized>(&self, idx: NodeIndex, view: &V) -> Result<Vec<f64>> {
        view.snapshot(idx)
            .numeric_vector(self.graph.id(idx), &self.config.attribute_keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derived::{DerivedField, DerivedStore, MergedView, NodeMap};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn diamond() -> GraphStore {
        GraphStore::from_edges(&[("A", "B", 3.0), ("A", "D", 1.0), ("B", "C", 2.0), ("C", "D", 2.0)])
            .unwrap()
    }

    fn config(walk_length: usize, teleport_probability: f64) -> WalkConfig {
        WalkConfig {
            walk_length,
            teleport_probability,
            ..WalkConfig::default()
        }
    }

    fn nodes(visits: &[Visit]) -> Vec<&str> {
        visits.iter().map(|v| v.node.as_str()).collect()
    }

    #[test]
    fn test_cosine_similarity() {
        assert_relative_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]), 1.0, epsilon = 1e-12);
        assert_relative_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_step_follows_heaviest_edge() {
        let g = diamond();
        let walker = RecommendationWalker::new(&g, config(1, 0.0)).unwrap();
        let visits = walker.walk("A", &g, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(nodes(&visits), vec!["A", "B"]);
        assert_eq!(visits[0].kind, MoveKind::Seed);
        assert_eq!(visits[1].kind, MoveKind::Step);
        assert_eq!(visits[1].step, 1);
    }

    #[test]
    fn test_window_blocks_revisits() {
        // A -> B (3) -> C (2, A is blocked) -> D (2, B blocked)
        let g = diamond();
        let walker = RecommendationWalker::new(&g, config(3, 0.0)).unwrap();
        let visits = walker.walk("A", &g, &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(nodes(&visits), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_ties_are_broken_from_the_rng() {
        let g = GraphStore::from_edges(&[("s", "x", 1.0), ("s", "y", 1.0), ("s", "z", 1.0)]).unwrap();
        let walker = RecommendationWalker::new(&g, config(1, 0.0)).unwrap();
        let mut seen = std::collections::HashSet::new();
        for seed in 0..64 {
            let visits = walker.walk("s", &g, &mut StdRng::seed_from_u64(seed)).unwrap();
            seen.insert(visits[1].node.clone());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_teleport_never_hits_window() {
        let g = diamond();
        let walker = RecommendationWalker::new(&g, config(3, 1.0)).unwrap();
        let visits = walker.walk("A", &g, &mut StdRng::seed_from_u64(5)).unwrap();
        assert_eq!(visits.len(), 4);
        assert!(visits[1..].iter().all(|v| v.kind == MoveKind::Teleport));
        let mut distinct = nodes(&visits);
        distinct.sort_unstable();
        distinct.dedup();
        assert_eq!(distinct.len(), 4);
    }

    #[test]
    fn test_move_choice_follows_teleport_probability() {
        let g = diamond();
        let mut rng = StdRng::seed_from_u64(11);
        let stepper = RecommendationWalker::new(&g, config(1, 0.0)).unwrap();
        let teleporter = RecommendationWalker::new(&g, config(1, 1.0)).unwrap();
        for _ in 0..16 {
            assert_eq!(stepper.choose_move(&mut rng), WalkState::Stepping);
            assert_eq!(teleporter.choose_move(&mut rng), WalkState::Teleporting);
        }

        // the move kind recorded on each visit matches the drawn state
        let visits = teleporter.walk("A", &g, &mut StdRng::seed_from_u64(11)).unwrap();
        assert_eq!(visits[1].kind, MoveKind::Teleport);
        let visits = stepper.walk("A", &g, &mut StdRng::seed_from_u64(11)).unwrap();
        assert_eq!(visits[1].kind, MoveKind::Step);
    }

    #[test]
    fn test_fallback_any_node_for_isolated_seed() {
        let mut builder = crate::graph::GraphBuilder::new();
        builder.add_edge("A", "B", 1.0).unwrap();
        builder.add_node("E");
        let g = builder.build();
        let walker = RecommendationWalker::new(&g, config(5, 0.0)).unwrap();
        let visits = walker.walk("E", &g, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(visits[1].kind, MoveKind::Fallback);
        assert_eq!(visits.len(), 6);
    }

    #[test]
    fn test_fallback_outside_window_can_end_walk() {
        let mut builder = crate::graph::GraphBuilder::new();
        builder.add_node("only");
        let g = builder.build();
        let cfg = WalkConfig {
            fallback: FallbackPolicy::OutsideAvoidWindow,
            ..config(4, 0.0)
        };
        let walker = RecommendationWalker::new(&g, cfg).unwrap();
        let visits = walker.walk("only", &g, &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(nodes(&visits), vec!["only"]);
    }

    #[test]
    fn test_context_mode_prefers_similar_neighbor() {
        let mut g = GraphStore::from_edges(&[("s", "near", 1.0), ("s", "far", 5.0)]).unwrap();
        for (id, energy, valence) in [("s", 1.0, 0.0), ("near", 0.9, 0.1), ("far", 0.0, 1.0)] {
            g.set_attribute_once(id, keys::ENERGY, energy).unwrap();
            g.set_attribute_once(id, keys::VALENCE, valence).unwrap();
        }
        let cfg = WalkConfig {
            use_context: true,
            attribute_keys: vec![keys::ENERGY.to_string(), keys::VALENCE.to_string()],
            ..config(1, 0.0)
        };
        let walker = RecommendationWalker::new(&g, cfg).unwrap();
        let visits = walker.walk("s", &g, &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(visits[1].node, "near");
    }

    #[test]
    fn test_context_mode_uses_derived_values_through_view() {
        let g = GraphStore::from_edges(&[("s", "a", 1.0), ("s", "b", 1.0)]).unwrap();
        let mut derived = DerivedStore::new();
        let pr: NodeMap<f64> = [("s".to_string(), 1.0), ("a".to_string(), 0.0), ("b".to_string(), 2.0)].into();
        derived.record(DerivedField::PageRank, pr);
        let cfg = WalkConfig {
            use_context: true,
            attribute_keys: vec!["page_rank".to_string()],
            ..config(1, 0.0)
        };
        let walker = RecommendationWalker::new(&g, cfg).unwrap();
        let view = MergedView::new(&g, &derived);
        let visits = walker.walk("s", &view, &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(visits[1].node, "b");
        assert!(visits[1].attributes.contains("page_rank"));
    }

    #[test]
    fn test_context_mode_type_errors() {
        let mut g = GraphStore::from_edges(&[("s", "t", 1.0)]).unwrap();
        g.set_attribute_once("s", keys::ENERGY, 0.5).unwrap();
        g.set_attribute_once("t", keys::ENERGY, "loud").unwrap();
        let cfg = WalkConfig {
            use_context: true,
            attribute_keys: vec![keys::ENERGY.to_string()],
            ..config(1, 0.0)
        };
        let walker = RecommendationWalker::new(&g, cfg.clone()).unwrap();
        let err = walker.walk("s", &g, &mut StdRng::seed_from_u64(0)).unwrap_err();
        assert!(matches!(err, GraphError::AttributeType { .. }));

        let bare = GraphStore::from_edges(&[("s", "t", 1.0)]).unwrap();
        let walker = RecommendationWalker::new(&bare, cfg).unwrap();
        let err = walker.walk("s", &bare, &mut StdRng::seed_from_u64(0)).unwrap_err();
        assert!(matches!(err, GraphError::MissingAttribute { .. }));
    }

    #[test]
    fn test_parameter_validation() {
        let g = diamond();
        assert!(RecommendationWalker::new(&g, config(0, 0.0)).is_err());
        assert!(RecommendationWalker::new(&g, config(3, 1.5)).is_err());
        assert!(RecommendationWalker::new(&g, config(3, -0.1)).is_err());

        let walker = RecommendationWalker::new(&g, config(3, 0.0)).unwrap();
        assert!(matches!(
            walker.walk("nope", &g, &mut StdRng::seed_from_u64(0)),
            Err(GraphError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_window_capacity_is_walk_length() {
        let mut window = AvoidWindow::new(2);
        window.push(1);
        window.push(2);
        window.push(3);
        assert!(!window.contains(1));
        assert!(window.contains(2) && window.contains(3));
        assert_eq!(window.entries.len(), 2);
    }
}
