//! Graph analytics and walk-based recommendations over a track co-occurrence
//! graph.
//!
//! Core modules:
//! - [`graph`] - Weighted undirected graph with per-node enrichment attributes
//! - [`metrics`] - Centralities, PageRank, path statistics, clustering, k-cores
//! - [`community`] - Louvain and Girvan–Newman community detection
//! - [`walk`] - Recommendation walk with teleportation and an avoid window
//!
//! ### Supporting Modules
//!
//! - [`attributes`] - Tagged attribute values and typed accessors
//! - [`derived`] - Store for computed attributes, kept apart from the graph
//! - [`enrich`] - Batched catalog enrichment behind a gateway trait
//! - [`cancel`] - Cooperative cancellation for long computations
//! - [`config`] - JSON configuration and default paths
//! - [`error`] - Typed error enum
//!
//! ## Quick Start Example
//!
//! ```
//! use trackgraph::{
//!     CommunityDetector, DerivedStore, GraphStore, MergedView, MetricsEngine,
//!     RecommendationWalker, WalkConfig,
//! };
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let graph = GraphStore::from_edges(&[
//!     ("A", "B", 3.0),
//!     ("A", "D", 1.0),
//!     ("B", "C", 2.0),
//!     ("C", "D", 2.0),
//! ])?;
//! let mut derived = DerivedStore::new();
//! let mut rng = StdRng::seed_from_u64(42);
//!
//! let summary = MetricsEngine::new(&graph).annotate_all(&mut derived)?;
//! assert_eq!(summary.diameter, Some(2));
//!
//! let detector = CommunityDetector::new(&graph);
//! let partition = detector.louvain(1.0, &mut rng)?;
//! detector.annotate(&partition, &mut derived);
//!
//! let walker = RecommendationWalker::new(&graph, WalkConfig { walk_length: 1, ..WalkConfig::default() })?;
//! let visits = walker.walk("A", &MergedView::new(&graph, &derived), &mut rng)?;
//! assert_eq!(visits[1].node, "B");
//! # Ok::<(), trackgraph::GraphError>(())
//! ```
//!
//! ## Derived attributes
//!
//! The graph structure never changes after it is built. Metric and community
//! results go into a caller-owned [`DerivedStore`], one complete field at a
//! time, and a [`MergedView`] overlays them on the enrichment attributes when
//! a consumer such as the walker needs both.
//!
//! ## Randomness
//!
//! Louvain and the walker take `&mut R where R: Rng + ?Sized`. Pass a seeded
//! `StdRng` (see [`AnalysisConfig::rng`]) to reproduce a run exactly.

pub mod attributes;
pub mod cancel;
pub mod community;
pub mod config;
pub mod derived;
pub mod enrich;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod walk;

pub use attributes::{AttributeBag, AttributeValue};
pub use cancel::Cancellation;
pub use community::{CommunityConfig, CommunityDetector, Partition};
pub use config::AnalysisConfig;
pub use derived::{AttributeView, DerivedField, DerivedStore, MergedView, NodeMap};
pub use enrich::{EnrichmentConfig, EnrichmentGateway, EnrichmentReport, Enricher};
pub use error::{GraphError, Result};
pub use graph::{GraphBuilder, GraphSnapshot, GraphStore, NameRecord};
pub use metrics::{MetricsConfig, MetricsEngine, MetricsSummary};
pub use walk::{cosine_similarity, FallbackPolicy, MoveKind, RecommendationWalker, Visit, WalkConfig};
