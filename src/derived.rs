//! # Derived Attributes
//!
//! Metric and community results are kept apart from the structural graph in
//! a [`DerivedStore`]. Each field is replaced wholesale when it is recomputed,
//! so a stale value from an earlier run can never survive next to fresh ones.
//!
//! Readers that want the combined picture (enrichment + derived) go through
//! an [`AttributeView`], which merges on demand.

use crate::attributes::{AttributeBag, AttributeValue};
use crate::graph::{GraphStore, NodeIndex};
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Values keyed by node id.
pub type NodeMap<T> = HashMap<String, T>;

/// Every attribute the analytics layer derives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DerivedField {
    DegreeCentrality,
    BetweennessCentrality,
    ClosenessCentrality,
    EigenvectorCentrality,
    Eccentricity,
    PageRank,
    Community,
}

impl DerivedField {
    pub const ALL: [Self; 7] = [
        Self::DegreeCentrality,
        Self::BetweennessCentrality,
        Self::ClosenessCentrality,
        Self::EigenvectorCentrality,
        Self::Eccentricity,
        Self::PageRank,
        Self::Community,
    ];

    /// Attribute key used when the field is merged into a view.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::DegreeCentrality => "degree_centrality",
            Self::BetweennessCentrality => "betweenness_centrality",
            Self::ClosenessCentrality => "closeness_centrality",
            Self::EigenvectorCentrality => "eigenvector_centrality",
            Self::Eccentricity => "eccentricity",
            Self::PageRank => "page_rank",
            Self::Community => "community",
        }
    }
}

impl fmt::Display for DerivedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Derived attribute values, one complete map per field.
#[derive(Debug, Clone, Default)]
pub struct DerivedStore {
    fields: BTreeMap<DerivedField, NodeMap<AttributeValue>>,
}

impl DerivedStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `field` for every node.
    pub fn record<T>(&mut self, field: DerivedField, values: NodeMap<T>)
    where
        T: Into<AttributeValue>,
    {
        let converted: NodeMap<AttributeValue> =
            values.into_iter().map(|(k, v)| (k, v.into())).collect();
        debug!("Recorded {} values for {field}", converted.len());
        self.fields.insert(field, converted);
    }

    #[must_use]
    pub fn get(&self, node: &str, field: DerivedField) -> Option<&AttributeValue> {
        self.fields.get(&field)?.get(node)
    }

    #[must_use]
    pub fn get_f64(&self, node: &str, field: DerivedField) -> Option<f64> {
        self.get(node, field).and_then(AttributeValue::as_f64)
    }

    #[must_use]
    pub fn has(&self, field: DerivedField) -> bool {
        self.fields.contains_key(&field)
    }

    /// Fields currently recorded, in declaration order.
    pub fn recorded(&self) -> impl Iterator<Item = DerivedField> + '_ {
        self.fields.keys().copied()
    }

    pub fn clear(&mut self, field: DerivedField) {
        self.fields.remove(&field);
    }
}

/// Read access to a node's attribute snapshot.
pub trait AttributeView {
    /// Snapshot of every attribute visible for the node at `idx`.
    fn snapshot(&self, idx: NodeIndex) -> AttributeBag;
}

/// Enrichment-only view.
impl AttributeView for GraphStore {
    fn snapshot(&self, idx: NodeIndex) -> AttributeBag {
        self.attributes_at(idx).clone()
    }
}

/// Enrichment attributes overlaid with derived values.
#[derive(Debug, Clone, Copy)]
pub struct MergedView<'a> {
    graph: &'a GraphStore,
    derived: &'a DerivedStore,
}

impl<'a> MergedView<'a> {
    #[must_use]
    pub const fn new(graph: &'a GraphStore, derived: &'a DerivedStore) -> Self {
        Self { graph, derived }
    }
}

impl AttributeView for MergedView<'_> {
    fn snapshot(&self, idx: NodeIndex) -> AttributeBag {
        let mut bag = self.graph.attributes_at(idx).clone();
        let id = self.graph.id(idx);
        for (field, values) in &self.derived.fields {
            if let Some(value) = values.get(id) {
                bag.overwrite(field.key(), value.clone());
            }
        }
        bag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::keys;

    #[test]
    fn test_record_replaces_whole_field() {
        let mut store = DerivedStore::new();
        let first: NodeMap<f64> = [("a".to_string(), 0.5), ("b".to_string(), 0.25)].into();
        store.record(DerivedField::PageRank, first);

        let second: NodeMap<f64> = [("a".to_string(), 0.75)].into();
        store.record(DerivedField::PageRank, second);

        assert_eq!(store.get_f64("a", DerivedField::PageRank), Some(0.75));
        assert_eq!(store.get("b", DerivedField::PageRank), None, "no merge with prior run");
    }

    #[test]
    fn test_merged_view_overlays_derived_values() {
        let mut graph = GraphStore::from_edges(&[("a", "b", 1.0)]).unwrap();
        graph.set_attribute_once("a", keys::ENERGY, 0.9).unwrap();

        let mut store = DerivedStore::new();
        let communities: NodeMap<i64> = [("a".to_string(), 0), ("b".to_string(), 1)].into();
        store.record(DerivedField::Community, communities);

        let view = MergedView::new(&graph, &store);
        let a = view.snapshot(graph.index_of("a").unwrap());
        assert_eq!(a.get(keys::ENERGY), Some(&AttributeValue::Float(0.9)));
        assert_eq!(a.get("community"), Some(&AttributeValue::Int(0)));

        // graph-only view does not see derived values
        let plain = graph.snapshot(graph.index_of("a").unwrap());
        assert!(!plain.contains("community"));
    }

    #[test]
    fn test_field_keys_are_unique() {
        let mut keys: Vec<_> = DerivedField::ALL.iter().map(|f| f.key()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), DerivedField::ALL.len());
    }
}
