//! Read-locked, consistent view of the store.

use std::sync::RwLockReadGuard;

use super::{Attributes, Edge, EdgeId, EdgePattern, ElementId, NodeId, StoreInner};

/// A frozen view of the store.
///
/// Holds the store's read lock for its whole lifetime, so every read through
/// it sees the same state. The propagation engine evaluates one epoch against
/// a single snapshot; writers wait until it is dropped.
pub struct Snapshot<'a> {
    inner: RwLockReadGuard<'a, StoreInner>,
}

impl<'a> Snapshot<'a> {
    pub(crate) fn new(inner: RwLockReadGuard<'a, StoreInner>) -> Self {
        Self { inner }
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.inner.nodes.contains_key(id)
    }

    pub fn node_attributes(&self, id: &str) -> Option<&Attributes> {
        self.inner.nodes.get(id).map(|n| &n.attributes)
    }

    /// Attribute of a node or edge; `None` if either the element or the name is missing.
    pub fn get_attribute(&self, element: &ElementId, name: &str) -> Option<&serde_json::Value> {
        self.inner.attributes(element).ok()?.get(name)
    }

    /// Nodes with their attributes, in creation order.
    pub fn nodes(&self) -> Vec<(&NodeId, &Attributes)> {
        self.inner
            .ordered_nodes()
            .into_iter()
            .map(|(id, entry)| (id, &entry.attributes))
            .collect()
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.inner.edges.get(&id)
    }

    /// All edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.inner.edges.values()
    }

    pub fn edges_matching(&self, pattern: &EdgePattern<'_>) -> Vec<&Edge> {
        self.inner
            .matching_ids(pattern)
            .into_iter()
            .filter_map(|id| self.inner.edges.get(&id))
            .collect()
    }

    pub fn outgoing(&self, node: &str) -> Vec<&Edge> {
        self.edges_matching(&EdgePattern::any().subject(node))
    }

    pub fn incoming(&self, node: &str) -> Vec<&Edge> {
        self.edges_matching(&EdgePattern::any().object(node))
    }

    pub fn node_count(&self) -> usize {
        self.inner.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.edges.len()
    }
}
