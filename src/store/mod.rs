//! Triple store: nodes and directed, labeled, attributed edges.
//!
//! The store keeps one edge map plus three secondary indexes (by subject, by
//! predicate, by object), each mapping a key to the ordered set of edge ids that
//! carry it. All structural state lives behind a single `RwLock`, so a reader
//! never observes an edge that is present in one index but missing from another.
//!
//! - **Nodes** are created explicitly ([`TripleStore::add_node`],
//!   [`TripleStore::ensure_node`]) or implicitly by the first edge that
//!   references them. Removing a node never removes edges.
//! - **Edges** get monotonically increasing [`EdgeId`]s that are never reused.
//!   Identical triples with different ids may coexist.
//! - **Observers** registered with [`TripleStore::subscribe`] are notified
//!   after every committed mutation, once the write lock has been released.
//! - **Watches** ([`TripleStore::watch`], [`TripleStore::watch_for_new_neighbor`])
//!   target a single element and run after observers. Nested watch cascades
//!   are bounded by [`TripleStore::set_propagation_limit`].

pub mod export;
pub mod observe;
pub mod snapshot;
pub mod traverse;
pub mod watch;

use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::term::Value;

pub use observe::{ChannelObserver, StoreEvent, StoreObserver};
pub use snapshot::Snapshot;
pub use watch::{AttributeWatch, NeighborWatch, WatchId, WatchPause};

use watch::{Cascade, Change};

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Named attributes of a node or edge.
pub type Attributes = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

/// Opaque identity of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Arc<str>);

impl NodeId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The term constant this node stands for in queries.
    pub fn to_value(&self) -> Value {
        Value::from_node_key(&self.0)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl From<&Value> for NodeId {
    fn from(value: &Value) -> Self {
        Self::from(value.to_node_key())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of an edge. Uses `NonZeroU64` for niche optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(NonZeroU64);

impl EdgeId {
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "edge:{}", self.0)
    }
}

/// Either kind of store element; the target of attribute operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementId {
    Node(NodeId),
    Edge(EdgeId),
}

impl ElementId {
    pub fn node(id: impl Into<NodeId>) -> Self {
        ElementId::Node(id.into())
    }
}

impl From<NodeId> for ElementId {
    fn from(id: NodeId) -> Self {
        ElementId::Node(id)
    }
}

impl From<EdgeId> for ElementId {
    fn from(id: EdgeId) -> Self {
        ElementId::Edge(id)
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementId::Node(n) => write!(f, "node:{n}"),
            ElementId::Edge(e) => write!(f, "{e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// A triple to be inserted into the store.
///
/// Each endpoint has a node identity and the typed constant it stands for in
/// queries. [`Triple::new`] reads the constant off the node key;
/// [`Triple::from_values`] keeps the caller's constant as is.
#[derive(Debug, Clone, PartialEq)]
pub struct Triple {
    pub subject: NodeId,
    pub predicate: Arc<str>,
    pub object: NodeId,
    pub subject_value: Value,
    pub object_value: Value,
    pub attributes: Attributes,
    pub weight: Option<f64>,
}

impl Triple {
    pub fn new(
        subject: impl Into<NodeId>,
        predicate: impl AsRef<str>,
        object: impl Into<NodeId>,
    ) -> Self {
        let subject = subject.into();
        let object = object.into();
        Self {
            subject_value: subject.to_value(),
            object_value: object.to_value(),
            subject,
            predicate: Arc::from(predicate.as_ref()),
            object,
            attributes: Attributes::new(),
            weight: None,
        }
    }

    /// A triple between two constants, e.g. the fact `code(agent, '007')`.
    pub fn from_values(subject: Value, predicate: impl AsRef<str>, object: Value) -> Self {
        Self {
            subject: NodeId::from(&subject),
            predicate: Arc::from(predicate.as_ref()),
            object: NodeId::from(&object),
            subject_value: subject,
            object_value: object,
            attributes: Attributes::new(),
            weight: None,
        }
    }

    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Set the edge weight. A negative weight marks a negative example.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// A stored edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub subject: NodeId,
    pub predicate: Arc<str>,
    pub object: NodeId,
    pub subject_value: Value,
    pub object_value: Value,
    pub attributes: Attributes,
    pub weight: Option<f64>,
}

impl Edge {
    /// Negative examples are stored and enumerable but never answer a query.
    pub fn is_negative(&self) -> bool {
        self.weight.is_some_and(|w| w < 0.0)
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}, {})", self.predicate, self.subject, self.object)
    }
}

/// Subject/predicate/object pattern; `None` matches anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgePattern<'a> {
    pub subject: Option<&'a str>,
    pub predicate: Option<&'a str>,
    pub object: Option<&'a str>,
}

impl<'a> EdgePattern<'a> {
    /// The all-unbound pattern.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn subject(mut self, subject: &'a str) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn predicate(mut self, predicate: &'a str) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn object(mut self, object: &'a str) -> Self {
        self.object = Some(object);
        self
    }

    pub fn is_unbound(&self) -> bool {
        self.subject.is_none() && self.predicate.is_none() && self.object.is_none()
    }
}

// ---------------------------------------------------------------------------
// Store internals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub(crate) struct NodeEntry {
    /// Insertion sequence, used to enumerate nodes in creation order.
    pub(crate) seq: u64,
    pub(crate) attributes: Attributes,
}

/// Everything guarded by the store lock.
#[derive(Debug, Default)]
pub(crate) struct StoreInner {
    pub(crate) nodes: HashMap<NodeId, NodeEntry>,
    pub(crate) edges: BTreeMap<EdgeId, Edge>,
    pub(crate) by_subject: HashMap<NodeId, BTreeSet<EdgeId>>,
    pub(crate) by_predicate: HashMap<Arc<str>, BTreeSet<EdgeId>>,
    pub(crate) by_object: HashMap<NodeId, BTreeSet<EdgeId>>,
    next_edge: u64,
    next_node_seq: u64,
}

impl StoreInner {
    /// Edge ids matching `pattern`, in id order.
    ///
    /// Bound positions are looked up in their index and the sets are
    /// intersected smallest-first. Only the all-unbound pattern scans the
    /// edge map.
    pub(crate) fn matching_ids(&self, pattern: &EdgePattern<'_>) -> Vec<EdgeId> {
        if pattern.is_unbound() {
            return self.edges.keys().copied().collect();
        }

        let mut sets: Vec<&BTreeSet<EdgeId>> = Vec::with_capacity(3);
        let lookups = [
            pattern.subject.map(|s| self.by_subject.get(s)),
            pattern.predicate.map(|p| self.by_predicate.get(p)),
            pattern.object.map(|o| self.by_object.get(o)),
        ];
        for lookup in lookups.into_iter().flatten() {
            match lookup {
                Some(set) => sets.push(set),
                None => return Vec::new(),
            }
        }

        sets.sort_by_key(|s| s.len());
        let Some((smallest, rest)) = sets.split_first() else {
            return Vec::new();
        };
        smallest
            .iter()
            .filter(|id| rest.iter().all(|set| set.contains(*id)))
            .copied()
            .collect()
    }

    /// Whether any edge already joins `a` and `b`, in either direction.
    fn linked(&self, a: &NodeId, b: &NodeId) -> bool {
        let between = |s: &NodeId, o: &NodeId| match (self.by_subject.get(s), self.by_object.get(o)) {
            (Some(out), Some(inc)) => out.iter().any(|id| inc.contains(id)),
            _ => false,
        };
        between(a, b) || between(b, a)
    }

    pub(crate) fn ordered_nodes(&self) -> Vec<(&NodeId, &NodeEntry)> {
        let mut nodes: Vec<_> = self.nodes.iter().collect();
        nodes.sort_by_key(|(_, entry)| entry.seq);
        nodes
    }

    /// Create the node if missing. Returns `true` when it was created.
    fn ensure_node(&mut self, id: &NodeId) -> bool {
        if self.nodes.contains_key(id) {
            return false;
        }
        self.next_node_seq += 1;
        self.nodes.insert(
            id.clone(),
            NodeEntry {
                seq: self.next_node_seq,
                attributes: Attributes::new(),
            },
        );
        true
    }

    fn insert_edge(&mut self, triple: Triple, events: &mut Vec<StoreEvent>) -> EdgeId {
        for endpoint in [&triple.subject, &triple.object] {
            if self.ensure_node(endpoint) {
                events.push(StoreEvent::NodeAdded {
                    node: endpoint.clone(),
                });
            }
        }

        let id = EdgeId(NonZeroU64::MIN.saturating_add(self.next_edge));
        self.next_edge += 1;
        self.by_subject
            .entry(triple.subject.clone())
            .or_default()
            .insert(id);
        self.by_predicate
            .entry(Arc::clone(&triple.predicate))
            .or_default()
            .insert(id);
        self.by_object
            .entry(triple.object.clone())
            .or_default()
            .insert(id);

        events.push(StoreEvent::EdgeAdded {
            edge: id,
            subject: triple.subject.clone(),
            predicate: triple.predicate.to_string(),
            object: triple.object.clone(),
        });
        self.edges.insert(
            id,
            Edge {
                id,
                subject: triple.subject,
                predicate: triple.predicate,
                object: triple.object,
                subject_value: triple.subject_value,
                object_value: triple.object_value,
                attributes: triple.attributes,
                weight: triple.weight,
            },
        );
        id
    }

    fn unindex<K>(index: &mut HashMap<K, BTreeSet<EdgeId>>, key: &str, id: EdgeId)
    where
        K: Borrow<str> + Eq + Hash,
    {
        if let Some(set) = index.get_mut(key) {
            set.remove(&id);
            if set.is_empty() {
                index.remove(key);
            }
        }
    }

    pub(crate) fn attributes(&self, element: &ElementId) -> StoreResult<&Attributes> {
        match element {
            ElementId::Node(id) => self
                .nodes
                .get(id)
                .map(|n| &n.attributes)
                .ok_or_else(|| StoreError::NodeNotFound {
                    node: id.to_string(),
                }),
            ElementId::Edge(id) => self
                .edges
                .get(id)
                .map(|e| &e.attributes)
                .ok_or(StoreError::EdgeNotFound { edge: id.get() }),
        }
    }

    fn attributes_mut(&mut self, element: &ElementId) -> StoreResult<&mut Attributes> {
        match element {
            ElementId::Node(id) => self
                .nodes
                .get_mut(id)
                .map(|n| &mut n.attributes)
                .ok_or_else(|| StoreError::NodeNotFound {
                    node: id.to_string(),
                }),
            ElementId::Edge(id) => self
                .edges
                .get_mut(id)
                .map(|e| &mut e.attributes)
                .ok_or(StoreError::EdgeNotFound { edge: id.get() }),
        }
    }
}

// ---------------------------------------------------------------------------
// TripleStore
// ---------------------------------------------------------------------------

type AttributeWatches = Vec<(WatchId, Arc<dyn AttributeWatch>)>;
type NeighborWatches = Vec<(WatchId, Arc<dyn NeighborWatch>)>;

/// Thread-safe in-memory triple store.
///
/// Shared as `Arc<TripleStore>`: any number of concurrent readers, exclusive
/// writers. Attribute updates mutate in place and never change an element's
/// identity or its index membership.
pub struct TripleStore {
    inner: RwLock<StoreInner>,
    observers: RwLock<Vec<Arc<dyn StoreObserver>>>,
    watches: DashMap<(ElementId, String), AttributeWatches>,
    neighbor_watches: DashMap<NodeId, NeighborWatches>,
    next_watch: AtomicU64,
    propagation_limit: AtomicUsize,
}

impl Default for TripleStore {
    fn default() -> Self {
        Self {
            inner: RwLock::default(),
            observers: RwLock::default(),
            watches: DashMap::new(),
            neighbor_watches: DashMap::new(),
            next_watch: AtomicU64::new(0),
            propagation_limit: AtomicUsize::new(watch::DEFAULT_PROPAGATION_LIMIT),
        }
    }
}

impl TripleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().expect("store lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().expect("store lock poisoned")
    }

    /// Notify observers. Must be called without holding the store lock.
    pub(crate) fn publish(&self, events: Vec<StoreEvent>) {
        if events.is_empty() {
            return;
        }
        let observers = self.observers.read().expect("observer lock poisoned").clone();
        for event in &events {
            for observer in &observers {
                observer.notify(event);
            }
        }
    }

    /// Register a push sink for store events.
    pub fn subscribe(&self, observer: Arc<dyn StoreObserver>) {
        self.observers
            .write()
            .expect("observer lock poisoned")
            .push(observer);
    }

    // -- nodes --------------------------------------------------------------

    /// Declare a node with initial attributes. Fails if the identity exists.
    pub fn add_node(&self, id: impl Into<NodeId>, attributes: Attributes) -> StoreResult<NodeId> {
        let id = id.into();
        {
            let mut inner = self.write();
            if inner.nodes.contains_key(&id) {
                return Err(StoreError::DuplicateNode {
                    node: id.to_string(),
                });
            }
            inner.ensure_node(&id);
            if let Some(entry) = inner.nodes.get_mut(&id) {
                entry.attributes = attributes;
            }
        }
        tracing::debug!(node = %id, "node added");
        self.publish(vec![StoreEvent::NodeAdded { node: id.clone() }]);
        Ok(id)
    }

    /// Create the node if it does not exist yet. Idempotent.
    pub fn ensure_node(&self, id: impl Into<NodeId>) -> NodeId {
        let id = id.into();
        // Fast path under the read lock.
        if self.read().nodes.contains_key(&id) {
            return id;
        }
        let created = self.write().ensure_node(&id);
        if created {
            tracing::debug!(node = %id, "node added");
            self.publish(vec![StoreEvent::NodeAdded { node: id.clone() }]);
        }
        id
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.read().nodes.contains_key(id)
    }

    /// Remove a node and its attributes. Edges that reference it stay in place.
    pub fn remove_node(&self, id: &str) -> StoreResult<Attributes> {
        let (node, entry) = self
            .write()
            .nodes
            .remove_entry(id)
            .ok_or_else(|| StoreError::NodeNotFound { node: id.to_string() })?;
        tracing::debug!(node = %node, "node removed");
        self.publish(vec![StoreEvent::NodeRemoved { node }]);
        Ok(entry.attributes)
    }

    /// Node ids in creation order.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.read()
            .ordered_nodes()
            .into_iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn node_attributes(&self, id: &str) -> StoreResult<Attributes> {
        self.read()
            .nodes
            .get(id)
            .map(|n| n.attributes.clone())
            .ok_or_else(|| StoreError::NodeNotFound { node: id.to_string() })
    }

    pub fn node_count(&self) -> usize {
        self.read().nodes.len()
    }

    // -- edges --------------------------------------------------------------

    /// Insert an edge, creating missing endpoint nodes.
    ///
    /// When the edge is the first between its two endpoints, their
    /// new-neighbor watches fire.
    pub fn add_edge(&self, triple: Triple) -> EdgeId {
        let mut events = Vec::new();
        let watched = !self.neighbor_watches.is_empty() && triple.subject != triple.object;
        let (id, first_link) = {
            let mut inner = self.write();
            let first_link = watched && !inner.linked(&triple.subject, &triple.object);
            let link = first_link.then(|| {
                (
                    triple.subject.clone(),
                    Arc::clone(&triple.predicate),
                    triple.object.clone(),
                )
            });
            (inner.insert_edge(triple, &mut events), link)
        };
        tracing::debug!(edge = %id, "edge added");
        self.publish(events);
        if let Some((subject, predicate, object)) = first_link {
            self.fire_neighbor_watches(&subject, &object, &predicate);
            self.fire_neighbor_watches(&object, &subject, &predicate);
        }
        id
    }

    /// Remove an edge from the edge map and all three indexes.
    pub fn remove_edge(&self, id: EdgeId) -> StoreResult<Edge> {
        let edge = {
            let mut inner = self.write();
            let edge = inner
                .edges
                .remove(&id)
                .ok_or(StoreError::EdgeNotFound { edge: id.get() })?;
            StoreInner::unindex(&mut inner.by_subject, edge.subject.as_str(), id);
            StoreInner::unindex(&mut inner.by_predicate, &edge.predicate, id);
            StoreInner::unindex(&mut inner.by_object, edge.object.as_str(), id);
            edge
        };
        tracing::debug!(edge = %id, "edge removed");
        self.publish(vec![StoreEvent::EdgeRemoved { edge: id }]);
        Ok(edge)
    }

    pub fn edge(&self, id: EdgeId) -> StoreResult<Edge> {
        self.read()
            .edges
            .get(&id)
            .cloned()
            .ok_or(StoreError::EdgeNotFound { edge: id.get() })
    }

    /// All edges matching `pattern`, in insertion order.
    pub fn edges_matching(&self, pattern: &EdgePattern<'_>) -> Vec<Edge> {
        let inner = self.read();
        inner
            .matching_ids(pattern)
            .into_iter()
            .filter_map(|id| inner.edges.get(&id).cloned())
            .collect()
    }

    /// Set (or clear) an edge's weight.
    pub fn set_weight(&self, id: EdgeId, weight: Option<f64>) -> StoreResult<()> {
        let mut inner = self.write();
        let edge = inner
            .edges
            .get_mut(&id)
            .ok_or(StoreError::EdgeNotFound { edge: id.get() })?;
        edge.weight = weight;
        Ok(())
    }

    pub fn edge_count(&self) -> usize {
        self.read().edges.len()
    }

    /// Distinct predicate labels, sorted.
    pub fn predicates(&self) -> Vec<Arc<str>> {
        let mut predicates: Vec<_> = self.read().by_predicate.keys().cloned().collect();
        predicates.sort();
        predicates
    }

    /// Outgoing neighbors of `node` with the predicates that connect them,
    /// in order of first connecting edge.
    pub fn neighbors(&self, node: &str) -> StoreResult<Vec<(NodeId, Vec<Arc<str>>)>> {
        let inner = self.read();
        if !inner.nodes.contains_key(node) {
            return Err(StoreError::NodeNotFound {
                node: node.to_string(),
            });
        }
        let mut out: Vec<(NodeId, Vec<Arc<str>>)> = Vec::new();
        for id in inner.matching_ids(&EdgePattern::any().subject(node)) {
            let Some(edge) = inner.edges.get(&id) else {
                continue;
            };
            match out.iter_mut().find(|(n, _)| *n == edge.object) {
                Some((_, predicates)) => {
                    if !predicates.contains(&edge.predicate) {
                        predicates.push(Arc::clone(&edge.predicate));
                    }
                }
                None => out.push((edge.object.clone(), vec![Arc::clone(&edge.predicate)])),
            }
        }
        Ok(out)
    }

    // -- attributes ---------------------------------------------------------

    pub fn get_attribute(
        &self,
        element: &ElementId,
        name: &str,
    ) -> StoreResult<Option<serde_json::Value>> {
        Ok(self.read().attributes(element)?.get(name).cloned())
    }

    /// Set an attribute in place, returning the previous value.
    pub fn set_attribute(
        &self,
        element: &ElementId,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> StoreResult<Option<serde_json::Value>> {
        let name = name.into();
        let value = value.into();
        let previous = self
            .write()
            .attributes_mut(element)?
            .insert(name.clone(), value.clone());
        let change = Change {
            element: element.clone(),
            name,
            previous: previous.clone(),
            current: Some(value),
        };
        self.publish(vec![change.to_event()]);
        self.fire_watches(vec![change]);
        Ok(previous)
    }

    pub fn remove_attribute(
        &self,
        element: &ElementId,
        name: &str,
    ) -> StoreResult<Option<serde_json::Value>> {
        let previous = self.write().attributes_mut(element)?.remove(name);
        if previous.is_some() {
            let change = Change {
                element: element.clone(),
                name: name.to_string(),
                previous: previous.clone(),
                current: None,
            };
            self.publish(vec![change.to_event()]);
            self.fire_watches(vec![change]);
        }
        Ok(previous)
    }

    /// Merge a batch of attribute updates atomically.
    ///
    /// Every target is validated before anything is written; if one element
    /// is missing, no update of the batch is applied. Returns the number of
    /// elements updated.
    pub fn apply_updates(&self, batch: Vec<(ElementId, Attributes)>) -> StoreResult<usize> {
        let updated = batch.len();
        let mut changes = Vec::new();
        {
            let mut inner = self.write();
            for (element, _) in &batch {
                inner.attributes(element)?;
            }
            for (element, updates) in batch {
                let attributes = inner.attributes_mut(&element)?;
                for (name, value) in updates {
                    let previous = attributes.insert(name.clone(), value.clone());
                    changes.push(Change {
                        element: element.clone(),
                        name,
                        previous,
                        current: Some(value),
                    });
                }
            }
        }
        self.publish(changes.iter().map(Change::to_event).collect());
        self.fire_watches(changes);
        Ok(updated)
    }

    // -- filtered enumeration -----------------------------------------------

    /// Nodes whose id and attributes satisfy `filter`, in creation order.
    pub fn nodes_where(&self, filter: impl Fn(&NodeId, &Attributes) -> bool) -> Vec<NodeId> {
        self.read()
            .ordered_nodes()
            .into_iter()
            .filter(|(id, entry)| filter(*id, &entry.attributes))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Edges satisfying `filter`, in insertion order.
    pub fn edges_where(&self, filter: impl Fn(&Edge) -> bool) -> Vec<Edge> {
        self.read()
            .edges
            .values()
            .filter(|&edge| filter(edge))
            .cloned()
            .collect()
    }

    /// Test `condition` against the attributes of each candidate node, in
    /// candidate order. Candidates that are not nodes of the store are
    /// skipped.
    pub fn filter_nodes<'c>(
        &self,
        candidates: impl IntoIterator<Item = &'c str>,
        condition: impl Fn(&Attributes) -> bool,
    ) -> Vec<NodeId> {
        let inner = self.read();
        candidates
            .into_iter()
            .filter_map(|candidate| inner.nodes.get_key_value(candidate))
            .filter(|(_, entry)| condition(&entry.attributes))
            .map(|(id, _)| id.clone())
            .collect()
    }

    // -- watches ------------------------------------------------------------

    fn next_watch_id(&self) -> WatchId {
        WatchId(self.next_watch.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Run `watch` whenever `attribute` of `element` changes.
    pub fn watch(
        &self,
        element: &ElementId,
        attribute: impl Into<String>,
        watch: Arc<dyn AttributeWatch>,
    ) -> StoreResult<WatchId> {
        self.read().attributes(element)?;
        let id = self.next_watch_id();
        let attribute = attribute.into();
        tracing::debug!(%element, %attribute, watch = %id, "watch registered");
        self.watches
            .entry((element.clone(), attribute))
            .or_default()
            .push((id, watch));
        Ok(id)
    }

    /// Run `watch` whenever an edge first links `node` to another node.
    pub fn watch_for_new_neighbor(
        &self,
        node: &str,
        watch: Arc<dyn NeighborWatch>,
    ) -> StoreResult<WatchId> {
        let node = self
            .read()
            .nodes
            .get_key_value(node)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| StoreError::NodeNotFound {
                node: node.to_string(),
            })?;
        let id = self.next_watch_id();
        self.neighbor_watches
            .entry(node)
            .or_default()
            .push((id, watch));
        Ok(id)
    }

    /// Unregister one watch. Returns `false` if it was not registered.
    pub fn remove_watch(&self, id: WatchId) -> bool {
        let mut found = false;
        self.watches.retain(|_, list| {
            let before = list.len();
            list.retain(|(w, _)| *w != id);
            found |= list.len() != before;
            !list.is_empty()
        });
        self.neighbor_watches.retain(|_, list| {
            let before = list.len();
            list.retain(|(w, _)| *w != id);
            found |= list.len() != before;
            !list.is_empty()
        });
        found
    }

    /// Unregister every watch on `attribute` of `element`, returning how many.
    pub fn clear_watches(&self, element: &ElementId, attribute: &str) -> usize {
        self.watches
            .remove(&(element.clone(), attribute.to_string()))
            .map_or(0, |(_, list)| list.len())
    }

    /// Bound on nested watch cascades. Zero silences every watch.
    pub fn set_propagation_limit(&self, limit: usize) {
        self.propagation_limit.store(limit, Ordering::Relaxed);
    }

    pub fn propagation_limit(&self) -> usize {
        self.propagation_limit.load(Ordering::Relaxed)
    }

    /// Silence watches on the calling thread while the guard lives.
    pub fn pause_watches(&self) -> WatchPause {
        WatchPause::new()
    }

    /// Run attribute watches. Must be called without holding the store lock.
    fn fire_watches(&self, changes: Vec<Change>) {
        if self.watches.is_empty() {
            return;
        }
        let limit = self.propagation_limit();
        for change in changes {
            let key = (change.element.clone(), change.name.clone());
            let Some(watchers) = self
                .watches
                .get(&key)
                .map(|list| list.iter().map(|(_, w)| Arc::clone(w)).collect::<Vec<_>>())
            else {
                continue;
            };
            let Some(_cascade) = Cascade::enter(limit) else {
                tracing::debug!(
                    element = %change.element,
                    attribute = %change.name,
                    depth = Cascade::depth(),
                    limit,
                    "propagation limit reached, watches skipped"
                );
                continue;
            };
            for watcher in watchers {
                watcher.changed(
                    self,
                    &change.element,
                    change.previous.as_ref(),
                    change.current.as_ref(),
                );
            }
        }
    }

    fn fire_neighbor_watches(&self, node: &NodeId, neighbor: &NodeId, predicate: &str) {
        let Some(watchers) = self
            .neighbor_watches
            .get(node)
            .map(|list| list.iter().map(|(_, w)| Arc::clone(w)).collect::<Vec<_>>())
        else {
            return;
        };
        let Some(_cascade) = Cascade::enter(self.propagation_limit()) else {
            tracing::debug!(%node, %neighbor, "propagation limit reached, watches skipped");
            return;
        };
        for watcher in watchers {
            watcher.new_neighbor(self, node, neighbor, predicate);
        }
    }

    /// A consistent read-only view. Writers block while it is alive.
    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot::new(self.read())
    }
}

impl fmt::Debug for TripleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.read();
        f.debug_struct("TripleStore")
            .field("nodes", &inner.nodes.len())
            .field("edges", &inner.edges.len())
            .field("predicates", &inner.by_predicate.len())
            .field("watches", &self.watches.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with_diet() -> (TripleStore, [EdgeId; 3]) {
        let store = TripleStore::new();
        let a = store.add_edge(Triple::new("tom", "eats", "rice"));
        let b = store.add_edge(Triple::new("tom", "eats", "fish"));
        let c = store.add_edge(Triple::new("ann", "eats", "rice"));
        (store, [a, b, c])
    }

    #[test]
    fn add_edge_creates_endpoints() {
        let (store, _) = store_with_diet();
        assert_eq!(store.node_count(), 4);
        assert_eq!(store.edge_count(), 3);
        let nodes: Vec<_> = store.nodes().iter().map(|n| n.to_string()).collect();
        assert_eq!(nodes, vec!["tom", "rice", "fish", "ann"]);
    }

    #[test]
    fn edge_ids_increase_and_duplicates_coexist() {
        let store = TripleStore::new();
        let a = store.add_edge(Triple::new("x", "p", "y"));
        let b = store.add_edge(Triple::new("x", "p", "y"));
        assert!(b > a);
        assert_eq!(store.edges_matching(&EdgePattern::any()).len(), 2);
    }

    #[test]
    fn pattern_intersection() {
        let (store, [a, b, c]) = store_with_diet();
        let ids = |p: EdgePattern<'_>| -> Vec<EdgeId> {
            store.edges_matching(&p).iter().map(|e| e.id).collect()
        };
        assert_eq!(ids(EdgePattern::any().subject("tom")), vec![a, b]);
        assert_eq!(ids(EdgePattern::any().object("rice")), vec![a, c]);
        assert_eq!(ids(EdgePattern::any().subject("tom").object("rice")), vec![a]);
        assert_eq!(
            ids(EdgePattern::any().subject("tom").predicate("eats").object("fish")),
            vec![b]
        );
        assert!(ids(EdgePattern::any().predicate("likes")).is_empty());
        assert_eq!(ids(EdgePattern::any()), vec![a, b, c]);
    }

    #[test]
    fn remove_edge_updates_every_index() {
        let (store, [a, _, _]) = store_with_diet();
        let removed = store.remove_edge(a).unwrap();
        assert_eq!(removed.object.as_str(), "rice");
        assert!(
            store
                .edges_matching(&EdgePattern::any().subject("tom").object("rice"))
                .is_empty()
        );
        assert_eq!(store.edges_matching(&EdgePattern::any().object("rice")).len(), 1);
        assert!(matches!(
            store.remove_edge(a),
            Err(StoreError::EdgeNotFound { .. })
        ));
    }

    #[test]
    fn remove_node_keeps_edges() {
        let (store, _) = store_with_diet();
        store.remove_node("tom").unwrap();
        assert!(!store.contains_node("tom"));
        assert_eq!(store.edges_matching(&EdgePattern::any().subject("tom")).len(), 2);
        assert!(matches!(
            store.remove_node("tom"),
            Err(StoreError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn duplicate_node_rejected_but_ensure_is_idempotent() {
        let store = TripleStore::new();
        store.add_node("cell", Attributes::new()).unwrap();
        assert!(matches!(
            store.add_node("cell", Attributes::new()),
            Err(StoreError::DuplicateNode { .. })
        ));
        store.ensure_node("cell");
        store.ensure_node("other");
        assert_eq!(store.node_count(), 2);
    }

    #[test]
    fn attributes_on_nodes_and_edges() {
        let (store, [a, _, _]) = store_with_diet();
        let tom = ElementId::node("tom");
        assert_eq!(store.set_attribute(&tom, "age", 3).unwrap(), None);
        assert_eq!(store.get_attribute(&tom, "age").unwrap(), Some(json!(3)));

        let edge = ElementId::Edge(a);
        store.set_attribute(&edge, "since", "2020").unwrap();
        assert_eq!(store.edge(a).unwrap().attributes["since"], json!("2020"));

        assert_eq!(store.remove_attribute(&tom, "age").unwrap(), Some(json!(3)));
        assert_eq!(store.get_attribute(&tom, "age").unwrap(), None);

        let missing = ElementId::node("nobody");
        assert!(matches!(
            store.set_attribute(&missing, "x", 1),
            Err(StoreError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn apply_updates_is_all_or_nothing() {
        let (store, _) = store_with_diet();
        let mut updates = Attributes::new();
        updates.insert("alive".into(), json!(true));
        let batch = vec![
            (ElementId::node("tom"), updates.clone()),
            (ElementId::node("ghost"), updates.clone()),
        ];
        assert!(store.apply_updates(batch).is_err());
        assert_eq!(store.get_attribute(&ElementId::node("tom"), "alive").unwrap(), None);

        let batch = vec![(ElementId::node("tom"), updates)];
        assert_eq!(store.apply_updates(batch).unwrap(), 1);
        assert_eq!(
            store.get_attribute(&ElementId::node("tom"), "alive").unwrap(),
            Some(json!(true))
        );
    }

    #[test]
    fn neighbors_group_predicates() {
        let store = TripleStore::new();
        store.add_edge(Triple::new("a", "knows", "b"));
        store.add_edge(Triple::new("a", "likes", "b"));
        store.add_edge(Triple::new("a", "knows", "c"));
        let neighbors = store.neighbors("a").unwrap();
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].0.as_str(), "b");
        assert_eq!(neighbors[0].1.len(), 2);
        assert!(store.neighbors("zzz").is_err());
    }

    #[test]
    fn edge_lookup_reports_missing_ids() {
        let (store, [a, _, _]) = store_with_diet();
        assert_eq!(store.edge(a).unwrap().predicate.as_ref(), "eats");
        store.remove_edge(a).unwrap();
        assert!(matches!(
            store.edge(a),
            Err(StoreError::EdgeNotFound { edge }) if edge == a.get()
        ));
    }

    #[test]
    fn typed_endpoints_survive_storage() {
        let store = TripleStore::new();
        let id = store.add_edge(Triple::from_values(
            Value::atom("agent"),
            "code",
            Value::atom("007"),
        ));
        let edge = store.edge(id).unwrap();
        assert_eq!(edge.object.as_str(), "007");
        assert_eq!(edge.object_value, Value::atom("007"));

        // String-keyed triples read the constant off the key.
        let id = store.add_edge(Triple::new("agent", "age", "42"));
        assert_eq!(store.edge(id).unwrap().object_value, Value::Int(42));
    }

    #[test]
    fn filtered_enumeration() {
        let (store, [_, b, _]) = store_with_diet();
        store
            .set_attribute(&ElementId::node("ann"), "age", 14)
            .unwrap();
        let teens = store.nodes_where(|_, attributes| attributes.get("age") == Some(&json!(14)));
        assert_eq!(teens, vec![NodeId::new("ann")]);
        let named: Vec<_> = store
            .nodes_where(|id, _| id.as_str().len() == 4)
            .iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(named, vec!["rice", "fish"]);

        let fishy = store.edges_where(|edge| edge.object.as_str() == "fish");
        assert_eq!(fishy.len(), 1);
        assert_eq!(fishy[0].id, b);

        let picked = store.filter_nodes(["rice", "nobody", "ann"], |attributes| attributes.is_empty());
        assert_eq!(picked, vec![NodeId::new("rice")]);
    }

    #[test]
    fn negative_weight_marks_negative_example() {
        let store = TripleStore::new();
        let id = store.add_edge(Triple::new("a", "p", "b").with_weight(-1.0));
        assert!(store.edge(id).unwrap().is_negative());
        store.set_weight(id, Some(0.5)).unwrap();
        assert!(!store.edge(id).unwrap().is_negative());
    }
}
