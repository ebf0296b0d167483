//! Per-element watches.
//!
//! A watch is a callback attached to one attribute of one node or edge. It
//! runs after the change committed and the store lock was released, so it may
//! read and write the store, including attributes that trigger further
//! watches. Such cascades are counted per thread; past the store's
//! propagation limit the write still lands but its watches stay silent.

use std::cell::Cell;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{ElementId, NodeId, StoreEvent, TripleStore};

/// Default bound on nested watch cascades.
pub const DEFAULT_PROPAGATION_LIMIT: usize = 32;

thread_local! {
    static CASCADE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Handle returned when registering a watch; pass it to
/// [`TripleStore::remove_watch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchId(pub(crate) u64);

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch:{}", self.0)
    }
}

/// Called when a watched attribute changes. `current` is `None` when the
/// attribute was removed, `previous` is `None` when it was first set.
pub trait AttributeWatch: Send + Sync {
    fn changed(
        &self,
        store: &TripleStore,
        element: &ElementId,
        previous: Option<&serde_json::Value>,
        current: Option<&serde_json::Value>,
    );
}

impl<F> AttributeWatch for F
where
    F: Fn(&TripleStore, &ElementId, Option<&serde_json::Value>, Option<&serde_json::Value>)
        + Send
        + Sync,
{
    fn changed(
        &self,
        store: &TripleStore,
        element: &ElementId,
        previous: Option<&serde_json::Value>,
        current: Option<&serde_json::Value>,
    ) {
        self(store, element, previous, current)
    }
}

/// Called when an edge links the watched node to a node it had no edge with.
pub trait NeighborWatch: Send + Sync {
    fn new_neighbor(&self, store: &TripleStore, node: &NodeId, neighbor: &NodeId, predicate: &str);
}

impl<F> NeighborWatch for F
where
    F: Fn(&TripleStore, &NodeId, &NodeId, &str) + Send + Sync,
{
    fn new_neighbor(&self, store: &TripleStore, node: &NodeId, neighbor: &NodeId, predicate: &str) {
        self(store, node, neighbor, predicate)
    }
}

/// One attribute change waiting for its watches.
#[derive(Debug, Clone)]
pub(crate) struct Change {
    pub(crate) element: ElementId,
    pub(crate) name: String,
    pub(crate) previous: Option<serde_json::Value>,
    pub(crate) current: Option<serde_json::Value>,
}

impl Change {
    pub(crate) fn to_event(&self) -> StoreEvent {
        StoreEvent::AttributeChanged {
            element: self.element.clone(),
            name: self.name.clone(),
            previous: self.previous.clone(),
            value: self.current.clone(),
        }
    }
}

/// Marks one level of watch cascade on this thread.
pub(crate) struct Cascade {
    _private: (),
}

impl Cascade {
    /// Enter one more level, or `None` if `limit` levels are already active.
    pub(crate) fn enter(limit: usize) -> Option<Self> {
        CASCADE_DEPTH.with(|depth| {
            let current = depth.get();
            if current >= limit {
                return None;
            }
            depth.set(current + 1);
            Some(Self { _private: () })
        })
    }

    pub(crate) fn depth() -> usize {
        CASCADE_DEPTH.with(Cell::get)
    }
}

impl Drop for Cascade {
    fn drop(&mut self) {
        CASCADE_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Silences every watch on this thread until dropped. Returned by
/// [`TripleStore::pause_watches`].
pub struct WatchPause {
    saved: usize,
}

impl WatchPause {
    pub(crate) fn new() -> Self {
        let saved = CASCADE_DEPTH.with(|depth| depth.replace(usize::MAX));
        Self { saved }
    }
}

impl Drop for WatchPause {
    fn drop(&mut self) {
        CASCADE_DEPTH.with(|depth| depth.set(self.saved));
    }
}
