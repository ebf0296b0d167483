//! Synchronous, double-buffered propagation over the triple store.
//!
//! One call to [`PropagationEngine::step`] is one epoch:
//!
//! 1. take a [`Snapshot`] of the store (epoch N),
//! 2. evaluate the transition for every selected element against it,
//! 3. drop the snapshot and commit all returned attribute maps as a single
//!    batch (epoch N+1).
//!
//! Transitions only ever read epoch N, so the evaluation order cannot change
//! the result. Any transition error aborts the epoch before anything is
//! written.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PropagateError, TransitionError};
use crate::store::{Attributes, Edge, ElementId, NodeId, Snapshot, StoreEvent, TripleStore};

/// Result type for propagation.
pub type PropagateResult<T> = std::result::Result<T, PropagateError>;

/// An element under evaluation, borrowed from the epoch snapshot.
#[derive(Debug, Clone, Copy)]
pub enum Element<'a> {
    Node {
        id: &'a NodeId,
        attributes: &'a Attributes,
    },
    Edge(&'a Edge),
}

impl<'a> Element<'a> {
    pub fn id(&self) -> ElementId {
        match *self {
            Element::Node { id, .. } => ElementId::Node(id.clone()),
            Element::Edge(edge) => ElementId::Edge(edge.id),
        }
    }

    pub fn attributes(&self) -> &'a Attributes {
        match *self {
            Element::Node { attributes, .. } => attributes,
            Element::Edge(edge) => &edge.attributes,
        }
    }

    pub fn get(&self, name: &str) -> Option<&'a serde_json::Value> {
        self.attributes().get(name)
    }

    pub fn is_node(&self) -> bool {
        matches!(self, Element::Node { .. })
    }
}

/// Computes an element's next attributes from the current epoch.
///
/// The returned map is merged into the element's attributes at commit time;
/// an empty map leaves the element untouched.
pub trait Transition: Send + Sync {
    fn apply(
        &self,
        element: &Element<'_>,
        snapshot: &Snapshot<'_>,
    ) -> Result<Attributes, TransitionError>;
}

impl<F> Transition for F
where
    F: Fn(&Element<'_>, &Snapshot<'_>) -> Result<Attributes, TransitionError> + Send + Sync,
{
    fn apply(
        &self,
        element: &Element<'_>,
        snapshot: &Snapshot<'_>,
    ) -> Result<Attributes, TransitionError> {
        self(element, snapshot)
    }
}

/// Which elements an epoch visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Nodes,
    Edges,
    All,
}

/// Order in which transitions are evaluated within an epoch.
///
/// Every order commits the same batch; `Shuffled` exists to check that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationOrder {
    #[default]
    Sequential,
    /// Evaluate on the rayon thread pool.
    Parallel,
    Shuffled {
        seed: u64,
    },
}

/// Outcome of one committed epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochReport {
    /// The epoch number after the commit.
    pub epoch: u64,
    /// Elements the transition was evaluated on.
    pub evaluated: usize,
    /// Elements that received a non-empty update.
    pub updated: usize,
}

impl fmt::Display for EpochReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "epoch {}: {} evaluated, {} updated",
            self.epoch, self.evaluated, self.updated
        )
    }
}

/// Runs epochs and keeps a table of named transitions.
pub struct PropagationEngine {
    order: EvaluationOrder,
    transitions: DashMap<String, Arc<dyn Transition>>,
    epoch: AtomicU64,
}

impl PropagationEngine {
    pub fn new(order: EvaluationOrder) -> Self {
        Self {
            order,
            transitions: DashMap::new(),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn order(&self) -> EvaluationOrder {
        self.order
    }

    /// Number of epochs committed so far.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Register a transition under `name`, replacing any previous one.
    pub fn register(&self, name: impl Into<String>, transition: impl Transition + 'static) {
        let name = name.into();
        tracing::debug!(transition = %name, "transition registered");
        self.transitions.insert(name, Arc::new(transition));
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.transitions.remove(name).is_some()
    }

    /// Registered transition names, sorted.
    pub fn transitions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.transitions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Run one epoch of `transition` over the elements in `scope` accepted by
    /// `filter`.
    pub fn step<T>(
        &self,
        store: &TripleStore,
        scope: Scope,
        filter: impl Fn(&Element<'_>) -> bool,
        transition: &T,
    ) -> PropagateResult<EpochReport>
    where
        T: Transition + ?Sized,
    {
        let epoch = self.epoch();
        let snapshot = store.snapshot();

        let mut elements = Vec::new();
        if matches!(scope, Scope::Nodes | Scope::All) {
            elements.extend(
                snapshot
                    .nodes()
                    .into_iter()
                    .map(|(id, attributes)| Element::Node { id, attributes }),
            );
        }
        if matches!(scope, Scope::Edges | Scope::All) {
            elements.extend(snapshot.edges().map(Element::Edge));
        }
        elements.retain(|element| filter(element));
        let evaluated = elements.len();

        let result = evaluate(self.order, &elements, &snapshot, transition, epoch);
        let batch = match result {
            Ok(batch) => batch,
            Err(err) => {
                tracing::warn!(epoch, error = %err, "epoch aborted");
                return Err(err);
            }
        };
        drop(elements);
        drop(snapshot);

        let updated = store.apply_updates(batch)?;
        let committed = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(epoch = committed, evaluated, updated, "epoch committed");
        store.publish(vec![StoreEvent::EpochCommitted {
            epoch: committed,
            updated,
        }]);

        Ok(EpochReport {
            epoch: committed,
            evaluated,
            updated,
        })
    }

    /// Run one epoch of a registered transition.
    pub fn step_named(
        &self,
        store: &TripleStore,
        name: &str,
        scope: Scope,
        filter: impl Fn(&Element<'_>) -> bool,
    ) -> PropagateResult<EpochReport> {
        let transition = self
            .transitions
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PropagateError::UnknownTransition {
                name: name.to_string(),
            })?;
        self.step(store, scope, filter, &*transition)
    }

    /// Run `epochs` consecutive epochs, stopping at the first error.
    pub fn run<T>(
        &self,
        store: &TripleStore,
        epochs: usize,
        scope: Scope,
        filter: impl Fn(&Element<'_>) -> bool,
        transition: &T,
    ) -> PropagateResult<Vec<EpochReport>>
    where
        T: Transition + ?Sized,
    {
        (0..epochs)
            .map(|_| self.step(store, scope, &filter, transition))
            .collect()
    }
}

impl Default for PropagationEngine {
    fn default() -> Self {
        Self::new(EvaluationOrder::default())
    }
}

impl fmt::Debug for PropagationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropagationEngine")
            .field("order", &self.order)
            .field("epoch", &self.epoch())
            .field("transitions", &self.transitions.len())
            .finish()
    }
}

/// Evaluate every element against the snapshot. The batch is returned in
/// element order whatever the evaluation order was.
fn evaluate<T>(
    order: EvaluationOrder,
    elements: &[Element<'_>],
    snapshot: &Snapshot<'_>,
    transition: &T,
    epoch: u64,
) -> PropagateResult<Vec<(ElementId, Attributes)>>
where
    T: Transition + ?Sized,
{
    let apply = |element: &Element<'_>| -> PropagateResult<Option<(ElementId, Attributes)>> {
        let updates = transition
            .apply(element, snapshot)
            .map_err(|source| PropagateError::Transition {
                element: element.id().to_string(),
                epoch,
                source,
            })?;
        Ok((!updates.is_empty()).then(|| (element.id(), updates)))
    };

    let updates: Vec<Option<(ElementId, Attributes)>> = match order {
        EvaluationOrder::Sequential => elements.iter().map(apply).collect::<Result<_, _>>()?,
        EvaluationOrder::Parallel => elements.par_iter().map(apply).collect::<Result<_, _>>()?,
        EvaluationOrder::Shuffled { seed } => {
            let mut indices: Vec<usize> = (0..elements.len()).collect();
            indices.shuffle(&mut StdRng::seed_from_u64(seed));
            let mut slots = vec![None; elements.len()];
            for index in indices {
                slots[index] = apply(&elements[index])?;
            }
            slots
        }
    };
    Ok(updates.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::Triple;

    fn counter_store() -> TripleStore {
        let store = TripleStore::new();
        for (i, name) in ["a", "b", "c"].into_iter().enumerate() {
            let id = store.ensure_node(name);
            store
                .set_attribute(&ElementId::Node(id), "count", i as i64)
                .unwrap();
        }
        store.add_edge(Triple::new("a", "next", "b"));
        store.add_edge(Triple::new("b", "next", "c"));
        store.add_edge(Triple::new("c", "next", "a"));
        store
    }

    /// Each node takes the count of its predecessor.
    fn rotate(
        element: &Element<'_>,
        snapshot: &Snapshot<'_>,
    ) -> Result<Attributes, TransitionError> {
        let Element::Node { id, .. } = element else {
            return Ok(Attributes::new());
        };
        let incoming = snapshot.incoming(id.as_str());
        let Some(edge) = incoming.first() else {
            return Ok(Attributes::new());
        };
        let count = snapshot
            .node_attributes(edge.subject.as_str())
            .and_then(|attributes| attributes.get("count"))
            .cloned()
            .ok_or_else(|| TransitionError::new("predecessor has no count"))?;
        Ok(Attributes::from([("count".to_string(), count)]))
    }

    fn counts(store: &TripleStore) -> Vec<serde_json::Value> {
        ["a", "b", "c"]
            .iter()
            .map(|n| store.node_attributes(n).unwrap()["count"].clone())
            .collect()
    }

    #[test]
    fn reads_only_the_previous_epoch() {
        let store = counter_store();
        let engine = PropagationEngine::default();
        let report = engine.step(&store, Scope::Nodes, |_| true, &rotate).unwrap();
        assert_eq!(report.epoch, 1);
        assert_eq!(report.evaluated, 3);
        assert_eq!(report.updated, 3);
        // A partially updated read would have copied one value twice.
        assert_eq!(counts(&store), vec![json!(2), json!(0), json!(1)]);
    }

    #[test]
    fn every_order_commits_the_same_batch() {
        let orders = [
            EvaluationOrder::Sequential,
            EvaluationOrder::Parallel,
            EvaluationOrder::Shuffled { seed: 7 },
            EvaluationOrder::Shuffled { seed: 99 },
        ];
        let results: Vec<_> = orders
            .into_iter()
            .map(|order| {
                let store = counter_store();
                PropagationEngine::new(order)
                    .run(&store, 2, Scope::Nodes, |_| true, &rotate)
                    .unwrap();
                counts(&store)
            })
            .collect();
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(results[0], vec![json!(1), json!(2), json!(0)]);
    }

    #[test]
    fn error_aborts_without_commit() {
        let store = counter_store();
        let engine = PropagationEngine::default();
        let failing = |element: &Element<'_>, _: &Snapshot<'_>| {
            if element.id() == ElementId::node("c") {
                Err(TransitionError::new("boom"))
            } else {
                Ok(Attributes::from([("count".to_string(), json!(100))]))
            }
        };
        let err = engine
            .step(&store, Scope::Nodes, |_| true, &failing)
            .unwrap_err();
        assert!(matches!(err, PropagateError::Transition { epoch: 0, .. }));
        assert_eq!(counts(&store), vec![json!(0), json!(1), json!(2)]);
        assert_eq!(engine.epoch(), 0);
    }

    #[test]
    fn filter_and_scope_select_elements() {
        let store = counter_store();
        let engine = PropagationEngine::default();
        let mark = |_: &Element<'_>, _: &Snapshot<'_>| -> Result<Attributes, TransitionError> {
            Ok(Attributes::from([("seen".to_string(), json!(true))]))
        };

        let report = engine.step(&store, Scope::Edges, |_| true, &mark).unwrap();
        assert_eq!(report.evaluated, 3);
        assert!(store.node_attributes("a").unwrap().get("seen").is_none());

        let report = engine
            .step(
                &store,
                Scope::All,
                |e| e.is_node() && e.get("count") == Some(&json!(1)),
                &mark,
            )
            .unwrap();
        assert_eq!(report.evaluated, 1);
        assert_eq!(store.node_attributes("b").unwrap()["seen"], json!(true));
    }

    #[test]
    fn empty_updates_are_not_counted() {
        let store = counter_store();
        let engine = PropagationEngine::default();
        let idle = |_: &Element<'_>, _: &Snapshot<'_>| -> Result<Attributes, TransitionError> {
            Ok(Attributes::new())
        };
        let report = engine.step(&store, Scope::All, |_| true, &idle).unwrap();
        assert_eq!(report.evaluated, 6);
        assert_eq!(report.updated, 0);
    }

    #[test]
    fn named_transitions() {
        let store = counter_store();
        let engine = PropagationEngine::default();
        engine.register("rotate", rotate);
        assert_eq!(engine.transitions(), vec!["rotate"]);

        engine
            .step_named(&store, "rotate", Scope::Nodes, |_| true)
            .unwrap();
        assert_eq!(engine.epoch(), 1);

        assert!(engine.unregister("rotate"));
        let err = engine
            .step_named(&store, "rotate", Scope::Nodes, |_| true)
            .unwrap_err();
        assert!(matches!(err, PropagateError::UnknownTransition { .. }));
    }

    #[test]
    fn evaluation_order_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            order: EvaluationOrder,
        }
        let parsed: Wrapper = toml::from_str("order = { kind = \"shuffled\", seed = 3 }").unwrap();
        assert_eq!(parsed.order, EvaluationOrder::Shuffled { seed: 3 });
        let parsed: Wrapper = toml::from_str("order = { kind = \"parallel\" }").unwrap();
        assert_eq!(parsed.order, EvaluationOrder::Parallel);
    }
}
