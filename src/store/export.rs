//! Flat record types for bulk import and export.
//!
//! These records are the boundary for file adapters: a CSV or JSON loader
//! produces [`EdgeRecord`]s and [`NodeRecord`]s, and this module moves them in
//! and out of a [`TripleStore`]. File formats themselves live outside the crate.

use serde::{Deserialize, Serialize};

use super::{Attributes, EdgeId, ElementId, NodeId, StoreResult, Triple, TripleStore};
use crate::term::Value;

/// An edge without its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Present only when the key alone would read back as a different
    /// constant, e.g. the atom `'007'`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_value: Option<Value>,
}

impl EdgeRecord {
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            attributes: Attributes::new(),
            weight: None,
            subject_value: None,
            object_value: None,
        }
    }
}

fn typed(node: &NodeId, value: &Value) -> Option<Value> {
    (node.to_value() != *value).then(|| value.clone())
}

/// A node with its attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

/// All edges in insertion order.
pub fn export_edges(store: &TripleStore) -> Vec<EdgeRecord> {
    let snapshot = store.snapshot();
    snapshot
        .edges()
        .map(|edge| EdgeRecord {
            subject: edge.subject.to_string(),
            predicate: edge.predicate.to_string(),
            object: edge.object.to_string(),
            attributes: edge.attributes.clone(),
            weight: edge.weight,
            subject_value: typed(&edge.subject, &edge.subject_value),
            object_value: typed(&edge.object, &edge.object_value),
        })
        .collect()
}

/// All nodes in creation order.
pub fn export_nodes(store: &TripleStore) -> Vec<NodeRecord> {
    let snapshot = store.snapshot();
    snapshot
        .nodes()
        .into_iter()
        .map(|(id, attributes)| NodeRecord {
            id: id.to_string(),
            attributes: attributes.clone(),
        })
        .collect()
}

/// Insert every record as a new edge. Returns the new ids in record order.
pub fn import_edges(
    store: &TripleStore,
    records: impl IntoIterator<Item = EdgeRecord>,
) -> Vec<EdgeId> {
    let ids: Vec<EdgeId> = records
        .into_iter()
        .map(|record| {
            let mut triple = Triple::new(record.subject, record.predicate, record.object);
            triple.attributes = record.attributes;
            triple.weight = record.weight;
            if let Some(value) = record.subject_value {
                triple.subject_value = value;
            }
            if let Some(value) = record.object_value {
                triple.object_value = value;
            }
            store.add_edge(triple)
        })
        .collect();
    tracing::debug!(count = ids.len(), "edges imported");
    ids
}

/// Create missing nodes and merge record attributes into existing ones.
///
/// Returns the number of records applied.
pub fn import_nodes(
    store: &TripleStore,
    records: impl IntoIterator<Item = NodeRecord>,
) -> StoreResult<usize> {
    let batch: Vec<(ElementId, Attributes)> = records
        .into_iter()
        .map(|record| {
            let id = store.ensure_node(record.id);
            (ElementId::Node(id), record.attributes)
        })
        .collect();
    store.apply_updates(batch)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn export_then_import_preserves_edges() {
        let source = TripleStore::new();
        source.add_edge(Triple::new("tom", "eats", "rice").with_attribute("times", 3));
        source.add_edge(Triple::new("tom", "eats", "mud").with_weight(-1.0));

        let records = export_edges(&source);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].weight, Some(-1.0));

        let target = TripleStore::new();
        let ids = import_edges(&target, records.clone());
        assert_eq!(ids.len(), 2);
        assert_eq!(export_edges(&target), records);
    }

    #[test]
    fn typed_constants_survive_export() {
        let source = TripleStore::new();
        source.add_edge(Triple::from_values(
            Value::atom("agent"),
            "code",
            Value::atom("007"),
        ));
        source.add_edge(Triple::from_values(Value::atom("agent"), "age", Value::Int(42)));

        let records = export_edges(&source);
        assert_eq!(records[0].object_value, Some(Value::atom("007")));
        assert_eq!(records[1].object_value, None);

        let target = TripleStore::new();
        let ids = import_edges(&target, records);
        assert_eq!(target.edge(ids[0]).unwrap().object_value, Value::atom("007"));
        assert_eq!(target.edge(ids[1]).unwrap().object_value, Value::Int(42));
    }

    #[test]
    fn import_nodes_merges_attributes() {
        let store = TripleStore::new();
        store
            .set_attribute(&ElementId::node(store.ensure_node("cell")), "alive", false)
            .unwrap();

        let mut attributes = Attributes::new();
        attributes.insert("x".into(), json!(1));
        let applied = import_nodes(
            &store,
            [
                NodeRecord {
                    id: "cell".into(),
                    attributes: attributes.clone(),
                },
                NodeRecord {
                    id: "fresh".into(),
                    attributes,
                },
            ],
        )
        .unwrap();
        assert_eq!(applied, 2);

        let cell = store.node_attributes("cell").unwrap();
        assert_eq!(cell["alive"], json!(false));
        assert_eq!(cell["x"], json!(1));
        assert_eq!(export_nodes(&store).len(), 2);
    }

    #[test]
    fn records_serialize_compactly() {
        let record = EdgeRecord::new("a", "p", "b");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json, json!({"subject": "a", "predicate": "p", "object": "b"}));
        let back: EdgeRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
