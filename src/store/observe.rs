//! Push notifications of store changes.
//!
//! Observers are the boundary for live views: a transport layer subscribes,
//! receives every [`StoreEvent`] after the corresponding mutation committed,
//! and forwards [`StoreEvent::to_json`] to its clients.

use std::sync::mpsc;

use serde::{Deserialize, Serialize};

use super::{EdgeId, ElementId, NodeId};

/// A committed change to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StoreEvent {
    NodeAdded {
        node: NodeId,
    },
    NodeRemoved {
        node: NodeId,
    },
    EdgeAdded {
        edge: EdgeId,
        subject: NodeId,
        predicate: String,
        object: NodeId,
    },
    EdgeRemoved {
        edge: EdgeId,
    },
    /// `value` is `None` when the attribute was removed, `previous` when it
    /// was first set.
    AttributeChanged {
        element: ElementId,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous: Option<serde_json::Value>,
        value: Option<serde_json::Value>,
    },
    /// A propagation epoch finished and its batch is visible.
    EpochCommitted {
        epoch: u64,
        updated: usize,
    },
}

impl StoreEvent {
    /// Wire form of the event.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Receives store events. Notification cannot fail the mutation.
pub trait StoreObserver: Send + Sync {
    fn notify(&self, event: &StoreEvent);
}

impl<F> StoreObserver for F
where
    F: Fn(&StoreEvent) + Send + Sync,
{
    fn notify(&self, event: &StoreEvent) {
        self(event)
    }
}

/// Forwards events over an unbounded channel.
pub struct ChannelObserver {
    sender: mpsc::Sender<StoreEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::Receiver<StoreEvent>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }
}

impl StoreObserver for ChannelObserver {
    fn notify(&self, event: &StoreEvent) {
        if self.sender.send(event.clone()).is_err() {
            tracing::trace!("store event dropped: receiver gone");
        }
    }
}
