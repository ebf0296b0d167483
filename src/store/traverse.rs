//! Multi-hop path search and reachability over a store snapshot.
//!
//! Both walks go breadth-first and skip negative examples. They follow
//! outgoing edges, or incoming edges when walking in reverse.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::error::StoreError;

use super::{Edge, EdgeId, NodeId, Snapshot, StoreResult};

/// Configuration for a path search.
#[derive(Debug, Clone)]
pub struct PathConfig {
    /// Maximum number of hops per path.
    pub max_depth: usize,
    /// Stop after this many paths.
    pub max_paths: usize,
    /// Only follow edges with these predicates (empty = follow all).
    pub predicate_filter: HashSet<String>,
    /// Walk edges from object to subject.
    pub reverse: bool,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            max_depth: 4,
            max_paths: 100,
            predicate_filter: HashSet::new(),
            reverse: false,
        }
    }
}

impl PathConfig {
    fn follows(&self, predicate: &str) -> bool {
        self.predicate_filter.is_empty() || self.predicate_filter.contains(predicate)
    }
}

/// Edges leaving `node` in the walk direction, each with the node it leads to.
fn steps<'s>(snapshot: &'s Snapshot<'_>, node: &str, reverse: bool) -> Vec<(&'s Edge, &'s NodeId)> {
    if reverse {
        snapshot
            .incoming(node)
            .into_iter()
            .map(|edge| (edge, &edge.subject))
            .collect()
    } else {
        snapshot
            .outgoing(node)
            .into_iter()
            .map(|edge| (edge, &edge.object))
            .collect()
    }
}

/// One step of a path: the predicate followed and the node it led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub predicate: Arc<str>,
    pub node: NodeId,
}

/// Every simple path from `start` to `target`, shortest first.
///
/// A path never visits a node twice, so `start == target` yields no paths.
pub fn find_paths(
    snapshot: &Snapshot<'_>,
    start: &str,
    target: &str,
    config: &PathConfig,
) -> StoreResult<Vec<Vec<Hop>>> {
    if !snapshot.contains_node(start) {
        return Err(StoreError::NodeNotFound {
            node: start.to_string(),
        });
    }

    let mut paths = Vec::new();
    let mut queue: VecDeque<(NodeId, Vec<Hop>)> = VecDeque::new();
    queue.push_back((NodeId::new(start), Vec::new()));

    while let Some((node, path)) = queue.pop_front() {
        if path.len() >= config.max_depth {
            continue;
        }
        for (edge, neighbor) in steps(snapshot, node.as_str(), config.reverse) {
            if edge.is_negative() || !config.follows(&edge.predicate) {
                continue;
            }
            let revisits =
                neighbor.as_str() == start || path.iter().any(|hop| hop.node == *neighbor);
            if revisits {
                continue;
            }

            let mut next = path.clone();
            next.push(Hop {
                predicate: Arc::clone(&edge.predicate),
                node: neighbor.clone(),
            });
            if neighbor.as_str() == target {
                paths.push(next);
                if paths.len() >= config.max_paths {
                    return Ok(paths);
                }
            } else {
                queue.push_back((neighbor.clone(), next));
            }
        }
    }

    Ok(paths)
}

/// Result of a reachability walk.
#[derive(Debug, Clone, Default)]
pub struct Reachable {
    /// All nodes visited, seeds included.
    pub visited: HashSet<NodeId>,
    /// Edges traversed, in discovery order.
    pub edges: Vec<EdgeId>,
    /// Maximum depth actually reached.
    pub depth_reached: usize,
}

/// Extract the subgraph reachable from `seeds` within `max_depth` hops.
/// With `reverse`, collect what reaches the seeds instead.
pub fn reachable(
    snapshot: &Snapshot<'_>,
    seeds: &[&str],
    max_depth: usize,
    reverse: bool,
) -> Reachable {
    let mut result = Reachable::default();
    let mut queue: VecDeque<(NodeId, usize)> = VecDeque::new();

    for &seed in seeds {
        let seed = NodeId::new(seed);
        if result.visited.insert(seed.clone()) {
            queue.push_back((seed, 0));
        }
    }

    while let Some((node, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for (edge, neighbor) in steps(snapshot, node.as_str(), reverse) {
            if edge.is_negative() {
                continue;
            }
            result.edges.push(edge.id);
            result.depth_reached = result.depth_reached.max(depth + 1);
            if result.visited.insert(neighbor.clone()) {
                queue.push_back((neighbor.clone(), depth + 1));
            }
        }
    }

    result
}
