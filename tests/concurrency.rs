//! Readers and a structural writer sharing one store.
//!
//! The writer keeps rotating `link(hub, nN)` edges while readers on other
//! threads query, snapshot and pattern-match. Every read must see the three
//! indexes and the edge map agree.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use logigraph::store::{EdgePattern, Triple, TripleStore};
use logigraph::{KbConfig, KnowledgeBase};

mod common;

const ROUNDS: usize = 2_000;
const READERS: usize = 4;

fn shared_store() -> Arc<TripleStore> {
    common::init_tracing();
    let store = Arc::new(TripleStore::new());
    for n in 0..10 {
        store.add_edge(Triple::new("hub", "anchor", format!("a{n}")));
    }
    store.add_edge(Triple::new("hub", "link", "n0"));
    store
}

/// Rotate the hub's `link` edge: add the next one, then drop the oldest.
/// At any point the hub has one or two links.
fn rotate_links(store: &TripleStore, done: &AtomicBool) {
    for n in 1..=ROUNDS {
        store.add_edge(Triple::new("hub", "link", format!("n{n}")));
        let oldest = store.edges_matching(&EdgePattern::any().subject("hub").predicate("link"))[0].id;
        store.remove_edge(oldest).unwrap();
    }
    done.store(true, Ordering::Release);
}

#[test]
fn snapshots_stay_index_consistent_under_writes() {
    let store = shared_store();
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        scope.spawn(|| rotate_links(&store, &done));
        for _ in 0..READERS {
            scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    let snap = store.snapshot();
                    let pattern = EdgePattern::any().subject("hub").predicate("link");
                    let indexed: Vec<_> =
                        snap.edges_matching(&pattern).iter().map(|e| e.id).collect();
                    let scanned: Vec<_> = snap
                        .edges()
                        .filter(|e| e.subject.as_str() == "hub" && e.predicate.as_ref() == "link")
                        .map(|e| e.id)
                        .collect();
                    assert_eq!(indexed, scanned);
                    assert!((1..=2).contains(&indexed.len()), "saw {} links", indexed.len());

                    // Object index agrees with the subject index for every link.
                    for id in &indexed {
                        let edge = snap.edge(*id).unwrap();
                        let by_object = snap.edges_matching(&EdgePattern::any().object(edge.object.as_str()));
                        assert!(by_object.iter().any(|e| e.id == *id));
                    }
                    assert_eq!(snap.edges_matching(&EdgePattern::any().predicate("anchor")).len(), 10);
                }
            });
        }
    });

    let remaining = store.edges_matching(&EdgePattern::any().predicate("link"));
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].object.as_str(), format!("n{ROUNDS}"));
}

#[test]
fn unlocked_reads_return_whole_edges() {
    let store = shared_store();
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        scope.spawn(|| rotate_links(&store, &done));
        for _ in 0..READERS {
            scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    let edges = store.edges_matching(&EdgePattern::any().object("n0"));
                    assert!(edges.len() <= 1);

                    let links = store.edges_matching(&EdgePattern::any().predicate("link"));
                    assert!(links.windows(2).all(|w| w[0].id < w[1].id));
                    for edge in &links {
                        assert_eq!(edge.subject.as_str(), "hub");
                        assert!(edge.object.as_str().starts_with('n'));
                    }
                    assert!(store.contains_node("hub"));
                }
            });
        }
    });

    // Rotated-out objects stay as nodes; only their edges are gone.
    assert!(store.contains_node("n0"));
    assert!(store.edges_matching(&EdgePattern::any().object("n0")).is_empty());
}

#[test]
fn queries_run_while_the_store_changes() {
    let store = shared_store();
    let kb = KnowledgeBase::with_store(KbConfig::default(), Arc::clone(&store)).unwrap();
    kb.consult("linked(X) :- link(hub, X).").unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        scope.spawn(|| rotate_links(&store, &done));
        for _ in 0..READERS {
            scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    let anchors = kb.query_str("anchor(hub, X)").unwrap().count();
                    assert_eq!(anchors, 10);

                    let linked: Vec<String> = kb
                        .query_str("linked(X)")
                        .unwrap()
                        .map(|answer| answer.unwrap().to_string())
                        .collect();
                    assert!(linked.len() <= 2, "saw {linked:?}");
                    assert!(linked.iter().all(|a| a.starts_with("X = n")));
                }
            });
        }
    });

    assert_eq!(kb.query_str("linked(X)").unwrap().count(), 1);
}
