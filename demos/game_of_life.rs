//! Conway's Game of Life on the knowledge graph.
//!
//! Every cell is a node with an `alive` attribute and `adj` edges to its
//! neighbors; each generation is one propagation epoch. After the run the
//! grid is queried like any other knowledge.
//!
//! ```text
//! RUST_LOG=logigraph=debug cargo run --example game_of_life
//! ```

use std::sync::Arc;

use serde_json::json;

use logigraph::error::{BuiltinError, TransitionError};
use logigraph::propagate::{Element, EvaluationOrder, Scope};
use logigraph::rules::BuiltinAnswer;
use logigraph::store::{Attributes, ElementId, NodeId, Snapshot, Triple};
use logigraph::{KbConfig, KnowledgeBase, Term};

const SIZE: usize = 10;
const GENERATIONS: usize = 8;

fn cell(x: usize, y: usize) -> String {
    format!("c{x}_{y}")
}

fn life(element: &Element<'_>, snapshot: &Snapshot<'_>) -> Result<Attributes, TransitionError> {
    let Element::Node { id, attributes } = *element else {
        return Ok(Attributes::new());
    };
    let alive = attributes.get("alive") == Some(&json!(true));
    let neighbors = snapshot
        .outgoing(id.as_str())
        .into_iter()
        .filter(|edge| {
            snapshot.get_attribute(&ElementId::Node(edge.object.clone()), "alive")
                == Some(&json!(true))
        })
        .count();
    let next = matches!((alive, neighbors), (true, 2) | (_, 3));
    Ok(Attributes::from([("alive".to_string(), json!(next))]))
}

fn render(kb: &KnowledgeBase) -> String {
    let store = kb.store();
    let mut out = String::new();
    for y in 0..SIZE {
        for x in 0..SIZE {
            let alive = store
                .get_attribute(&ElementId::node(cell(x, y)), "alive")
                .ok()
                .flatten()
                == Some(json!(true));
            out.push(if alive { '#' } else { '.' });
        }
        out.push('\n');
    }
    out
}

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let kb = KnowledgeBase::new(KbConfig {
        evaluation_order: EvaluationOrder::Parallel,
        ..Default::default()
    })?;

    let glider = [(1, 0), (2, 1), (0, 2), (1, 2), (2, 2)];
    let store = kb.store();
    for y in 0..SIZE {
        for x in 0..SIZE {
            let id = store.ensure_node(cell(x, y));
            store.set_attribute(&ElementId::Node(id), "alive", glider.contains(&(x, y)))?;
        }
    }
    for y in 0..SIZE {
        for x in 0..SIZE {
            for ny in y.saturating_sub(1)..=(y + 1).min(SIZE - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(SIZE - 1) {
                    if (nx, ny) != (x, y) {
                        store.add_edge(Triple::new(cell(x, y), "adj", cell(nx, ny)));
                    }
                }
            }
        }
    }
    // `alive(C)` reads the current generation straight from the store.
    let cells = Arc::clone(kb.store());
    kb.register_builtin("alive", 1, move |args: &[Term]| -> Result<_, BuiltinError> {
        let Some(id) = args[0].as_const() else {
            return Err(BuiltinError::Instantiation {
                builtin: "alive/1".into(),
            });
        };
        let alive = cells
            .get_attribute(&ElementId::node(NodeId::from(id)), "alive")
            .ok()
            .flatten()
            == Some(json!(true));
        Ok(if alive { vec![BuiltinAnswer::yes()] } else { Vec::new() })
    });
    kb.tell("crowded(C) :- adj(C, A), alive(A), adj(C, B), alive(B), A \\== B.")?;

    println!("generation 0\n{}", render(&kb));
    for report in kb.run(GENERATIONS, Scope::Nodes, |_| true, &life)? {
        println!("{report}");
    }
    println!("generation {GENERATIONS}\n{}", render(&kb));
    let crowded = kb.query_str("crowded(C)")?.distinct().count();
    println!("cells with at least two living neighbors: {crowded}");
    println!("{}", kb.info());
    Ok(())
}
