//! Benchmarks for unification, resolution and propagation.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;

use logigraph::error::TransitionError;
use logigraph::propagate::{Element, EvaluationOrder, PropagationEngine, Scope};
use logigraph::store::{Attributes, ElementId, Snapshot, Triple, TripleStore};
use logigraph::term::parse::parse_term;
use logigraph::term::{Substitution, unify};
use logigraph::{KbConfig, KnowledgeBase};

fn chain(length: usize) -> KnowledgeBase {
    let kb = KnowledgeBase::new(KbConfig::default()).unwrap();
    for i in 0..length {
        kb.store()
            .add_edge(Triple::new(format!("n{i}"), "parent", format!("n{}", i + 1)));
    }
    kb.consult(
        "ancestor(X, Y) :- parent(X, Y).\n\
         ancestor(X, Z) :- parent(X, Y), ancestor(Y, Z).\n",
    )
    .unwrap();
    kb
}

fn bench_unify(c: &mut Criterion) {
    let a = parse_term("f(X, g(Y, [1, 2, 3|T]), h(Z, Z))").unwrap();
    let b = parse_term("f(a, g(b, [1, 2, 3, 4]), h(c, W))").unwrap();
    let empty = Substitution::new();

    c.bench_function("unify_nested", |bench| {
        bench.iter(|| black_box(unify(&a, &b, &empty)))
    });
}

fn bench_ancestor(c: &mut Criterion) {
    let kb = chain(50);

    c.bench_function("ancestor_chain_50_all", |bench| {
        bench.iter(|| black_box(kb.query_str("ancestor(n0, Y)").unwrap().count()))
    });
    c.bench_function("ancestor_chain_50_first", |bench| {
        bench.iter(|| black_box(kb.ask("ancestor(n0, n50)").unwrap()))
    });
}

fn bench_propagate(c: &mut Criterion) {
    let store = TripleStore::new();
    for i in 0..1_000 {
        let id = store.ensure_node(format!("n{i}"));
        store
            .set_attribute(&ElementId::Node(id), "value", i)
            .unwrap();
        let next = format!("n{}", (i + 1) % 1_000);
        store.add_edge(Triple::new(format!("n{i}"), "next", next));
    }
    let shift = |element: &Element<'_>,
                 snapshot: &Snapshot<'_>|
     -> Result<Attributes, TransitionError> {
        let Element::Node { id, .. } = *element else {
            return Ok(Attributes::new());
        };
        let value = snapshot
            .incoming(id.as_str())
            .first()
            .and_then(|edge| {
                snapshot.get_attribute(&ElementId::Node(edge.subject.clone()), "value")
            })
            .cloned()
            .unwrap_or(json!(0));
        Ok(Attributes::from([("value".to_string(), value)]))
    };

    for (label, order) in [
        ("propagate_1k_sequential", EvaluationOrder::Sequential),
        ("propagate_1k_parallel", EvaluationOrder::Parallel),
    ] {
        let engine = PropagationEngine::new(order);
        c.bench_function(label, |bench| {
            bench.iter(|| {
                black_box(engine.step(&store, Scope::Nodes, |_| true, &shift).unwrap())
            })
        });
    }
}

criterion_group!(benches, bench_unify, bench_ancestor, bench_propagate);
criterion_main!(benches);
