//! Knowledge base facade: top-level API for logigraph.
//!
//! The `KnowledgeBase` owns the triple store, the rule base and the
//! propagation engine, and provides the public interface for asserting
//! knowledge, querying it and running simulations over it.

use std::fmt;
use std::sync::Arc;

use crate::config::KbConfig;
use crate::error::KbResult;
use crate::propagate::{Element, EpochReport, PropagationEngine, Scope, Transition};
use crate::resolve::{LinkPredictor, Solutions, Solver};
use crate::rules::{Builtin, Rule, RuleBase, RuleId};
use crate::store::{
    Attributes, EdgeId, EdgePattern, NodeId, StoreObserver, Triple, TripleStore,
};
use crate::term::Term;
use crate::term::parse::{Clause, parse_clause, parse_program, parse_query};

/// Where an asserted fact ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactId {
    /// A binary fact stored as an edge.
    Edge(EdgeId),
    /// Any other fact, stored as a body-less rule.
    Rule(RuleId),
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactId::Edge(id) => write!(f, "{id}"),
            FactId::Rule(id) => write!(f, "{id}"),
        }
    }
}

/// A clause that passed validation and is ready to be stored.
enum Pending {
    Edge(Triple),
    Rule { rule: Rule, nodes: Vec<NodeId> },
}

impl Pending {
    fn fact(fact: Term) -> KbResult<Self> {
        if let Some(compound) = fact.as_compound() {
            if let [subject, object] = compound.args() {
                if let (Some(s), Some(o)) = (subject.as_const(), object.as_const()) {
                    let triple = Triple::from_values(s.clone(), compound.functor(), o.clone());
                    return Ok(Pending::Edge(triple));
                }
            }
        }
        let rule = Rule::fact(fact)?;
        let nodes = rule
            .head()
            .args()
            .iter()
            .filter_map(Term::as_const)
            .map(NodeId::from)
            .collect();
        Ok(Pending::Rule { rule, nodes })
    }

    fn clause(clause: Clause) -> KbResult<Self> {
        if clause.is_fact() {
            return Self::fact(clause.head);
        }
        let rule = Rule::from_clause(clause)?;
        Ok(Pending::Rule {
            rule,
            nodes: Vec::new(),
        })
    }
}

/// An in-memory knowledge graph with logic queries and propagation.
pub struct KnowledgeBase {
    config: KbConfig,
    store: Arc<TripleStore>,
    rules: Arc<RuleBase>,
    propagation: PropagationEngine,
    predictor: Option<Arc<dyn LinkPredictor>>,
}

impl KnowledgeBase {
    /// Create a knowledge base over a fresh store.
    pub fn new(config: KbConfig) -> KbResult<Self> {
        Self::with_store(config, Arc::new(TripleStore::new()))
    }

    /// Create a knowledge base over an existing store handle.
    pub fn with_store(config: KbConfig, store: Arc<TripleStore>) -> KbResult<Self> {
        config.validate()?;
        store.set_propagation_limit(config.propagation_limit);

        let rules = if config.standard_builtins {
            RuleBase::with_standard_builtins()
        } else {
            RuleBase::new()
        };
        tracing::info!(
            max_depth = config.max_depth,
            order = ?config.evaluation_order,
            builtins = rules.builtin_count(),
            nodes = store.node_count(),
            edges = store.edge_count(),
            "initializing logigraph knowledge base"
        );

        Ok(Self {
            propagation: PropagationEngine::new(config.evaluation_order),
            config,
            store,
            rules: Arc::new(rules),
            predictor: None,
        })
    }

    /// Answer ground binary queries without a proof by asking `predictor`.
    pub fn with_predictor(mut self, predictor: Arc<dyn LinkPredictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    pub fn config(&self) -> &KbConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<TripleStore> {
        &self.store
    }

    pub fn rules(&self) -> &Arc<RuleBase> {
        &self.rules
    }

    pub fn propagation(&self) -> &PropagationEngine {
        &self.propagation
    }

    // -- knowledge ----------------------------------------------------------

    /// Assert a ground fact.
    ///
    /// `p(a, b)` over constants becomes an edge `a --p--> b`; every other
    /// fact becomes a body-less rule. Constant arguments become nodes either
    /// way.
    pub fn assert_fact(&self, fact: Term) -> KbResult<FactId> {
        Ok(self.commit(Pending::fact(fact)?))
    }

    /// Remove a previously asserted fact.
    pub fn retract(&self, id: FactId) -> KbResult<()> {
        match id {
            FactId::Edge(edge) => {
                self.store.remove_edge(edge)?;
            }
            FactId::Rule(rule) => {
                self.rules.remove(rule)?;
            }
        }
        Ok(())
    }

    pub fn add_rule(&self, rule: Rule) -> RuleId {
        self.rules.add(rule)
    }

    pub fn remove_rule(&self, id: RuleId) -> KbResult<Arc<Rule>> {
        Ok(self.rules.remove(id)?)
    }

    pub fn register_builtin(&self, name: &str, arity: usize, builtin: impl Builtin + 'static) {
        self.rules.register_builtin(name, arity, builtin);
    }

    /// Add one clause in source form: `likes(tom, rice).` or
    /// `grandparent(X, Z) :- parent(X, Y), parent(Y, Z).`
    pub fn tell(&self, clause: &str) -> KbResult<FactId> {
        self.add_clause(parse_clause(clause)?)
    }

    /// Add every clause of a program, in order.
    ///
    /// Every clause is parsed and validated before anything is added, so an
    /// error leaves the knowledge base unchanged.
    pub fn consult(&self, program: &str) -> KbResult<Vec<FactId>> {
        let pending = parse_program(program)?
            .into_iter()
            .map(Pending::clause)
            .collect::<KbResult<Vec<_>>>()?;
        let ids: Vec<FactId> = pending.into_iter().map(|p| self.commit(p)).collect();
        tracing::debug!(clauses = ids.len(), "program consulted");
        Ok(ids)
    }

    fn add_clause(&self, clause: Clause) -> KbResult<FactId> {
        Ok(self.commit(Pending::clause(clause)?))
    }

    fn commit(&self, pending: Pending) -> FactId {
        match pending {
            Pending::Edge(triple) => FactId::Edge(self.store.add_edge(triple)),
            Pending::Rule { rule, nodes } => {
                for node in nodes {
                    self.store.ensure_node(node);
                }
                FactId::Rule(self.rules.add(rule))
            }
        }
    }

    // -- queries ------------------------------------------------------------

    /// Raw substitutions proving `goal`.
    pub fn solve(&self, goal: Term) -> Solver {
        Solver::new(
            Arc::clone(&self.store),
            Arc::clone(&self.rules),
            &self.config,
            goal,
        )
    }

    /// Answers to `goal`, keyed by its variable names.
    pub fn query(&self, goal: Term) -> Solutions {
        let solutions = Solutions::new(self.solve(goal.clone()), goal);
        match &self.predictor {
            Some(predictor) => {
                solutions.with_predictor(Arc::clone(predictor), self.config.fallback_threshold)
            }
            None => solutions,
        }
    }

    /// Parse and run a query such as `?- eats(tom, X).`
    pub fn query_str(&self, query: &str) -> KbResult<Solutions> {
        Ok(self.query(parse_query(query)?))
    }

    /// Whether the query has at least one answer.
    pub fn ask(&self, query: &str) -> KbResult<bool> {
        let first = self.query_str(query)?.next().transpose()?;
        Ok(first.is_some())
    }

    /// Materialize the derivable `predicate(X, Y)` answers over constants as
    /// edges. Returns the number of edges added.
    pub fn solidify(&self, predicate: &str) -> KbResult<usize> {
        let goal = Term::compound(predicate, [Term::var("X"), Term::var("Y")]);
        let mut derived = Vec::new();
        for answer in self.query(goal).distinct() {
            let answer = answer?;
            if answer.is_estimated() {
                continue;
            }
            let subject = answer.get("X").and_then(Term::as_const);
            let object = answer.get("Y").and_then(Term::as_const);
            if let (Some(s), Some(o)) = (subject, object) {
                derived.push(Triple::from_values(s.clone(), predicate, o.clone()));
            }
        }

        let mut added = 0;
        for triple in derived {
            let pattern = EdgePattern::any()
                .subject(triple.subject.as_str())
                .predicate(predicate)
                .object(triple.object.as_str());
            let exists = self
                .store
                .edges_matching(&pattern)
                .iter()
                .any(|edge| !edge.is_negative());
            if !exists {
                self.store.add_edge(triple);
                added += 1;
            }
        }
        tracing::debug!(predicate, added, "predicate solidified");
        Ok(added)
    }

    // -- propagation --------------------------------------------------------

    pub fn register_transition(
        &self,
        name: impl Into<String>,
        transition: impl Transition + 'static,
    ) {
        self.propagation.register(name, transition);
    }

    /// One propagation epoch over the store.
    pub fn step<T>(
        &self,
        scope: Scope,
        filter: impl Fn(&Element<'_>) -> bool,
        transition: &T,
    ) -> KbResult<EpochReport>
    where
        T: Transition + ?Sized,
    {
        Ok(self.propagation.step(&self.store, scope, filter, transition)?)
    }

    /// One epoch of a registered transition.
    pub fn step_named(
        &self,
        name: &str,
        scope: Scope,
        filter: impl Fn(&Element<'_>) -> bool,
    ) -> KbResult<EpochReport> {
        Ok(self.propagation.step_named(&self.store, name, scope, filter)?)
    }

    pub fn run<T>(
        &self,
        epochs: usize,
        scope: Scope,
        filter: impl Fn(&Element<'_>) -> bool,
        transition: &T,
    ) -> KbResult<Vec<EpochReport>>
    where
        T: Transition + ?Sized,
    {
        Ok(self
            .propagation
            .run(&self.store, epochs, scope, filter, transition)?)
    }

    /// Nodes whose attributes satisfy `condition`. Tests `candidates` in the
    /// given order, or every node in creation order when `None`.
    pub fn filter(
        &self,
        condition: impl Fn(&Attributes) -> bool,
        candidates: Option<&[&str]>,
    ) -> Vec<NodeId> {
        match candidates {
            Some(candidates) => self.store.filter_nodes(candidates.iter().copied(), condition),
            None => self.store.nodes_where(|_, attributes| condition(attributes)),
        }
    }

    /// Receive store and epoch events.
    pub fn subscribe(&self, observer: Arc<dyn StoreObserver>) {
        self.store.subscribe(observer);
    }

    /// Summary of the knowledge base state.
    pub fn info(&self) -> KbInfo {
        KbInfo {
            node_count: self.store.node_count(),
            edge_count: self.store.edge_count(),
            predicate_count: self.store.predicates().len(),
            rule_count: self.rules.len(),
            builtin_count: self.rules.builtin_count(),
            transition_count: self.propagation.transitions().len(),
            epoch: self.propagation.epoch(),
            max_depth: self.config.max_depth,
            predictor: self.predictor.is_some(),
        }
    }
}

/// Summary information about a knowledge base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KbInfo {
    pub node_count: usize,
    pub edge_count: usize,
    pub predicate_count: usize,
    pub rule_count: usize,
    pub builtin_count: usize,
    pub transition_count: usize,
    pub epoch: u64,
    pub max_depth: usize,
    pub predictor: bool,
}

impl fmt::Display for KbInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "logigraph knowledge base")?;
        writeln!(f, "  nodes:        {}", self.node_count)?;
        writeln!(f, "  edges:        {}", self.edge_count)?;
        writeln!(f, "  predicates:   {}", self.predicate_count)?;
        writeln!(f, "  rules:        {}", self.rule_count)?;
        writeln!(f, "  builtins:     {}", self.builtin_count)?;
        writeln!(f, "  transitions:  {}", self.transition_count)?;
        writeln!(f, "  epoch:        {}", self.epoch)?;
        writeln!(f, "  max depth:    {}", self.max_depth)?;
        writeln!(f, "  predictor:    {}", self.predictor)?;
        Ok(())
    }
}

impl fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("rules", &self.rules)
            .field("propagation", &self.propagation)
            .field("predictor", &self.predictor.is_some())
            .finish()
    }
}
