//! SLD resolution over the triple store and the rule base.
//!
//! The engine is an explicit machine rather than recursive code:
//!
//! - a persistent **goal list** (shared tails, so choice points keep their
//!   continuation for free),
//! - a **choice-point stack**, each entry holding a trail mark, the goal it
//!   resolves, its continuation and the alternatives still untried,
//! - one **substitution** with an undo trail.
//!
//! Yielding an answer just suspends the machine; the next call to `next()`
//! backtracks into the most recent choice point. Nothing is locked between
//! answers, so a [`Solver`] can be dropped at any point.
//!
//! Goal dispatch order: control constructs, negation, builtins, store facts
//! (arity-2 goals, negative examples skipped), then rules in registration
//! order.

pub mod predictor;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::vec;

use crate::config::KbConfig;
use crate::error::ResolveError;
use crate::rules::{BuiltinAnswer, Rule, RuleBase};
use crate::store::{EdgePattern, TripleStore};
use crate::term::{Substitution, Term, TrailMark, Value, Var, unify_in_place};

pub use predictor::LinkPredictor;

/// Result type for resolution.
pub type ResolveResult<T> = std::result::Result<T, ResolveError>;

// ---------------------------------------------------------------------------
// Machine state
// ---------------------------------------------------------------------------

/// A persistent list of pending goals.
type Goals = Option<Arc<GoalNode>>;

struct GoalNode {
    goal: Term,
    depth: usize,
    /// Choice-stack height a cut in this goal truncates to.
    cut_barrier: usize,
    next: Goals,
}

fn push_goal(goal: Term, depth: usize, cut_barrier: usize, next: Goals) -> Goals {
    Some(Arc::new(GoalNode {
        goal,
        depth,
        cut_barrier,
        next,
    }))
}

fn push_goals(goals: &[Term], depth: usize, cut_barrier: usize, next: Goals) -> Goals {
    goals
        .iter()
        .rev()
        .fold(next, |next, goal| push_goal(goal.clone(), depth, cut_barrier, next))
}

enum Alternative {
    /// A ground fact from the store.
    Fact(Term),
    Rule(Arc<Rule>),
    Answer(BuiltinAnswer),
    /// One side of a disjunction.
    Branch(Term),
}

struct ChoicePoint {
    mark: TrailMark,
    goal: Term,
    depth: usize,
    cut_barrier: usize,
    continuation: Goals,
    alternatives: vec::IntoIter<Alternative>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Forward,
    Backtrack,
    Done,
}

/// Lazy iterator over the substitutions that prove a goal.
///
/// Errors (depth limit, builtin failures) are yielded once and end the
/// iteration.
pub struct Solver {
    store: Arc<TripleStore>,
    rules: Arc<RuleBase>,
    max_depth: usize,
    subst: Substitution,
    goals: Goals,
    choices: Vec<ChoicePoint>,
    /// Scope counter for renaming rules apart; shared with nested solvers.
    scopes: Arc<AtomicU32>,
    mode: Mode,
}

impl Solver {
    pub fn new(
        store: Arc<TripleStore>,
        rules: Arc<RuleBase>,
        config: &KbConfig,
        goal: Term,
    ) -> Self {
        Self::start(
            store,
            rules,
            config.max_depth,
            Arc::new(AtomicU32::new(1)),
            goal,
            0,
        )
    }

    fn start(
        store: Arc<TripleStore>,
        rules: Arc<RuleBase>,
        max_depth: usize,
        scopes: Arc<AtomicU32>,
        goal: Term,
        depth: usize,
    ) -> Self {
        Self {
            store,
            rules,
            max_depth,
            subst: Substitution::new(),
            goals: push_goal(goal, depth, 0, None),
            choices: Vec::new(),
            scopes,
            mode: Mode::Forward,
        }
    }

    fn next_scope(&self) -> u32 {
        self.scopes.fetch_add(1, Ordering::Relaxed)
    }

    fn solve_next(&mut self) -> Option<ResolveResult<Substitution>> {
        loop {
            match self.mode {
                Mode::Done => return None,
                Mode::Backtrack => {
                    if !self.backtrack() {
                        self.mode = Mode::Done;
                        return None;
                    }
                }
                Mode::Forward => {}
            }

            let Some(node) = self.goals.clone() else {
                self.mode = Mode::Backtrack;
                return Some(Ok(self.subst.clone()));
            };
            self.goals = node.next.clone();

            match self.step(&node) {
                Ok(true) => self.mode = Mode::Forward,
                Ok(false) => self.mode = Mode::Backtrack,
                Err(err) => {
                    self.mode = Mode::Done;
                    self.choices.clear();
                    return Some(Err(err));
                }
            }
        }
    }

    /// Resolve one goal. `Ok(false)` hands control to the choice-point stack,
    /// either because the goal failed or because it pushed alternatives.
    fn step(&mut self, node: &GoalNode) -> ResolveResult<bool> {
        if node.depth > self.max_depth {
            return Err(ResolveError::DepthExceeded {
                max_depth: self.max_depth,
            });
        }

        let goal = self.subst.walk(&node.goal).clone();
        let Some(indicator) = goal.indicator() else {
            // Unbound variables and numbers are not callable.
            return Ok(false);
        };
        tracing::trace!(goal = %self.subst.resolve(&goal), depth = node.depth, "resolve");
        let args = goal.args();

        match (&*indicator.name, indicator.arity) {
            ("true", 0) => return Ok(true),
            ("fail" | "false", 0) => return Ok(false),
            ("!", 0) => {
                self.choices.truncate(node.cut_barrier);
                return Ok(true);
            }
            (",", 2) => {
                self.goals = push_goals(args, node.depth, node.cut_barrier, self.goals.take());
                return Ok(true);
            }
            (";", 2) => {
                let branches = vec![
                    Alternative::Branch(args[0].clone()),
                    Alternative::Branch(args[1].clone()),
                ];
                self.push_choice(&goal, node, branches);
                return Ok(false);
            }
            ("call", 1) => {
                // Cut inside `call/1` is local to it.
                let barrier = self.choices.len();
                self.goals =
                    push_goal(args[0].clone(), node.depth + 1, barrier, self.goals.take());
                return Ok(true);
            }
            ("not" | "\\+", 1) => return self.negation(&args[0], node.depth),
            _ => {}
        }

        if let Some(builtin) = self.rules.builtin(&indicator) {
            let resolved: Vec<Term> = args.iter().map(|a| self.subst.resolve(a)).collect();
            let mut answers = builtin.call(&resolved)?;
            if answers.len() == 1 {
                let answer = answers.remove(0);
                return Ok(self.apply_answer(&answer));
            }
            let alternatives = answers.into_iter().map(Alternative::Answer).collect();
            self.push_choice(&goal, node, alternatives);
            return Ok(false);
        }

        let mut alternatives = Vec::new();
        if indicator.arity == 2 {
            self.collect_facts(&indicator.name, args, &mut alternatives);
        }
        alternatives.extend(
            self.rules
                .candidates(&indicator)
                .into_iter()
                .map(Alternative::Rule),
        );
        self.push_choice(&goal, node, alternatives);
        Ok(false)
    }

    /// Matching store edges as ground facts, in insertion order.
    ///
    /// A bound position keeps the goal's own constant; an unbound one takes
    /// the constant stored on the edge.
    fn collect_facts(&self, predicate: &str, args: &[Term], out: &mut Vec<Alternative>) {
        let bound = |term: &Term| -> Result<Option<Value>, ()> {
            match self.subst.walk(term) {
                Term::Const(v) => Ok(Some(v.clone())),
                Term::Var(_) => Ok(None),
                // Compound arguments can never match an edge endpoint.
                Term::Compound(_) => Err(()),
            }
        };
        let (Ok(subject), Ok(object)) = (bound(&args[0]), bound(&args[1])) else {
            return;
        };
        let subject_key = subject.as_ref().map(Value::to_node_key);
        let object_key = object.as_ref().map(Value::to_node_key);
        let pattern = EdgePattern {
            subject: subject_key.as_deref(),
            predicate: Some(predicate),
            object: object_key.as_deref(),
        };
        out.extend(
            self.store
                .edges_matching(&pattern)
                .into_iter()
                .filter(|edge| !edge.is_negative())
                .map(|edge| {
                    let subject = subject.clone().unwrap_or(edge.subject_value);
                    let object = object.clone().unwrap_or(edge.object_value);
                    Alternative::Fact(Term::compound(
                        predicate,
                        [Term::Const(subject), Term::Const(object)],
                    ))
                }),
        );
    }

    fn push_choice(&mut self, goal: &Term, node: &GoalNode, alternatives: Vec<Alternative>) {
        if alternatives.is_empty() {
            return;
        }
        self.choices.push(ChoicePoint {
            mark: self.subst.mark(),
            goal: goal.clone(),
            depth: node.depth,
            cut_barrier: node.cut_barrier,
            continuation: self.goals.clone(),
            alternatives: alternatives.into_iter(),
        });
    }

    fn apply_answer(&mut self, answer: &BuiltinAnswer) -> bool {
        let mark = self.subst.mark();
        for (left, right) in &answer.equations {
            if !unify_in_place(left, right, &mut self.subst) {
                self.subst.undo_to(mark);
                return false;
            }
        }
        true
    }

    /// Negation as failure: succeed iff the inner goal has no proof.
    fn negation(&mut self, inner: &Term, depth: usize) -> ResolveResult<bool> {
        let inner = self.subst.resolve(inner);
        let mut nested = Solver::start(
            Arc::clone(&self.store),
            Arc::clone(&self.rules),
            self.max_depth,
            Arc::clone(&self.scopes),
            inner,
            depth + 1,
        );
        match nested.solve_next() {
            Some(Ok(_)) => Ok(false),
            Some(Err(err)) => Err(err),
            None => Ok(true),
        }
    }

    /// Resume from the most recent choice point with an untried alternative.
    fn backtrack(&mut self) -> bool {
        while let Some(choice) = self.choices.last_mut() {
            self.subst.undo_to(choice.mark);
            let Some(alternative) = choice.alternatives.next() else {
                self.choices.pop();
                continue;
            };

            let index = self.choices.len() - 1;
            let choice = &self.choices[index];
            let (goal, depth, cut_barrier, continuation, mark) = (
                choice.goal.clone(),
                choice.depth,
                choice.cut_barrier,
                choice.continuation.clone(),
                choice.mark,
            );
            // Drop exhausted choice points eagerly so the stack only holds live ones.
            if choice.alternatives.len() == 0 {
                self.choices.pop();
            }

            let entered = match alternative {
                Alternative::Fact(fact) => {
                    self.goals = continuation;
                    unify_in_place(&goal, &fact, &mut self.subst)
                }
                Alternative::Rule(rule) => {
                    let rule = rule.renamed(self.next_scope());
                    if unify_in_place(&goal, rule.head(), &mut self.subst) {
                        // A cut in the body removes this choice point and everything after it.
                        self.goals = push_goals(rule.body(), depth + 1, index, continuation);
                        true
                    } else {
                        false
                    }
                }
                Alternative::Answer(answer) => {
                    self.goals = continuation;
                    self.apply_answer(&answer)
                }
                Alternative::Branch(branch) => {
                    self.goals = push_goal(branch, depth, cut_barrier, continuation);
                    true
                }
            };
            if entered {
                self.mode = Mode::Forward;
                return true;
            }
            self.subst.undo_to(mark);
        }
        false
    }
}

impl Iterator for Solver {
    type Item = ResolveResult<Substitution>;

    fn next(&mut self) -> Option<Self::Item> {
        self.solve_next()
    }
}

impl fmt::Debug for Solver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Solver")
            .field("max_depth", &self.max_depth)
            .field("bindings", &self.subst.len())
            .field("choice_points", &self.choices.len())
            .field("mode", &self.mode)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Query layer
// ---------------------------------------------------------------------------

/// One answer to a query: the query's named variables and what they resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub bindings: BTreeMap<String, Term>,
    /// Set when the answer came from the link predictor instead of a proof.
    pub probability: Option<f64>,
}

impl Answer {
    pub fn get(&self, variable: &str) -> Option<&Term> {
        self.bindings.get(variable)
    }

    pub fn is_estimated(&self) -> bool {
        self.probability.is_some()
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bindings.is_empty() {
            f.write_str("true")?;
        }
        for (i, (name, term)) in self.bindings.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name} = {term}")?;
        }
        if let Some(p) = self.probability {
            write!(f, " (p = {p:.3})")?;
        }
        Ok(())
    }
}

struct Fallback {
    predictor: Arc<dyn LinkPredictor>,
    threshold: f64,
}

/// Answers to a query, keyed by the query's variable names.
pub struct Solutions {
    solver: Solver,
    query: Term,
    variables: Vec<Var>,
    seen: Option<HashSet<BTreeMap<String, Term>>>,
    fallback: Option<Fallback>,
    produced: bool,
    finished: bool,
}

impl Solutions {
    pub fn new(solver: Solver, query: Term) -> Self {
        // Anonymous variables are not reported.
        let variables = query
            .variables()
            .into_iter()
            .filter(|v| v.scope() == 0 && !v.name().starts_with('_'))
            .collect();
        Self {
            solver,
            query,
            variables,
            seen: None,
            fallback: None,
            produced: false,
            finished: false,
        }
    }

    /// Skip answers whose bindings were already reported.
    pub fn distinct(mut self) -> Self {
        self.seen = Some(HashSet::new());
        self
    }

    /// Consult `predictor` when a ground binary query has no symbolic answer.
    pub fn with_predictor(mut self, predictor: Arc<dyn LinkPredictor>, threshold: f64) -> Self {
        self.fallback = Some(Fallback {
            predictor,
            threshold,
        });
        self
    }

    fn estimate(&self) -> Option<Answer> {
        let fallback = self.fallback.as_ref()?;
        let compound = self.query.as_compound()?;
        if compound.arity() != 2 {
            return None;
        }
        let subject = compound.args()[0].as_const()?;
        let object = compound.args()[1].as_const()?;
        let probability = fallback
            .predictor
            .estimate(&subject.to_node_key(), compound.functor(), &object.to_node_key())
            .clamp(0.0, 1.0);
        if probability < fallback.threshold {
            tracing::debug!(query = %self.query, probability, "estimate below threshold");
            return None;
        }
        tracing::warn!(query = %self.query, probability, "answer estimated by link predictor");
        Some(Answer {
            bindings: BTreeMap::new(),
            probability: Some(probability),
        })
    }
}

impl Iterator for Solutions {
    type Item = ResolveResult<Answer>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            match self.solver.next() {
                Some(Ok(subst)) => {
                    let bindings: BTreeMap<String, Term> = self
                        .variables
                        .iter()
                        .map(|v| (v.name().to_string(), subst.resolve(&Term::Var(v.clone()))))
                        .collect();
                    if let Some(seen) = &mut self.seen {
                        if !seen.insert(bindings.clone()) {
                            continue;
                        }
                    }
                    self.produced = true;
                    return Some(Ok(Answer {
                        bindings,
                        probability: None,
                    }));
                }
                Some(Err(err)) => {
                    self.finished = true;
                    return Some(Err(err));
                }
                None => {
                    self.finished = true;
                    if !self.produced {
                        return self.estimate().map(Ok);
                    }
                }
            }
        }
        None
    }
}
