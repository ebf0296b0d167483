//! Rule base: user rules indexed by head indicator, plus the builtin table.
//!
//! Rules are stored behind an `RwLock` and handed out as `Arc<Rule>`, so the
//! resolution engine can keep using a candidate list after the lock is gone.
//! Builtins live in a `DashMap` and can be registered concurrently.

pub mod builtin;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::RuleError;
use crate::term::parse::Clause;
use crate::term::{Indicator, Substitution, Term, Var, unify};

pub use builtin::{Builtin, BuiltinAnswer};

/// Result type for rule base operations.
pub type RuleResult<T> = std::result::Result<T, RuleError>;

/// Identity of a registered rule, in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleId(u64);

impl RuleId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule:{}", self.0)
    }
}

/// A Horn clause `head :- body`. A rule with an empty body is a fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    head: Term,
    body: Vec<Term>,
    indicator: Indicator,
}

impl Rule {
    /// Build a rule, checking that the head is callable and the rule is safe.
    ///
    /// Safe means every head variable also occurs in a body goal that is not
    /// negated; consequently a fact must be ground.
    pub fn new(head: Term, body: Vec<Term>) -> RuleResult<Self> {
        let Some(indicator) = head.indicator() else {
            return Err(RuleError::InvalidHead {
                head: head.to_string(),
            });
        };
        let rule = Self {
            head,
            body,
            indicator,
        };

        let mut bound = Vec::new();
        for goal in &rule.body {
            positive_variables(goal, &mut bound);
        }
        let unsafe_vars: Vec<String> = rule
            .head
            .variables()
            .into_iter()
            .filter(|v| !bound.contains(v))
            .map(|v| v.to_string())
            .collect();
        if !unsafe_vars.is_empty() {
            return Err(RuleError::UnsafeRule {
                rule: rule.to_string(),
                variables: unsafe_vars.join(", "),
            });
        }
        Ok(rule)
    }

    /// A body-less rule. Must be ground.
    pub fn fact(head: Term) -> RuleResult<Self> {
        Self::new(head, Vec::new())
    }

    pub fn from_clause(clause: Clause) -> RuleResult<Self> {
        Self::new(clause.head, clause.body)
    }

    pub fn head(&self) -> &Term {
        &self.head
    }

    pub fn body(&self) -> &[Term] {
        &self.body
    }

    pub fn is_fact(&self) -> bool {
        self.body.is_empty()
    }

    pub fn indicator(&self) -> &Indicator {
        &self.indicator
    }

    /// Copy of the rule with every variable moved into `scope`.
    pub fn renamed(&self, scope: u32) -> Rule {
        Rule {
            head: self.head.rename(scope),
            body: self.body.iter().map(|g| g.rename(scope)).collect(),
            indicator: self.indicator.clone(),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.head)?;
        for (i, goal) in self.body.iter().enumerate() {
            f.write_str(if i == 0 { " :- " } else { ", " })?;
            write!(f, "{goal}")?;
        }
        f.write_str(".")
    }
}

/// Variables of `goal` outside any negation.
fn positive_variables(goal: &Term, out: &mut Vec<Var>) {
    if goal.is_functor("not", 1) || goal.is_functor("\\+", 1) {
        return;
    }
    match goal {
        Term::Compound(c) if matches!(c.functor(), "," | ";" | "call") => {
            for arg in c.args() {
                positive_variables(arg, out);
            }
        }
        other => other.collect_variables(out),
    }
}

#[derive(Default)]
struct RuleTable {
    rules: BTreeMap<RuleId, Arc<Rule>>,
    by_indicator: HashMap<Indicator, Vec<RuleId>>,
    next_id: u64,
}

/// Registered rules and builtins.
#[derive(Default)]
pub struct RuleBase {
    inner: RwLock<RuleTable>,
    builtins: DashMap<Indicator, Arc<dyn Builtin>>,
}

impl RuleBase {
    /// An empty rule base without builtins.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty rule base with the standard builtin set registered.
    pub fn with_standard_builtins() -> Self {
        let rules = Self::new();
        builtin::register_standard(&rules);
        rules
    }

    pub fn add(&self, rule: Rule) -> RuleId {
        let indicator = rule.indicator().clone();
        let mut table = self.inner.write().expect("rule lock poisoned");
        table.next_id += 1;
        let id = RuleId(table.next_id);
        tracing::debug!(rule = %id, head = %indicator, "rule added");
        table.by_indicator.entry(indicator).or_default().push(id);
        table.rules.insert(id, Arc::new(rule));
        id
    }

    pub fn remove(&self, id: RuleId) -> RuleResult<Arc<Rule>> {
        let mut table = self.inner.write().expect("rule lock poisoned");
        let rule = table
            .rules
            .remove(&id)
            .ok_or(RuleError::NotFound { id: id.get() })?;
        if let Some(ids) = table.by_indicator.get_mut(rule.indicator()) {
            ids.retain(|r| *r != id);
            if ids.is_empty() {
                table.by_indicator.remove(rule.indicator());
            }
        }
        tracing::debug!(rule = %id, "rule removed");
        Ok(rule)
    }

    pub fn get(&self, id: RuleId) -> Option<Arc<Rule>> {
        self.inner
            .read()
            .expect("rule lock poisoned")
            .rules
            .get(&id)
            .cloned()
    }

    /// Rules for `indicator`, in registration order.
    pub fn candidates(&self, indicator: &Indicator) -> Vec<Arc<Rule>> {
        let table = self.inner.read().expect("rule lock poisoned");
        table
            .by_indicator
            .get(indicator)
            .map(|ids| ids.iter().filter_map(|id| table.rules.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Rules whose head unifies with `head`, in registration order.
    pub fn find_by_head(&self, head: &Term) -> Vec<(RuleId, Arc<Rule>)> {
        let Some(indicator) = head.indicator() else {
            return Vec::new();
        };
        let table = self.inner.read().expect("rule lock poisoned");
        let Some(ids) = table.by_indicator.get(&indicator) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| table.rules.get(id).map(|rule| (*id, Arc::clone(rule))))
            .filter(|(_, rule)| {
                // Rename apart from the caller's variables first.
                let renamed = rule.head().rename(u32::MAX);
                unify(&renamed, head, &Substitution::new()).is_some()
            })
            .collect()
    }

    /// All rules, in registration order.
    pub fn rules(&self) -> Vec<(RuleId, Arc<Rule>)> {
        self.inner
            .read()
            .expect("rule lock poisoned")
            .rules
            .iter()
            .map(|(id, rule)| (*id, Arc::clone(rule)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("rule lock poisoned").rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -- builtins -----------------------------------------------------------

    /// Register (or replace) the builtin for `name/arity`.
    pub fn register_builtin(&self, name: &str, arity: usize, builtin: impl Builtin + 'static) {
        let indicator = Indicator::new(name, arity);
        tracing::trace!(builtin = %indicator, "builtin registered");
        self.builtins.insert(indicator, Arc::new(builtin));
    }

    pub fn builtin(&self, indicator: &Indicator) -> Option<Arc<dyn Builtin>> {
        self.builtins.get(indicator).map(|b| Arc::clone(b.value()))
    }

    pub fn unregister_builtin(&self, indicator: &Indicator) -> bool {
        self.builtins.remove(indicator).is_some()
    }

    pub fn builtin_count(&self) -> usize {
        self.builtins.len()
    }
}

impl fmt::Debug for RuleBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleBase")
            .field("rules", &self.len())
            .field("builtins", &self.builtins.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::parse::parse_clause;

    fn rule(src: &str) -> RuleResult<Rule> {
        Rule::from_clause(parse_clause(src).unwrap())
    }

    #[test]
    fn safe_rules_are_accepted() {
        assert!(rule("ancestor(X, Z) :- parent(X, Y), ancestor(Y, Z).").is_ok());
        assert!(rule("winner(tom).").is_ok());
        assert!(rule("ok(X) :- item(X), \\+ broken(X).").is_ok());
        assert!(rule("either(X) :- (a(X) ; b(X)).").is_ok());
    }

    #[test]
    fn unsafe_rules_are_rejected() {
        let err = rule("p(X, Y) :- q(X).").unwrap_err();
        match err {
            RuleError::UnsafeRule { variables, .. } => assert_eq!(variables, "Y"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(rule("p(X)."), Err(RuleError::UnsafeRule { .. })));
        assert!(matches!(
            rule("p(X) :- \\+ q(X)."),
            Err(RuleError::UnsafeRule { .. })
        ));
        assert!(matches!(
            Rule::new(Term::int(3), vec![]),
            Err(RuleError::InvalidHead { .. })
        ));
    }

    #[test]
    fn candidates_in_registration_order() {
        let rules = RuleBase::new();
        let first = rules.add(rule("p(a).").unwrap());
        let _ = rules.add(rule("q(a).").unwrap());
        let third = rules.add(rule("p(b).").unwrap());
        assert!(first < third);

        let heads: Vec<_> = rules
            .candidates(&Indicator::new("p", 1))
            .iter()
            .map(|r| r.head().to_string())
            .collect();
        assert_eq!(heads, vec!["p(a)", "p(b)"]);
        assert!(rules.candidates(&Indicator::new("p", 2)).is_empty());
    }

    #[test]
    fn remove_and_get() {
        let rules = RuleBase::new();
        let id = rules.add(rule("p(a).").unwrap());
        assert!(rules.get(id).is_some());
        rules.remove(id).unwrap();
        assert!(rules.get(id).is_none());
        assert!(rules.candidates(&Indicator::new("p", 1)).is_empty());
        assert!(matches!(rules.remove(id), Err(RuleError::NotFound { .. })));
    }

    #[test]
    fn find_by_head_unifies() {
        let rules = RuleBase::new();
        rules.add(rule("winner(X) :- score(X, S), S > 10.").unwrap());
        rules.add(rule("winner(tom).").unwrap());
        assert_eq!(rules.find_by_head(&Term::compound("winner", [Term::var("X")])).len(), 2);
        assert_eq!(
            rules
                .find_by_head(&Term::compound("winner", [Term::atom("ann")]))
                .len(),
            1
        );
    }

    #[test]
    fn renaming_is_consistent() {
        let r = rule("ancestor(X, Z) :- parent(X, Y), ancestor(Y, Z).").unwrap();
        let renamed = r.renamed(5);
        assert_eq!(renamed.head().variables()[0], Var::scoped("X", 5));
        assert_eq!(renamed.body()[0].variables()[0], Var::scoped("X", 5));
    }

    #[test]
    fn builtin_table() {
        let rules = RuleBase::with_standard_builtins();
        assert!(rules.builtin(&Indicator::new("is", 2)).is_some());
        assert!(rules.unregister_builtin(&Indicator::new("is", 2)));
        assert!(rules.builtin(&Indicator::new("is", 2)).is_none());
        assert!(!rules.unregister_builtin(&Indicator::new("is", 2)));
    }

    #[test]
    fn display_round_trips_through_parser() {
        let r = rule("ancestor(X, Z) :- parent(X, Y), ancestor(Y, Z).").unwrap();
        assert_eq!(r.to_string(), "ancestor(X, Z) :- parent(X, Y), ancestor(Y, Z).");
        assert_eq!(rule(&r.to_string()).unwrap(), r);
    }
}
