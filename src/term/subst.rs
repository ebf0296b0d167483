//! Variable bindings with an undo trail.

use std::collections::HashMap;
use std::fmt;

use super::{Term, Var, Visit, rebuild};

/// Position in a substitution's trail, returned by [`Substitution::mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TrailMark(usize);

/// A mapping from variables to terms.
///
/// Bindings are only ever created by unification, which performs the occurs
/// check, so following a chain of bindings always terminates. Every binding is
/// recorded on a trail, so the resolution engine can return to an earlier state
/// with [`undo_to`](Substitution::undo_to) instead of cloning the map.
#[derive(Debug, Clone, Default)]
pub struct Substitution {
    bindings: HashMap<Var, Term>,
    trail: Vec<Var>,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// The direct binding of `var`, without dereferencing chains.
    pub fn get(&self, var: &Var) -> Option<&Term> {
        self.bindings.get(var)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Var, &Term)> {
        self.bindings.iter()
    }

    pub fn mark(&self) -> TrailMark {
        TrailMark(self.trail.len())
    }

    /// Drop every binding made after `mark`.
    pub fn undo_to(&mut self, mark: TrailMark) {
        while self.trail.len() > mark.0 {
            if let Some(var) = self.trail.pop() {
                self.bindings.remove(&var);
            }
        }
    }

    /// Bind an unbound variable. Callers must have run the occurs check.
    pub(crate) fn bind(&mut self, var: Var, term: Term) {
        debug_assert!(!self.bindings.contains_key(&var), "rebinding {var}");
        self.trail.push(var.clone());
        self.bindings.insert(var, term);
    }

    /// Follow variable bindings until reaching a non-variable or an unbound variable.
    pub fn walk<'a>(&'a self, mut term: &'a Term) -> &'a Term {
        while let Term::Var(v) = term {
            match self.bindings.get(v) {
                Some(next) => term = next,
                None => break,
            }
        }
        term
    }

    /// Apply the substitution exhaustively. Unbound variables stay variables.
    pub fn resolve(&self, term: &Term) -> Term {
        rebuild(term, |t| match self.walk(t) {
            Term::Compound(c) => Visit::Descend(c),
            other => Visit::Leaf(other.clone()),
        })
    }
}

// Two substitutions are equal when they hold the same bindings; trail order is
// an implementation detail.
impl PartialEq for Substitution {
    fn eq(&self, other: &Self) -> bool {
        self.bindings == other.bindings
    }
}

impl Eq for Substitution {}

impl fmt::Display for Substitution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pairs: Vec<_> = self.bindings.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        f.write_str("{")?;
        for (i, (var, term)) in pairs.into_iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{var} = {term}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_follows_chains() {
        let mut s = Substitution::new();
        s.bind(Var::new("X"), Term::var("Y"));
        s.bind(Var::new("Y"), Term::atom("tom"));
        assert_eq!(s.walk(&Term::var("X")), &Term::atom("tom"));
        assert_eq!(s.walk(&Term::var("Z")), &Term::var("Z"));
    }

    #[test]
    fn resolve_rebuilds_nested_terms() {
        let mut s = Substitution::new();
        s.bind(Var::new("X"), Term::compound("g", [Term::var("Y")]));
        s.bind(Var::new("Y"), Term::int(1));
        let t = Term::compound("f", [Term::var("X"), Term::var("Z")]);
        assert_eq!(
            s.resolve(&t),
            Term::compound("f", [Term::compound("g", [Term::int(1)]), Term::var("Z")])
        );
    }

    #[test]
    fn undo_to_mark_restores_earlier_state() {
        let mut s = Substitution::new();
        s.bind(Var::new("A"), Term::int(1));
        let before = s.clone();
        let mark = s.mark();
        s.bind(Var::new("B"), Term::int(2));
        s.bind(Var::new("C"), Term::int(3));
        assert_eq!(s.len(), 3);
        s.undo_to(mark);
        assert_eq!(s, before);
        assert!(s.get(&Var::new("B")).is_none());
    }

    #[test]
    fn display_is_sorted() {
        let mut s = Substitution::new();
        s.bind(Var::new("Y"), Term::atom("b"));
        s.bind(Var::new("X"), Term::atom("a"));
        assert_eq!(s.to_string(), "{X = a, Y = b}");
    }
}
