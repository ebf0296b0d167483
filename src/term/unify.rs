//! Syntactic unification with occurs check.
//!
//! Failure to unify is ordinary control flow, so both entry points report it
//! as `None` / `false` rather than an error.

use super::{Substitution, Term, Var};

/// Unify `a` and `b` under `subst`, returning the extended substitution.
///
/// `subst` itself is never modified; on failure nothing leaks.
pub fn unify(a: &Term, b: &Term, subst: &Substitution) -> Option<Substitution> {
    let mut out = subst.clone();
    unify_in_place(a, b, &mut out).then_some(out)
}

/// Unify `a` and `b`, extending `subst` in place.
///
/// On failure every binding made by this call is undone before returning
/// `false`, so the substitution is exactly as it was passed in.
pub fn unify_in_place(a: &Term, b: &Term, subst: &mut Substitution) -> bool {
    let mark = subst.mark();
    if unify_terms(a, b, subst) {
        true
    } else {
        subst.undo_to(mark);
        false
    }
}

fn unify_terms(a: &Term, b: &Term, subst: &mut Substitution) -> bool {
    let mut pending = vec![(a.clone(), b.clone())];
    while let Some((a, b)) = pending.pop() {
        let a = subst.walk(&a).clone();
        let b = subst.walk(&b).clone();
        match (&a, &b) {
            (Term::Var(x), Term::Var(y)) if x == y => {}
            (Term::Var(x), other) | (other, Term::Var(x)) => {
                if occurs(x, other, subst) {
                    return false;
                }
                subst.bind(x.clone(), other.clone());
            }
            (Term::Const(x), Term::Const(y)) => {
                if x != y {
                    return false;
                }
            }
            (Term::Compound(x), Term::Compound(y)) => {
                if x.arity() != y.arity() || x.functor() != y.functor() {
                    return false;
                }
                // Reversed so the leftmost argument pair is unified first.
                pending.extend(
                    x.args()
                        .iter()
                        .zip(y.args())
                        .rev()
                        .map(|(l, r)| (l.clone(), r.clone())),
                );
            }
            _ => return false,
        }
    }
    true
}

fn occurs(var: &Var, term: &Term, subst: &Substitution) -> bool {
    let mut pending = vec![term];
    while let Some(term) = pending.pop() {
        match subst.walk(term) {
            Term::Var(v) if v == var => return true,
            Term::Compound(c) => pending.extend(c.args()),
            _ => {}
        }
    }
    false
}
