//! Builtin predicates and the standard arithmetic/comparison set.
//!
//! A builtin never touches the engine's substitution. It receives its
//! arguments already resolved and answers with zero or more sets of
//! equations; the engine unifies each set transactionally. Zero answers is
//! plain failure.

use std::cmp::Ordering;
use std::fmt;

use crate::error::BuiltinError;
use crate::term::{Substitution, Term, Value, unify};

use super::RuleBase;

/// One way a builtin call can succeed: equations the engine must unify.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuiltinAnswer {
    pub equations: Vec<(Term, Term)>,
}

impl BuiltinAnswer {
    /// Success without new bindings.
    pub fn yes() -> Self {
        Self::default()
    }

    /// Success provided `left` unifies with `right`.
    pub fn unify(left: Term, right: Term) -> Self {
        Self {
            equations: vec![(left, right)],
        }
    }

    pub fn and(mut self, left: Term, right: Term) -> Self {
        self.equations.push((left, right));
        self
    }
}

/// A predicate implemented in Rust.
pub trait Builtin: Send + Sync {
    fn call(&self, args: &[Term]) -> Result<Vec<BuiltinAnswer>, BuiltinError>;
}

impl<F> Builtin for F
where
    F: Fn(&[Term]) -> Result<Vec<BuiltinAnswer>, BuiltinError> + Send + Sync,
{
    fn call(&self, args: &[Term]) -> Result<Vec<BuiltinAnswer>, BuiltinError> {
        self(args)
    }
}

fn succeed_if(condition: bool) -> Result<Vec<BuiltinAnswer>, BuiltinError> {
    Ok(if condition {
        vec![BuiltinAnswer::yes()]
    } else {
        Vec::new()
    })
}

/// Register the fixed standard builtin set.
pub fn register_standard(rules: &RuleBase) {
    rules.register_builtin("true", 0, |_: &[Term]| succeed_if(true));
    rules.register_builtin("fail", 0, |_: &[Term]| succeed_if(false));
    rules.register_builtin("false", 0, |_: &[Term]| succeed_if(false));

    rules.register_builtin("=", 2, |args: &[Term]| -> Result<_, BuiltinError> {
        Ok(vec![BuiltinAnswer::unify(args[0].clone(), args[1].clone())])
    });
    rules.register_builtin("\\=", 2, |args: &[Term]| {
        succeed_if(unify(&args[0], &args[1], &Substitution::new()).is_none())
    });
    rules.register_builtin("==", 2, |args: &[Term]| succeed_if(args[0] == args[1]));
    rules.register_builtin("\\==", 2, |args: &[Term]| succeed_if(args[0] != args[1]));

    let comparisons: [(&str, fn(Ordering) -> bool); 6] = [
        ("<", Ordering::is_lt),
        (">", Ordering::is_gt),
        ("=<", Ordering::is_le),
        (">=", Ordering::is_ge),
        ("=:=", Ordering::is_eq),
        ("=\\=", Ordering::is_ne),
    ];
    for (name, accept) in comparisons {
        let label = format!("{name}/2");
        rules.register_builtin(name, 2, move |args: &[Term]| {
            let left = evaluate(&args[0], &label)?;
            let right = evaluate(&args[1], &label)?;
            succeed_if(left.compare(right).is_some_and(accept))
        });
    }

    rules.register_builtin("is", 2, |args: &[Term]| -> Result<_, BuiltinError> {
        let value = evaluate(&args[1], "is/2")?;
        Ok(vec![BuiltinAnswer::unify(args[0].clone(), value.into())])
    });
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

/// Result of evaluating an arithmetic expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// Numeric comparison; integers and floats compare by value.
    pub fn compare(self, other: Number) -> Option<Ordering> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }
}

impl From<Number> for Term {
    fn from(n: Number) -> Self {
        match n {
            Number::Int(i) => Term::int(i),
            Number::Float(f) => Term::float(f),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{i}"),
            Number::Float(x) => write!(f, "{x:?}"),
        }
    }
}

fn evaluation(builtin: &str, message: &str) -> BuiltinError {
    BuiltinError::Evaluation {
        builtin: builtin.to_string(),
        message: message.to_string(),
    }
}

fn type_error(builtin: &str, expected: &str, found: &Term) -> BuiltinError {
    BuiltinError::Type {
        builtin: builtin.to_string(),
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

fn checked(builtin: &str, value: Option<i64>) -> Result<Number, BuiltinError> {
    value
        .map(Number::Int)
        .ok_or_else(|| evaluation(builtin, "integer overflow"))
}

fn finite(builtin: &str, value: f64) -> Result<Number, BuiltinError> {
    if value.is_finite() {
        Ok(Number::Float(value))
    } else {
        Err(evaluation(builtin, "float overflow"))
    }
}

/// Evaluate an arithmetic expression. `builtin` names the caller in errors.
pub fn evaluate(term: &Term, builtin: &str) -> Result<Number, BuiltinError> {
    let compound = match term {
        Term::Var(_) => {
            return Err(BuiltinError::Instantiation {
                builtin: builtin.to_string(),
            });
        }
        Term::Const(Value::Int(i)) => return Ok(Number::Int(*i)),
        Term::Const(Value::Float(f)) => return Ok(Number::Float(*f)),
        Term::Const(_) => return Err(type_error(builtin, "number", term)),
        Term::Compound(c) => c,
    };

    let args = compound.args();
    match (compound.functor(), args.len()) {
        ("-", 1) => match evaluate(&args[0], builtin)? {
            Number::Int(i) => checked(builtin, i.checked_neg()),
            Number::Float(f) => Ok(Number::Float(-f)),
        },
        ("+", 1) => evaluate(&args[0], builtin),
        ("abs", 1) => match evaluate(&args[0], builtin)? {
            Number::Int(i) => checked(builtin, i.checked_abs()),
            Number::Float(f) => Ok(Number::Float(f.abs())),
        },
        (op, 2) => {
            let a = evaluate(&args[0], builtin)?;
            let b = evaluate(&args[1], builtin)?;
            binary(op, a, b, builtin)
                .unwrap_or_else(|| Err(type_error(builtin, "evaluable", term)))
        }
        _ => Err(type_error(builtin, "evaluable", term)),
    }
}

/// `None` when `op` is not an arithmetic operator.
fn binary(
    op: &str,
    a: Number,
    b: Number,
    builtin: &str,
) -> Option<Result<Number, BuiltinError>> {
    use Number::{Float, Int};

    let result = match (op, a, b) {
        ("+", Int(x), Int(y)) => checked(builtin, x.checked_add(y)),
        ("-", Int(x), Int(y)) => checked(builtin, x.checked_sub(y)),
        ("*", Int(x), Int(y)) => checked(builtin, x.checked_mul(y)),
        ("+", x, y) => finite(builtin, x.as_f64() + y.as_f64()),
        ("-", x, y) => finite(builtin, x.as_f64() - y.as_f64()),
        ("*", x, y) => finite(builtin, x.as_f64() * y.as_f64()),

        ("/", _, Int(0)) => Err(evaluation(builtin, "division by zero")),
        ("/", _, Float(y)) if y == 0.0 => Err(evaluation(builtin, "division by zero")),
        // Exact integer division stays integral.
        ("/", Int(x), Int(y)) if x.checked_rem(y) == Some(0) => checked(builtin, x.checked_div(y)),
        ("/", x, y) => finite(builtin, x.as_f64() / y.as_f64()),

        ("//", Int(_), Int(0)) | ("mod", Int(_), Int(0)) => {
            Err(evaluation(builtin, "division by zero"))
        }
        ("//", Int(x), Int(y)) => checked(builtin, x.checked_div(y)),
        ("mod", Int(x), Int(y)) => checked(builtin, x.checked_rem(y)).map(|r| match r {
            // The result takes the sign of the divisor.
            Int(m) if m != 0 && (m < 0) != (y < 0) => Int(m + y),
            other => other,
        }),
        ("//" | "mod", x, y) => {
            let found = if matches!(x, Float(_)) { x } else { y };
            Err(BuiltinError::Type {
                builtin: builtin.to_string(),
                expected: "integer".to_string(),
                found: found.to_string(),
            })
        }

        ("min", x, y) => Ok(if y.compare(x) == Some(Ordering::Less) { y } else { x }),
        ("max", x, y) => Ok(if y.compare(x) == Some(Ordering::Greater) { y } else { x }),
        _ => return None,
    };
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::parse::parse_term;

    fn eval(src: &str) -> Result<Number, BuiltinError> {
        evaluate(&parse_term(src).unwrap(), "is/2")
    }

    fn call(
        rules: &RuleBase,
        name: &str,
        args: &[Term],
    ) -> Result<Vec<BuiltinAnswer>, BuiltinError> {
        let builtin = rules
            .builtin(&crate::term::Indicator::new(name, args.len()))
            .expect("standard builtin registered");
        builtin.call(args)
    }

    #[test]
    fn integer_arithmetic() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), Number::Int(7));
        assert_eq!(eval("7 // 2").unwrap(), Number::Int(3));
        assert_eq!(eval("-7 mod 3").unwrap(), Number::Int(2));
        assert_eq!(eval("7 mod -3").unwrap(), Number::Int(-2));
        assert_eq!(eval("6 / 2").unwrap(), Number::Int(3));
        assert_eq!(eval("abs(-4)").unwrap(), Number::Int(4));
        assert_eq!(eval("min(3, 1) + max(2, 5)").unwrap(), Number::Int(6));
    }

    #[test]
    fn mixed_arithmetic_promotes_to_float() {
        assert_eq!(eval("7 / 2").unwrap(), Number::Float(3.5));
        assert_eq!(eval("1 + 0.5").unwrap(), Number::Float(1.5));
        assert_eq!(eval("-(2.0)").unwrap(), Number::Float(-2.0));
    }

    #[test]
    fn arithmetic_errors() {
        assert!(matches!(eval("X + 1"), Err(BuiltinError::Instantiation { .. })));
        assert!(matches!(eval("tom + 1"), Err(BuiltinError::Type { .. })));
        assert!(matches!(eval("foo(1)"), Err(BuiltinError::Type { .. })));
        assert!(matches!(eval("1 / 0"), Err(BuiltinError::Evaluation { .. })));
        assert!(matches!(eval("1 mod 0"), Err(BuiltinError::Evaluation { .. })));
        assert!(matches!(eval("2.5 // 2"), Err(BuiltinError::Type { .. })));
        assert!(matches!(
            eval("9223372036854775807 + 1"),
            Err(BuiltinError::Evaluation { .. })
        ));
    }

    #[test]
    fn comparisons_are_numeric() {
        let rules = RuleBase::with_standard_builtins();
        let yes = |name: &str, a: Term, b: Term| !call(&rules, name, &[a, b]).unwrap().is_empty();
        assert!(yes("<", Term::int(1), Term::float(1.5)));
        assert!(yes("=:=", Term::int(2), Term::float(2.0)));
        assert!(yes("=\\=", Term::int(2), Term::int(3)));
        assert!(yes(">=", Term::int(3), Term::int(3)));
        assert!(!yes(">", Term::int(3), Term::int(3)));
        assert!(matches!(
            call(&rules, "<", &[Term::var("X"), Term::int(1)]),
            Err(BuiltinError::Instantiation { .. })
        ));
    }

    #[test]
    fn term_identity_and_unifiability() {
        let rules = RuleBase::with_standard_builtins();
        let x = Term::var("X");
        let a = Term::atom("a");
        assert!(call(&rules, "==", &[x.clone(), a.clone()]).unwrap().is_empty());
        assert_eq!(call(&rules, "\\==", &[x.clone(), a.clone()]).unwrap().len(), 1);
        assert!(call(&rules, "\\=", &[x.clone(), a.clone()]).unwrap().is_empty());
        assert_eq!(
            call(&rules, "\\=", &[Term::atom("b"), a.clone()]).unwrap().len(),
            1
        );
        assert_eq!(
            call(&rules, "=", &[x.clone(), a.clone()]).unwrap(),
            vec![BuiltinAnswer::unify(x, a)]
        );
    }

    #[test]
    fn is_answers_with_an_equation() {
        let rules = RuleBase::with_standard_builtins();
        let answers = call(&rules, "is", &[Term::var("X"), parse_term("2 * 21").unwrap()]).unwrap();
        assert_eq!(answers, vec![BuiltinAnswer::unify(Term::var("X"), Term::int(42))]);
    }

    #[test]
    fn closures_are_builtins() {
        let rules = RuleBase::new();
        rules.register_builtin("double", 2, |args: &[Term]| -> Result<_, BuiltinError> {
            let n = evaluate(&args[0], "double/2")?;
            let doubled = binary("*", n, Number::Int(2), "double/2").unwrap_or(Ok(n))?;
            Ok(vec![BuiltinAnswer::unify(args[1].clone(), doubled.into())])
        });
        let answers = call(&rules, "double", &[Term::int(4), Term::var("Y")]).unwrap();
        assert_eq!(answers[0].equations[0].1, Term::int(8));
    }
}
