//! Term model: constants, variables and compound expressions.
//!
//! A [`Term`] is the universal value used for facts, rule heads, rule bodies and
//! queries. Terms are immutable trees; compound arguments live in a shared
//! `Arc<[Term]>`, so cloning a term (or keeping it inside many substitutions)
//! is cheap and never aliases mutable state.
//!
//! Variables carry a *scope* next to their name. The caller's query uses scope
//! `0`; the resolution engine renames every rule into a fresh scope before
//! using it, so two uses of the same rule never share variables.

pub mod parse;
pub mod subst;
pub mod unify;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, LazyLock};

use serde::{Deserialize, Serialize};

pub use subst::{Substitution, TrailMark};
pub use unify::{unify, unify_in_place};

/// Functor of the list cell `'.'(Head, Tail)`.
pub const LIST_CONS: &str = ".";
/// Atom terminating a proper list.
pub const LIST_NIL: &str = "[]";

/// Binary operators rendered infix by `Display` (and accepted infix by the parser).
pub(crate) const INFIX_OPERATORS: &[&str] = &[
    ":-", ";", ",", "=", "\\=", "==", "\\==", "<", ">", "=<", ">=", "=:=", "=\\=", "is", "+",
    "-", "*", "/", "//", "mod",
];

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// An atomic constant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Atom(Arc<str>),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Value {
    pub fn atom(name: impl AsRef<str>) -> Self {
        Value::Atom(Arc::from(name.as_ref()))
    }

    /// Numeric view of the constant, if it is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The store key for this constant when it is used as an edge endpoint.
    pub fn to_node_key(&self) -> String {
        match self {
            Value::Atom(a) => a.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format!("{f:?}"),
            Value::Bool(b) => b.to_string(),
        }
    }

    /// Inverse of [`Value::to_node_key`].
    ///
    /// Integer-looking keys become `Int`, float-looking keys `Float`,
    /// `true`/`false` become `Bool`; everything else is an atom.
    pub fn from_node_key(key: &str) -> Self {
        if let Ok(i) = key.parse::<i64>() {
            return Value::Int(i);
        }
        let numeric = key.bytes().any(|b| b.is_ascii_digit())
            && key.bytes().all(|b| b.is_ascii_digit() || b"+-.eE".contains(&b));
        if numeric {
            if let Ok(f) = key.parse::<f64>() {
                return Value::Float(f);
            }
        }
        match key {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::atom(key),
        }
    }
}

// Floats compare by bit pattern so constants can be hashed and used as keys.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Atom(a), Value::Atom(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Atom(a) => a.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Bool(b) => b.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Atom(a) => write_atom(f, a),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

fn write_atom(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    if needs_quotes(name) {
        write!(f, "'{}'", name.replace('\\', "\\\\").replace('\'', "\\'"))
    } else {
        f.write_str(name)
    }
}

fn needs_quotes(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return true;
    };
    if name == LIST_NIL || name == "!" || name == ";" || name == "," {
        return false;
    }
    if first.is_ascii_lowercase() {
        return !name.chars().all(|c| c.is_alphanumeric() || c == '_');
    }
    // Symbolic atoms such as `=<` or `\+` read back without quotes.
    !name.chars().all(parse::is_symbol_char)
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// A logic variable, identified by name and resolution scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var {
    name: Arc<str>,
    scope: u32,
}

impl Var {
    /// A variable in the caller's scope (`0`).
    pub fn new(name: impl AsRef<str>) -> Self {
        Self::scoped(name, 0)
    }

    pub fn scoped(name: impl AsRef<str>, scope: u32) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            scope,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> u32 {
        self.scope
    }

    fn in_scope(&self, scope: u32) -> Self {
        Self {
            name: Arc::clone(&self.name),
            scope,
        }
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scope == 0 {
            f.write_str(&self.name)
        } else {
            write!(f, "_{}{}", self.name, self.scope)
        }
    }
}

// ---------------------------------------------------------------------------
// Terms
// ---------------------------------------------------------------------------

/// Name and arity of a callable term (`eats/2`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Indicator {
    pub name: Arc<str>,
    pub arity: usize,
}

impl Indicator {
    pub fn new(name: impl AsRef<str>, arity: usize) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            arity,
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

/// A functor applied to an ordered argument list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Compound {
    functor: Arc<str>,
    args: Arc<[Term]>,
}

fn empty_args() -> Arc<[Term]> {
    static EMPTY: LazyLock<Arc<[Term]>> = LazyLock::new(|| Arc::from(Vec::new()));
    Arc::clone(&EMPTY)
}

// A long list is a chain of nested `'.'/2` cells; dropping it cell by cell
// through the default glue would recurse once per element.
impl Drop for Compound {
    fn drop(&mut self) {
        let Some(args) = Arc::get_mut(&mut self.args) else {
            return;
        };
        if !args.iter().any(|arg| matches!(arg, Term::Compound(_))) {
            return;
        }
        let mut pending = vec![std::mem::replace(&mut self.args, empty_args())];
        while let Some(mut args) = pending.pop() {
            let Some(args) = Arc::get_mut(&mut args) else {
                continue;
            };
            for arg in args.iter_mut() {
                if let Term::Compound(child) = arg {
                    pending.push(std::mem::replace(&mut child.args, empty_args()));
                }
            }
        }
    }
}

impl Compound {
    pub fn functor(&self) -> &str {
        &self.functor
    }

    pub fn args(&self) -> &[Term] {
        &self.args
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }
}

/// The universal value type for facts, rules and queries.
///
/// Equality, hashing and the structural walks below use explicit work stacks,
/// so arbitrarily deep terms never exhaust the call stack.
#[derive(Debug, Clone)]
pub enum Term {
    Const(Value),
    Var(Var),
    Compound(Compound),
}

impl Term {
    pub fn atom(name: impl AsRef<str>) -> Self {
        Term::Const(Value::atom(name))
    }

    pub fn int(value: i64) -> Self {
        Term::Const(Value::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Term::Const(Value::Float(value))
    }

    pub fn bool(value: bool) -> Self {
        Term::Const(Value::Bool(value))
    }

    pub fn var(name: impl AsRef<str>) -> Self {
        Term::Var(Var::new(name))
    }

    /// Build `functor(args...)`. A compound with no arguments collapses to an atom.
    pub fn compound(functor: impl AsRef<str>, args: impl IntoIterator<Item = Term>) -> Self {
        let args: Arc<[Term]> = args.into_iter().collect();
        if args.is_empty() {
            return Term::atom(functor);
        }
        Term::Compound(Compound {
            functor: Arc::from(functor.as_ref()),
            args,
        })
    }

    /// Build a list `[items... | tail]`; `tail = None` yields a proper list.
    pub fn list(items: impl IntoIterator<Item = Term>, tail: Option<Term>) -> Self {
        let items: Vec<Term> = items.into_iter().collect();
        items
            .into_iter()
            .rev()
            .fold(tail.unwrap_or_else(|| Term::atom(LIST_NIL)), |acc, item| {
                Term::compound(LIST_CONS, [item, acc])
            })
    }

    /// Name/arity of an atom or compound; `None` for variables and numbers.
    pub fn indicator(&self) -> Option<Indicator> {
        match self {
            Term::Const(Value::Atom(name)) => Some(Indicator {
                name: Arc::clone(name),
                arity: 0,
            }),
            Term::Compound(c) => Some(Indicator {
                name: Arc::clone(&c.functor),
                arity: c.args.len(),
            }),
            _ => None,
        }
    }

    /// Arguments of a compound; empty for every other term.
    pub fn args(&self) -> &[Term] {
        match self {
            Term::Compound(c) => &c.args,
            _ => &[],
        }
    }

    pub fn as_var(&self) -> Option<&Var> {
        match self {
            Term::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_const(&self) -> Option<&Value> {
        match self {
            Term::Const(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Term::Const(Value::Atom(a)) => Some(a),
            _ => None,
        }
    }

    pub fn as_compound(&self) -> Option<&Compound> {
        match self {
            Term::Compound(c) => Some(c),
            _ => None,
        }
    }

    /// Whether this term is `functor/arity`.
    pub fn is_functor(&self, functor: &str, arity: usize) -> bool {
        match self {
            Term::Compound(c) => c.args.len() == arity && &*c.functor == functor,
            Term::Const(Value::Atom(a)) => arity == 0 && &**a == functor,
            _ => false,
        }
    }

    pub fn is_ground(&self) -> bool {
        let mut pending = vec![self];
        while let Some(term) = pending.pop() {
            match term {
                Term::Const(_) => {}
                Term::Var(_) => return false,
                Term::Compound(c) => pending.extend(c.args.iter()),
            }
        }
        true
    }

    /// Distinct variables in first-occurrence order.
    pub fn variables(&self) -> Vec<Var> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    pub(crate) fn collect_variables(&self, out: &mut Vec<Var>) {
        let mut pending = vec![self];
        while let Some(term) = pending.pop() {
            match term {
                Term::Const(_) => {}
                Term::Var(v) => {
                    if !out.contains(v) {
                        out.push(v.clone());
                    }
                }
                Term::Compound(c) => pending.extend(c.args.iter().rev()),
            }
        }
    }

    /// Deep copy with every variable moved into `scope`.
    pub fn rename(&self, scope: u32) -> Term {
        rebuild(self, |term| match term {
            Term::Var(v) => Visit::Leaf(Term::Var(v.in_scope(scope))),
            Term::Compound(c) => Visit::Descend(c),
            Term::Const(_) => Visit::Leaf(term.clone()),
        })
    }

    /// Collect the items of a list term; `None` if this is not a proper list.
    pub fn list_items(&self) -> Option<Vec<&Term>> {
        let mut items = Vec::new();
        let mut cursor = self;
        loop {
            match cursor {
                Term::Const(Value::Atom(a)) if &**a == LIST_NIL => return Some(items),
                Term::Compound(c) if c.args.len() == 2 && &*c.functor == LIST_CONS => {
                    items.push(&c.args[0]);
                    cursor = &c.args[1];
                }
                _ => return None,
            }
        }
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        let mut pending = vec![(self, other)];
        while let Some(pair) = pending.pop() {
            match pair {
                (Term::Const(a), Term::Const(b)) if a == b => {}
                (Term::Var(a), Term::Var(b)) if a == b => {}
                (Term::Compound(a), Term::Compound(b)) => {
                    if a.functor != b.functor || a.args.len() != b.args.len() {
                        return false;
                    }
                    if !Arc::ptr_eq(&a.args, &b.args) {
                        pending.extend(a.args.iter().zip(b.args.iter()));
                    }
                }
                _ => return false,
            }
        }
        true
    }
}

impl Eq for Term {}

impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut pending = vec![self];
        while let Some(term) = pending.pop() {
            std::mem::discriminant(term).hash(state);
            match term {
                Term::Const(v) => v.hash(state),
                Term::Var(v) => v.hash(state),
                Term::Compound(c) => {
                    c.functor.hash(state);
                    c.args.len().hash(state);
                    pending.extend(c.args.iter().rev());
                }
            }
        }
    }
}

/// What [`rebuild`] does with one subterm.
pub(crate) enum Visit<'t> {
    /// Use this term as is.
    Leaf(Term),
    /// Rebuild this compound from its visited arguments.
    Descend(&'t Compound),
}

/// Rebuild `root` bottom-up, asking `visit` about every subterm in
/// left-to-right order.
pub(crate) fn rebuild<'t>(root: &'t Term, mut visit: impl FnMut(&'t Term) -> Visit<'t>) -> Term {
    enum Step<'t> {
        Enter(&'t Term),
        Build(&'t Compound),
    }

    let mut steps = vec![Step::Enter(root)];
    let mut built: Vec<Term> = Vec::new();
    while let Some(step) = steps.pop() {
        match step {
            Step::Enter(term) => match visit(term) {
                Visit::Leaf(term) => built.push(term),
                Visit::Descend(c) => {
                    steps.push(Step::Build(c));
                    steps.extend(c.args.iter().rev().map(Step::Enter));
                }
            },
            Step::Build(c) => {
                let start = built.len() - c.args.len();
                let args: Arc<[Term]> = built.drain(start..).collect();
                built.push(Term::Compound(Compound {
                    functor: Arc::clone(&c.functor),
                    args,
                }));
            }
        }
    }
    built.pop().unwrap_or_else(|| root.clone())
}

impl From<Value> for Term {
    fn from(value: Value) -> Self {
        Term::Const(value)
    }
}

impl From<Var> for Term {
    fn from(var: Var) -> Self {
        Term::Var(var)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_term(f, self, false)
    }
}

fn is_infix(c: &Compound) -> bool {
    c.args.len() == 2 && INFIX_OPERATORS.contains(&&*c.functor)
}

fn write_term(f: &mut fmt::Formatter<'_>, term: &Term, nested: bool) -> fmt::Result {
    match term {
        Term::Const(v) => write!(f, "{v}"),
        Term::Var(v) => write!(f, "{v}"),
        Term::Compound(c) if &*c.functor == LIST_CONS && c.args.len() == 2 => write_list(f, c),
        Term::Compound(c) if is_infix(c) => {
            if nested {
                f.write_str("(")?;
            }
            write_term(f, &c.args[0], true)?;
            match &*c.functor {
                "," => f.write_str(", ")?,
                op => write!(f, " {op} ")?,
            }
            write_term(f, &c.args[1], true)?;
            if nested {
                f.write_str(")")?;
            }
            Ok(())
        }
        Term::Compound(c) if &*c.functor == "\\+" && c.args.len() == 1 => {
            f.write_str("\\+ ")?;
            write_term(f, &c.args[0], true)
        }
        Term::Compound(c) => {
            write_atom(f, &c.functor)?;
            f.write_str("(")?;
            for (i, arg) in c.args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_term(f, arg, false)?;
            }
            f.write_str(")")
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, cell: &Compound) -> fmt::Result {
    f.write_str("[")?;
    write_term(f, &cell.args[0], false)?;
    let mut tail = &cell.args[1];
    loop {
        match tail {
            Term::Const(Value::Atom(a)) if &**a == LIST_NIL => break,
            Term::Compound(c) if &*c.functor == LIST_CONS && c.args.len() == 2 => {
                f.write_str(", ")?;
                write_term(f, &c.args[0], false)?;
                tail = &c.args[1];
            }
            other => {
                f.write_str("|")?;
                write_term(f, other, false)?;
                break;
            }
        }
    }
    f.write_str("]")
}
