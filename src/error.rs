//! Rich diagnostic error types for the logigraph knowledge base.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so callers know exactly
//! what went wrong and how to fix it.
//!
//! Unification failure is deliberately absent: a failed unification is ordinary
//! control flow inside resolution (`None` / `false`), never an error value.

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

/// Top-level error type for the knowledge base facade.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source spans) through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum KbError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Propagate(#[from] PropagateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("node not found: {node}")]
    #[diagnostic(
        code(logigraph::store::node_not_found),
        help(
            "No node with this id exists in the triple store. \
             Nodes are created by `add_node`, `ensure_node`, or by the first edge \
             that references them. Removed nodes stay removed even while edges \
             still point at their id."
        )
    )]
    NodeNotFound { node: String },

    #[error("edge not found: edge:{edge}")]
    #[diagnostic(
        code(logigraph::store::edge_not_found),
        help(
            "No edge with this id exists. Edge ids are never reused, so an id \
             returned before a `remove_edge` call is permanently invalid."
        )
    )]
    EdgeNotFound { edge: u64 },

    #[error("duplicate node: {node}")]
    #[diagnostic(
        code(logigraph::store::duplicate_node),
        help(
            "`add_node` requires a fresh identity. Use `ensure_node` for idempotent \
             creation, or `set_attribute` to update the existing node."
        )
    )]
    DuplicateNode { node: String },
}

// ---------------------------------------------------------------------------
// Rule errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RuleError {
    #[error("unsafe rule `{rule}`: head variable(s) {variables} never bound by the body")]
    #[diagnostic(
        code(logigraph::rule::unsafe_rule),
        help(
            "Every variable in a rule head must also appear in a positive body goal, \
             otherwise answers would contain unbound variables. Variables that only \
             occur inside `not(...)` or `\\+` do not count. Facts must be ground."
        )
    )]
    UnsafeRule { rule: String, variables: String },

    #[error("invalid rule head: {head}")]
    #[diagnostic(
        code(logigraph::rule::invalid_head),
        help("A rule head must be an atom or a compound term, not a variable or a number.")
    )]
    InvalidHead { head: String },

    #[error("rule not found: rule:{id}")]
    #[diagnostic(
        code(logigraph::rule::not_found),
        help("No rule with this id is registered. It may already have been removed.")
    )]
    NotFound { id: u64 },
}

// ---------------------------------------------------------------------------
// Builtin errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum BuiltinError {
    #[error("{builtin}: arguments are not sufficiently instantiated")]
    #[diagnostic(
        code(logigraph::builtin::instantiation),
        help(
            "Arithmetic and comparison builtins need bound operands. Reorder the \
             rule body so the goals that bind these variables run first."
        )
    )]
    Instantiation { builtin: String },

    #[error("{builtin}: expected {expected}, found `{found}`")]
    #[diagnostic(
        code(logigraph::builtin::type_error),
        help("Only integers, floats and arithmetic expressions over them can be evaluated.")
    )]
    Type {
        builtin: String,
        expected: String,
        found: String,
    },

    #[error("{builtin}: {message}")]
    #[diagnostic(code(logigraph::builtin::evaluation))]
    Evaluation { builtin: String, message: String },
}

// ---------------------------------------------------------------------------
// Resolution errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    #[error("resolution depth exceeded maximum of {max_depth}")]
    #[diagnostic(
        code(logigraph::resolve::depth_exceeded),
        help(
            "The query recursed past the configured depth limit. Check for rules \
             without a base case (e.g. `loop(X) :- loop(X).`) or left recursion, \
             or raise `max_depth` in KbConfig if the recursion is legitimate."
        )
    )]
    DepthExceeded { max_depth: usize },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Builtin(#[from] BuiltinError),
}

// ---------------------------------------------------------------------------
// Propagation errors
// ---------------------------------------------------------------------------

/// Failure reported by a user transition function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransitionError {
    pub message: String,
}

impl TransitionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum PropagateError {
    #[error("transition failed on {element}; epoch {epoch} was not committed")]
    #[diagnostic(
        code(logigraph::propagate::transition),
        help(
            "A transition function returned an error, so no update of this epoch \
             was applied. Fix the transition (or the attributes it reads) and step again."
        )
    )]
    Transition {
        element: String,
        epoch: u64,
        #[source]
        source: TransitionError,
    },

    #[error("unknown transition: {name}")]
    #[diagnostic(
        code(logigraph::propagate::unknown_transition),
        help("Register the transition with `PropagationEngine::register` before stepping it by name.")
    )]
    UnknownTransition { name: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Parse errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ParseError {
    #[error("unexpected {found}, expected {expected}")]
    #[diagnostic(
        code(logigraph::parse::unexpected),
        help("Terms look like `eats(tom, Food)`; rules like `head(X) :- goal(X), other(X).`")
    )]
    Unexpected {
        found: String,
        expected: String,
        #[source_code]
        src: String,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("unterminated quoted atom")]
    #[diagnostic(
        code(logigraph::parse::unterminated_quote),
        help("Close the quoted atom with a matching quote character.")
    )]
    UnterminatedQuote {
        #[source_code]
        src: String,
        #[label("quote opened here")]
        span: SourceSpan,
    },

    #[error("invalid number literal `{text}`")]
    #[diagnostic(
        code(logigraph::parse::invalid_number),
        help("Integers must fit in 64 bits; floats need digits on both sides of the dot.")
    )]
    InvalidNumber {
        text: String,
        #[source_code]
        src: String,
        #[label("this literal")]
        span: SourceSpan,
    },

    #[error("`{found}` is not a valid clause head")]
    #[diagnostic(
        code(logigraph::parse::invalid_head),
        help("Clause heads must be atoms or compound terms.")
    )]
    InvalidHead { found: String },
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(logigraph::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {path}: {message}")]
    #[diagnostic(
        code(logigraph::config::parse),
        help("Check the TOML syntax and field names of the config file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(logigraph::config::write),
        help("Ensure you have write permissions to the target directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(logigraph::config::invalid), help("Check the KbConfig fields. {message}"))]
    Invalid { message: String },
}

/// Convenience alias for functions returning logigraph results.
pub type KbResult<T> = std::result::Result<T, KbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_converts_to_kb_error() {
        let err = StoreError::NodeNotFound { node: "tom".into() };
        let kb: KbError = err.into();
        assert!(matches!(kb, KbError::Store(StoreError::NodeNotFound { .. })));
    }

    #[test]
    fn builtin_error_wraps_into_resolve_error() {
        let err = BuiltinError::Instantiation {
            builtin: "is/2".into(),
        };
        let resolve: ResolveError = err.into();
        assert!(matches!(
            resolve,
            ResolveError::Builtin(BuiltinError::Instantiation { .. })
        ));
    }

    #[test]
    fn propagate_error_keeps_transition_source() {
        let err = PropagateError::Transition {
            element: "node:a".into(),
            epoch: 3,
            source: TransitionError::new("missing state"),
        };
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("missing state"));
        assert!(err.to_string().contains("epoch 3"));
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = ResolveError::DepthExceeded { max_depth: 64 };
        assert!(err.to_string().contains("64"));

        let err = RuleError::UnsafeRule {
            rule: "p(X) :- q(Y).".into(),
            variables: "X".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("p(X)"));
        assert!(msg.contains("X"));
    }
}
