// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # logigraph
//!
//! An in-memory knowledge graph with logic queries and synchronous
//! propagation.
//!
//! ## Architecture
//!
//! - **Terms** (`term`): constants, variables and compounds, the unifier and a parser
//! - **Triple store** (`store`): labeled, attributed edges with subject/predicate/object indexes,
//!   observers and per-element watches
//! - **Rules** (`rules`): Horn clauses plus builtin predicates (`=`, `is`, comparisons)
//! - **Resolution** (`resolve`): lazy SLD resolution with backtracking, cut and negation
//! - **Propagation** (`propagate`): double-buffered epochs over nodes and edges
//!
//! ## Library usage
//!
//! ```no_run
//! use logigraph::config::KbConfig;
//! use logigraph::engine::KnowledgeBase;
//!
//! let kb = KnowledgeBase::new(KbConfig::default()).unwrap();
//! kb.consult(
//!     "parent(tom, bob).
//!      parent(bob, ann).
//!      grandparent(X, Z) :- parent(X, Y), parent(Y, Z).",
//! )
//! .unwrap();
//! for answer in kb.query_str("grandparent(tom, Who)").unwrap() {
//!     println!("{}", answer.unwrap());
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod propagate;
pub mod resolve;
pub mod rules;
pub mod store;
pub mod term;

pub use config::KbConfig;
pub use engine::{FactId, KbInfo, KnowledgeBase};
pub use error::{KbError, KbResult};
pub use term::{Term, Value, Var};
