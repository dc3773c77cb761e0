// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

// Unsafe code should not be used.
// Hard to reason about correctness, and maintainability.
#![forbid(unsafe_code)]
// Ensure that all lint names are valid.
#![deny(unknown_lints)]
#![warn(
    clippy::match_like_matches_macro, // prefer matches! macro over verbose match
    clippy::needless_continue, // remove redundant continue statements
    clippy::verbose_file_reads, // prefer concise file read helpers
)]

//! A declarative policy engine over layered documents.
//!
//! Queries evaluate against a document tree merged from two layers: JSON
//! *base* documents served by a storage layer, and *virtual* documents
//! computed by rules written in a Datalog-like language. Both layers share
//! one dotted-reference syntax; the top-down evaluator walks references
//! through the merged tree, backtracking over every combination of
//! variable bindings for which all expressions of a query body succeed.
//!
//! The crate provides the evaluator core: the term algebra ([`Value`],
//! [`Term`]), the binding environment ([`Bindings`]), the rule dispatch
//! machinery, the built-in registry, and the tracer. Compiled rule bodies
//! arrive through the [`Compiler`] handle with names resolved and safety
//! checked; base documents arrive through [`Storage`] within a read
//! transaction held for the query's duration.
//!
//! ```
//! use strata::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! // One rule: p[x] :- data.a[i] = x
//! let rule = Rule::new(
//!     "p",
//!     Some(Term::from(Value::var("x"))),
//!     None,
//!     new_body(vec![Expr::eq(
//!         Term::from(Value::reference(vec![
//!             Term::from(Value::var("data")),
//!             Term::from(Value::from("a")),
//!             Term::from(Value::var("i")),
//!         ])),
//!         Term::from(Value::var("x")),
//!     )]),
//! );
//! let compiler = Compiler::new(vec![Module::new(&[], vec![rule])])?;
//! let storage = Storage::from_json_str(r#"{"a": [1, 2, 3, 4]}"#)?;
//! let txn = storage.begin()?;
//!
//! let results = query(QueryParams::new(&compiler, &storage, &txn, None, &["p"]))?;
//! // partial-set documents serialize as arrays
//! assert_eq!(serde_json::to_string(&results.results[0].value)?, "[1,2,3,4]");
//! # Ok(())
//! # }
//! ```

pub mod ast;
pub mod bindings;
pub mod builtins;
pub mod compiler;
pub mod interpreter;
pub mod number;
pub mod storage;
pub mod trace;
pub mod unify;
pub mod value;

pub use ast::{new_body, Body, DocKind, Expr, ExprKind, Import, Module, Rule};
pub use bindings::{Bindings, Scope};
pub use compiler::{Compiler, RuleTreeNode};
pub use interpreter::error::{EvalError, WireError};
pub use interpreter::{
    query, CancelToken, Interpreter, QueryParams, QueryResult, QueryResultSet,
};
pub use number::Number;
pub use storage::{MemStore, Storage, Store, TermIndex, Transaction};
pub use trace::{BufferTracer, Event, Local, Node, NodeKind, Op, Tracer};
pub use unify::unify_vars;
pub use value::{ArrayCompr, Location, Term, Value, WalkParams};
