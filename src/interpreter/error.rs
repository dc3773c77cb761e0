// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use serde::Serialize;
use thiserror::Error;

/// Errors that abort a query. A failed expression (unification mismatch,
/// undefined reference, cross-type comparison) is not an error — it
/// triggers backtracking. These do not.
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    /// Complete-document rules disagree, or a partial-object key maps to
    /// two distinct values.
    #[error("multiple values for data.{path}: rules must produce exactly one value for {kind}: check rule definition(s): {name}")]
    Conflict {
        path: String,
        name: String,
        kind: &'static str,
    },

    /// A built-in received an argument whose type violates its contract.
    #[error("{0}")]
    Type(String),

    /// An expression invoked an operator that is not in the registry.
    #[error("unsupported built-in `{0}`")]
    UnsupportedBuiltin(String),

    /// A rule emitted a non-string object key at runtime.
    #[error("{rule} produced illegal object key {key}")]
    IllegalObjectKey { rule: String, key: String },

    /// Propagated from the storage layer.
    #[error("storage error: {0}")]
    Storage(String),

    /// The caller cancelled the query.
    #[error("query cancelled")]
    Cancelled,
}

impl EvalError {
    /// Stable wire code for this error kind.
    pub fn code(&self) -> u16 {
        match self {
            EvalError::Conflict { .. } => 1,
            EvalError::Type(_) => 2,
            EvalError::UnsupportedBuiltin(_) => 3,
            EvalError::IllegalObjectKey { .. } => 4,
            EvalError::Storage(_) => 5,
            EvalError::Cancelled => 6,
        }
    }
}

/// The error shape returned to API clients.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WireError {
    #[serde(rename = "Code")]
    pub code: u16,
    #[serde(rename = "Message")]
    pub message: String,
}

impl From<&anyhow::Error> for WireError {
    fn from(err: &anyhow::Error) -> WireError {
        let code = err
            .downcast_ref::<EvalError>()
            .map(EvalError::code)
            .unwrap_or(0);
        WireError {
            code,
            message: format!("{err}"),
        }
    }
}
