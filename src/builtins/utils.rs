// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::interpreter::error::EvalError;
use crate::number::Number;
use crate::value::{Term, Value};

use std::collections::BTreeSet;
use std::rc::Rc;

use anyhow::{bail, Result};

pub fn ensure_numeric(fcn: &str, v: &Value) -> Result<Number> {
    match v {
        Value::Number(n) => Ok(n.clone()),
        _ => bail!(EvalError::Type(format!(
            "{fcn}: input must be a number: illegal argument: {v}"
        ))),
    }
}

pub fn ensure_string(fcn: &str, what: &str, v: &Value) -> Result<Rc<str>> {
    match v {
        Value::String(s) => Ok(s.clone()),
        _ => bail!(EvalError::Type(format!(
            "{fcn}: {what} must be a string: illegal argument: {v}"
        ))),
    }
}

pub fn ensure_set(fcn: &str, what: &str, v: &Value) -> Result<BTreeSet<Term>> {
    match v {
        Value::Set(s) => Ok((**s).clone()),
        _ => bail!(EvalError::Type(format!(
            "{fcn}: {what} must be a set: illegal argument: {v}"
        ))),
    }
}

/// Elements of an array or set, in order. Anything else violates the
/// collection contract.
pub fn ensure_collection(fcn: &str, v: &Value) -> Result<Vec<Value>> {
    match v {
        Value::Array(items) => Ok(items.iter().map(|t| t.value.clone()).collect()),
        Value::Set(items) => Ok(items.iter().map(|t| t.value.clone()).collect()),
        _ => bail!(EvalError::Type(format!(
            "{fcn}: input must be a collection: illegal argument: {v}"
        ))),
    }
}

pub fn ensure_string_collection(fcn: &str, v: &Value) -> Result<Vec<Rc<str>>> {
    let items = match v {
        Value::Array(items) => items.iter().map(|t| &t.value).collect::<Vec<_>>(),
        Value::Set(items) => items.iter().map(|t| &t.value).collect::<Vec<_>>(),
        _ => bail!(EvalError::Type(format!(
            "{fcn}: input value must be array of strings: illegal argument: {v}"
        ))),
    };
    let mut out = vec![];
    for item in items {
        match item {
            Value::String(s) => out.push(s.clone()),
            _ => bail!(EvalError::Type(format!(
                "{fcn}: input value must be array of strings: illegal argument: {item}"
            ))),
        }
    }
    Ok(out)
}
