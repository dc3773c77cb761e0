// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::Expr;
use crate::builtins;
use crate::builtins::utils::{ensure_numeric, ensure_string, ensure_string_collection};
use crate::interpreter::error::EvalError;
use crate::value::Value;

use std::collections::HashMap;

use anyhow::{bail, Result};

pub fn register(m: &mut HashMap<&'static str, builtins::BuiltinFcn>) {
    m.insert("concat", (concat, 3, true));
    m.insert("format_int", (format_int, 3, true));
    m.insert("indexof", (indexof, 3, true));
    m.insert("substring", (substring, 4, true));
    m.insert("contains", (contains, 2, false));
    m.insert("startswith", (startswith, 2, false));
    m.insert("endswith", (endswith, 2, false));
    m.insert("lower", (lower, 2, true));
    m.insert("upper", (upper, 2, true));
}

fn concat(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    let sep = ensure_string("concat", "join value", &args[0])?;
    let parts = ensure_string_collection("concat", &args[1])?;
    let joined = parts
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<&str>>()
        .join(sep.as_ref());
    Ok(Some(Value::String(joined.into())))
}

fn format_int(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    let n = ensure_numeric("format_int", &args[0])?;
    let base = ensure_numeric("format_int", &args[1])?;
    let base = match base.as_u64() {
        Some(b @ (2 | 8 | 10 | 16)) => b,
        _ => bail!(EvalError::Type(format!(
            "format_int: base must be one of 2, 8, 10, 16: illegal argument: {}",
            args[1]
        ))),
    };
    match n.format_in_base(base) {
        Some(s) => Ok(Some(Value::String(s.into()))),
        None => Ok(None),
    }
}

fn indexof(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    let base = ensure_string("indexof", "base value", &args[0])?;
    let search = ensure_string("indexof", "search value", &args[1])?;
    let idx = match base.find(search.as_ref()) {
        Some(i) => i as i64,
        None => -1,
    };
    Ok(Some(Value::from(idx)))
}

fn substring(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    let base = ensure_string("substring", "base value", &args[0])?;
    let start = ensure_numeric("substring", &args[1])?;
    let length = ensure_numeric("substring", &args[2])?;
    let start = match start.as_i64() {
        Some(s) if s >= 0 => s as usize,
        _ => bail!(EvalError::Type(format!(
            "substring: start index must be a non-negative integer: illegal argument: {}",
            args[1]
        ))),
    };
    let out: String = match length.as_i64() {
        Some(l) if l < 0 => base.chars().skip(start).collect(),
        Some(l) => base.chars().skip(start).take(l as usize).collect(),
        None => bail!(EvalError::Type(format!(
            "substring: length must be an integer: illegal argument: {}",
            args[2]
        ))),
    };
    Ok(Some(Value::String(out.into())))
}

fn contains(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    let base = ensure_string("contains", "base value", &args[0])?;
    let search = ensure_string("contains", "search value", &args[1])?;
    Ok(base
        .contains(search.as_ref())
        .then(|| Value::Bool(true)))
}

fn startswith(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    let base = ensure_string("startswith", "base value", &args[0])?;
    let search = ensure_string("startswith", "search value", &args[1])?;
    Ok(base
        .starts_with(search.as_ref())
        .then(|| Value::Bool(true)))
}

fn endswith(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    let base = ensure_string("endswith", "base value", &args[0])?;
    let search = ensure_string("endswith", "search value", &args[1])?;
    Ok(base.ends_with(search.as_ref()).then(|| Value::Bool(true)))
}

fn lower(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    let s = ensure_string("lower", "original value", &args[0])?;
    Ok(Some(Value::String(s.to_lowercase().into())))
}

fn upper(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    let s = ensure_string("upper", "original value", &args[0])?;
    Ok(Some(Value::String(s.to_uppercase().into())))
}
