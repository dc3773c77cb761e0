// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::Expr;
use crate::builtins;
use crate::builtins::utils::ensure_numeric;
use crate::interpreter::error::EvalError;
use crate::number::Number;
use crate::value::Value;

use std::collections::HashMap;

use anyhow::{bail, Result};

pub fn register(m: &mut HashMap<&'static str, builtins::BuiltinFcn>) {
    m.insert("plus", (plus, 3, true));
    m.insert("minus", (minus, 3, true));
    m.insert("mul", (mul, 3, true));
    m.insert("div", (div, 3, true));
    m.insert("round", (round, 2, true));
    m.insert("abs", (abs, 2, true));
}

fn plus(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    let a = ensure_numeric("plus", &args[0])?;
    let b = ensure_numeric("plus", &args[1])?;
    Ok(Some(Value::from(a.add(&b)?)))
}

fn minus(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    let a = ensure_numeric("minus", &args[0])?;
    let b = ensure_numeric("minus", &args[1])?;
    Ok(Some(Value::from(a.sub(&b)?)))
}

fn mul(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    let a = ensure_numeric("mul", &args[0])?;
    let b = ensure_numeric("mul", &args[1])?;
    Ok(Some(Value::from(a.mul(&b)?)))
}

fn div(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    let a = ensure_numeric("div", &args[0])?;
    let b = ensure_numeric("div", &args[1])?;
    if b == Number::from(0u64) {
        bail!(EvalError::Type("div: divide by zero".to_string()));
    }
    Ok(Some(Value::from(a.divide(&b)?)))
}

fn round(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    Ok(Some(Value::from(ensure_numeric("round", &args[0])?.round())))
}

fn abs(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    Ok(Some(Value::from(ensure_numeric("abs", &args[0])?.abs())))
}
