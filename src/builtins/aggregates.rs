// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::Expr;
use crate::builtins;
use crate::builtins::utils::{ensure_collection, ensure_numeric};
use crate::number::Number;
use crate::value::Value;

use std::collections::HashMap;

use anyhow::Result;

pub fn register(m: &mut HashMap<&'static str, builtins::BuiltinFcn>) {
    m.insert("count", (count, 2, true));
    m.insert("sum", (sum, 2, true));
    m.insert("max", (max, 2, true));
    m.insert("min", (min, 2, true));
}

fn count(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    let items = ensure_collection("count", &args[0])?;
    Ok(Some(Value::from(items.len())))
}

fn sum(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    let items = ensure_collection("sum", &args[0])?;
    let mut total = Number::from(0u64);
    for item in &items {
        total.add_assign(&ensure_numeric("sum", item)?)?;
    }
    Ok(Some(Value::from(total)))
}

// max/min of an empty collection is undefined

fn max(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    let items = ensure_collection("max", &args[0])?;
    Ok(items.into_iter().max())
}

fn min(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    let items = ensure_collection("min", &args[0])?;
    Ok(items.into_iter().min())
}
