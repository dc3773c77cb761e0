// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::Expr;
use crate::builtins;
use crate::value::Value;

use core::mem::discriminant;
use std::cmp::Ordering;
use std::collections::HashMap;

use anyhow::Result;

pub fn register(m: &mut HashMap<&'static str, builtins::BuiltinFcn>) {
    m.insert("neq", (neq, 2, false));
    m.insert("lt", (lt, 2, false));
    m.insert("lte", (lte, 2, false));
    m.insert("gt", (gt, 2, false));
    m.insert("gte", (gte, 2, false));
}

/// Operands compare through the total term order, but only within one
/// variant: a cross-type comparison is undefined, not an error.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if !a.is_ground() || !b.is_ground() || discriminant(a) != discriminant(b) {
        return None;
    }
    Some(a.cmp(b))
}

fn outcome(ok: bool) -> Option<Value> {
    if ok {
        Some(Value::Bool(true))
    } else {
        None
    }
}

fn neq(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    Ok(compare(&args[0], &args[1]).and_then(|o| outcome(o != Ordering::Equal)))
}

fn lt(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    Ok(compare(&args[0], &args[1]).and_then(|o| outcome(o == Ordering::Less)))
}

fn lte(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    Ok(compare(&args[0], &args[1]).and_then(|o| outcome(o != Ordering::Greater)))
}

fn gt(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    Ok(compare(&args[0], &args[1]).and_then(|o| outcome(o == Ordering::Greater)))
}

fn gte(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    Ok(compare(&args[0], &args[1]).and_then(|o| outcome(o != Ordering::Less)))
}
