// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::Expr;
use crate::builtins;
use crate::builtins::utils::ensure_set;
use crate::value::Value;

use std::collections::HashMap;
use std::rc::Rc;

use anyhow::Result;

pub fn register(m: &mut HashMap<&'static str, builtins::BuiltinFcn>) {
    m.insert("set_diff", (set_diff, 3, true));
}

fn set_diff(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    let a = ensure_set("set_diff", "first input argument", &args[0])?;
    let b = ensure_set("set_diff", "second input argument", &args[1])?;
    let diff = a.difference(&b).cloned().collect();
    Ok(Some(Value::Set(Rc::new(diff))))
}
