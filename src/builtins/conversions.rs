// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::Expr;
use crate::builtins;
use crate::interpreter::error::EvalError;
use crate::number::Number;
use crate::value::Value;

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{bail, Result};

pub fn register(m: &mut HashMap<&'static str, builtins::BuiltinFcn>) {
    m.insert("to_number", (to_number, 2, true));
}

fn to_number(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    let n = match &args[0] {
        Value::Null => Number::from(0u64),
        Value::Bool(false) => Number::from(0u64),
        Value::Bool(true) => Number::from(1u64),
        Value::Number(n) => n.clone(),
        Value::String(s) => match Number::from_str(s.as_ref()) {
            Ok(n) => n,
            Err(_) => bail!(EvalError::Type(format!(
                "to_number: input is not a numeric string: illegal argument: {}",
                args[0]
            ))),
        },
        v => bail!(EvalError::Type(format!(
            "to_number: input must be null, a boolean, a number or a numeric string: illegal argument: {v}"
        ))),
    };
    Ok(Some(Value::from(n)))
}
