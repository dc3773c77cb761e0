// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::Expr;
use crate::builtins;
use crate::builtins::utils::ensure_string;
use crate::interpreter::error::EvalError;
use crate::value::Value;

use std::collections::HashMap;

use anyhow::{bail, Result};
use regex::Regex;

pub fn register(m: &mut HashMap<&'static str, builtins::BuiltinFcn>) {
    m.insert("re_match", (re_match, 2, false));
}

fn re_match(_expr: &Expr, args: &[Value]) -> Result<Option<Value>> {
    let pattern = ensure_string("re_match", "pattern", &args[0])?;
    let s = ensure_string("re_match", "value", &args[1])?;
    let re = match Regex::new(pattern.as_ref()) {
        Ok(re) => re,
        Err(e) => bail!(EvalError::Type(format!("re_match: {e}"))),
    };
    Ok(re.is_match(s.as_ref()).then(|| Value::Bool(true)))
}
