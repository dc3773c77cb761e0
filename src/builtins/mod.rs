// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

mod aggregates;
pub mod comparison;
mod conversions;
mod numbers;
mod regex;
mod sets;
mod strings;
mod utils;

use crate::ast::Expr;
use crate::value::Value;

use std::collections::HashMap;

use anyhow::Result;
use lazy_static::lazy_static;

/// A builtin evaluator: plugged input arguments in, computed value out.
///
/// The tuple is (implementation, arity, last-argument-is-output). When the
/// last argument is an output, the implementation receives only the input
/// arguments and the interpreter unifies the computed value against the
/// output position — an unbound variable binds, a ground term asserts
/// equality. `Ok(None)` means undefined: the expression fails without
/// error.
pub type BuiltinFcn = (fn(&Expr, &[Value]) -> Result<Option<Value>>, u8, bool);

lazy_static! {
    pub static ref BUILTINS: HashMap<&'static str, BuiltinFcn> = {
        let mut m: HashMap<&'static str, BuiltinFcn> = HashMap::new();

        // `eq` is unification and is dispatched directly by the driver.
        numbers::register(&mut m);
        comparison::register(&mut m);
        aggregates::register(&mut m);
        strings::register(&mut m);
        sets::register(&mut m);
        regex::register(&mut m);
        conversions::register(&mut m);
        m
    };
}
