// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use crate::common::*;
use anyhow::Result;
use strata::*;

use std::collections::BTreeSet;
use std::str::FromStr;

#[test]
fn object_equality_ignores_entry_order() -> Result<()> {
    let a = json(r#"{"b": false, "a": [1, 2, 3]}"#);
    let b = json(r#"{"a": [1, 2, 3], "b": false}"#);
    assert_eq!(a, b);
    Ok(())
}

#[test]
fn sets_deduplicate() -> Result<()> {
    let v = set(vec![n(1), n(2), n(1), n(2), n(3)]);
    assert_eq!(v.value.as_set()?.len(), 3);
    Ok(())
}

#[test]
fn total_order_by_variant_then_content() {
    // null < bool < number < string
    let mut vals = vec![
        Value::from("a"),
        Value::from(2i64),
        Value::Bool(true),
        Value::Null,
        Value::from(1i64),
    ];
    vals.sort();
    assert_eq!(
        vals,
        vec![
            Value::Null,
            Value::Bool(true),
            Value::from(1i64),
            Value::from(2i64),
            Value::from("a"),
        ]
    );
}

#[test]
fn terms_compare_by_value_not_location() {
    let a = Term::new(Value::from(1i64), Location { row: 1, col: 2 });
    let b = Term::new(Value::from(1i64), Location { row: 9, col: 9 });
    assert_eq!(a, b);
}

#[test]
fn serialize_set_as_array() -> Result<()> {
    let v = set(vec![n(3), n(1), n(2)]);
    assert_eq!(serde_json::to_string(&v.value)?, "[1,2,3]");
    Ok(())
}

#[test]
fn serialize_non_string_object_key() -> Result<()> {
    let v = obj(vec![(n(1), s("one"))]);
    assert_eq!(serde_json::to_string(&v.value)?, r#"{"1":"one"}"#);
    Ok(())
}

#[test]
fn number_precision_round_trips() -> Result<()> {
    let v = json("3.14159");
    assert_eq!(serde_json::to_string(&v)?, "3.14159");
    assert_eq!(v, Value::Number(Number::from_str("3.14159").map_err(
        |_| anyhow::anyhow!("parse")
    )?));
    Ok(())
}

#[test]
fn integer_numbers_serialize_without_fraction() -> Result<()> {
    assert_eq!(serde_json::to_string(&Value::from(1.0))?, "1");
    assert_eq!(serde_json::to_string(&Value::from(-1.0))?, "-1");
    assert_eq!(serde_json::to_string(&Value::from(1.5))?, "1.5");
    Ok(())
}

#[test]
fn index_with_coerces_array_indices() {
    let a = json("[10, 20, 30]");
    assert_eq!(a.index_with(&json("1")), Some(json("20")));
    assert_eq!(a.index_with(&json("1.0")), Some(json("20")));
    assert_eq!(a.index_with(&json("5")), None);
    assert_eq!(a.index_with(&json("\"x\"")), None);
}

#[test]
fn index_with_set_membership_yields_true() {
    let v = set(vec![n(1), n(2)]).value;
    assert_eq!(v.index_with(&json("2")), Some(Value::Bool(true)));
    assert_eq!(v.index_with(&json("9")), None);
}

#[test]
fn vars_skip_ref_heads_and_closures() {
    // data.a[i] = [x | x = y]
    let refv = d(&["a"], vec![var("i")]).value;
    assert_eq!(
        refv.vars(),
        ["i"].iter().map(|s| (*s).into()).collect::<BTreeSet<_>>()
    );

    let c = compr(
        var("x"),
        vec![Expr::eq(var("x"), var("y"))],
    );
    assert!(c.value.vars().is_empty());

    let all = c.value.vars_with(&WalkParams::default());
    assert!(all.contains("x") && all.contains("y"));
}

#[test]
fn groundness() {
    assert!(json(r#"{"a": [1, {"b": null}]}"#).is_ground());
    assert!(!arr(vec![n(1), var("x")]).value.is_ground());
    assert!(!d(&["a"], vec![n(0)]).value.is_ground());
}

#[test]
fn merge_objects_conflicts_on_diverging_keys() -> Result<()> {
    let mut a = json(r#"{"x": 1}"#);
    a.merge(json(r#"{"y": 2}"#))?;
    assert_eq!(a, json(r#"{"x": 1, "y": 2}"#));

    let mut b = json(r#"{"x": 1}"#);
    assert!(b.merge(json(r#"{"x": 2}"#)).is_err());
    Ok(())
}
