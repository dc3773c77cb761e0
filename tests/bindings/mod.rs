// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use crate::common::*;
use strata::*;

#[test]
fn bind_and_lookup() {
    let mut env = Bindings::new();
    let _scope = env.open_scope();
    env.bind(Value::var("x"), Value::from(1i64));
    assert_eq!(env.binding(&Value::var("x")), Some(&Value::from(1i64)));
    assert_eq!(env.binding(&Value::var("y")), None);
}

#[test]
fn undo_restores_shadowed_bindings() {
    let mut env = Bindings::new();
    let outer = env.open_scope();
    env.bind(Value::var("x"), Value::from(1i64));

    let inner = env.open_scope();
    env.bind(Value::var("x"), Value::from(2i64));
    env.bind(Value::var("y"), Value::from(3i64));
    assert_eq!(env.binding(&Value::var("x")), Some(&Value::from(2i64)));

    env.undo(inner);
    assert_eq!(env.binding(&Value::var("x")), Some(&Value::from(1i64)));
    assert_eq!(env.binding(&Value::var("y")), None);
    assert_eq!(env.len(), 1);

    env.undo(outer);
    assert!(env.is_empty());
}

#[test]
fn plug_follows_chains_through_composites() {
    // a -> b, b -> [c], c -> {k: "world"}, k -> "hello"
    let mut env = Bindings::new();
    let _scope = env.open_scope();
    env.bind(Value::var("a"), Value::var("b"));
    env.bind(Value::var("b"), arr(vec![var("c")]).value);
    env.bind(Value::var("c"), obj(vec![(var("k"), s("world"))]).value);
    env.bind(Value::var("k"), Value::from("hello"));

    assert_eq!(
        env.plug(&Value::var("a")),
        json(r#"[{"hello": "world"}]"#)
    );
}

#[test]
fn plug_substitutes_evaluated_refs() {
    // i -> 1, x.y[1] -> 1: plugging a.b[x.y[i]] yields a.b[1]
    let mut env = Bindings::new();
    let _scope = env.open_scope();
    env.bind(Value::var("i"), Value::from(1i64));
    env.bind(
        r("x", vec![s("y"), n(1)]).value,
        Value::from(1i64),
    );

    let term = r("a", vec![s("b"), r("x", vec![s("y"), var("i")])]);
    assert_eq!(env.plug(&term.value), r("a", vec![s("b"), n(1)]).value);
}

#[test]
fn plug_terminates_on_cycles() {
    let mut env = Bindings::new();
    let _scope = env.open_scope();
    env.bind(Value::var("a"), Value::var("b"));
    env.bind(Value::var("b"), Value::var("a"));

    // the deepest non-self reference on the chain
    assert_eq!(env.plug(&Value::var("a")), Value::var("b"));
    assert_eq!(env.plug(&Value::var("b")), Value::var("a"));
}

#[test]
fn plug_is_idempotent() {
    let mut env = Bindings::new();
    let _scope = env.open_scope();
    env.bind(Value::var("x"), Value::from(1i64));
    env.bind(Value::var("y"), arr(vec![var("x"), var("z")]).value);

    let t = arr(vec![var("y"), var("w"), s("lit")]).value;
    let once = env.plug(&t);
    let twice = env.plug(&once);
    assert_eq!(once, twice);
}

#[test]
fn plug_recanonicalizes_sets() {
    // {x, 9} with x -> 1 must sort 1 before 9 after substitution
    let mut env = Bindings::new();
    let _scope = env.open_scope();
    env.bind(Value::var("x"), Value::from(1i64));

    let t = set(vec![var("x"), n(9)]).value;
    let plugged = env.plug(&t);
    assert_eq!(plugged, set(vec![n(1), n(9)]).value);
    assert_eq!(serde_json::to_string(&plugged).ok(), Some("[1,9]".to_string()));
}
