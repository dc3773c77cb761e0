// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use anyhow::Result;
use strata::*;

/// Base documents referenced throughout the top-down suite.
///
/// Avoid the top-level keys i, j, k, p, q, r, v, x, y, z; those are used
/// for rule names and local variables.
pub const DATA: &str = r#"{
    "a": [1, 2, 3, 4],
    "b": {
        "v1": "hello",
        "v2": "goodbye"
    },
    "c": [{
        "x": [true, false, "foo"],
        "y": [null, 3.14159],
        "z": {"p": true, "q": false}
    }],
    "d": {
        "e": ["bar", "baz"]
    },
    "g": {
        "a": [1, 0, 0, 0],
        "b": [0, 2, 0, 0],
        "c": [0, 0, 0, 4]
    },
    "h": [
        [1, 2, 3],
        [2, 3, 4]
    ],
    "strings": {
        "foo": 1,
        "bar": 2,
        "baz": 3
    },
    "three": 3,
    "numbers": ["1", "2", "3", "4"]
}"#;

pub fn store() -> Storage {
    match Storage::from_json_str(DATA) {
        Ok(s) => s,
        Err(e) => panic!("bad test data: {e}"),
    }
}

pub fn json(j: &str) -> Value {
    match Value::from_json_str(j) {
        Ok(v) => v,
        Err(e) => panic!("bad test json `{j}`: {e}"),
    }
}

pub fn jt(j: &str) -> Term {
    Term::from(json(j))
}

pub fn var(name: &str) -> Term {
    Term::from(Value::var(name))
}

pub fn s(v: &str) -> Term {
    Term::from(Value::from(v))
}

pub fn n(v: i64) -> Term {
    Term::from(Value::from(v))
}

pub fn b(v: bool) -> Term {
    Term::from(Value::Bool(v))
}

pub fn arr(items: Vec<Term>) -> Term {
    Term::from(Value::from(items))
}

pub fn set(items: Vec<Term>) -> Term {
    Term::from(Value::from(items.into_iter().collect::<BTreeSet<Term>>()))
}

pub fn obj(pairs: Vec<(Term, Term)>) -> Term {
    Term::from(Value::from(
        pairs.into_iter().collect::<BTreeMap<Term, Term>>(),
    ))
}

/// A reference rooted at `head`: `r("data", vec![s("a"), var("i")])` is
/// `data.a[i]`.
pub fn r(head: &str, elems: Vec<Term>) -> Term {
    let mut items = vec![var(head)];
    items.extend(elems);
    Term::from(Value::reference(items))
}

/// A `data` reference with string path segments followed by free-form
/// elements: `d(&["a"], vec![var("i")])` is `data.a[i]`.
pub fn d(path: &[&str], elems: Vec<Term>) -> Term {
    let mut items: Vec<Term> = path.iter().map(|p| s(p)).collect();
    items.extend(elems);
    r("data", items)
}

pub fn compr(head: Term, body: Vec<Expr>) -> Term {
    Term::from(Value::ArrayCompr(Rc::new(ArrayCompr {
        head,
        body: new_body(body),
    })))
}

pub fn complete(name: &str, value: Term, body: Vec<Expr>) -> Rule {
    Rule::new(name, None, Some(value), new_body(body))
}

pub fn partial_set(name: &str, key: Term, body: Vec<Expr>) -> Rule {
    Rule::new(name, Some(key), None, new_body(body))
}

pub fn partial_object(name: &str, key: Term, value: Term, body: Vec<Expr>) -> Rule {
    Rule::new(name, Some(key), Some(value), new_body(body))
}

/// Replace every set with a sorted array so results with set semantics can
/// be compared against plain JSON expectations.
pub fn setless(v: &Value) -> Value {
    match v {
        Value::Set(items) => Value::from(
            items
                .iter()
                .map(|t| Term::from(setless(&t.value)))
                .collect::<Vec<Term>>(),
        ),
        Value::Array(items) => Value::from(
            items
                .iter()
                .map(|t| Term::from(setless(&t.value)))
                .collect::<Vec<Term>>(),
        ),
        Value::Object(fields) => Value::from(
            fields
                .iter()
                .map(|(k, val)| (Term::from(setless(&k.value)), Term::from(setless(&val.value))))
                .collect::<BTreeMap<Term, Term>>(),
        ),
        _ => v.clone(),
    }
}

pub fn eval_with_storage(
    storage: &Storage,
    modules: Vec<Module>,
    path: &[&str],
    request: Option<Term>,
) -> Result<QueryResultSet> {
    let compiler = Compiler::new(modules)?;
    let txn = storage.begin()?;
    query(QueryParams::new(&compiler, storage, &txn, request, path))
}

pub fn eval_rules(rules: Vec<Rule>, name: &str) -> Result<QueryResultSet> {
    let storage = store();
    eval_with_storage(
        &storage,
        vec![Module::new(&["test"], rules)],
        &["test", name],
        None,
    )
}

/// Evaluate rules in package `test` and compare `data.test.p` against an
/// expected JSON document; the empty string expects undefined. Sets in the
/// result compare order-insensitively.
pub fn assert_eval(rules: Vec<Rule>, expected: &str) {
    let results = match eval_rules(rules, "p") {
        Ok(r) => r,
        Err(e) => panic!("unexpected error: {e}"),
    };
    assert_results(&results, expected);
}

pub fn assert_results(results: &QueryResultSet, expected: &str) {
    if expected.is_empty() {
        assert!(
            results.is_undefined(),
            "expected undefined, got {:?}",
            results
        );
        return;
    }
    assert_eq!(results.results.len(), 1, "expected one result: {results:?}");
    let got = setless(&results.results[0].value);
    let want = setless(&json(expected));
    assert_eq!(got, want);
}

/// Evaluate rules expecting an error with the given stable code.
pub fn assert_eval_err(rules: Vec<Rule>, code: u16, needle: &str) {
    match eval_rules(rules, "p") {
        Ok(r) => panic!("expected error (code {code}) but got {r:?}"),
        Err(e) => {
            let wire = WireError::from(&e);
            assert_eq!(wire.code, code, "wrong code for `{}`", wire.message);
            assert!(
                wire.message.contains(needle),
                "message `{}` does not contain `{needle}`",
                wire.message
            );
        }
    }
}
