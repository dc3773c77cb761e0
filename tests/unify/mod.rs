// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use crate::common::*;
use strata::*;

use std::collections::BTreeSet;
use std::rc::Rc;

fn safe(names: &[&str]) -> BTreeSet<Rc<str>> {
    names.iter().map(|s| (*s).into()).collect()
}

fn check(safe_in: &[&str], a: Term, b: Term, expected: &[&str]) {
    let got = unify_vars(&safe(safe_in), &a, &b);
    assert_eq!(got, safe(expected), "unify {:?} = {:?}", a, b);
}

#[test]
fn var_against_constant_is_safe() {
    check(&[], var("x"), n(1), &["x"]);
    check(&[], n(1), var("x"), &["x"]);
}

#[test]
fn var_against_unsafe_var_is_unknown() {
    check(&[], var("x"), var("y"), &[]);
}

#[test]
fn var_against_safe_var_is_safe() {
    check(&["y"], var("x"), var("y"), &["x"]);
    check(&["x"], var("x"), var("y"), &["y"]);
}

#[test]
fn ref_grounds_the_other_side() {
    // x = data.a[i] makes x safe but not i
    check(&[], var("x"), d(&["a"], vec![var("i")]), &["x"]);
    check(&[], d(&["a"], vec![var("i")]), var("x"), &["x"]);
}

#[test]
fn arrays_unify_elementwise() {
    check(&[], arr(vec![var("x"), var("y")]), arr(vec![n(1), n(2)]), &["x", "y"]);
    // length mismatch unifies nothing
    check(&[], arr(vec![var("x")]), arr(vec![n(1), n(2)]), &[]);
}

#[test]
fn var_against_array_waits_for_its_vars() {
    check(&[], var("x"), arr(vec![var("y"), n(1)]), &[]);
    check(&["y"], var("x"), arr(vec![var("y"), n(1)]), &["x"]);
}

#[test]
fn dependency_promotion_is_transitive() {
    // [x, y] = [y, 1]: y becomes safe, which releases x
    check(
        &[],
        arr(vec![var("x"), var("y")]),
        arr(vec![var("y"), n(1)]),
        &["x", "y"],
    );
}

#[test]
fn object_keys_are_not_dependencies() {
    // x = {k: 1}: the key variable never receives a binding from this
    // equality, so it neither blocks x nor becomes safe itself
    check(&[], var("x"), obj(vec![(var("k"), n(1))]), &["x"]);
    check(&[], obj(vec![(var("k"), n(1))]), var("x"), &["x"]);
}

#[test]
fn objects_unify_values_on_matching_keys() {
    check(
        &[],
        obj(vec![(s("a"), var("x")), (s("b"), var("y"))]),
        obj(vec![(s("a"), n(1)), (s("b"), n(2))]),
        &["x", "y"],
    );
}

#[test]
fn comprehension_grounds_a_var() {
    let c = compr(var("e"), vec![Expr::eq(var("e"), n(1))]);
    check(&[], c, var("x"), &["x"]);
}
