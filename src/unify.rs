// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::value::{Term, Value, WalkParams};

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

/// The variables the safety analysis can see in a term: ref heads, closure
/// locals and object keys are all outside its scope. Keys never receive
/// bindings from unifying the values of two objects, so they must not be
/// counted as dependencies.
fn safety_vars(x: &Value) -> BTreeSet<Rc<str>> {
    x.vars_with(&WalkParams {
        skip_ref_head: true,
        skip_object_keys: true,
        skip_closures: true,
    })
}

/// Compute the set of variables that become safe (ground after success)
/// when the equality `a = b` is evaluated, assuming the variables in
/// `safe` are already safe.
///
/// This is a pure static analysis over terms; it never consults storage or
/// bindings. The compiler uses it to order body expressions and reject
/// unsafe rules, so it must be sound: a variable is reported only when
/// every evaluation of the equality grounds it.
pub fn unify_vars(safe: &BTreeSet<Rc<str>>, a: &Term, b: &Term) -> BTreeSet<Rc<str>> {
    let mut u = Unifier {
        safe,
        unified: BTreeSet::new(),
        unknown: BTreeMap::new(),
    };
    u.unify(&a.value, &b.value);
    u.unified
}

struct Unifier<'a> {
    safe: &'a BTreeSet<Rc<str>>,
    unified: BTreeSet<Rc<str>>,
    // var -> the vars it is waiting on before it can be marked safe
    unknown: BTreeMap<Rc<str>, BTreeSet<Rc<str>>>,
}

impl Unifier<'_> {
    fn is_safe(&self, x: &Rc<str>) -> bool {
        self.safe.contains(x) || self.unified.contains(x)
    }

    fn unify(&mut self, a: &Value, b: &Value) {
        match a {
            Value::Var(av) => match b {
                Value::Var(bv) => {
                    if self.is_safe(bv) {
                        self.mark_safe(av.clone());
                    } else if self.is_safe(av) {
                        self.mark_safe(bv.clone());
                    } else {
                        self.mark_unknown(av.clone(), bv.clone());
                        self.mark_unknown(bv.clone(), av.clone());
                    }
                }
                Value::Array(_) | Value::Object(_) => self.unify_all(av.clone(), b),
                _ => self.mark_safe(av.clone()),
            },

            Value::Ref(_) => match b {
                Value::Var(bv) => self.mark_safe(bv.clone()),
                Value::Array(_) | Value::Object(_) => self.mark_all_safe(b),
                _ => (),
            },

            Value::ArrayCompr(_) => match b {
                Value::Var(bv) => self.mark_safe(bv.clone()),
                Value::Array(_) => self.mark_all_safe(b),
                _ => (),
            },

            Value::Array(items) => match b {
                Value::Var(bv) => self.unify_all(bv.clone(), a),
                Value::Ref(_) | Value::ArrayCompr(_) => self.mark_all_safe(a),
                Value::Array(other) if items.len() == other.len() => {
                    for (x, y) in items.iter().zip(other.iter()) {
                        self.unify(&x.value, &y.value);
                    }
                }
                _ => (),
            },

            Value::Object(fields) => match b {
                Value::Var(bv) => self.unify_all(bv.clone(), a),
                Value::Ref(_) => self.mark_all_safe(a),
                Value::Object(other) if fields.len() == other.len() => {
                    // Values unify pairwise on matching keys.
                    for (k, v) in fields.iter() {
                        if let Some(w) = other.get(k) {
                            self.unify(&v.value, &w.value);
                        }
                    }
                }
                _ => (),
            },

            _ => {
                if let Value::Var(bv) = b {
                    self.mark_safe(bv.clone());
                }
            }
        }
    }

    fn mark_safe(&mut self, x: Rc<str>) {
        self.unified.insert(x.clone());

        // Anything that was waiting on x alone is safe now too.
        if let Some(deps) = self.unknown.remove(&x) {
            for v in deps {
                self.mark_safe(v);
            }
        }

        let mut ready = vec![];
        for (v, deps) in self.unknown.iter_mut() {
            if deps.remove(&x) && deps.is_empty() {
                ready.push(v.clone());
            }
        }
        for v in ready {
            self.unknown.remove(&v);
            self.mark_safe(v);
        }
    }

    fn mark_unknown(&mut self, a: Rc<str>, b: Rc<str>) {
        self.unknown.entry(a).or_default().insert(b);
    }

    fn mark_all_safe(&mut self, x: &Value) {
        for v in safety_vars(x) {
            self.mark_safe(v);
        }
    }

    fn unify_all(&mut self, a: Rc<str>, b: &Value) {
        if self.is_safe(&a) {
            self.mark_all_safe(b);
        } else {
            let mut pending = safety_vars(b);
            pending.retain(|v| !self.safe.contains(v) && !self.unified.contains(v));
            if pending.is_empty() {
                self.mark_safe(a);
            } else {
                for v in pending {
                    self.mark_unknown(a.clone(), v);
                }
            }
        }
    }
}
