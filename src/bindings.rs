// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::value::{Term, Value};

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

/// A rollback point on the binding environment. Undoing a scope removes
/// exactly the bindings made since it was opened, restoring anything they
/// shadowed. Scopes nest; undoing an outer scope undoes the inner ones too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    mark: usize,
}

/// The per-query binding environment.
///
/// Keys are typically variables, but evaluated references (with ground
/// operands) and evaluated comprehensions are bound too, so that plugging
/// an expression replaces them with their computed documents. An ordered
/// map keyed by the term order stands in for a hash table; the total order
/// is consistent with structural equality by construction.
#[derive(Debug, Default)]
pub struct Bindings {
    map: BTreeMap<Value, Value>,
    log: Vec<(Value, Option<Value>)>,
}

impl Bindings {
    pub fn new() -> Bindings {
        Bindings::default()
    }

    pub fn open_scope(&mut self) -> Scope {
        Scope {
            mark: self.log.len(),
        }
    }

    /// Record `key -> value`. Cycles (`a -> b`, `b -> a`) are permitted;
    /// mutual variable unification creates them and `plug` defends against
    /// them.
    pub fn bind(&mut self, key: Value, value: Value) {
        let prior = self.map.insert(key.clone(), value);
        self.log.push((key, prior));
    }

    /// Roll back to `scope`, removing every binding made since it was
    /// opened and restoring shadowed entries.
    pub fn undo(&mut self, scope: Scope) {
        while self.log.len() > scope.mark {
            let (key, prior) = match self.log.pop() {
                Some(entry) => entry,
                None => break,
            };
            match prior {
                Some(v) => {
                    self.map.insert(key, v);
                }
                None => {
                    self.map.remove(&key);
                }
            }
        }
    }

    pub fn binding(&self, key: &Value) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Substitute every bound sub-term of `v`, recursing into substituted
    /// values until a fixpoint. Composites are rebuilt so that objects and
    /// sets re-canonicalize after substitution (a plugged key changes its
    /// sort position). Reference operands are plugged and the resulting
    /// reference is itself looked up, so an evaluated reference is replaced
    /// by its document. Binding chains may contain cycles; an on-stack seen
    /// set stops the chase at the deepest non-repeating term.
    pub fn plug(&self, v: &Value) -> Value {
        let mut seen = BTreeSet::new();
        self.plug_impl(v, &mut seen)
    }

    fn chase(&self, key: &Value, next: &Value, seen: &mut BTreeSet<Value>) -> Value {
        if seen.contains(key) {
            return key.clone();
        }
        seen.insert(key.clone());
        let out = self.plug_impl(next, seen);
        seen.remove(key);
        // A cycle bottoms out by returning the repeated key itself; in that
        // case the deepest non-self term is this link's target.
        if &out == key {
            return next.clone();
        }
        out
    }

    fn plug_impl(&self, v: &Value, seen: &mut BTreeSet<Value>) -> Value {
        if let Some(next) = self.binding(v) {
            let next = next.clone();
            return self.chase(v, &next, seen);
        }
        match v {
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) | Value::Var(_) => {
                v.clone()
            }
            Value::Array(items) => {
                let out: Vec<Term> = items
                    .iter()
                    .map(|t| Term::new(self.plug_impl(&t.value, seen), t.location))
                    .collect();
                Value::Array(Rc::new(out))
            }
            Value::Set(items) => {
                let out: BTreeSet<Term> = items
                    .iter()
                    .map(|t| Term::new(self.plug_impl(&t.value, seen), t.location))
                    .collect();
                Value::Set(Rc::new(out))
            }
            Value::Object(fields) => {
                let out: BTreeMap<Term, Term> = fields
                    .iter()
                    .map(|(k, val)| {
                        (
                            Term::new(self.plug_impl(&k.value, seen), k.location),
                            Term::new(self.plug_impl(&val.value, seen), val.location),
                        )
                    })
                    .collect();
                Value::Object(Rc::new(out))
            }
            Value::Ref(items) => {
                // The head names a document root; only the operands plug.
                let mut out: Vec<Term> = Vec::with_capacity(items.len());
                for (i, t) in items.iter().enumerate() {
                    if i == 0 {
                        out.push(t.clone());
                    } else {
                        out.push(Term::new(self.plug_impl(&t.value, seen), t.location));
                    }
                }
                let plugged = Value::Ref(Rc::new(out));
                if let Some(doc) = self.binding(&plugged) {
                    let doc = doc.clone();
                    return self.chase(&plugged, &doc, seen);
                }
                plugged
            }
            // A comprehension with no binding is an unevaluated closure;
            // leave it intact for the evaluator.
            Value::ArrayCompr(_) => v.clone(),
        }
    }
}
