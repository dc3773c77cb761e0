// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::{new_body, Body, DocKind, Expr, ExprKind, Rule};
use crate::bindings::Bindings;
use crate::builtins;
use crate::compiler::Compiler;
use crate::storage::{Storage, TermIndex, Transaction};
use crate::trace::{Event, Local, Node, NodeKind, Op, Tracer};
use crate::value::{ArrayCompr, Term, Value};

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use anyhow::{bail, Result};
use log::debug;
use serde::Serialize;

pub mod error;
use error::EvalError;

/// Cooperative cancellation handle. The caller keeps a clone and flips it
/// from any thread; the evaluator observes it at rule dispatch, built-in
/// entry and storage reads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::Relaxed)
    }
}

/// Continuation invoked once per solution.
pub type Iter<'i, 'a> = dyn FnMut(&mut Interpreter<'a>) -> Result<()> + 'i;

/// Inputs to a single query evaluation.
pub struct QueryParams<'a> {
    pub compiler: &'a Compiler,
    pub storage: &'a Storage,
    pub txn: &'a Transaction,
    /// Caller-supplied value reachable via the `request` root. May contain
    /// references and variables; the free variables become result bindings.
    pub request: Option<Term>,
    /// Path of the queried document below `data`.
    pub path: Vec<Rc<str>>,
    pub tracer: Option<&'a mut dyn Tracer>,
    pub cancel: Option<CancelToken>,
}

impl<'a> QueryParams<'a> {
    pub fn new(
        compiler: &'a Compiler,
        storage: &'a Storage,
        txn: &'a Transaction,
        request: Option<Term>,
        path: &[&str],
    ) -> QueryParams<'a> {
        QueryParams {
            compiler,
            storage,
            txn,
            request,
            path: path.iter().map(|s| (*s).into()).collect(),
            tracer: None,
            cancel: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryResult {
    pub value: Value,
    /// Values of the query's free variables for this result.
    pub bindings: BTreeMap<Rc<str>, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryResultSet {
    pub results: Vec<QueryResult>,
}

impl QueryResultSet {
    /// An empty result set means the queried document is undefined.
    pub fn is_undefined(&self) -> bool {
        self.results.is_empty()
    }
}

/// Evaluate a query: resolve the request value, walk the queried reference
/// through the merged base and virtual document tree, and collect one
/// result per solution.
pub fn query(params: QueryParams<'_>) -> Result<QueryResultSet> {
    let QueryParams {
        compiler,
        storage,
        txn,
        request,
        path,
        tracer,
        cancel,
    } = params;

    let free: Vec<Rc<str>> = request
        .as_ref()
        .map(|t| t.value.vars().into_iter().collect())
        .unwrap_or_default();

    let mut exprs = vec![];
    if let Some(req) = &request {
        // Resolve any references inside the request value, then expose the
        // ground result through the `request` root.
        exprs.push(Expr::eq(Term::from(Value::var("$request")), req.clone()));
        exprs.push(Expr::eq(
            Term::from(Value::var("request")),
            Term::from(Value::var("$request")),
        ));
    }
    let mut ref_items: Vec<Term> = vec![Term::from(Value::var("data"))];
    for seg in &path {
        ref_items.push(Term::from(Value::String(seg.clone())));
    }
    exprs.push(Expr::eq(
        Term::from(Value::reference(ref_items)),
        Term::from(Value::var("$result")),
    ));
    let body = new_body(exprs);

    let mut interp = Interpreter::new(compiler, storage, txn, tracer, cancel);
    interp.eval_query(body, &free)
}

pub struct Interpreter<'a> {
    compiler: &'a Compiler,
    storage: &'a Storage,
    txn: &'a Transaction,
    tracer: Option<&'a mut dyn Tracer>,
    cancel: Option<CancelToken>,

    bindings: Bindings,
    // per-query caches; discarded when the query returns
    doc_cache: BTreeMap<Vec<Value>, Option<Value>>,
    keyed_cache: BTreeMap<(Vec<Value>, Value), Option<Value>>,
    indices: BTreeMap<Value, TermIndex>,

    // current descent position; saved and restored around nested bodies
    body: Body,
    index: usize,
    qid: u64,
    parent_qid: u64,
    qid_counter: u64,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        compiler: &'a Compiler,
        storage: &'a Storage,
        txn: &'a Transaction,
        tracer: Option<&'a mut dyn Tracer>,
        cancel: Option<CancelToken>,
    ) -> Interpreter<'a> {
        Interpreter {
            compiler,
            storage,
            txn,
            tracer,
            cancel,
            bindings: Bindings::new(),
            doc_cache: BTreeMap::new(),
            keyed_cache: BTreeMap::new(),
            indices: BTreeMap::new(),
            body: Rc::new(vec![]),
            index: 0,
            qid: 1,
            parent_qid: 0,
            qid_counter: 1,
        }
    }

    fn check_cancel(&self) -> Result<()> {
        if let Some(c) = &self.cancel {
            if c.is_cancelled() {
                bail!(EvalError::Cancelled);
            }
        }
        Ok(())
    }

    fn trace(&mut self, op: Op, kind: NodeKind, node: Node) {
        if self.tracer.is_none() {
            return;
        }
        let mut locals = vec![];
        for name in node_vars(&node) {
            if name.starts_with('$') {
                continue;
            }
            let v = self.bindings.plug(&Value::Var(name.clone()));
            if matches!(v, Value::Var(_)) || !v.is_ground() {
                continue;
            }
            locals.push(Local {
                key: Value::String(name),
                value: v,
            });
        }
        let event = Event {
            op,
            query_id: self.qid,
            parent_id: self.parent_qid,
            kind,
            node,
            locals,
        };
        if let Some(t) = self.tracer.as_deref_mut() {
            if t.enabled() {
                t.trace_event(event);
            }
        }
    }

    fn eval_query(&mut self, body: Body, free: &[Rc<str>]) -> Result<QueryResultSet> {
        self.body = body.clone();
        self.index = 0;
        self.trace(Op::Enter, NodeKind::Body, Node::Body(body.clone()));
        let mut set = QueryResultSet::default();
        self.eval(&mut |i| {
            i.trace(Op::Exit, NodeKind::Body, Node::Body(body.clone()));
            let value = i.bindings.plug(&Value::var("$result"));
            if !value.is_ground() {
                return Ok(());
            }
            let mut bindings = BTreeMap::new();
            for name in free {
                let v = i.bindings.plug(&Value::Var(name.clone()));
                if v.is_ground() {
                    bindings.insert(name.clone(), v);
                }
            }
            let result = QueryResult { value, bindings };
            if !set.results.contains(&result) {
                set.results.push(result);
            }
            Ok(())
        })?;
        Ok(set)
    }

    // ------------------------------------------------------------------
    // Body driver
    // ------------------------------------------------------------------

    /// Evaluate the current body from the current position, calling `iter`
    /// once per solution of the remaining expressions.
    fn eval(&mut self, iter: &mut Iter<'_, 'a>) -> Result<()> {
        if self.index >= self.body.len() {
            return iter(self);
        }
        let expr = self.body[self.index].clone();
        if expr.negated {
            return self.eval_not(&expr, iter);
        }
        self.trace(Op::Eval, NodeKind::Expr, Node::Expr(expr.clone()));
        let mut count = 0usize;
        self.eval_expr(&expr, &mut |i| {
            count += 1;
            i.index += 1;
            let r = i.eval(iter);
            i.index -= 1;
            if r.is_ok() {
                i.trace(Op::Redo, NodeKind::Expr, Node::Expr(expr.clone()));
            }
            r
        })?;
        if count == 0 {
            self.trace(Op::Fail, NodeKind::Expr, Node::Expr(expr.clone()));
        }
        Ok(())
    }

    /// `not expr` succeeds iff the inner expression has zero solutions in
    /// an isolated child context; it never exports bindings.
    fn eval_not(&mut self, expr: &Expr, iter: &mut Iter<'_, 'a>) -> Result<()> {
        self.trace(Op::Eval, NodeKind::Expr, Node::Expr(expr.clone()));
        let mut positive = expr.clone();
        positive.negated = false;
        let inner = new_body(vec![positive]);
        let mut found = false;
        self.eval_closure(&inner, &mut |_i| {
            found = true;
            Ok(())
        })?;
        if found {
            self.trace(Op::Fail, NodeKind::Expr, Node::Expr(expr.clone()));
            return Ok(());
        }
        self.index += 1;
        let r = self.eval(iter);
        self.index -= 1;
        r
    }

    /// Evaluate one expression: consult a registered index when possible,
    /// otherwise resolve the expression's references and comprehensions and
    /// dispatch on the operator.
    fn eval_expr(&mut self, expr: &Expr, iter: &mut Iter<'_, 'a>) -> Result<()> {
        self.check_cancel()?;
        if let ExprKind::Call { operator, args } = &expr.kind {
            if operator.as_ref() == "eq" && args.len() == 2 && self.try_index_eq(args, iter)? {
                return Ok(());
            }
        }
        let mut resolvables = vec![];
        expr.each_term(&mut |t| collect_resolvables(&t.value, &mut resolvables));
        let expr = expr.clone();
        self.eval_resolvables(&resolvables, 0, &mut |i| i.dispatch_expr(&expr, iter))
    }

    /// Enumerate every reference and evaluate every comprehension occurring
    /// in the expression, binding each so that plugging yields ground
    /// terms. References enumerate nondeterministically; the rest of the
    /// expression runs once per combination.
    fn eval_resolvables(
        &mut self,
        items: &[Value],
        at: usize,
        iter: &mut Iter<'_, 'a>,
    ) -> Result<()> {
        let item = match items.get(at) {
            Some(item) => item.clone(),
            None => return iter(self),
        };
        match &item {
            Value::Ref(_) => self.eval_ref(&item, &mut |i| i.eval_resolvables(items, at + 1, iter)),
            Value::ArrayCompr(c) => {
                let c = c.clone();
                let arr = self.eval_array_comprehension(&c)?;
                self.with_binding(item.clone(), arr, &mut |i| {
                    i.eval_resolvables(items, at + 1, iter)
                })
            }
            _ => self.eval_resolvables(items, at + 1, iter),
        }
    }

    fn dispatch_expr(&mut self, expr: &Expr, iter: &mut Iter<'_, 'a>) -> Result<()> {
        match &expr.kind {
            ExprKind::Term(t) => {
                let v = self.bindings.plug(&t.value);
                // A defined term succeeds unless it is `false`; null, zero
                // and empty collections are all defined.
                if v == Value::Bool(false) || !v.is_ground() {
                    return Ok(());
                }
                iter(self)
            }
            ExprKind::Call { operator, args } => {
                if operator.as_ref() == "eq" {
                    if args.len() != 2 {
                        bail!(EvalError::Type("eq expects 2 arguments".to_string()));
                    }
                    return self.unify_values(args[0].value.clone(), args[1].value.clone(), iter);
                }
                let (f, arity, has_output) = match builtins::BUILTINS.get(operator.as_ref()) {
                    Some(b) => *b,
                    None => bail!(EvalError::UnsupportedBuiltin(operator.to_string())),
                };
                if args.len() != arity as usize {
                    bail!(EvalError::Type(format!(
                        "`{}` expects {} argument(s)",
                        operator, arity
                    )));
                }
                let plugged: Vec<Value> =
                    args.iter().map(|t| self.bindings.plug(&t.value)).collect();
                if has_output {
                    let out = plugged[plugged.len() - 1].clone();
                    match f(expr, &plugged[..plugged.len() - 1])? {
                        Some(v) => self.unify_values(v, out, iter),
                        None => Ok(()),
                    }
                } else {
                    match f(expr, &plugged)? {
                        Some(_) => iter(self),
                        None => Ok(()),
                    }
                }
            }
        }
    }

    /// Registered-index escape hatch: when an equality pairs an indexed
    /// reference with a ground value, enumerate the index entries for that
    /// value instead of walking the document. Semantically invisible.
    fn try_index_eq(&mut self, args: &[Term], iter: &mut Iter<'_, 'a>) -> Result<bool> {
        for (ri, gi) in [(0usize, 1usize), (1usize, 0usize)] {
            let pattern = &args[ri].value;
            if !matches!(pattern, Value::Ref(_)) || !self.compiler.is_indexed(pattern) {
                continue;
            }
            let other = self.bindings.plug(&args[gi].value);
            if !other.is_ground() {
                continue;
            }
            if !self.indices.contains_key(pattern) {
                let built = TermIndex::build(self.storage, self.txn, pattern)?;
                self.indices.insert(pattern.clone(), built);
            }
            let hits = self
                .indices
                .get(pattern)
                .and_then(|ix| ix.lookup(&other))
                .cloned()
                .unwrap_or_default();
            for entry in hits {
                let scope = self.bindings.open_scope();
                let mut compatible = true;
                for (name, val) in &entry {
                    match self.bindings.plug(&Value::Var(name.clone())) {
                        Value::Var(_) => self.bindings.bind(Value::Var(name.clone()), val.clone()),
                        cur => {
                            if cur != *val {
                                compatible = false;
                                break;
                            }
                        }
                    }
                }
                if compatible {
                    let ground_ref = self.bindings.plug(pattern);
                    if matches!(ground_ref, Value::Ref(_)) {
                        self.bindings.bind(ground_ref, other.clone());
                    }
                    iter(self)?;
                }
                self.bindings.undo(scope);
            }
            return Ok(true);
        }
        Ok(false)
    }

    // ------------------------------------------------------------------
    // Unification
    // ------------------------------------------------------------------

    /// Solve `a = b`, calling `iter` once per solution. Failure returns
    /// without calling it; only conflicts and type violations are errors.
    pub fn unify_values(&mut self, a: Value, b: Value, iter: &mut Iter<'_, 'a>) -> Result<()> {
        let a = self.bindings.plug(&a);
        let b = self.bindings.plug(&b);

        if let Value::ArrayCompr(c) = &a {
            let c = c.clone();
            let arr = self.eval_array_comprehension(&c)?;
            return self.unify_values(arr, b, iter);
        }
        if let Value::ArrayCompr(c) = &b {
            let c = c.clone();
            let arr = self.eval_array_comprehension(&c)?;
            return self.unify_values(a, arr, iter);
        }
        if matches!(a, Value::Ref(_)) {
            let refv = a;
            let b = b.clone();
            return self.eval_ref(&refv.clone(), &mut |i| {
                let resolved = i.bindings.plug(&refv);
                i.unify_values(resolved, b.clone(), iter)
            });
        }
        if matches!(b, Value::Ref(_)) {
            let refv = b;
            let a = a.clone();
            return self.eval_ref(&refv.clone(), &mut |i| {
                let resolved = i.bindings.plug(&refv);
                i.unify_values(a.clone(), resolved, iter)
            });
        }

        match (&a, &b) {
            (Value::Var(x), Value::Var(y)) => {
                if x == y {
                    return iter(self);
                }
                self.with_binding(a.clone(), b.clone(), iter)
            }
            (Value::Var(_), _) => self.with_binding(a.clone(), b.clone(), iter),
            (_, Value::Var(_)) => self.with_binding(b.clone(), a.clone(), iter),
            (Value::Array(x), Value::Array(y)) => {
                if x.len() != y.len() {
                    return Ok(());
                }
                let pairs: Vec<(Value, Value)> = x
                    .iter()
                    .zip(y.iter())
                    .map(|(s, t)| (s.value.clone(), t.value.clone()))
                    .collect();
                self.unify_seq(&pairs, 0, iter)
            }
            (Value::Object(x), Value::Object(y)) => {
                if x.len() != y.len() {
                    return Ok(());
                }
                let mut pairs = vec![];
                for (k, v) in x.iter() {
                    if !k.value.is_ground() {
                        return Ok(());
                    }
                    match y.get(k) {
                        Some(w) => pairs.push((v.value.clone(), w.value.clone())),
                        None => return Ok(()),
                    }
                }
                self.unify_seq(&pairs, 0, iter)
            }
            // Sets and scalars compare by ground equality only.
            _ => {
                if a.is_ground() && b.is_ground() && a == b {
                    iter(self)
                } else {
                    Ok(())
                }
            }
        }
    }

    fn unify_seq(
        &mut self,
        pairs: &[(Value, Value)],
        at: usize,
        iter: &mut Iter<'_, 'a>,
    ) -> Result<()> {
        let (x, y) = match pairs.get(at) {
            Some(p) => p.clone(),
            None => return iter(self),
        };
        self.unify_values(x, y, &mut |i| i.unify_seq(pairs, at + 1, iter))
    }

    fn with_binding(&mut self, key: Value, value: Value, iter: &mut Iter<'_, 'a>) -> Result<()> {
        let scope = self.bindings.open_scope();
        self.bindings.bind(key, value);
        let r = iter(self);
        self.bindings.undo(scope);
        r
    }

    // ------------------------------------------------------------------
    // Reference evaluation
    // ------------------------------------------------------------------

    /// Evaluate a reference against the merged document tree, binding its
    /// free variables and the reference itself once per solution.
    fn eval_ref(&mut self, refv: &Value, iter: &mut Iter<'_, 'a>) -> Result<()> {
        let items = refv.as_ref_items()?.clone();
        let head = match items.first().map(|t| &t.value) {
            Some(Value::Var(h)) => h.clone(),
            _ => bail!("internal error: reference without a head var"),
        };
        if head.as_ref() == "data" {
            let mut path = vec![];
            self.eval_ref_data(refv, &items, 1, &mut path, iter)
        } else {
            // `request` or a compiler-synthesized local: the head resolves
            // through the binding environment and the rest indexes into it.
            let hv = self.bindings.plug(&Value::Var(head));
            if matches!(hv, Value::Var(_)) {
                return Ok(());
            }
            self.eval_ref_in_value(refv, hv, &items, 1, iter)
        }
    }

    /// Walk `data` references: at each ground prefix, rules dispatch, base
    /// keys and virtual children enumerate, and ground elements descend.
    fn eval_ref_data(
        &mut self,
        orig: &Value,
        items: &[Term],
        at: usize,
        path: &mut Vec<Value>,
        iter: &mut Iter<'_, 'a>,
    ) -> Result<()> {
        if !path.is_empty() {
            if let Some(rules) = self.compiler.get_rules_exact(path) {
                let rules = rules.to_vec();
                let path = path.clone();
                return self.eval_rule_dispatch(&path, &rules, orig, items, at, iter);
            }
        }
        if at >= items.len() {
            let resolved = self.resolve_path(&path.clone())?;
            return match resolved {
                Some(v) => self.finish_ref(orig, v, iter),
                None => Ok(()),
            };
        }
        let elem = self.bindings.plug(&items[at].value);
        match elem {
            key @ (Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null) => {
                path.push(key);
                let r = self.eval_ref_data(orig, items, at + 1, path, iter);
                path.pop();
                r
            }
            Value::Var(name) => {
                let base = self.storage_read_path(path)?;
                let mut keys: Vec<Value> = vec![];
                match &base {
                    Some(Value::Object(fields)) => {
                        keys.extend(fields.keys().map(|k| k.value.clone()));
                    }
                    Some(Value::Array(elems)) => keys.extend((0..elems.len()).map(Value::from)),
                    _ => (),
                }
                for child in self.compiler.children_at(path) {
                    let k = Value::String(child);
                    if !keys.contains(&k) {
                        keys.push(k);
                    }
                }
                for k in keys {
                    let scope = self.bindings.open_scope();
                    self.bindings.bind(Value::Var(name.clone()), k.clone());
                    path.push(k);
                    let r = self.eval_ref_data(orig, items, at + 1, path, iter);
                    path.pop();
                    self.bindings.undo(scope);
                    r?;
                }
                Ok(())
            }
            inner @ Value::Ref(_) => {
                // a nested reference indexes this one; resolve it first
                self.eval_ref(&inner.clone(), &mut |i| {
                    let key = i.bindings.plug(&inner);
                    match key {
                        key @ (Value::String(_)
                        | Value::Number(_)
                        | Value::Bool(_)
                        | Value::Null) => {
                            path.push(key);
                            let r = i.eval_ref_data(orig, items, at + 1, path, iter);
                            path.pop();
                            r
                        }
                        _ => Ok(()),
                    }
                })
            }
            // composite keys have no meaning against base documents
            _ => Ok(()),
        }
    }

    /// Index into an already-computed value with the remaining reference
    /// elements: ground keys descend with numeric coercion, unbound
    /// variables enumerate, set membership yields `true`. Mismatches are
    /// undefined, never errors.
    fn eval_ref_in_value(
        &mut self,
        orig: &Value,
        value: Value,
        items: &[Term],
        at: usize,
        iter: &mut Iter<'_, 'a>,
    ) -> Result<()> {
        if at >= items.len() {
            return self.finish_ref(orig, value, iter);
        }
        let key = self.bindings.plug(&items[at].value);
        match &key {
            Value::Var(name) => match &value {
                Value::Array(elems) => {
                    let elems = elems.clone();
                    for (i, t) in elems.iter().enumerate() {
                        let scope = self.bindings.open_scope();
                        self.bindings.bind(Value::Var(name.clone()), Value::from(i));
                        let r =
                            self.eval_ref_in_value(orig, t.value.clone(), items, at + 1, iter);
                        self.bindings.undo(scope);
                        r?;
                    }
                    Ok(())
                }
                Value::Object(fields) => {
                    let fields = fields.clone();
                    for (k, v) in fields.iter() {
                        let scope = self.bindings.open_scope();
                        self.bindings.bind(Value::Var(name.clone()), k.value.clone());
                        let r =
                            self.eval_ref_in_value(orig, v.value.clone(), items, at + 1, iter);
                        self.bindings.undo(scope);
                        r?;
                    }
                    Ok(())
                }
                Value::Set(elems) => {
                    let elems = elems.clone();
                    for t in elems.iter() {
                        let scope = self.bindings.open_scope();
                        self.bindings.bind(Value::Var(name.clone()), t.value.clone());
                        let r =
                            self.eval_ref_in_value(orig, Value::Bool(true), items, at + 1, iter);
                        self.bindings.undo(scope);
                        r?;
                    }
                    Ok(())
                }
                _ => Ok(()),
            },
            Value::Ref(_) => {
                let inner = key.clone();
                let value = value.clone();
                self.eval_ref(&inner, &mut |i| {
                    let k = i.bindings.plug(&inner);
                    match value.index_with(&k) {
                        Some(next) => i.eval_ref_in_value(orig, next, items, at + 1, iter),
                        None => Ok(()),
                    }
                })
            }
            k if k.is_ground() => match value.index_with(k) {
                Some(next) => self.eval_ref_in_value(orig, next, items, at + 1, iter),
                None => Ok(()),
            },
            // partially ground composite: only set members can match it
            _ => {
                if let Value::Set(elems) = &value {
                    let elems = elems.clone();
                    for t in elems.iter() {
                        self.unify_values(key.clone(), t.value.clone(), &mut |i| {
                            i.eval_ref_in_value(orig, Value::Bool(true), items, at + 1, iter)
                        })?;
                    }
                }
                Ok(())
            }
        }
    }

    /// A reference is fully resolved: bind its ground form to the computed
    /// value so plugging substitutes it, and continue.
    fn finish_ref(&mut self, orig: &Value, value: Value, iter: &mut Iter<'_, 'a>) -> Result<()> {
        let ground_ref = self.bindings.plug(orig);
        if matches!(ground_ref, Value::Ref(_)) {
            self.with_binding(ground_ref, value, iter)
        } else if ground_ref == value {
            // the same reference was already evaluated in this expression
            iter(self)
        } else {
            Ok(())
        }
    }

    /// Merged base+virtual document at a ground path. Rules materialize;
    /// package nodes merge base objects with their virtual children,
    /// virtual winning per child; a non-object base below a package node is
    /// undefined.
    fn resolve_path(&mut self, path: &[Value]) -> Result<Option<Value>> {
        if let Some(rules) = self.compiler.get_rules_exact(path) {
            let rules = rules.to_vec();
            return self.materialize_rules(path, &rules);
        }
        let base = self.storage_read_path(path)?;
        let children = self.compiler.children_at(path);
        if children.is_empty() {
            return Ok(base);
        }
        let mut defined = false;
        let mut merged: BTreeMap<Term, Term> = match &base {
            Some(Value::Object(fields)) => {
                defined = true;
                (**fields).clone()
            }
            Some(_) => return Ok(None),
            None => BTreeMap::new(),
        };
        for child in children {
            let mut child_path = path.to_vec();
            child_path.push(Value::String(child.clone()));
            if let Some(v) = self.resolve_path(&child_path)? {
                defined = true;
                merged.insert(Value::String(child).into(), v.into());
            }
        }
        if !defined {
            return Ok(None);
        }
        Ok(Some(Value::Object(Rc::new(merged))))
    }

    fn storage_read_path(&self, path: &[Value]) -> Result<Option<Value>> {
        self.check_cancel()?;
        let mut strs: Vec<&str> = vec![];
        let mut split = path.len();
        for (i, v) in path.iter().enumerate() {
            match v {
                Value::String(s) => strs.push(s.as_ref()),
                _ => {
                    split = i;
                    break;
                }
            }
        }
        let read = self
            .storage
            .read(self.txn, &strs)
            .map_err(|e| EvalError::Storage(e.to_string()))?;
        let mut cur = match read {
            Some(v) => v,
            None => return Ok(None),
        };
        for v in &path[split..] {
            match cur.index_with(v) {
                Some(next) => cur = next,
                None => return Ok(None),
            }
        }
        Ok(Some(cur))
    }

    // ------------------------------------------------------------------
    // Rule dispatch
    // ------------------------------------------------------------------

    fn eval_rule_dispatch(
        &mut self,
        path: &[Value],
        rules: &[Rc<Rule>],
        orig: &Value,
        items: &[Term],
        at: usize,
        iter: &mut Iter<'_, 'a>,
    ) -> Result<()> {
        self.check_cancel()?;
        debug!("dispatching {} rule(s) at data.{}", rules.len(), path_str(path));
        match rules[0].doc_kind() {
            DocKind::Complete => match self.complete_doc(path, rules)? {
                Some(v) => self.eval_ref_in_value(orig, v, items, at, iter),
                None => Ok(()),
            },
            DocKind::PartialSet => self.eval_partial_set(path, rules, orig, items, at, iter),
            DocKind::PartialObject => self.eval_partial_object(path, rules, orig, items, at, iter),
        }
    }

    fn materialize_rules(&mut self, path: &[Value], rules: &[Rc<Rule>]) -> Result<Option<Value>> {
        match rules[0].doc_kind() {
            DocKind::Complete => self.complete_doc(path, rules),
            DocKind::PartialSet => self.partial_set_doc(path, rules),
            DocKind::PartialObject => self.partial_object_doc(path, rules),
        }
    }

    /// The single value of a complete document. Every rule sharing the
    /// path is evaluated; disagreement is a conflict even when the first
    /// rule already produced an answer.
    fn complete_doc(&mut self, path: &[Value], rules: &[Rc<Rule>]) -> Result<Option<Value>> {
        if let Some(hit) = self.doc_cache.get(path) {
            debug!("cache hit for data.{}", path_str(path));
            return Ok(hit.clone());
        }
        let path_s = path_str(path);
        let mut result: Option<Value> = None;
        for rule in rules {
            let value_term = rule
                .value
                .clone()
                .unwrap_or_else(|| Term::from(Value::Bool(true)));
            self.eval_rule(rule, &[], &mut |i, _caller| {
                let v = i.bindings.plug(&value_term.value);
                if !v.is_ground() {
                    return Ok(());
                }
                match &result {
                    None => {
                        result = Some(v);
                        Ok(())
                    }
                    Some(prev) if *prev == v => Ok(()),
                    Some(_) => bail!(EvalError::Conflict {
                        path: path_s.clone(),
                        name: rule.name.to_string(),
                        kind: "complete documents",
                    }),
                }
            })?;
        }
        self.doc_cache.insert(path.to_vec(), result.clone());
        Ok(result)
    }

    fn partial_set_doc(&mut self, path: &[Value], rules: &[Rc<Rule>]) -> Result<Option<Value>> {
        if let Some(hit) = self.doc_cache.get(path) {
            return Ok(hit.clone());
        }
        let mut out: BTreeSet<Term> = BTreeSet::new();
        for rule in rules {
            let key_term = match &rule.key {
                Some(k) => k.clone(),
                None => bail!("internal error: partial set rule without key"),
            };
            self.eval_rule(rule, &[], &mut |i, _caller| {
                let k = i.bindings.plug(&key_term.value);
                if k.is_ground() {
                    out.insert(k.into());
                }
                Ok(())
            })?;
        }
        let result = Some(Value::Set(Rc::new(out)));
        self.doc_cache.insert(path.to_vec(), result.clone());
        Ok(result)
    }

    fn partial_object_doc(&mut self, path: &[Value], rules: &[Rc<Rule>]) -> Result<Option<Value>> {
        if let Some(hit) = self.doc_cache.get(path) {
            return Ok(hit.clone());
        }
        let path_s = path_str(path);
        let mut out: BTreeMap<Term, Term> = BTreeMap::new();
        for rule in rules {
            let (key_term, value_term) = match (&rule.key, &rule.value) {
                (Some(k), Some(v)) => (k.clone(), v.clone()),
                _ => bail!("internal error: partial object rule without key/value"),
            };
            self.eval_rule(rule, &[], &mut |i, _caller| {
                let k = i.bindings.plug(&key_term.value);
                let v = i.bindings.plug(&value_term.value);
                if !k.is_ground() || !v.is_ground() {
                    return Ok(());
                }
                if !matches!(k, Value::String(_)) {
                    bail!(EvalError::IllegalObjectKey {
                        rule: rule.name.to_string(),
                        key: format!("{k}"),
                    });
                }
                match out.get(&Term::from(k.clone())) {
                    Some(prev) if prev.value != v => bail!(EvalError::Conflict {
                        path: path_s.clone(),
                        name: rule.name.to_string(),
                        kind: "object document keys",
                    }),
                    _ => {
                        out.insert(k.into(), v.into());
                        Ok(())
                    }
                }
            })?;
        }
        let result = Some(Value::Object(Rc::new(out)));
        self.doc_cache.insert(path.to_vec(), result.clone());
        Ok(result)
    }

    fn eval_partial_set(
        &mut self,
        path: &[Value],
        rules: &[Rc<Rule>],
        orig: &Value,
        items: &[Term],
        at: usize,
        iter: &mut Iter<'_, 'a>,
    ) -> Result<()> {
        let suffix_len = items.len() - at;
        if suffix_len == 0 {
            return match self.partial_set_doc(path, rules)? {
                Some(v) => self.finish_ref(orig, v, iter),
                None => Ok(()),
            };
        }
        let key_term = items[at].clone();
        let key = self.bindings.plug(&key_term.value);
        let name = rules[0].name.clone();
        let deref_error = move || {
            EvalError::Type(format!(
                "{name} is a set but the reference attempts to dereference lookup result"
            ))
        };
        if key.is_ground() {
            // membership: one success suffices
            let mut found = false;
            for rule in rules {
                if found {
                    break;
                }
                let rule_key = match &rule.key {
                    Some(k) => k.clone(),
                    None => bail!("internal error: partial set rule without key"),
                };
                let seed = [(rule_key, key.clone())];
                self.eval_rule(rule, &seed, &mut |i, caller| {
                    if found {
                        return Ok(());
                    }
                    if suffix_len > 1 {
                        bail!(deref_error());
                    }
                    found = true;
                    std::mem::swap(&mut i.bindings, caller);
                    let r = i.finish_ref(orig, Value::Bool(true), iter);
                    std::mem::swap(&mut i.bindings, caller);
                    r
                })?;
            }
            Ok(())
        } else {
            // enumerate the whole set, unifying each member with the key
            let set = match self.partial_set_doc(path, rules)? {
                Some(v) => v,
                None => return Ok(()),
            };
            let elems = set.as_set()?.clone();
            for t in elems.iter() {
                self.unify_values(key_term.value.clone(), t.value.clone(), &mut |i| {
                    if suffix_len > 1 {
                        bail!(deref_error());
                    }
                    i.finish_ref(orig, Value::Bool(true), iter)
                })?;
            }
            Ok(())
        }
    }

    fn eval_partial_object(
        &mut self,
        path: &[Value],
        rules: &[Rc<Rule>],
        orig: &Value,
        items: &[Term],
        at: usize,
        iter: &mut Iter<'_, 'a>,
    ) -> Result<()> {
        let suffix_len = items.len() - at;
        if suffix_len == 0 {
            return match self.partial_object_doc(path, rules)? {
                Some(v) => self.finish_ref(orig, v, iter),
                None => Ok(()),
            };
        }
        let key_term = items[at].clone();
        let key = self.bindings.plug(&key_term.value);
        if key.is_ground() {
            let cache_key = (path.to_vec(), key.clone());
            let value = match self.keyed_cache.get(&cache_key) {
                Some(hit) => hit.clone(),
                None => {
                    let computed = self.partial_object_lookup(path, rules, &key)?;
                    self.keyed_cache.insert(cache_key, computed.clone());
                    computed
                }
            };
            match value {
                Some(v) => self.eval_ref_in_value(orig, v, items, at + 1, iter),
                None => Ok(()),
            }
        } else {
            let obj = match self.partial_object_doc(path, rules)? {
                Some(v) => v,
                None => return Ok(()),
            };
            let fields = obj.as_object()?.clone();
            for (k, v) in fields.iter() {
                let value = v.value.clone();
                self.unify_values(key_term.value.clone(), k.value.clone(), &mut |i| {
                    i.eval_ref_in_value(orig, value.clone(), items, at + 1, iter)
                })?;
            }
            Ok(())
        }
    }

    /// Value bound to one ground key of a partial object: rules evaluate
    /// with the key seeded into the child context, and every rule must
    /// agree on the value.
    fn partial_object_lookup(
        &mut self,
        path: &[Value],
        rules: &[Rc<Rule>],
        key: &Value,
    ) -> Result<Option<Value>> {
        let path_s = path_str(path);
        let mut result: Option<Value> = None;
        for rule in rules {
            let (rule_key, rule_value) = match (&rule.key, &rule.value) {
                (Some(k), Some(v)) => (k.clone(), v.clone()),
                _ => bail!("internal error: partial object rule without key/value"),
            };
            let seed = [(rule_key, key.clone())];
            self.eval_rule(rule, &seed, &mut |i, _caller| {
                if !matches!(key, Value::String(_)) {
                    bail!(EvalError::IllegalObjectKey {
                        rule: rule.name.to_string(),
                        key: format!("{key}"),
                    });
                }
                let v = i.bindings.plug(&rule_value.value);
                if !v.is_ground() {
                    return Ok(());
                }
                match &result {
                    None => {
                        result = Some(v);
                        Ok(())
                    }
                    Some(prev) if *prev == v => Ok(()),
                    Some(_) => bail!(EvalError::Conflict {
                        path: path_s.clone(),
                        name: rule.name.to_string(),
                        kind: "object document keys",
                    }),
                }
            })?;
        }
        Ok(result)
    }

    /// Evaluate one rule in a child context with fresh bindings. `seed`
    /// unifies rule-head terms against ground values before the body runs;
    /// `sol` fires per solution with the child bindings active and receives
    /// the suspended caller bindings.
    fn eval_rule(
        &mut self,
        rule: &Rc<Rule>,
        seed: &[(Term, Value)],
        sol: &mut dyn FnMut(&mut Interpreter<'a>, &mut Bindings) -> Result<()>,
    ) -> Result<()> {
        self.check_cancel()?;
        let mut caller = std::mem::take(&mut self.bindings);
        // Rule bodies run under fresh bindings, but the request document is
        // part of the evaluation context: re-seed its roots so references
        // through `request` keep resolving inside the child.
        for root in ["request", "$request"] {
            let doc = caller.plug(&Value::var(root));
            if !matches!(doc, Value::Var(_)) {
                self.bindings.bind(Value::var(root), doc);
            }
        }
        let saved_body = std::mem::replace(&mut self.body, rule.body.clone());
        let saved_index = self.index;
        let saved_qid = self.qid;
        let saved_parent = self.parent_qid;
        self.index = 0;
        self.qid_counter += 1;
        self.parent_qid = saved_qid;
        self.qid = self.qid_counter;
        self.trace(Op::Enter, NodeKind::Rule, Node::Rule(rule.clone()));

        // refs and comprehensions in the head resolve per body solution
        let mut head_resolvables = vec![];
        if let Some(k) = &rule.key {
            collect_resolvables(&k.value, &mut head_resolvables);
        }
        if let Some(v) = &rule.value {
            collect_resolvables(&v.value, &mut head_resolvables);
        }

        let result = self.apply_seed(seed, 0, &mut |i| {
            i.eval(&mut |i2| {
                i2.eval_resolvables(&head_resolvables, 0, &mut |i3| {
                    i3.trace(Op::Exit, NodeKind::Rule, Node::Rule(rule.clone()));
                    let r = sol(i3, &mut caller);
                    if r.is_ok() {
                        i3.trace(Op::Redo, NodeKind::Rule, Node::Rule(rule.clone()));
                    }
                    r
                })
            })
        });

        self.body = saved_body;
        self.index = saved_index;
        self.qid = saved_qid;
        self.parent_qid = saved_parent;
        self.bindings = caller;
        result
    }

    fn apply_seed(
        &mut self,
        seed: &[(Term, Value)],
        at: usize,
        then: &mut Iter<'_, 'a>,
    ) -> Result<()> {
        let (term, ground) = match seed.get(at) {
            Some(s) => s.clone(),
            None => return then(self),
        };
        self.unify_values(term.value, ground, &mut |i| i.apply_seed(seed, at + 1, then))
    }

    // ------------------------------------------------------------------
    // Closures
    // ------------------------------------------------------------------

    /// Evaluate a nested body against the current bindings in a child
    /// query context.
    fn eval_closure(&mut self, body: &Body, iter: &mut Iter<'_, 'a>) -> Result<()> {
        let saved_body = std::mem::replace(&mut self.body, body.clone());
        let saved_index = self.index;
        let saved_qid = self.qid;
        let saved_parent = self.parent_qid;
        self.index = 0;
        self.qid_counter += 1;
        self.parent_qid = saved_qid;
        self.qid = self.qid_counter;
        let node = body.clone();
        self.trace(Op::Enter, NodeKind::Body, Node::Body(node.clone()));
        let result = self.eval(&mut |i| {
            i.trace(Op::Exit, NodeKind::Body, Node::Body(node.clone()));
            let r = iter(i);
            if r.is_ok() {
                i.trace(Op::Redo, NodeKind::Body, Node::Body(node.clone()));
            }
            r
        });
        self.body = saved_body;
        self.index = saved_index;
        self.qid = saved_qid;
        self.parent_qid = saved_parent;
        result
    }

    /// Evaluate an array comprehension to a ground array: one plugged head
    /// per solution of the body, in solution order.
    fn eval_array_comprehension(&mut self, compr: &ArrayCompr) -> Result<Value> {
        let head = compr.head.clone();
        let mut head_resolvables = vec![];
        collect_resolvables(&head.value, &mut head_resolvables);
        let mut out: Vec<Term> = vec![];
        self.eval_closure(&compr.body, &mut |i| {
            i.eval_resolvables(&head_resolvables, 0, &mut |i2| {
                let v = i2.bindings.plug(&head.value);
                if v.is_ground() {
                    out.push(Term::new(v, head.location));
                }
                Ok(())
            })
        })?;
        Ok(Value::Array(Rc::new(out)))
    }
}

/// Collect the references and comprehensions occurring in a term, without
/// descending into them; nested references resolve during reference
/// evaluation and closures evaluate on their own.
fn collect_resolvables(v: &Value, out: &mut Vec<Value>) {
    v.walk(&Default::default(), &mut |sub| match sub {
        Value::Ref(_) | Value::ArrayCompr(_) => {
            out.push(sub.clone());
            false
        }
        _ => true,
    });
}

fn node_vars(node: &Node) -> BTreeSet<Rc<str>> {
    let mut out = BTreeSet::new();
    match node {
        Node::Expr(e) => out = e.vars(),
        Node::Body(b) => {
            for e in b.iter() {
                out.append(&mut e.vars());
            }
        }
        Node::Rule(r) => {
            if let Some(k) = &r.key {
                out.append(&mut k.value.vars());
            }
            if let Some(v) = &r.value {
                out.append(&mut v.value.vars());
            }
            for e in r.body.iter() {
                out.append(&mut e.vars());
            }
        }
    }
    out
}

fn path_str(path: &[Value]) -> String {
    let mut out = String::new();
    for (i, v) in path.iter().enumerate() {
        if i > 0 {
            out.push('.');
        }
        match v {
            Value::String(s) => out.push_str(s),
            other => out.push_str(&format!("{other}")),
        }
    }
    out
}
