// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::value::{Value, WalkParams};

use core::fmt;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::{bail, Result};
use log::debug;

/// Handle for a read snapshot. Opened by the caller before a query and held
/// read-only for the query's duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    id: u64,
}

impl Transaction {
    pub fn new(id: u64) -> Transaction {
        Transaction { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A source of base documents. Paths are ordered sequences of string keys;
/// reads return JSON-shaped ground values lifted into the term algebra.
pub trait Store: fmt::Debug {
    fn begin(&self) -> Result<Transaction>;
    fn read(&self, txn: &Transaction, path: &[&str]) -> Result<Option<Value>>;
    fn close(&self, txn: Transaction);
}

/// In-memory store over a ground JSON object.
#[derive(Debug)]
pub struct MemStore {
    data: Value,
    next_txn: Cell<u64>,
}

impl MemStore {
    pub fn new(data: Value) -> Result<MemStore> {
        match &data {
            Value::Object(_) if data.is_ground() => Ok(MemStore {
                data,
                next_txn: Cell::new(1),
            }),
            _ => bail!("store data must be a ground object"),
        }
    }

    pub fn from_json_str(json: &str) -> Result<MemStore> {
        MemStore::new(Value::from_json_str(json)?)
    }
}

impl Store for MemStore {
    fn begin(&self) -> Result<Transaction> {
        let id = self.next_txn.get();
        self.next_txn.set(id + 1);
        Ok(Transaction { id })
    }

    fn read(&self, _txn: &Transaction, path: &[&str]) -> Result<Option<Value>> {
        let mut cur = &self.data;
        for seg in path {
            match cur {
                Value::Object(fields) => {
                    match fields.get(&Value::String((*seg).into()).into()) {
                        Some(t) => cur = &t.value,
                        None => return Ok(None),
                    }
                }
                _ => return Ok(None),
            }
        }
        Ok(Some(cur.clone()))
    }

    fn close(&self, _txn: Transaction) {}
}

/// The layered storage the evaluator reads through: a builtin store plus
/// stores mounted at fixed path prefixes. A read resolves to the store with
/// the longest matching mount prefix.
#[derive(Debug)]
pub struct Storage {
    builtin: Box<dyn Store>,
    mounts: Vec<(Vec<String>, Box<dyn Store>)>,
}

impl Storage {
    pub fn new(builtin: Box<dyn Store>) -> Storage {
        Storage {
            builtin,
            mounts: vec![],
        }
    }

    pub fn from_json_str(json: &str) -> Result<Storage> {
        Ok(Storage::new(Box::new(MemStore::from_json_str(json)?)))
    }

    /// Mount `store` under `path`. Reads at or below the path route to the
    /// mounted store with the prefix stripped.
    pub fn mount(&mut self, store: Box<dyn Store>, path: &[&str]) -> Result<()> {
        if path.is_empty() {
            bail!("mount path must not be empty");
        }
        for (existing, _) in &self.mounts {
            let overlap = existing
                .iter()
                .zip(path.iter())
                .all(|(a, b)| a.as_str() == *b);
            if overlap {
                bail!("mount path overlaps existing mount at /{}", existing.join("/"));
            }
        }
        self.mounts
            .push((path.iter().map(|s| s.to_string()).collect(), store));
        Ok(())
    }

    pub fn begin(&self) -> Result<Transaction> {
        self.builtin.begin()
    }

    pub fn close(&self, txn: Transaction) {
        self.builtin.close(txn);
    }

    pub fn read(&self, txn: &Transaction, path: &[&str]) -> Result<Option<Value>> {
        let mut best: Option<&(Vec<String>, Box<dyn Store>)> = None;
        for mount in &self.mounts {
            if mount.0.len() <= path.len()
                && mount.0.iter().zip(path.iter()).all(|(a, b)| a.as_str() == *b)
            {
                match best {
                    Some(b) if b.0.len() >= mount.0.len() => (),
                    _ => best = Some(mount),
                }
            }
        }
        match best {
            Some((prefix, store)) => store.read(txn, &path[prefix.len()..]),
            None => self.builtin.read(txn, path),
        }
    }
}

/// An index over one reference shape into base documents, mapping each
/// reachable leaf value to the variable bindings that reach it. Built
/// lazily, consulted when an equality pairs the indexed reference with a
/// ground value; never built over paths that cross virtual documents.
#[derive(Debug, Default)]
pub struct TermIndex {
    map: BTreeMap<Value, Vec<Vec<(Rc<str>, Value)>>>,
}

impl TermIndex {
    pub fn build(storage: &Storage, txn: &Transaction, pattern: &Value) -> Result<TermIndex> {
        let items = pattern.as_ref_items()?.clone();
        let mut index = TermIndex::default();
        let root = match storage.read(txn, &[])? {
            Some(v) => v,
            None => return Ok(index),
        };
        let elems: Vec<Value> = items.iter().skip(1).map(|t| t.value.clone()).collect();
        let mut bound: Vec<(Rc<str>, Value)> = vec![];
        Self::descend(&root, &elems, &mut bound, &mut index.map);
        debug!(
            "built index for {} with {} distinct values",
            pattern,
            index.map.len()
        );
        Ok(index)
    }

    fn descend(
        cur: &Value,
        elems: &[Value],
        bound: &mut Vec<(Rc<str>, Value)>,
        map: &mut BTreeMap<Value, Vec<Vec<(Rc<str>, Value)>>>,
    ) {
        let elem = match elems.first() {
            Some(e) => e,
            None => {
                map.entry(cur.clone()).or_default().push(bound.clone());
                return;
            }
        };
        match elem {
            Value::Var(name) => {
                if let Some((_, v)) = bound.iter().find(|(n, _)| n == name) {
                    // repeated variable: it must take the same value
                    let v = v.clone();
                    if let Some(next) = cur.index_with(&v) {
                        Self::descend(&next, &elems[1..], bound, map);
                    }
                    return;
                }
                let keys: Vec<Value> = match cur {
                    Value::Object(fields) => fields.keys().map(|k| k.value.clone()).collect(),
                    Value::Array(items) => (0..items.len()).map(Value::from).collect(),
                    _ => return,
                };
                for k in keys {
                    if let Some(next) = cur.index_with(&k) {
                        bound.push((name.clone(), k));
                        Self::descend(&next, &elems[1..], bound, map);
                        bound.pop();
                    }
                }
            }
            v if v.is_ground() => {
                if let Some(next) = cur.index_with(v) {
                    Self::descend(&next, &elems[1..], bound, map);
                }
            }
            _ => (),
        }
    }

    pub fn lookup(&self, value: &Value) -> Option<&Vec<Vec<(Rc<str>, Value)>>> {
        self.map.get(value)
    }

    /// The variables an indexed pattern binds, in pattern order.
    pub fn pattern_vars(pattern: &Value) -> Vec<Rc<str>> {
        let mut out = vec![];
        pattern.walk(
            &WalkParams {
                skip_ref_head: true,
                ..WalkParams::default()
            },
            &mut |v| {
                if let Value::Var(name) = v {
                    if !out.contains(name) {
                        out.push(name.clone());
                    }
                }
                true
            },
        );
        out
    }
}
