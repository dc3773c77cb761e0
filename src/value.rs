// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::Body;
use crate::number::Number;

use core::fmt;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// Position of a term in its source module. Carried for error reporting
/// only; it never participates in equality or ordering.
#[derive(Debug, Clone, Copy, Default, Serialize, Eq, PartialEq, Ord, PartialOrd)]
pub struct Location {
    pub row: u32,
    pub col: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.row, self.col)
    }
}

/// An array comprehension: the head term is collected once per solution of
/// the body.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArrayCompr {
    pub head: Term,
    pub body: Body,
}

// We cannot use serde_json::Value because the engine has set, var, ref and
// comprehension terms, and object keys can be arbitrary terms.
// BTree containers keep every composite in canonical term order, so
// structural equality, the total order and set uniqueness all fall out of
// the representation.
//
// The variant declaration order defines the total order over values.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(Rc<str>),

    // Nonground terms resolved during evaluation.
    Var(Rc<str>),
    Ref(Rc<Vec<Term>>),

    Array(Rc<Vec<Term>>),
    Object(Rc<BTreeMap<Term, Term>>),
    Set(Rc<BTreeSet<Term>>),

    ArrayCompr(Rc<ArrayCompr>),
}

/// A [`Value`] together with its source location.
#[derive(Debug, Clone)]
pub struct Term {
    pub value: Value,
    pub location: Location,
}

impl Term {
    pub fn new(value: Value, location: Location) -> Term {
        Term { value, location }
    }
}

impl From<Value> for Term {
    fn from(value: Value) -> Self {
        Term {
            value,
            location: Location::default(),
        }
    }
}

// Location is metadata; terms compare and order by value alone.
impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for Term {}

impl PartialOrd for Term {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Term {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl Serialize for Term {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.value.serialize(serializer)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.value, f)
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::Error;
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => n.serialize(serializer),
            Value::String(s) => serializer.serialize_str(s.as_ref()),
            Value::Array(a) => a.serialize(serializer),
            Value::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (k, v) in fields.iter() {
                    match &k.value {
                        Value::String(_) => map.serialize_entry(k, v)?,
                        _ => {
                            let key_str = serde_json::to_string(k).map_err(Error::custom)?;
                            map.serialize_entry(&key_str, v)?
                        }
                    }
                }
                map.end()
            }

            // display set as an array
            Value::Set(s) => s.serialize(serializer),

            // nonground variants appear only in serialized AST nodes
            // (trace events), never in query results
            Value::Var(name) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("var", name.as_ref())?;
                map.end()
            }
            Value::Ref(items) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("ref", items.as_ref())?;
                map.end()
            }
            Value::ArrayCompr(c) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("array-comprehension", &(&c.head, c.body.as_ref()))?;
                map.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a json value")
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::Null)
    }

    fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::Bool(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::from(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::from(v))
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::from(Number::from(v)))
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::String(s.to_string().into()))
    }

    fn visit_string<E>(self, s: String) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::String(s.into()))
    }

    fn visit_seq<V>(self, mut visitor: V) -> Result<Self::Value, V::Error>
    where
        V: SeqAccess<'de>,
    {
        let mut arr: Vec<Term> = vec![];
        while let Some(v) = visitor.next_element::<Value>()? {
            arr.push(v.into());
        }
        Ok(Value::Array(Rc::new(arr)))
    }

    fn visit_map<V>(self, mut visitor: V) -> Result<Self::Value, V::Error>
    where
        V: MapAccess<'de>,
    {
        if let Some((key, value)) = visitor.next_entry::<Value, Value>()? {
            if let (Value::String(k), Value::String(v)) = (&key, &value) {
                if k.as_ref() == "$serde_json::private::Number" {
                    match Number::from_str(v) {
                        Ok(n) => return Ok(Value::from(n)),
                        _ => return Err(de::Error::custom("failed to read big number")),
                    }
                }
            }
            let mut map = BTreeMap::new();
            map.insert(key.into(), value.into());
            while let Some((key, value)) = visitor.next_entry::<Value, Value>()? {
                map.insert(key.into(), value.into());
            }
            Ok(Value::Object(Rc::new(map)))
        } else {
            Ok(Value::new_object())
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => write!(f, "{s}"),
            Err(_e) => Err(std::fmt::Error),
        }
    }
}

impl Value {
    pub fn new_object() -> Value {
        Value::Object(Rc::new(BTreeMap::new()))
    }

    pub fn new_set() -> Value {
        Value::Set(Rc::new(BTreeSet::new()))
    }

    pub fn new_array() -> Value {
        Value::Array(Rc::new(vec![]))
    }

    pub fn var(name: &str) -> Value {
        Value::Var(name.into())
    }

    pub fn reference(items: Vec<Term>) -> Value {
        Value::Ref(Rc::new(items))
    }

    pub fn from_json_str(json: &str) -> Result<Value> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_str(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(Number::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(Number::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(Number::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(Number::from(n))
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<Vec<Term>> for Value {
    fn from(a: Vec<Term>) -> Self {
        Value::Array(Rc::new(a))
    }
}

impl From<BTreeSet<Term>> for Value {
    fn from(s: BTreeSet<Term>) -> Self {
        Value::Set(Rc::new(s))
    }
}

impl From<BTreeMap<Term, Term>> for Value {
    fn from(m: BTreeMap<Term, Term>) -> Self {
        Value::Object(Rc::new(m))
    }
}

impl Value {
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            _ => Err(anyhow!("not a bool")),
        }
    }

    pub fn as_string(&self) -> Result<&Rc<str>> {
        match self {
            Value::String(s) => Ok(s),
            _ => Err(anyhow!("not a string")),
        }
    }

    pub fn as_number(&self) -> Result<&Number> {
        match self {
            Value::Number(n) => Ok(n),
            _ => Err(anyhow!("not a number")),
        }
    }

    pub fn as_var(&self) -> Result<&Rc<str>> {
        match self {
            Value::Var(v) => Ok(v),
            _ => Err(anyhow!("not a var")),
        }
    }

    pub fn as_ref_items(&self) -> Result<&Rc<Vec<Term>>> {
        match self {
            Value::Ref(r) => Ok(r),
            _ => Err(anyhow!("not a ref")),
        }
    }

    pub fn as_array(&self) -> Result<&Vec<Term>> {
        match self {
            Value::Array(a) => Ok(a),
            _ => Err(anyhow!("not an array")),
        }
    }

    pub fn as_set(&self) -> Result<&BTreeSet<Term>> {
        match self {
            Value::Set(s) => Ok(s),
            _ => Err(anyhow!("not a set")),
        }
    }

    pub fn as_object(&self) -> Result<&BTreeMap<Term, Term>> {
        match self {
            Value::Object(m) => Ok(m),
            _ => Err(anyhow!("not an object")),
        }
    }
}

impl Value {
    /// True when no variable, reference or comprehension occurs anywhere in
    /// the value. Only ground values can be compared for document equality
    /// or returned in query results.
    pub fn is_ground(&self) -> bool {
        match self {
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => true,
            Value::Var(_) | Value::Ref(_) | Value::ArrayCompr(_) => false,
            Value::Array(items) => items.iter().all(|t| t.value.is_ground()),
            Value::Object(fields) => fields
                .iter()
                .all(|(k, v)| k.value.is_ground() && v.value.is_ground()),
            Value::Set(items) => items.iter().all(|t| t.value.is_ground()),
        }
    }

    /// Index one step into a ground value the way a dotted reference does:
    /// objects by key, arrays by integer index with numeric coercion, sets
    /// by membership (which yields `true`). A key of the wrong kind yields
    /// `None`, never an error.
    pub fn index_with(&self, key: &Value) -> Option<Value> {
        match (self, key) {
            (Value::Object(fields), _) => fields
                .get(&Term::from(key.clone()))
                .map(|t| t.value.clone()),
            (Value::Array(items), Value::Number(n)) => match n.as_u64() {
                Some(i) if (i as usize) < items.len() => Some(items[i as usize].value.clone()),
                _ => None,
            },
            (Value::Set(items), _) => {
                if items.contains(&Term::from(key.clone())) {
                    Some(Value::Bool(true))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Merge another document into this one, failing on conflicting keys.
    /// Used when assembling partial-object documents and whole virtual
    /// subtrees.
    pub fn merge(&mut self, new: Value) -> Result<()> {
        if *self == new {
            return Ok(());
        }
        match (self, new) {
            (Value::Set(set), Value::Set(ref mut other)) => {
                Rc::make_mut(set).append(Rc::make_mut(other));
            }
            (Value::Object(fields), Value::Object(other)) => {
                for (k, v) in other.iter() {
                    match fields.get(k) {
                        Some(pv) if pv != v => {
                            bail!(
                                "value for key `{}` generated multiple times: `{}` and `{}`",
                                k.value,
                                pv.value,
                                v.value,
                            )
                        }
                        _ => {
                            Rc::make_mut(fields).insert(k.clone(), v.clone());
                        }
                    }
                }
            }
            _ => bail!("could not merge documents"),
        }
        Ok(())
    }
}

/// Filters for [`Value::walk`] and free-variable collection. Each flag
/// prunes a class of sub-terms that the caller does not consider part of
/// the term proper.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkParams {
    /// Do not visit the head of references (`data` in `data.a[i]`).
    pub skip_ref_head: bool,
    /// Do not visit object keys.
    pub skip_object_keys: bool,
    /// Do not descend into comprehension closures.
    pub skip_closures: bool,
}

impl Value {
    /// Visit this value and, when the visitor returns `true`, its
    /// sub-terms, subject to `params`.
    pub fn walk(&self, params: &WalkParams, f: &mut dyn FnMut(&Value) -> bool) {
        if !f(self) {
            return;
        }
        match self {
            Value::Ref(items) => {
                for (i, t) in items.iter().enumerate() {
                    if i == 0 && params.skip_ref_head {
                        continue;
                    }
                    t.value.walk(params, f);
                }
            }
            Value::Array(items) => {
                for t in items.iter() {
                    t.value.walk(params, f);
                }
            }
            Value::Set(items) => {
                for t in items.iter() {
                    t.value.walk(params, f);
                }
            }
            Value::Object(fields) => {
                for (k, v) in fields.iter() {
                    if !params.skip_object_keys {
                        k.value.walk(params, f);
                    }
                    v.value.walk(params, f);
                }
            }
            Value::ArrayCompr(c) => {
                if !params.skip_closures {
                    c.head.value.walk(params, f);
                    for expr in c.body.iter() {
                        expr.each_term(&mut |t| t.value.walk(params, f));
                    }
                }
            }
            _ => (),
        }
    }

    /// Collect the variables occurring in this value, subject to `params`.
    pub fn vars_with(&self, params: &WalkParams) -> BTreeSet<Rc<str>> {
        let mut vars = BTreeSet::new();
        self.walk(params, &mut |v| {
            if let Value::Var(name) = v {
                vars.insert(name.clone());
            }
            true
        });
        vars
    }

    /// The variables a term contributes to or consumes from the binding
    /// environment: ref heads name documents, not bindings, and closure
    /// variables are local to the closure.
    pub fn vars(&self) -> BTreeSet<Rc<str>> {
        self.vars_with(&WalkParams {
            skip_ref_head: true,
            skip_object_keys: false,
            skip_closures: true,
        })
    }
}
