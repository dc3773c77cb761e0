// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::{Body, Expr, Rule};
use crate::value::Value;

use std::rc::Rc;

use serde::Serialize;

/// What the evaluator was doing when an event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Op {
    /// About to evaluate a body or rule.
    Enter,
    /// A body or rule produced a solution.
    Exit,
    /// About to evaluate an expression.
    Eval,
    /// An expression produced no solution (for a negated expression: the
    /// inner body produced one).
    Fail,
    /// Re-entered a body, rule or expression to seek the next solution.
    Redo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Expr,
    Rule,
    Body,
}

/// The AST element an event refers to.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Node {
    Expr(Expr),
    Rule(Rc<Rule>),
    Body(Body),
}

#[derive(Debug, Clone, Serialize)]
pub struct Local {
    #[serde(rename = "Key")]
    pub key: Value,
    #[serde(rename = "Value")]
    pub value: Value,
}

/// One step of the evaluation, stitched into a call tree by query id and
/// parent id. Events of one query are totally ordered; across queries only
/// the parent/child relationship is guaranteed.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "Op")]
    pub op: Op,
    #[serde(rename = "QueryID")]
    pub query_id: u64,
    #[serde(rename = "ParentID")]
    pub parent_id: u64,
    #[serde(rename = "Type")]
    pub kind: NodeKind,
    #[serde(rename = "Node")]
    pub node: Node,
    /// The node's variables that are bound at emission time, plugged.
    #[serde(rename = "Locals")]
    pub locals: Vec<Local>,
}

/// Receives every evaluation step of a query.
pub trait Tracer {
    /// Cheap pre-check; when false, events are not even constructed.
    fn enabled(&self) -> bool {
        true
    }

    fn trace_event(&mut self, event: Event);
}

/// A tracer that buffers all events for later inspection.
#[derive(Debug, Default)]
pub struct BufferTracer {
    pub events: Vec<Event>,
}

impl BufferTracer {
    pub fn new() -> BufferTracer {
        BufferTracer::default()
    }
}

impl Tracer for BufferTracer {
    fn trace_event(&mut self, event: Event) {
        self.events.push(event);
    }
}
