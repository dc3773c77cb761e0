// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::{Module, Rule};
use crate::value::Value;

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use anyhow::{bail, Result};

/// One node of the rule tree. A node can carry rules (a rule path ends
/// here) and children (packages or deeper rules) at the same time; base
/// and virtual documents straddle freely.
#[derive(Debug, Default)]
pub struct RuleTreeNode {
    rules: Vec<Rc<Rule>>,
    children: BTreeMap<Rc<str>, RuleTreeNode>,
}

impl RuleTreeNode {
    pub fn rules(&self) -> &[Rc<Rule>] {
        &self.rules
    }

    pub fn children(&self) -> impl Iterator<Item = (&Rc<str>, &RuleTreeNode)> {
        self.children.iter()
    }

    fn collect(&self, out: &mut Vec<Rc<Rule>>) {
        out.extend(self.rules.iter().cloned());
        for child in self.children.values() {
            child.collect(out);
        }
    }
}

/// The compiler handle the evaluator consumes: modules whose bodies are
/// already name-resolved and safety-checked, indexed into a tree over
/// `data`-relative paths.
///
/// Parsing surface syntax into modules happens elsewhere; this type starts
/// from programmatically constructed [`Module`] values.
#[derive(Debug, Default)]
pub struct Compiler {
    modules: Vec<Module>,
    root: RuleTreeNode,
    indexed: BTreeSet<Value>,
}

impl Compiler {
    pub fn new(modules: Vec<Module>) -> Result<Compiler> {
        let mut root = RuleTreeNode::default();
        for module in &modules {
            for rule in &module.rules {
                let mut node = &mut root;
                for seg in &module.package {
                    node = node.children.entry(seg.clone()).or_default();
                }
                let node = node.children.entry(rule.name.clone()).or_default();
                if let Some(first) = node.rules.first() {
                    if first.doc_kind() != rule.doc_kind() {
                        bail!(
                            "conflicting rule kinds for `{}`: {:?} and {:?}",
                            rule.name,
                            first.doc_kind(),
                            rule.doc_kind()
                        );
                    }
                }
                node.rules.push(rule.clone());
            }
        }
        Ok(Compiler {
            modules,
            root,
            indexed: BTreeSet::new(),
        })
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    fn node_at(&self, path: &[Value]) -> Option<&RuleTreeNode> {
        let mut node = &self.root;
        for seg in path {
            let name = match seg {
                Value::String(s) => s,
                _ => return None,
            };
            node = node.children.get(name)?;
        }
        Some(node)
    }

    /// The rules whose path is exactly `path` (relative to `data`), or
    /// `None` when no rule ends there.
    pub fn get_rules_exact(&self, path: &[Value]) -> Option<&[Rc<Rule>]> {
        match self.node_at(path) {
            Some(node) if !node.rules.is_empty() => Some(&node.rules),
            _ => None,
        }
    }

    /// Every rule contributing to the virtual document rooted at `path`.
    pub fn get_rules_for_virtual_document(&self, path: &[Value]) -> Vec<Rc<Rule>> {
        let mut out = vec![];
        if let Some(node) = self.node_at(path) {
            node.collect(&mut out);
        }
        out
    }

    /// The names of virtual children directly below `path`, in tree order.
    /// The reference evaluator unions these with base-document keys when an
    /// unbound variable enumerates a position.
    pub fn children_at(&self, path: &[Value]) -> Vec<Rc<str>> {
        match self.node_at(path) {
            Some(node) => node.children.keys().cloned().collect(),
            None => vec![],
        }
    }

    pub fn subtree(&self, path: &[Value]) -> Option<&RuleTreeNode> {
        self.node_at(path)
    }

    /// Register a reference shape for index-assisted equality. The shape
    /// must be rooted at `data` and its path must not cross any virtual
    /// document, otherwise index consultation could observe a different
    /// tree than evaluation does.
    pub fn register_index(&mut self, pattern: Value) -> Result<()> {
        let items = pattern.as_ref_items()?.clone();
        match items.first().map(|t| &t.value) {
            Some(Value::Var(head)) if head.as_ref() == "data" => (),
            _ => bail!("only data references can be indexed"),
        }
        let mut path: Vec<Value> = vec![];
        for t in items.iter().skip(1) {
            match &t.value {
                Value::String(_) => path.push(t.value.clone()),
                _ => break,
            }
            if !self.get_rules_for_virtual_document(&path).is_empty() {
                bail!("cannot index `{pattern}`: path crosses a virtual document");
            }
        }
        self.indexed.insert(pattern);
        Ok(())
    }

    pub fn is_indexed(&self, pattern: &Value) -> bool {
        self.indexed.contains(pattern)
    }
}
