// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::value::{Location, Term};

use std::collections::BTreeSet;
use std::rc::Rc;

use serde::Serialize;

/// A compiled body: expressions evaluated left to right, all of which must
/// succeed for the body to succeed. Shared so that nested evaluation
/// contexts can be stacked cheaply.
pub type Body = Rc<Vec<Expr>>;

/// Build a body from expressions, assigning each its position index.
pub fn new_body(mut exprs: Vec<Expr>) -> Body {
    for (i, e) in exprs.iter_mut().enumerate() {
        e.index = i;
    }
    Rc::new(exprs)
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ExprKind {
    /// A bare term; succeeds when the term is defined and not `false`.
    Term(Term),

    /// An operator applied to argument terms. Equality is the `eq`
    /// operator; everything else resolves through the builtin registry.
    Call { operator: Rc<str>, args: Vec<Term> },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub negated: bool,
    pub index: usize,
    #[serde(skip)]
    pub location: Location,
}

impl Expr {
    pub fn term(t: Term) -> Expr {
        Expr {
            kind: ExprKind::Term(t),
            negated: false,
            index: 0,
            location: Location::default(),
        }
    }

    pub fn call(operator: &str, args: Vec<Term>) -> Expr {
        Expr {
            kind: ExprKind::Call {
                operator: operator.into(),
                args,
            },
            negated: false,
            index: 0,
            location: Location::default(),
        }
    }

    pub fn eq(a: Term, b: Term) -> Expr {
        Expr::call("eq", vec![a, b])
    }

    pub fn negate(mut self) -> Expr {
        self.negated = true;
        self
    }

    /// Visit each argument term of the expression. Operator names are not
    /// terms and are never visited.
    pub fn each_term(&self, f: &mut dyn FnMut(&Term)) {
        match &self.kind {
            ExprKind::Term(t) => f(t),
            ExprKind::Call { args, .. } => {
                for t in args {
                    f(t);
                }
            }
        }
    }

    /// The variables this expression reads or binds: ref heads and closure
    /// locals excluded.
    pub fn vars(&self) -> BTreeSet<Rc<str>> {
        let mut out = BTreeSet::new();
        self.each_term(&mut |t| {
            out.append(&mut t.value.vars());
        });
        out
    }
}

/// How a rule contributes to the document tree, derived from the shape of
/// its head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum DocKind {
    /// No key: the rule defines a single value and every definition must
    /// agree on it.
    Complete,
    /// Key but no value: the rule contributes keys to a set.
    PartialSet,
    /// Key and value: the rule contributes entries to an object.
    PartialObject,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Rule {
    pub name: Rc<str>,
    pub key: Option<Term>,
    pub value: Option<Term>,
    pub body: Body,
    #[serde(skip)]
    pub location: Location,
}

impl Rule {
    pub fn new(name: &str, key: Option<Term>, value: Option<Term>, body: Body) -> Rule {
        Rule {
            name: name.into(),
            key,
            value,
            body,
            location: Location::default(),
        }
    }

    pub fn doc_kind(&self) -> DocKind {
        match (&self.key, &self.value) {
            (None, _) => DocKind::Complete,
            (Some(_), None) => DocKind::PartialSet,
            (Some(_), Some(_)) => DocKind::PartialObject,
        }
    }
}

/// An import carried through from the surface language. Bodies arrive with
/// imports already resolved, so the evaluator never consults these; they
/// are kept so a module round-trips faithfully.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Import {
    pub path: Term,
    pub alias: Option<Rc<str>>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Module {
    pub package: Vec<Rc<str>>,
    pub imports: Vec<Import>,
    pub rules: Vec<Rc<Rule>>,
}

impl Module {
    pub fn new(package: &[&str], rules: Vec<Rule>) -> Module {
        Module {
            package: package.iter().map(|s| (*s).into()).collect(),
            imports: vec![],
            rules: rules.into_iter().map(Rc::new).collect(),
        }
    }
}
