//! Field dependency graph for one aggregate widget.
//!
//! Nodes live in an arena indexed by declaration order; edges point from a
//! field to the fields it reads through `result.*` (or the `stats.*` alias).

use crate::widgets::expr::{ExpressionMode, security};
use crate::widgets::fields::{FieldOp, FieldSpec};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

static RESULT_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\w$.])(?:result|stats)\.([A-Za-z_$][\w$]*)").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Aggregated once over all items
    Collection,
    /// Evaluated once per item
    Item,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    names: Vec<String>,
    index: HashMap<String, usize>,
    deps: Vec<BTreeSet<usize>>,
    scopes: Vec<Scope>,
}

impl DependencyGraph {
    pub fn build(specs: &[FieldSpec]) -> Self {
        let names: Vec<String> = specs.iter().map(|s| s.name.clone()).collect();
        let index: HashMap<String, usize> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        let mut deps = Vec::with_capacity(specs.len());
        let mut scopes = Vec::with_capacity(specs.len());
        for spec in specs {
            let edges: BTreeSet<usize> = field_dependencies(spec)
                .iter()
                .filter_map(|name| index.get(name).copied())
                .collect();
            deps.push(edges);
            scopes.push(if spec.is_aggregate() { Scope::Collection } else { Scope::Item });
        }

        Self {
            names,
            index,
            deps,
            scopes,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, node: usize) -> &str {
        &self.names[node]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn dependencies(&self, node: usize) -> &BTreeSet<usize> {
        &self.deps[node]
    }

    pub fn scope(&self, node: usize) -> Scope {
        self.scopes[node]
    }

    /// Dependency names of a field, in declaration order
    pub fn dependency_names(&self, name: &str) -> Vec<&str> {
        self.index_of(name)
            .map(|i| self.deps[i].iter().map(|&d| self.name(d)).collect())
            .unwrap_or_default()
    }
}

/// Every field name a spec reads, before filtering to known fields
pub fn field_dependencies(spec: &FieldSpec) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for op in &spec.ops {
        let names = match op {
            FieldOp::Expr(source) => expression_dependencies(source),
            other => other
                .path()
                .and_then(|p| p.dependency())
                .map(|d| vec![d.to_string()])
                .unwrap_or_default(),
        };
        for name in names {
            if !found.contains(&name) {
                found.push(name);
            }
        }
    }
    found
}

/// `result.x` / `stats.x` references in an expression. Text that fails the
/// security pass has no dependencies; evaluation reports the real error.
pub fn expression_dependencies(source: &str) -> Vec<String> {
    let mode = ExpressionMode::detect(source);
    if security::validate_expression(source.trim(), mode).is_err() {
        return Vec::new();
    }

    let mut names: Vec<String> = Vec::new();
    for caps in RESULT_REF_RE.captures_iter(source) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}
