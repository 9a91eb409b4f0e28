//! Typed field operations.
//!
//! A raw `FieldConfig` carries every operation as an optional key. Here it
//! becomes a `FieldSpec`: the list of operations present, ordered by
//! precedence, so the first entry is the one that produces the value.

use crate::widgets::expr::{Value, ValueMap};
use widget_types::FieldConfig;

/// Where an aggregator reads its per-item value from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPath {
    /// `result.<field>[.rest]`: a value computed earlier in the same widget
    Result { field: String, rest: Vec<String> },
    /// `this.a.b` or bare `a.b`: nested frontmatter
    Item(Vec<String>),
}

impl FieldPath {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix("result.") {
            let mut segments = split_segments(rest);
            if !segments.is_empty() {
                let field = segments.remove(0);
                return FieldPath::Result { field, rest: segments };
            }
        }
        let rest = raw.strip_prefix("this.").unwrap_or(raw);
        FieldPath::Item(split_segments(rest))
    }

    /// Name of the computed field this path reads, if any
    pub fn dependency(&self) -> Option<&str> {
        match self {
            FieldPath::Result { field, .. } => Some(field),
            FieldPath::Item(_) => None,
        }
    }

    /// Resolve against one item's frontmatter and computed values
    pub fn resolve(&self, fields: &ValueMap, item_results: Option<&ValueMap>, results: &ValueMap) -> Value {
        match self {
            FieldPath::Result { field, rest } => {
                let base = item_results
                    .and_then(|m| m.get(field))
                    .or_else(|| results.get(field))
                    .cloned()
                    .unwrap_or(Value::Null);
                walk(base, rest)
            }
            FieldPath::Item(segments) => {
                let Some((first, rest)) = segments.split_first() else {
                    return Value::Null;
                };
                walk(fields.get(first).cloned().unwrap_or(Value::Null), rest)
            }
        }
    }

    /// Resolve a frontmatter path only; `result.` paths read nothing here
    pub fn resolve_item(&self, fields: &ValueMap) -> Value {
        match self {
            FieldPath::Item(_) => self.resolve(fields, None, fields),
            FieldPath::Result { .. } => Value::Null,
        }
    }
}

fn split_segments(path: &str) -> Vec<String> {
    path.split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn walk(mut value: Value, segments: &[String]) -> Value {
    for segment in segments {
        value = value.member(segment);
    }
    value
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Count,
    Sum(FieldPath),
    Avg(FieldPath),
    Min(FieldPath),
    Max(FieldPath),
    Stddev(FieldPath),
    Similarity { reference: String, field: FieldPath },
    Expr(String),
}

impl FieldOp {
    pub fn is_aggregator(&self) -> bool {
        !matches!(self, FieldOp::Expr(_))
    }

    pub fn path(&self) -> Option<&FieldPath> {
        match self {
            FieldOp::Sum(p) | FieldOp::Avg(p) | FieldOp::Min(p) | FieldOp::Max(p) | FieldOp::Stddev(p) => Some(p),
            FieldOp::Similarity { field, .. } => Some(field),
            FieldOp::Count | FieldOp::Expr(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    /// Never empty; `ops[0]` is the primary operation
    pub ops: Vec<FieldOp>,
}

impl FieldSpec {
    pub fn from_config(name: &str, config: &FieldConfig) -> Result<Self, String> {
        let mut ops = Vec::new();
        if config.count == Some(true) {
            ops.push(FieldOp::Count);
        }
        if let Some(path) = &config.sum {
            ops.push(FieldOp::Sum(FieldPath::parse(path)));
        }
        if let Some(path) = &config.avg {
            ops.push(FieldOp::Avg(FieldPath::parse(path)));
        }
        if let Some(path) = &config.min {
            ops.push(FieldOp::Min(FieldPath::parse(path)));
        }
        if let Some(path) = &config.max {
            ops.push(FieldOp::Max(FieldPath::parse(path)));
        }
        if let Some(path) = &config.stddev {
            ops.push(FieldOp::Stddev(FieldPath::parse(path)));
        }
        if let Some(sim) = &config.similarity {
            ops.push(FieldOp::Similarity {
                reference: sim.reference.clone(),
                field: FieldPath::parse(&sim.field),
            });
        }
        if let Some(expr) = &config.expr {
            ops.push(FieldOp::Expr(expr.clone()));
        }

        if ops.is_empty() {
            return Err(format!("field '{}' has no operation", name));
        }
        Ok(Self {
            name: name.to_string(),
            ops,
        })
    }

    pub fn primary(&self) -> &FieldOp {
        &self.ops[0]
    }

    /// Any aggregator key makes the field collection-scoped
    pub fn is_aggregate(&self) -> bool {
        self.ops.iter().any(FieldOp::is_aggregator)
    }

    /// Similarity references this field needs resolved
    pub fn similarity_refs(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().filter_map(|op| match op {
            FieldOp::Similarity { reference, .. } => Some(reference.as_str()),
            _ => None,
        })
    }
}

/// Build specs for every field in declaration order, collecting failures
pub fn build_field_specs(fields: &widget_types::FieldMap) -> Result<Vec<FieldSpec>, Vec<String>> {
    let mut specs = Vec::with_capacity(fields.len());
    let mut errors = Vec::new();
    for (name, config) in fields.iter() {
        match FieldSpec::from_config(name, config) {
            Ok(spec) => specs.push(spec),
            Err(e) => errors.push(e),
        }
    }
    if errors.is_empty() { Ok(specs) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use widget_types::SimilarityRef;

    #[test]
    fn test_parse_paths() {
        assert_eq!(
            FieldPath::parse("result.total.value"),
            FieldPath::Result {
                field: "total".into(),
                rest: vec!["value".into()]
            }
        );
        assert_eq!(FieldPath::parse("this.stats.pages"), FieldPath::Item(vec!["stats".into(), "pages".into()]));
        assert_eq!(FieldPath::parse("rating"), FieldPath::Item(vec!["rating".into()]));
        assert_eq!(FieldPath::parse("result.a").dependency(), Some("a"));
        assert_eq!(FieldPath::parse("rating").dependency(), None);
    }

    #[test]
    fn test_resolve_prefers_item_results() {
        let fields: ValueMap = [("meta".to_string(), Value::Object([("n".to_string(), Value::Number(2.0))].into()))].into();
        let item: ValueMap = [("score".to_string(), Value::Number(7.0))].into();
        let widget: ValueMap = [
            ("score".to_string(), Value::Number(1.0)),
            ("total".to_string(), Value::Number(9.0)),
        ]
        .into();

        assert_eq!(FieldPath::parse("meta.n").resolve(&fields, Some(&item), &widget), Value::Number(2.0));
        assert_eq!(FieldPath::parse("result.score").resolve(&fields, Some(&item), &widget), Value::Number(7.0));
        assert_eq!(FieldPath::parse("result.total").resolve(&fields, Some(&item), &widget), Value::Number(9.0));
        assert_eq!(FieldPath::parse("result.nope").resolve(&fields, None, &widget), Value::Null);
    }

    #[test]
    fn test_primary_follows_precedence() {
        let config = FieldConfig {
            expr: Some("1 + 1".into()),
            avg: Some("rating".into()),
            count: Some(true),
            ..Default::default()
        };
        let spec = FieldSpec::from_config("f", &config).unwrap();
        assert_eq!(spec.primary(), &FieldOp::Count);
        assert_eq!(spec.ops.len(), 3);
        assert!(spec.is_aggregate());
    }

    #[test]
    fn test_count_false_is_not_an_operation() {
        let config = FieldConfig {
            count: Some(false),
            ..Default::default()
        };
        assert!(FieldSpec::from_config("f", &config).is_err());

        let expr_only = FieldConfig {
            expr: Some("this.x".into()),
            ..Default::default()
        };
        assert!(!FieldSpec::from_config("f", &expr_only).unwrap().is_aggregate());
    }

    #[test]
    fn test_similarity_refs() {
        let config = FieldConfig {
            similarity: Some(SimilarityRef {
                reference: "related".into(),
                field: "rating".into(),
            }),
            ..Default::default()
        };
        let spec = FieldSpec::from_config("f", &config).unwrap();
        assert_eq!(spec.similarity_refs().collect::<Vec<_>>(), vec!["related"]);
        assert!(spec.is_aggregate());
    }
}
