//! Multi-dimensional note similarity.
//!
//! Each dimension scores a pair of notes in `[0, 1]`; the note score is the
//! weighted sum over dimensions.

use crate::widgets::expr::Value;
use crate::widgets::fields::FieldPath;
use crate::widgets::pipeline::VaultItem;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use widget_types::{DimensionConfig, SimilarItem, SimilarityMethod};

/// Rank `candidates` by similarity to `source`. The source itself and
/// candidates with no similarity at all are left out.
pub fn rank_similar(
    source: &VaultItem,
    candidates: &[VaultItem],
    dimensions: &[DimensionConfig],
    limit: usize,
) -> Vec<SimilarItem> {
    let paths: Vec<FieldPath> = dimensions.iter().map(|d| FieldPath::parse(&d.field)).collect();

    // Proximity ranges span the source and every candidate
    let ranges: Vec<f64> = dimensions
        .iter()
        .zip(&paths)
        .map(|(dim, path)| match dim.method {
            SimilarityMethod::Proximity => numeric_range(
                std::iter::once(source)
                    .chain(candidates.iter())
                    .filter_map(|item| path.resolve_item(&item.fields).as_number()),
            ),
            _ => 0.0,
        })
        .collect();

    let mut ranked: Vec<SimilarItem> = candidates
        .iter()
        .filter(|candidate| candidate.path != source.path)
        .filter_map(|candidate| {
            let score: f64 = dimensions
                .iter()
                .zip(&paths)
                .zip(&ranges)
                .map(|((dim, path), range)| {
                    let a = path.resolve_item(&source.fields);
                    let b = path.resolve_item(&candidate.fields);
                    let similarity = match dim.method {
                        SimilarityMethod::Jaccard => jaccard(&a, &b),
                        SimilarityMethod::Proximity => proximity(&a, &b, *range),
                        SimilarityMethod::Cosine => cosine(&a, &b),
                    };
                    dim.weight * similarity
                })
                .sum();
            (score > 0.0).then(|| SimilarItem {
                path: candidate.path.clone(),
                title: candidate.title.clone(),
                score,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
    });
    ranked.truncate(limit);
    ranked
}

/// Intersection over union of lower-cased string sets
pub fn jaccard(a: &Value, b: &Value) -> f64 {
    let a = string_set(a);
    let b = string_set(b);
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// `1 - |a - b| / range`; equal values score 1 even when the range is zero
pub fn proximity(a: &Value, b: &Value, range: f64) -> f64 {
    let (Some(a), Some(b)) = (a.as_number(), b.as_number()) else {
        return 0.0;
    };
    if a == b {
        return 1.0;
    }
    if range <= 0.0 {
        return 0.0;
    }
    (1.0 - (a - b).abs() / range).clamp(0.0, 1.0)
}

/// Cosine of numeric vectors, or of term-frequency vectors for text
pub fn cosine(a: &Value, b: &Value) -> f64 {
    match (vector(a), vector(b)) {
        (Some(Vector::Numeric(mut x)), Some(Vector::Numeric(mut y))) => {
            let len = x.len().max(y.len());
            x.resize(len, 0.0);
            y.resize(len, 0.0);
            let dot: f64 = x.iter().zip(&y).map(|(p, q)| p * q).sum();
            ratio(dot, norm(x.iter()), norm(y.iter()))
        }
        (Some(Vector::Terms(x)), Some(Vector::Terms(y))) => {
            let dot: f64 = x
                .iter()
                .filter_map(|(term, count)| y.get(term).map(|other| count * other))
                .sum();
            ratio(dot, norm(x.values()), norm(y.values()))
        }
        _ => 0.0,
    }
}

enum Vector {
    Numeric(Vec<f64>),
    Terms(HashMap<String, f64>),
}

fn vector(value: &Value) -> Option<Vector> {
    match value {
        Value::Number(n) if n.is_finite() => Some(Vector::Numeric(vec![*n])),
        Value::Str(s) => Some(Vector::Terms(term_counts(std::iter::once(s.as_str())))),
        Value::Array(items) if items.is_empty() => None,
        Value::Array(items) => {
            let numbers: Vec<f64> = items.iter().filter_map(Value::as_number).collect();
            if numbers.len() == items.len() {
                Some(Vector::Numeric(numbers))
            } else {
                let words: Vec<String> = items.iter().filter_map(scalar_text).collect();
                Some(Vector::Terms(term_counts(words.iter().map(String::as_str))))
            }
        }
        _ => None,
    }
}

fn term_counts<'a>(terms: impl Iterator<Item = &'a str>) -> HashMap<String, f64> {
    let mut counts = HashMap::new();
    for term in terms {
        *counts.entry(term.trim().to_lowercase()).or_insert(0.0) += 1.0;
    }
    counts
}

fn norm<'a>(values: impl Iterator<Item = &'a f64>) -> f64 {
    values.map(|v| v * v).sum::<f64>().sqrt()
}

fn ratio(dot: f64, norm_a: f64, norm_b: f64) -> f64 {
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Str(s) => Some(s.trim().to_lowercase()),
        Value::Number(_) | Value::Bool(_) => Some(value.to_string()),
        _ => None,
    }
}

fn string_set(value: &Value) -> BTreeSet<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(scalar_text).collect(),
        other => scalar_text(other).into_iter().collect(),
    }
}

fn numeric_range(values: impl Iterator<Item = f64>) -> f64 {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        min = min.min(v);
        max = max.max(v);
    }
    if min.is_finite() && max.is_finite() { max - min } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::widgets::expr::ValueMap;

    fn strs(items: &[&str]) -> Value {
        Value::Array(items.iter().map(|s| Value::Str(s.to_string())).collect())
    }

    fn item(path: &str, pairs: Vec<(&str, Value)>) -> VaultItem {
        let fields: ValueMap = pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        VaultItem {
            path: path.to_string(),
            title: path.trim_end_matches(".md").to_string(),
            fields,
        }
    }

    fn dim(field: &str, weight: f64, method: SimilarityMethod) -> DimensionConfig {
        DimensionConfig {
            field: field.to_string(),
            weight,
            method,
        }
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard(&strs(&["a", "B"]), &strs(&["b", "c"])), 1.0 / 3.0);
        assert_eq!(jaccard(&strs(&[]), &strs(&[])), 0.0);
        assert_eq!(jaccard(&Value::Str("x".into()), &strs(&["X"])), 1.0);
        assert_eq!(jaccard(&Value::Null, &strs(&["x"])), 0.0);
    }

    #[test]
    fn test_proximity() {
        assert_eq!(proximity(&Value::Number(2.0), &Value::Number(4.0), 8.0), 0.75);
        assert_eq!(proximity(&Value::Number(3.0), &Value::Number(3.0), 0.0), 1.0);
        assert_eq!(proximity(&Value::Number(3.0), &Value::Null, 5.0), 0.0);
    }

    #[test]
    fn test_cosine() {
        let a = Value::Array(vec![Value::Number(1.0), Value::Number(0.0)]);
        let b = Value::Array(vec![Value::Number(1.0), Value::Number(0.0)]);
        let c = Value::Array(vec![Value::Number(0.0), Value::Number(1.0)]);
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-12);
        assert_eq!(cosine(&a, &c), 0.0);
        assert!((cosine(&strs(&["rust", "go"]), &strs(&["Rust"])) - (1.0 / 2f64.sqrt())).abs() < 1e-12);
        assert_eq!(cosine(&Value::Null, &a), 0.0);
    }

    #[test]
    fn test_rank_excludes_source_and_sorts() {
        let source = item("a.md", vec![("tags", strs(&["x", "y"]))]);
        let items = vec![
            source.clone(),
            item("c.md", vec![("tags", strs(&["x"]))]),
            item("b.md", vec![("tags", strs(&["y"]))]),
            item("d.md", vec![("tags", strs(&["x", "y"]))]),
            item("e.md", vec![("tags", strs(&["z"]))]),
        ];
        let dims = vec![dim("tags", 1.0, SimilarityMethod::Jaccard)];

        let ranked = rank_similar(&source, &items, &dims, 10);
        let paths: Vec<&str> = ranked.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["d.md", "b.md", "c.md"]);
        assert_eq!(ranked[0].score, 1.0);
        assert_eq!(ranked[0].title, "d");

        let top = rank_similar(&source, &items, &dims, 1);
        assert_eq!(top.len(), 1);
    }

    #[test]
    fn test_weighted_dimensions() {
        let source = item("a.md", vec![("tags", strs(&["x"])), ("year", Value::Number(2000.0))]);
        let items = vec![
            source.clone(),
            item("b.md", vec![("tags", strs(&["x"])), ("year", Value::Number(2010.0))]),
            item("c.md", vec![("tags", strs(&["q"])), ("year", Value::Number(2000.0))]),
        ];
        let dims = vec![
            dim("tags", 2.0, SimilarityMethod::Jaccard),
            dim("this.year", 1.0, SimilarityMethod::Proximity),
        ];
        let ranked = rank_similar(&source, &items, &dims, 10);
        assert_eq!(ranked[0].path, "b.md");
        assert_eq!(ranked[0].score, 2.0);
        assert_eq!(ranked[1].path, "c.md");
        assert_eq!(ranked[1].score, 1.0);
    }
}
