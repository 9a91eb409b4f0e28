//! Collection aggregators.
//!
//! Only numeric values take part; missing and non-numeric values are
//! skipped. `sum` of nothing is 0, every other aggregate of nothing is null.

use crate::widgets::expr::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregator {
    Sum,
    Avg,
    Min,
    Max,
    Stddev,
}

impl Aggregator {
    pub fn apply(self, values: &[f64]) -> Value {
        let result = match self {
            Aggregator::Sum => Some(sum(values)),
            Aggregator::Avg => mean(values),
            Aggregator::Min => values.iter().copied().reduce(f64::min),
            Aggregator::Max => values.iter().copied().reduce(f64::max),
            Aggregator::Stddev => population_stddev(values),
        };
        result.map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Finite numbers among the values, in order
pub fn numeric_values<'a>(values: impl IntoIterator<Item = &'a Value>) -> Vec<f64> {
    values.into_iter().filter_map(Value::as_number).collect()
}

pub fn sum(values: &[f64]) -> f64 {
    values.iter().sum()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(sum(values) / values.len() as f64)
    }
}

/// Divides by N. A single value has no spread to speak of, so N < 2 is null.
pub fn population_stddev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// One neighbor's contribution to a similarity-weighted mean
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedSample {
    pub score: f64,
    pub value: Option<f64>,
}

/// Score-weighted mean; zero-score and valueless neighbors are left out
pub fn weighted_mean(samples: &[WeightedSample]) -> Option<f64> {
    let mut total = 0.0;
    let mut weight = 0.0;
    for sample in samples {
        let Some(value) = sample.value else { continue };
        if sample.score <= 0.0 || !sample.score.is_finite() || !value.is_finite() {
            continue;
        }
        total += sample.score * value;
        weight += sample.score;
    }
    if weight > 0.0 { Some(total / weight) } else { None }
}
