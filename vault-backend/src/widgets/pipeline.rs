//! Phase-by-phase field computation for one aggregate widget.
//!
//! Synchronous and I/O free: the engine gathers items, included values and
//! similarity neighbors first, then hands everything to `run_plan`.

use crate::widgets::aggregate::{self, Aggregator, WeightedSample};
use crate::widgets::expr::{CompiledExpression, EvalContext, ExpressionEvaluator, Value, ValueMap};
use crate::widgets::fields::{FieldOp, FieldSpec};
use crate::widgets::graph::Scope;
use crate::widgets::topo::ComputationPlan;
use std::collections::HashMap;

/// One matched note
#[derive(Debug, Clone, PartialEq)]
pub struct VaultItem {
    pub path: String,
    pub title: String,
    pub fields: ValueMap,
}

/// A ranked neighbor from a referenced similarity widget
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub score: f64,
    pub fields: ValueMap,
}

pub struct PipelineInput<'a> {
    pub items: &'a [VaultItem],
    /// Index of the note being viewed (recall widgets)
    pub current: Option<usize>,
    pub included: &'a ValueMap,
    /// Neighbor lists keyed by similarity widget id
    pub neighbors: &'a HashMap<String, Vec<Neighbor>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineOutput {
    /// Widget-level values in declaration order
    pub values: Vec<(String, Value)>,
    /// First failure per field
    pub errors: Vec<FieldError>,
}

impl PipelineOutput {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> =
            self.values.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
        serde_json::Value::Object(map)
    }
}

pub fn run_plan(
    plan: &ComputationPlan,
    specs: &[FieldSpec],
    input: &PipelineInput<'_>,
    evaluator: &ExpressionEvaluator,
) -> PipelineOutput {
    let by_name: HashMap<&str, &FieldSpec> = specs.iter().map(|s| (s.name.as_str(), s)).collect();
    let mut run = Run {
        input,
        evaluator,
        results: ValueMap::new(),
        item_results: vec![ValueMap::new(); input.items.len()],
        errors: Vec::new(),
    };

    for name in &plan.cycle_fields {
        run.results.insert(name.clone(), Value::Null);
    }

    for phase in &plan.phases {
        for name in &phase.fields {
            let Some(spec) = by_name.get(name.as_str()) else { continue };
            match phase.scope {
                Scope::Item => run.item_field(spec),
                Scope::Collection => run.collection_field(spec),
            }
        }
    }

    PipelineOutput {
        values: specs
            .iter()
            .map(|s| (s.name.clone(), run.results.get(&s.name).cloned().unwrap_or(Value::Null)))
            .collect(),
        errors: run.errors,
    }
}

struct Run<'r, 'a> {
    input: &'r PipelineInput<'a>,
    evaluator: &'r ExpressionEvaluator,
    results: ValueMap,
    item_results: Vec<ValueMap>,
    errors: Vec<FieldError>,
}

impl Run<'_, '_> {
    fn record_error(&mut self, field: &str, message: String) {
        if !self.errors.iter().any(|e| e.field == field) {
            self.errors.push(FieldError {
                field: field.to_string(),
                message,
            });
        }
    }

    fn compile(&mut self, field: &str, source: &str) -> Option<CompiledExpression> {
        match self.evaluator.compile(source) {
            Ok(compiled) => Some(compiled),
            Err(e) => {
                self.record_error(field, e.to_string());
                None
            }
        }
    }

    /// Per-item expression, then the widget-level value
    fn item_field(&mut self, spec: &FieldSpec) {
        let FieldOp::Expr(source) = spec.primary() else {
            self.collection_field(spec);
            return;
        };
        let Some(compiled) = self.compile(&spec.name, source) else {
            self.results.insert(spec.name.clone(), Value::Null);
            return;
        };

        let input = self.input;
        for (i, item) in input.items.iter().enumerate() {
            let outcome = {
                let ctx = EvalContext::new(&item.fields, &self.results)
                    .with_item_results(&self.item_results[i])
                    .with_included(input.included);
                self.evaluator.run(&compiled, &ctx)
            };
            let value = match outcome {
                Ok(value) => value,
                Err(e) => {
                    log::debug!("[WIDGETS] {} failed for {}: {}", spec.name, item.path, e);
                    self.record_error(&spec.name, format!("{}: {}", item.path, e));
                    Value::Null
                }
            };
            self.item_results[i].insert(spec.name.clone(), value);
        }

        let widget_value = match input.current {
            Some(current) => self.item_results[current]
                .get(&spec.name)
                .cloned()
                .unwrap_or(Value::Null),
            None => self.evaluate_once(&spec.name, &compiled),
        };
        self.results.insert(spec.name.clone(), widget_value);
    }

    /// Evaluate with an empty `this`
    fn evaluate_once(&mut self, field: &str, compiled: &CompiledExpression) -> Value {
        let empty = ValueMap::new();
        let outcome = {
            let ctx = EvalContext::new(&empty, &self.results).with_included(self.input.included);
            self.evaluator.run(compiled, &ctx)
        };
        outcome.unwrap_or_else(|e| {
            self.record_error(field, e.to_string());
            Value::Null
        })
    }

    fn collection_field(&mut self, spec: &FieldSpec) {
        let value = match spec.primary() {
            FieldOp::Count => Value::Number(self.input.items.len() as f64),
            FieldOp::Sum(_) => self.aggregate(spec, Aggregator::Sum),
            FieldOp::Avg(_) => self.aggregate(spec, Aggregator::Avg),
            FieldOp::Min(_) => self.aggregate(spec, Aggregator::Min),
            FieldOp::Max(_) => self.aggregate(spec, Aggregator::Max),
            FieldOp::Stddev(_) => self.aggregate(spec, Aggregator::Stddev),
            FieldOp::Similarity { reference, field } => {
                let samples: Vec<WeightedSample> = self
                    .input
                    .neighbors
                    .get(reference)
                    .map(|list| {
                        list.iter()
                            .map(|n| WeightedSample {
                                score: n.score,
                                value: field.resolve_item(&n.fields).as_number(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                aggregate::weighted_mean(&samples)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
            FieldOp::Expr(source) => match self.compile(&spec.name, source) {
                Some(compiled) => self.evaluate_once(&spec.name, &compiled),
                None => Value::Null,
            },
        };
        self.results.insert(spec.name.clone(), value);
    }

    fn aggregate(&self, spec: &FieldSpec, aggregator: Aggregator) -> Value {
        let Some(path) = spec.primary().path() else {
            return Value::Null;
        };
        let values: Vec<Value> = self
            .input
            .items
            .iter()
            .zip(&self.item_results)
            .map(|(item, item_results)| path.resolve(&item.fields, Some(item_results), &self.results))
            .collect();
        aggregator.apply(&aggregate::numeric_values(&values))
    }
}
