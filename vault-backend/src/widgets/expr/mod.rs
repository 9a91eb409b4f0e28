//! Sandboxed expression language for widget fields and source filters.
//!
//! Source text goes through three stages: a regex security pass over the raw
//! text, parsing into an AST, and tree-walking evaluation. Wall-clock time is
//! checked after each stage; the interpreter additionally counts steps so a
//! runaway loop stops deterministically.
//!
//! Text wrapped in `{ ... }` (and not starting with an object literal) is a
//! block expression with statements and `return`; anything else is a simple
//! expression.

mod ast;
mod functions;
mod interpreter;
mod lexer;
mod parser;
pub mod security;
pub mod value;

use ast::Program;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;

pub use functions::to_number;
pub use value::{Value, ValueMap};

static EMPTY_MAP: ValueMap = BTreeMap::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionMode {
    Simple,
    Block,
}

impl ExpressionMode {
    pub fn detect(source: &str) -> Self {
        if security::looks_like_block(source) {
            ExpressionMode::Block
        } else {
            ExpressionMode::Simple
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExpressionError {
    #[error("Security violation: {reason}")]
    Security { reason: String },
    #[error("Expression timed out after {elapsed_ms}ms (limit {limit_ms}ms)")]
    Timeout { elapsed_ms: u64, limit_ms: u64 },
    #[error("Expression exceeded {limit} evaluation steps")]
    StepLimit { limit: u64 },
    #[error("Parse error at {position}: {message}")]
    Parse { position: usize, message: String },
    #[error("Evaluation error: {0}")]
    Evaluation(String),
}

/// Namespaces visible to an expression
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// Current item's frontmatter
    pub this: &'a ValueMap,
    /// Widget-level computed values (`result.*` / `stats.*`)
    pub results: &'a ValueMap,
    /// Per-item computed values, shadowing `results` for the current item
    pub item_results: Option<&'a ValueMap>,
    /// Values of widgets listed in `includes`
    pub included: Option<&'a ValueMap>,
}

impl<'a> EvalContext<'a> {
    pub fn new(this: &'a ValueMap, results: &'a ValueMap) -> Self {
        Self {
            this,
            results,
            item_results: None,
            included: None,
        }
    }

    /// Context with every namespace empty
    pub fn empty() -> EvalContext<'static> {
        EvalContext::new(&EMPTY_MAP, &EMPTY_MAP)
    }

    pub fn with_item_results(mut self, item_results: &'a ValueMap) -> Self {
        self.item_results = Some(item_results);
        self
    }

    pub fn with_included(mut self, included: &'a ValueMap) -> Self {
        self.included = Some(included);
        self
    }

    /// `result` namespace: per-item values over widget-level values
    pub fn result_namespace(&self) -> ValueMap {
        let mut merged = self.results.clone();
        if let Some(item) = self.item_results {
            for (k, v) in item {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }
}

/// Parsed expression, reusable across items
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    source: String,
    mode: ExpressionMode,
    program: Program,
}

impl CompiledExpression {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn mode(&self) -> ExpressionMode {
        self.mode
    }
}

#[derive(Debug, Clone)]
pub struct ExpressionEvaluator {
    timeout: Duration,
    max_steps: u64,
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
            max_steps: 100_000,
        }
    }
}

impl ExpressionEvaluator {
    pub fn new(timeout: Duration, max_steps: u64) -> Self {
        Self { timeout, max_steps }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_steps(&self) -> u64 {
        self.max_steps
    }

    /// Security check and parse
    pub fn compile(&self, source: &str) -> Result<CompiledExpression, ExpressionError> {
        self.compile_from(source, Instant::now())
    }

    /// Evaluate a compiled expression and normalize the result
    pub fn run(&self, compiled: &CompiledExpression, ctx: &EvalContext<'_>) -> Result<Value, ExpressionError> {
        self.run_from(compiled, ctx, Instant::now())
    }

    /// Compile and run in one go, sharing one time budget
    pub fn evaluate(&self, source: &str, ctx: &EvalContext<'_>) -> Result<Value, ExpressionError> {
        let started = Instant::now();
        let compiled = self.compile_from(source, started)?;
        self.run_from(&compiled, ctx, started)
    }

    fn compile_from(&self, source: &str, started: Instant) -> Result<CompiledExpression, ExpressionError> {
        let source = source.trim();
        let mode = ExpressionMode::detect(source);

        security::validate_expression(source, mode)?;
        self.checkpoint(started)?;

        let program = parser::parse_program(source, mode)?;
        self.checkpoint(started)?;

        Ok(CompiledExpression {
            source: source.to_string(),
            mode,
            program,
        })
    }

    fn run_from(
        &self,
        compiled: &CompiledExpression,
        ctx: &EvalContext<'_>,
        started: Instant,
    ) -> Result<Value, ExpressionError> {
        let limits = interpreter::Limits {
            max_steps: self.max_steps,
            started,
            timeout: self.timeout,
        };
        let value = interpreter::execute(&compiled.program, ctx, limits)?;
        self.checkpoint(started)?;
        Ok(value.normalize())
    }

    fn checkpoint(&self, started: Instant) -> Result<(), ExpressionError> {
        let elapsed = started.elapsed();
        if elapsed > self.timeout {
            Err(ExpressionError::Timeout {
                elapsed_ms: elapsed.as_millis() as u64,
                limit_ms: self.timeout.as_millis() as u64,
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, Value)]) -> ValueMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn eval(src: &str) -> Result<Value, ExpressionError> {
        ExpressionEvaluator::default().evaluate(src, &EvalContext::empty())
    }

    #[test]
    fn test_simple_arithmetic_and_logic() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), Value::Number(7.0));
        assert_eq!(eval("2 ^ 3 ^ 2").unwrap(), Value::Number(512.0));
        assert_eq!(eval("-2 ^ 2").unwrap(), Value::Number(-4.0));
        assert_eq!(eval("7 % 3").unwrap(), Value::Number(1.0));
        assert_eq!(eval("1 < 2 and not (3 < 2)").unwrap(), Value::Bool(true));
        assert_eq!(eval("5 > 3 ? 'big' : 'small'").unwrap(), Value::Str("big".into()));
        assert_eq!(eval("'a' + 1").unwrap(), Value::Str("a1".into()));
    }

    #[test]
    fn test_division_by_zero_is_null() {
        assert_eq!(eval("1 / 0").unwrap(), Value::Null);
        assert_eq!(eval("0 / 0").unwrap(), Value::Null);
        assert_eq!(eval("-5 / 0").unwrap(), Value::Null);
    }

    #[test]
    fn test_namespaces() {
        let this = map(&[("mood", Value::Number(4.0)), ("tags", Value::Array(vec![Value::Str("a".into())]))]);
        let results = map(&[("total", Value::Number(10.0)), ("avg", Value::Number(2.0))]);
        let item = map(&[("avg", Value::Number(3.0))]);
        let included = map(&[("other", Value::Number(5.0))]);
        let ctx = EvalContext::new(&this, &results)
            .with_item_results(&item)
            .with_included(&included);

        let ev = ExpressionEvaluator::default();
        assert_eq!(ev.evaluate("this.mood * 2", &ctx).unwrap(), Value::Number(8.0));
        assert_eq!(ev.evaluate("result.total + stats.total", &ctx).unwrap(), Value::Number(20.0));
        assert_eq!(ev.evaluate("result.avg", &ctx).unwrap(), Value::Number(3.0));
        assert_eq!(ev.evaluate("included.other", &ctx).unwrap(), Value::Number(5.0));
        assert_eq!(ev.evaluate("this.tags.length", &ctx).unwrap(), Value::Number(1.0));
        assert_eq!(ev.evaluate("this.missing", &ctx).unwrap(), Value::Null);
    }

    #[test]
    fn test_namespace_paths_read_in_place() {
        let big = Value::Array((0..50_000).map(|i| Value::Number(i as f64)).collect());
        let this = map(&[
            ("xs", big),
            ("name", Value::Str("Alpha".into())),
            ("nested", Value::from_json(&serde_json::json!({"a": {"b": [1, 2]}}))),
        ]);
        let results = map(&[("avg", Value::Number(2.0)), ("n", Value::Number(7.0))]);
        let item = map(&[("avg", Value::Number(3.0))]);
        let ctx = EvalContext::new(&this, &results).with_item_results(&item);
        let ev = ExpressionEvaluator::default();

        assert_eq!(ev.evaluate("this.nested.a.b[1]", &ctx).unwrap(), Value::Number(2.0));
        assert_eq!(ev.evaluate("this['name'].length", &ctx).unwrap(), Value::Number(5.0));
        assert_eq!(ev.evaluate("this.name[0]", &ctx).unwrap(), Value::Str("A".into()));
        assert_eq!(ev.evaluate("this.missing.deeper", &ctx).unwrap(), Value::Null);
        assert_eq!(ev.evaluate("stats.avg + result.n", &ctx).unwrap(), Value::Number(10.0));
        assert_eq!(ev.evaluate("included.other", &ctx).unwrap(), Value::Null);

        // each read copies one element, not the 50k-item array
        let src = "{ let total = 0; for (let i = 0; i < 3000; i++) total += this.xs[i]; return total }";
        assert_eq!(ev.evaluate(src, &ctx).unwrap(), Value::Number(4_498_500.0));
    }

    #[test]
    fn test_deep_nesting_is_an_error() {
        let deep = format!("{}1{}", "(".repeat(5000), ")".repeat(5000));
        assert!(matches!(eval(&deep), Err(ExpressionError::Parse { .. })));
        let wide_sum = vec!["1"; 5000].join(" + ");
        assert!(matches!(eval(&wide_sum), Err(ExpressionError::Parse { .. })));
        assert_eq!(eval(&vec!["1"; 50].join(" + ")).unwrap(), Value::Number(50.0));
    }

    #[test]
    fn test_security_errors_surface() {
        for src in ["require('fs')", "process.exit()", "this.__proto__", "fetch('x')"] {
            assert!(matches!(eval(src), Err(ExpressionError::Security { .. })), "{}", src);
        }
        assert_eq!(eval("this.important").unwrap(), Value::Null);
    }

    #[test]
    fn test_block_expression() {
        let this = map(&[(
            "scores",
            Value::Array(vec![Value::Number(3.0), Value::Number(5.0), Value::Number(7.0)]),
        )]);
        let ctx = EvalContext::new(&this, &EMPTY_MAP);
        let src = "{
            let total = 0;
            for (const s of this.scores) {
                if (s < 4) continue;
                total += s;
            }
            return total;
        }";
        let value = ExpressionEvaluator::default().evaluate(src, &ctx).unwrap();
        assert_eq!(value, Value::Number(12.0));
    }

    #[test]
    fn test_step_limit() {
        let ev = ExpressionEvaluator::new(Duration::from_secs(10), 500);
        let err = ev.evaluate("{ let i = 0; while (true) { i++ } return i }", &EvalContext::empty());
        assert_eq!(err, Err(ExpressionError::StepLimit { limit: 500 }));
    }

    #[test]
    fn test_timeout_checkpoint() {
        let ev = ExpressionEvaluator::new(Duration::from_millis(0), u64::MAX);
        let err = ev.evaluate("{ let i = 0; while (i < 100000) { i++ } return i }", &EvalContext::empty());
        assert!(matches!(err, Err(ExpressionError::Timeout { limit_ms: 0, .. })));
    }

    #[test]
    fn test_mode_detection() {
        assert_eq!(ExpressionMode::detect("{ return 1 }"), ExpressionMode::Block);
        assert_eq!(ExpressionMode::detect("result.a + 1"), ExpressionMode::Simple);
        assert_eq!(ExpressionMode::detect("{ a: 1 }"), ExpressionMode::Simple);
        assert!(matches!(eval("{ a: 1 }"), Err(ExpressionError::Security { .. })));
    }
}
