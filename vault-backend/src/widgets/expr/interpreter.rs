//! Tree-walking interpreter over the parsed AST.
//!
//! No host interop: identifiers resolve only to local bindings, the context
//! namespaces, a few numeric constants, and the `Math`/`Object` helpers.

use super::ast::*;
use super::functions::{call_builtin, math_constants, to_number};
use super::security::SHADOWED_GLOBALS;
use super::value::{Value, ValueMap, format_number};
use super::{EvalContext, ExpressionError};
use std::cell::OnceCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Deadline check interval, in steps
const DEADLINE_CHECK_INTERVAL: u64 = 1024;

/// Longest string an expression may build, in bytes
pub const MAX_STRING_BYTES: usize = 1 << 20;
/// Longest array an expression may build
pub const MAX_ARRAY_LEN: usize = 100_000;
/// Deepest array and object nesting an expression may build
pub const MAX_VALUE_DEPTH: usize = 64;
/// Bytes one evaluation may copy or build in total
pub const MAX_ALLOCATED_BYTES: usize = 256 << 20;

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_steps: u64,
    pub started: Instant,
    pub timeout: Duration,
}

pub fn execute(program: &Program, ctx: &EvalContext<'_>, limits: Limits) -> Result<Value, ExpressionError> {
    let mut interp = Interpreter {
        ctx,
        scopes: Vec::new(),
        steps: 0,
        allocated: 0,
        limits,
        this_value: OnceCell::new(),
        result_value: OnceCell::new(),
        included_value: OnceCell::new(),
    };

    match program {
        Program::Expression(expr) => interp.eval(expr),
        Program::Block(body) => {
            let globals: Scope = SHADOWED_GLOBALS
                .iter()
                .map(|name| (name.to_string(), Binding { value: Value::Null, constant: true }))
                .collect();
            interp.scopes.push(globals);
            match interp.exec_block(body)? {
                Flow::Return(value) => Ok(value),
                Flow::Normal => Ok(Value::Null),
                Flow::Break | Flow::Continue => Err(eval_error("break/continue outside of a loop")),
            }
        }
    }
}

struct Binding {
    value: Value,
    constant: bool,
}

type Scope = HashMap<String, Binding>;

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

struct Interpreter<'c, 'a> {
    ctx: &'c EvalContext<'a>,
    scopes: Vec<Scope>,
    steps: u64,
    /// Bytes charged against `MAX_ALLOCATED_BYTES`
    allocated: usize,
    limits: Limits,
    this_value: OnceCell<Value>,
    result_value: OnceCell<Value>,
    included_value: OnceCell<Value>,
}

fn eval_error(message: impl Into<String>) -> ExpressionError {
    ExpressionError::Evaluation(message.into())
}

/// `value` stored `extra` levels below a new container
fn check_depth(value: &Value, extra: usize) -> Result<(), ExpressionError> {
    if extra > MAX_VALUE_DEPTH || value.nests_deeper_than(MAX_VALUE_DEPTH - extra) {
        return Err(eval_error(format!("values may nest at most {} levels deep", MAX_VALUE_DEPTH)));
    }
    Ok(())
}

fn check_string_len(len: usize) -> Result<(), ExpressionError> {
    if len > MAX_STRING_BYTES {
        return Err(eval_error(format!("string of {} bytes exceeds the {} byte limit", len, MAX_STRING_BYTES)));
    }
    Ok(())
}

fn check_array_len(len: usize) -> Result<(), ExpressionError> {
    if len > MAX_ARRAY_LEN {
        return Err(eval_error(format!("array of {} items exceeds the {} item limit", len, MAX_ARRAY_LEN)));
    }
    Ok(())
}

/// Context namespace entry, `result`/`stats` preferring per-item values
fn namespace_entry<'a>(ctx: &EvalContext<'a>, namespace: &str, key: &str) -> Option<&'a Value> {
    match namespace {
        "this" => ctx.this.get(key),
        "result" | "stats" => ctx
            .item_results
            .and_then(|item| item.get(key))
            .or_else(|| ctx.results.get(key)),
        "included" => ctx.included.and_then(|included| included.get(key)),
        _ => None,
    }
}

const NAMESPACES: &[&str] = &["this", "result", "stats", "included"];

impl Interpreter<'_, '_> {
    fn tick(&mut self) -> Result<(), ExpressionError> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(ExpressionError::StepLimit { limit: self.limits.max_steps });
        }
        if self.steps % DEADLINE_CHECK_INTERVAL == 0 {
            let elapsed = self.limits.started.elapsed();
            if elapsed > self.limits.timeout {
                return Err(ExpressionError::Timeout {
                    elapsed_ms: elapsed.as_millis() as u64,
                    limit_ms: self.limits.timeout.as_millis() as u64,
                });
            }
        }
        Ok(())
    }

    fn charge(&mut self, bytes: usize) -> Result<(), ExpressionError> {
        self.allocated = self.allocated.saturating_add(bytes);
        if self.allocated > MAX_ALLOCATED_BYTES {
            return Err(eval_error(format!(
                "expression allocated more than {} MiB",
                MAX_ALLOCATED_BYTES >> 20
            )));
        }
        Ok(())
    }

    /// Charge a freshly copied or built value against the allocation budget
    fn materialized(&mut self, value: Value) -> Result<Value, ExpressionError> {
        self.charge(value.footprint())?;
        Ok(value)
    }

    fn scoped<T>(
        &mut self,
        scope: Scope,
        f: impl FnOnce(&mut Self) -> Result<T, ExpressionError>,
    ) -> Result<T, ExpressionError> {
        self.scopes.push(scope);
        let result = f(self);
        self.scopes.pop();
        result
    }

    fn lookup_local(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn lookup_local_mut(&mut self, name: &str) -> Option<&mut Binding> {
        self.scopes.iter_mut().rev().find_map(|scope| scope.get_mut(name))
    }

    fn is_namespace(&self, expr: &Expr, name: &str) -> bool {
        matches!(expr, Expr::Ident(id) if id == name) && self.lookup_local(name).is_none()
    }

    // ---------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------

    fn exec_block(&mut self, body: &[Stmt]) -> Result<Flow, ExpressionError> {
        self.scoped(Scope::new(), |this| this.exec_statements(body))
    }

    fn exec_statements(&mut self, body: &[Stmt]) -> Result<Flow, ExpressionError> {
        for stmt in body {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, ExpressionError> {
        self.tick()?;
        match stmt {
            Stmt::Declare { kind, name, init } => {
                let value = match init {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                let scope = self
                    .scopes
                    .last_mut()
                    .ok_or_else(|| eval_error("no active scope"))?;
                if scope.contains_key(name) {
                    return Err(eval_error(format!("'{}' is already declared", name)));
                }
                scope.insert(
                    name.clone(),
                    Binding {
                        value,
                        constant: *kind == DeclKind::Const,
                    },
                );
                Ok(Flow::Normal)
            }
            Stmt::Assign { target, op, value } => {
                let rhs = self.eval(value)?;
                let new_value = match op {
                    AssignOp::Set => rhs,
                    AssignOp::Add => self.binary(BinaryOp::Add, target, rhs)?,
                    AssignOp::Sub => self.binary(BinaryOp::Sub, target, rhs)?,
                    AssignOp::Mul => self.binary(BinaryOp::Mul, target, rhs)?,
                    AssignOp::Div => self.binary(BinaryOp::Div, target, rhs)?,
                };
                self.assign(target, new_value)?;
                Ok(Flow::Normal)
            }
            Stmt::If { test, consequent, alternate } => {
                if self.eval(test)?.is_truthy() {
                    self.exec_block(consequent)
                } else if let Some(alternate) = alternate {
                    self.exec_block(alternate)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { test, body } => {
                loop {
                    self.tick()?;
                    if !self.eval(test)?.is_truthy() {
                        break;
                    }
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For { init, test, update, body } => self.scoped(Scope::new(), |this| {
                if let Some(init) = init {
                    this.exec_stmt(init)?;
                }
                loop {
                    this.tick()?;
                    if let Some(test) = test {
                        if !this.eval(test)?.is_truthy() {
                            break;
                        }
                    }
                    match this.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if let Some(update) = update {
                        this.exec_stmt(update)?;
                    }
                }
                Ok(Flow::Normal)
            }),
            Stmt::ForOf { name, iterable, body } => {
                let items = match self.eval(iterable)? {
                    Value::Array(items) => items,
                    Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
                    other => return Err(eval_error(format!("{} is not iterable", other.type_name()))),
                };
                for item in items {
                    let mut scope = Scope::new();
                    scope.insert(name.clone(), Binding { value: item, constant: false });
                    match self.scoped(scope, |this| this.exec_statements(body))? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(Flow::Normal)
            }
            Stmt::Block(body) => self.exec_block(body),
        }
    }

    /// Root name and evaluated keys of an assignable path, outermost key first
    fn target_path<'e>(&mut self, target: &'e Expr) -> Result<(&'e str, Vec<Value>), ExpressionError> {
        let mut keys = Vec::new();
        let mut node = target;
        let root = loop {
            match node {
                Expr::Ident(name) => break name.as_str(),
                Expr::Member { object, property } => {
                    keys.push(Value::Str(property.clone()));
                    node = &**object;
                }
                Expr::Index { object, index } => {
                    keys.push(self.eval(index)?);
                    node = &**object;
                }
                _ => return Err(eval_error("invalid assignment target")),
            }
        };
        keys.reverse();
        Ok((root, keys))
    }

    fn assign(&mut self, target: &Expr, value: Value) -> Result<(), ExpressionError> {
        let (root, keys) = self.target_path(target)?;
        check_depth(&value, keys.len())?;

        let binding = self
            .lookup_local_mut(root)
            .ok_or_else(|| eval_error(format!("cannot assign to undeclared '{}'", root)))?;
        if keys.is_empty() && binding.constant {
            return Err(eval_error(format!("cannot reassign const '{}'", root)));
        }
        set_path(&mut binding.value, &keys, value)
    }

    // ---------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------

    fn eval(&mut self, expr: &Expr) -> Result<Value, ExpressionError> {
        self.tick()?;
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Ident(name) => {
                let value = self.resolve(name)?;
                self.materialized(value)
            }
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    let value = self.eval(item)?;
                    check_depth(&value, 1)?;
                    values.push(value);
                }
                Ok(Value::Array(values))
            }
            Expr::Object(entries) => {
                let mut map = ValueMap::new();
                for (key, value) in entries {
                    let value = self.eval(value)?;
                    check_depth(&value, 1)?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::Object(map))
            }
            Expr::Member { object, property } => match self.eval_path(expr)? {
                Some(value) => Ok(value),
                None => Ok(self.eval(object)?.member(property)),
            },
            Expr::Index { object, index } => match self.eval_path(expr)? {
                Some(value) => Ok(value),
                None => {
                    let object = self.eval(object)?;
                    let index = self.eval(index)?;
                    Ok(object.index(&index))
                }
            },
            Expr::Call { name, args } => {
                let args = self.eval_args(args)?;
                call_builtin(name, &args)
            }
            Expr::MethodCall { object, method, args } => {
                let value = self.eval_method(object, method, args)?;
                self.materialized(value)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Neg => to_number(&value).map(|n| Value::Number(-n)).unwrap_or(Value::Null),
                    UnaryOp::Plus => to_number(&value).map(Value::Number).unwrap_or(Value::Null),
                })
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                let value = binary_op(*op, left, right)?;
                self.materialized(value)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left)?;
                match op {
                    LogicalOp::And if !left.is_truthy() => Ok(left),
                    LogicalOp::Or if left.is_truthy() => Ok(left),
                    LogicalOp::Nullish if !left.is_null() => Ok(left),
                    _ => self.eval(right),
                }
            }
            Expr::Conditional { test, consequent, alternate } => {
                if self.eval(test)?.is_truthy() {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
            Expr::Lambda(_) => Err(eval_error("arrow functions can only be passed to array methods")),
            Expr::Update { target, delta, prefix } => {
                let current = self.eval(target)?;
                let Some(old) = to_number(&current) else {
                    return Err(eval_error("increment of a non-numeric value"));
                };
                let new = old + delta;
                self.assign(target, Value::Number(new))?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
        }
    }

    /// Compound assignment: current value of `target` combined with `rhs`
    fn binary(&mut self, op: BinaryOp, target: &Expr, rhs: Value) -> Result<Value, ExpressionError> {
        let current = self.eval(target)?;
        let value = binary_op(op, current, rhs)?;
        self.materialized(value)
    }

    /// Member and index chains rooted at a local or a context namespace,
    /// walked in place so only the value at the end is copied. `None` when
    /// the chain has some other root.
    fn eval_path(&mut self, expr: &Expr) -> Result<Option<Value>, ExpressionError> {
        let mut links = Vec::new();
        let mut node = expr;
        let root = loop {
            match node {
                Expr::Member { object, .. } | Expr::Index { object, .. } => {
                    links.push(node);
                    node = &**object;
                }
                Expr::Ident(name) => break name.as_str(),
                _ => return Ok(None),
            }
        };
        let local = self.lookup_local(root).is_some();
        if !local && !NAMESPACES.contains(&root) {
            return Ok(None);
        }

        let mut keys = Vec::with_capacity(links.len());
        for link in links.iter().rev() {
            self.tick()?;
            keys.push(match link {
                Expr::Member { property, .. } => Value::Str(property.clone()),
                Expr::Index { index, .. } => self.eval(index)?,
                _ => Value::Null,
            });
        }

        let ctx = self.ctx;
        let (mut cursor, path) = if local {
            match self.lookup_local(root) {
                Some(binding) => (&binding.value, &keys[..]),
                None => return Ok(Some(Value::Null)),
            }
        } else {
            let Some((first, rest)) = keys.split_first() else {
                return Ok(None);
            };
            let found = match first {
                Value::Str(key) => namespace_entry(ctx, root, key),
                _ => None,
            };
            match found {
                Some(value) => (value, rest),
                None => return Ok(Some(Value::Null)),
            }
        };

        for (i, key) in path.iter().enumerate() {
            match cursor.index_ref(key) {
                Some(next) => cursor = next,
                None => {
                    // length, string characters, or a missing key
                    let mut owned = cursor.index(key);
                    for key in &path[i + 1..] {
                        owned = owned.index(key);
                    }
                    return self.materialized(owned).map(Some);
                }
            }
        }
        let value = cursor.clone();
        self.materialized(value).map(Some)
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, ExpressionError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }
        Ok(values)
    }

    fn resolve(&self, name: &str) -> Result<Value, ExpressionError> {
        if let Some(binding) = self.lookup_local(name) {
            return Ok(binding.value.clone());
        }
        let value = match name {
            "this" => self
                .this_value
                .get_or_init(|| Value::Object(self.ctx.this.clone()))
                .clone(),
            "result" | "stats" => self
                .result_value
                .get_or_init(|| Value::Object(self.ctx.result_namespace()))
                .clone(),
            "included" => self
                .included_value
                .get_or_init(|| Value::Object(self.ctx.included.cloned().unwrap_or_default()))
                .clone(),
            "pi" | "PI" => Value::Number(std::f64::consts::PI),
            "e" | "E" => Value::Number(std::f64::consts::E),
            "Infinity" => Value::Number(f64::INFINITY),
            "NaN" => Value::Number(f64::NAN),
            "Math" => math_constants(),
            _ => return Err(eval_error(format!("undefined symbol '{}'", name))),
        };
        Ok(value)
    }

    fn call_lambda(&mut self, lambda: &Lambda, args: Vec<Value>) -> Result<Value, ExpressionError> {
        self.tick()?;
        let mut scope = Scope::new();
        let mut args = args.into_iter();
        for param in &lambda.params {
            let value = args.next().unwrap_or(Value::Null);
            scope.insert(param.clone(), Binding { value, constant: false });
        }
        self.scoped(scope, |this| match &lambda.body {
            LambdaBody::Expr(expr) => this.eval(expr),
            LambdaBody::Block(body) => match this.exec_statements(body)? {
                Flow::Return(value) => Ok(value),
                Flow::Normal => Ok(Value::Null),
                Flow::Break | Flow::Continue => Err(eval_error("break/continue outside of a loop")),
            },
        })
    }

    // ---------------------------------------------------------------
    // Methods
    // ---------------------------------------------------------------

    fn eval_method(&mut self, object: &Expr, method: &str, args: &[Expr]) -> Result<Value, ExpressionError> {
        if self.is_namespace(object, "Math") {
            let args = self.eval_args(args)?;
            return call_builtin(method, &args);
        }
        if self.is_namespace(object, "Object") {
            let args = self.eval_args(args)?;
            return object_helper(method, args.first().unwrap_or(&Value::Null));
        }

        if method == "push" {
            return self.push(object, args);
        }

        let receiver = self.eval(object)?;
        match receiver {
            Value::Array(items) => self.array_method(object, items, method, args),
            Value::Str(s) => {
                let args = self.eval_args(args)?;
                string_method(&s, method, &args)
            }
            Value::Number(n) => {
                let args = self.eval_args(args)?;
                match method {
                    "toFixed" => {
                        let digits = args.first().and_then(to_number).unwrap_or(0.0).clamp(0.0, 20.0) as usize;
                        Ok(Value::Str(format!("{:.*}", digits, n)))
                    }
                    "toString" => Ok(Value::Str(format_number(n))),
                    _ => Err(eval_error(format!("number has no method '{}'", method))),
                }
            }
            other => Err(eval_error(format!("cannot call '{}' on {}", method, other.type_name()))),
        }
    }

    fn array_method(
        &mut self,
        receiver: &Expr,
        items: Vec<Value>,
        method: &str,
        args: &[Expr],
    ) -> Result<Value, ExpressionError> {
        match method {
            "map" => {
                let f = lambda_arg(args, 0, method)?;
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    let value = self.call_lambda(f, vec![item, Value::Number(i as f64)])?;
                    check_depth(&value, 1)?;
                    out.push(value);
                }
                Ok(Value::Array(out))
            }
            "filter" => {
                let f = lambda_arg(args, 0, method)?;
                let mut out = Vec::new();
                for (i, item) in items.into_iter().enumerate() {
                    if self.call_lambda(f, vec![item.clone(), Value::Number(i as f64)])?.is_truthy() {
                        out.push(item);
                    }
                }
                Ok(Value::Array(out))
            }
            "reduce" => {
                let f = lambda_arg(args, 0, method)?;
                let mut iter = items.into_iter().enumerate();
                let mut acc = match args.get(1) {
                    Some(init) => self.eval(init)?,
                    None => match iter.next() {
                        Some((_, first)) => first,
                        None => return Err(eval_error("reduce of empty array with no initial value")),
                    },
                };
                for (i, item) in iter {
                    acc = self.call_lambda(f, vec![acc, item, Value::Number(i as f64)])?;
                }
                Ok(acc)
            }
            "some" | "every" | "find" | "findIndex" => {
                let f = lambda_arg(args, 0, method)?;
                for (i, item) in items.into_iter().enumerate() {
                    let hit = self.call_lambda(f, vec![item.clone(), Value::Number(i as f64)])?.is_truthy();
                    match (method, hit) {
                        ("some", true) => return Ok(Value::Bool(true)),
                        ("every", false) => return Ok(Value::Bool(false)),
                        ("find", true) => return Ok(item),
                        ("findIndex", true) => return Ok(Value::Number(i as f64)),
                        _ => {}
                    }
                }
                Ok(match method {
                    "some" => Value::Bool(false),
                    "every" => Value::Bool(true),
                    "find" => Value::Null,
                    _ => Value::Number(-1.0),
                })
            }
            "sort" => {
                let sorted = match args.first() {
                    Some(_) => {
                        let f = lambda_arg(args, 0, method)?;
                        merge_sort(items, &mut |a, b| {
                            let order = self.call_lambda(f, vec![a.clone(), b.clone()])?;
                            Ok(match to_number(&order) {
                                Some(n) if n < 0.0 => Ordering::Less,
                                Some(n) if n > 0.0 => Ordering::Greater,
                                _ => Ordering::Equal,
                            })
                        })?
                    }
                    None => merge_sort(items, &mut |a, b| Ok(default_order(a, b)))?,
                };
                self.write_back(receiver, &sorted)?;
                Ok(Value::Array(sorted))
            }
            "reverse" => {
                let mut reversed = items;
                reversed.reverse();
                self.write_back(receiver, &reversed)?;
                Ok(Value::Array(reversed))
            }
            _ => {
                let args = self.eval_args(args)?;
                plain_array_method(items, method, &args)
            }
        }
    }

    /// Append to a local array in place
    fn push(&mut self, receiver: &Expr, args: &[Expr]) -> Result<Value, ExpressionError> {
        if !receiver.is_assignable() {
            return Err(eval_error("push needs a variable or property receiver"));
        }
        let args = self.eval_args(args)?;
        for arg in &args {
            check_depth(arg, 1)?;
        }
        let (root, keys) = self.target_path(receiver)?;
        let binding = self
            .lookup_local_mut(root)
            .ok_or_else(|| eval_error(format!("cannot assign to undeclared '{}'", root)))?;
        let mut slot = &mut binding.value;
        for key in &keys {
            slot = slot
                .index_mut(key)
                .ok_or_else(|| eval_error("cannot push to a missing property"))?;
        }
        let items = match slot {
            Value::Array(items) => items,
            other => return Err(eval_error(format!("cannot call 'push' on {}", other.type_name()))),
        };
        check_array_len(items.len() + args.len())?;
        items.extend(args);
        Ok(Value::Number(items.len() as f64))
    }

    /// Mirror in-place array methods onto an assignable local receiver
    fn write_back(&mut self, receiver: &Expr, items: &[Value]) -> Result<(), ExpressionError> {
        let mut root = receiver;
        while let Expr::Member { object, .. } | Expr::Index { object, .. } = root {
            root = &**object;
        }
        match root {
            Expr::Ident(name) if self.lookup_local(name).is_some() => {
                self.assign(receiver, Value::Array(items.to_vec()))
            }
            _ => Ok(()),
        }
    }
}

fn lambda_arg<'e>(args: &'e [Expr], index: usize, method: &str) -> Result<&'e Lambda, ExpressionError> {
    match args.get(index) {
        Some(Expr::Lambda(lambda)) => Ok(lambda),
        _ => Err(eval_error(format!("{}() expects an arrow function", method))),
    }
}

fn plain_array_method(items: Vec<Value>, method: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Null);
    match method {
        "includes" => Ok(Value::Bool(items.iter().any(|item| loose_equals(item, &arg(0))))),
        "indexOf" => Ok(Value::Number(
            items
                .iter()
                .position(|item| loose_equals(item, &arg(0)))
                .map(|i| i as f64)
                .unwrap_or(-1.0),
        )),
        "join" => {
            let separator = args.first().and_then(Value::as_str).unwrap_or(",");
            let parts: Vec<String> = items
                .iter()
                .map(|item| if item.is_null() { String::new() } else { item.to_string() })
                .collect();
            let len = parts.iter().map(String::len).sum::<usize>()
                + separator.len().saturating_mul(parts.len().saturating_sub(1));
            check_string_len(len)?;
            Ok(Value::Str(parts.join(separator)))
        }
        "slice" => {
            let (start, end) = slice_bounds(items.len(), args);
            Ok(Value::Array(items[start..end].to_vec()))
        }
        "concat" => {
            let added: usize = args
                .iter()
                .map(|arg| match arg {
                    Value::Array(more) => more.len(),
                    _ => 1,
                })
                .sum();
            check_array_len(items.len() + added)?;
            let mut out = items;
            for arg in args {
                match arg {
                    Value::Array(more) => out.extend(more.iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Ok(Value::Array(out))
        }
        "toString" => Ok(Value::Str(Value::Array(items).to_string())),
        _ => Err(eval_error(format!("array has no method '{}'", method))),
    }
}

fn string_method(s: &str, method: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    let text_arg = |i: usize| args.get(i).map(|v| v.to_string()).unwrap_or_default();
    match method {
        "toLowerCase" => Ok(Value::Str(s.to_lowercase())),
        "toUpperCase" => Ok(Value::Str(s.to_uppercase())),
        "trim" => Ok(Value::Str(s.trim().to_string())),
        "includes" => Ok(Value::Bool(s.contains(&text_arg(0)))),
        "startsWith" => Ok(Value::Bool(s.starts_with(&text_arg(0)))),
        "endsWith" => Ok(Value::Bool(s.ends_with(&text_arg(0)))),
        "split" => {
            let separator = text_arg(0);
            let parts: Vec<Value> = if separator.is_empty() {
                s.chars().take(MAX_ARRAY_LEN + 1).map(|c| Value::Str(c.to_string())).collect()
            } else {
                s.split(separator.as_str())
                    .take(MAX_ARRAY_LEN + 1)
                    .map(|p| Value::Str(p.to_string()))
                    .collect()
            };
            check_array_len(parts.len())?;
            Ok(Value::Array(parts))
        }
        "toString" => Ok(Value::Str(s.to_string())),
        _ => Err(eval_error(format!("string has no method '{}'", method))),
    }
}

fn object_helper(method: &str, target: &Value) -> Result<Value, ExpressionError> {
    let entries: Vec<(Value, Value)> = match target {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (Value::Str(k.clone()), v.clone()))
            .collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (Value::Str(i.to_string()), v.clone()))
            .collect(),
        Value::Null => return Err(eval_error(format!("Object.{}() called on null", method))),
        _ => Vec::new(),
    };
    match method {
        "keys" => Ok(Value::Array(entries.into_iter().map(|(k, _)| k).collect())),
        "values" => Ok(Value::Array(entries.into_iter().map(|(_, v)| v).collect())),
        "entries" => {
            for (_, v) in &entries {
                check_depth(v, 2)?;
            }
            Ok(Value::Array(
                entries
                    .into_iter()
                    .map(|(k, v)| Value::Array(vec![k, v]))
                    .collect(),
            ))
        }
        _ => Err(eval_error(format!("Object.{}() is not available", method))),
    }
}

fn slice_bounds(len: usize, args: &[Value]) -> (usize, usize) {
    let resolve = |v: Option<&Value>, default: usize| -> usize {
        match v.and_then(to_number) {
            Some(n) if n < 0.0 => (len as f64 + n).max(0.0) as usize,
            Some(n) => (n as usize).min(len),
            None => default,
        }
    };
    let start = resolve(args.first(), 0);
    let end = resolve(args.get(1), len);
    (start, end.max(start))
}

fn set_path(target: &mut Value, keys: &[Value], value: Value) -> Result<(), ExpressionError> {
    let Some((key, rest)) = keys.split_first() else {
        *target = value;
        return Ok(());
    };
    match (target, key) {
        (Value::Object(map), Value::Str(k)) => set_path(map.entry(k.clone()).or_default(), rest, value),
        (Value::Object(map), Value::Number(n)) => {
            set_path(map.entry(format_number(*n)).or_default(), rest, value)
        }
        (Value::Array(items), Value::Number(n)) if n.fract() == 0.0 && *n >= 0.0 => {
            let i = *n as usize;
            if i > items.len() + 10_000 || i >= MAX_ARRAY_LEN {
                return Err(eval_error("array index out of range"));
            }
            if i >= items.len() {
                items.resize(i + 1, Value::Null);
            }
            set_path(&mut items[i], rest, value)
        }
        (other, _) => Err(eval_error(format!("cannot set a property on {}", other.type_name()))),
    }
}

/// Binary operator semantics: null-propagating arithmetic, `+` concatenates strings
fn binary_op(op: BinaryOp, left: Value, right: Value) -> Result<Value, ExpressionError> {
    let value = match op {
        BinaryOp::Add => {
            if matches!(left, Value::Str(_)) || matches!(right, Value::Str(_)) {
                let (mut left, right) = (left.to_string(), right.to_string());
                check_string_len(left.len() + right.len())?;
                left.push_str(&right);
                return Ok(Value::Str(left));
            }
            arithmetic(&left, &right, |a, b| a + b)
        }
        BinaryOp::Sub => arithmetic(&left, &right, |a, b| a - b),
        BinaryOp::Mul => arithmetic(&left, &right, |a, b| a * b),
        BinaryOp::Div => arithmetic(&left, &right, |a, b| a / b),
        BinaryOp::Mod => arithmetic(&left, &right, |a, b| a % b),
        BinaryOp::Pow => arithmetic(&left, &right, f64::powf),
        BinaryOp::Eq => Value::Bool(loose_equals(&left, &right)),
        BinaryOp::NotEq => Value::Bool(!loose_equals(&left, &right)),
        BinaryOp::Lt => compare(&left, &right, |o| o == Ordering::Less),
        BinaryOp::Le => compare(&left, &right, |o| o != Ordering::Greater),
        BinaryOp::Gt => compare(&left, &right, |o| o == Ordering::Greater),
        BinaryOp::Ge => compare(&left, &right, |o| o != Ordering::Less),
    };
    Ok(value)
}

fn arithmetic(left: &Value, right: &Value, f: impl Fn(f64, f64) -> f64) -> Value {
    match (to_number(left), to_number(right)) {
        (Some(a), Some(b)) if !left.is_null() && !right.is_null() => Value::Number(f(a, b)),
        _ => Value::Null,
    }
}

fn compare(left: &Value, right: &Value, test: impl Fn(Ordering) -> bool) -> Value {
    if left.is_null() || right.is_null() {
        return Value::Bool(false);
    }
    let ordering = match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => match (to_number(left), to_number(right)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    Value::Bool(ordering.is_some_and(test))
}

fn loose_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Number(_), Value::Str(_)) | (Value::Str(_), Value::Number(_)) => {
            match (to_number(left), to_number(right)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        _ => left == right,
    }
}

/// Numbers numerically, everything else by display text
fn default_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.total_cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn merge_sort(
    items: Vec<Value>,
    cmp: &mut dyn FnMut(&Value, &Value) -> Result<Ordering, ExpressionError>,
) -> Result<Vec<Value>, ExpressionError> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let mut left = items;
    let right = left.split_off(left.len() / 2);
    let left = merge_sort(left, cmp)?;
    let right = merge_sort(right, cmp)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(a), Some(b)) = (left.peek(), right.peek()) {
        if cmp(a, b)? == Ordering::Greater {
            merged.extend(right.next());
        } else {
            merged.extend(left.next());
        }
    }
    merged.extend(left);
    merged.extend(right);
    Ok(merged)
}
