use serde_json::Number;
use std::collections::BTreeMap;
use std::fmt;

pub type ValueMap = BTreeMap<String, Value>;

/// Runtime value of the expression language
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Vec<Value>),
    Object(ValueMap),
}

impl Value {
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn map_from_json(map: &serde_json::Map<String, serde_json::Value>) -> ValueMap {
        map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect()
    }

    /// Convert to JSON. Non-finite numbers become null; integral numbers are emitted as integers.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Final result normalization: NaN and ±Infinity become null
    pub fn normalize(self) -> Value {
        match self {
            Value::Number(n) if !n.is_finite() => Value::Null,
            other => other,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Number(n) => n.is_nan(),
            _ => false,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    /// Finite number, if this value is one
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) if n.is_finite() => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Property read: object keys, `length` of arrays and strings. Missing is null.
    pub fn member(&self, key: &str) -> Value {
        match self {
            Value::Object(map) => map.get(key).cloned().unwrap_or(Value::Null),
            Value::Array(items) if key == "length" => Value::Number(items.len() as f64),
            Value::Str(s) if key == "length" => Value::Number(s.chars().count() as f64),
            _ => Value::Null,
        }
    }

    /// Indexed read: arrays by position, objects by key, strings by character
    pub fn index(&self, index: &Value) -> Value {
        match (self, index) {
            (Value::Array(items), Value::Number(n)) => array_index(*n, items.len())
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null),
            (Value::Str(s), Value::Number(n)) => array_index(*n, s.chars().count())
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::Str(c.to_string()))
                .unwrap_or(Value::Null),
            (Value::Object(map), Value::Str(key)) => map.get(key).cloned().unwrap_or(Value::Null),
            (_, Value::Str(key)) => self.member(key),
            _ => Value::Null,
        }
    }

    /// Borrowed `index` for the cases that read an existing element
    pub fn index_ref(&self, index: &Value) -> Option<&Value> {
        match (self, index) {
            (Value::Array(items), Value::Number(n)) => array_index(*n, items.len()).and_then(|i| items.get(i)),
            (Value::Object(map), Value::Str(key)) => map.get(key),
            _ => None,
        }
    }

    pub fn index_mut(&mut self, index: &Value) -> Option<&mut Value> {
        match (self, index) {
            (Value::Array(items), Value::Number(n)) => {
                let i = array_index(*n, items.len())?;
                items.get_mut(i)
            }
            (Value::Object(map), Value::Str(key)) => map.get_mut(key),
            _ => None,
        }
    }

    /// Approximate heap bytes held by this value
    pub fn footprint(&self) -> usize {
        const SLOT: usize = std::mem::size_of::<Value>();
        match self {
            Value::Str(s) => s.len(),
            Value::Array(items) => items.iter().map(|v| SLOT + v.footprint()).sum(),
            Value::Object(map) => map.iter().map(|(k, v)| SLOT + k.len() + v.footprint()).sum(),
            _ => 0,
        }
    }

    /// Whether arrays and objects nest more than `limit` levels deep
    pub fn nests_deeper_than(&self, limit: usize) -> bool {
        match self {
            Value::Array(items) => limit == 0 || items.iter().any(|v| v.nests_deeper_than(limit - 1)),
            Value::Object(map) => limit == 0 || map.values().any(|v| v.nests_deeper_than(limit - 1)),
            _ => false,
        }
    }
}

fn array_index(n: f64, len: usize) -> Option<usize> {
    if n.fract() != 0.0 || n < 0.0 || n >= len as f64 {
        None
    } else {
        Some(n as usize)
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if !n.is_finite() {
        return serde_json::Value::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        return serde_json::Value::Number((n as i64).into());
    }
    Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

/// Number formatting for string concatenation: integers print without a fraction
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Str(s) => write!(f, "{}", s),
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join(","))
            }
            Value::Object(_) => write!(f, "[object Object]"),
        }
    }
}
