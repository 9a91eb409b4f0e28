//! Parse YAML frontmatter from vault notes into a field map.
//!
//! Frontmatter is read as YAML with serde_yaml. Notes often carry text that
//! strict YAML rejects (`title: Dune: Messiah`), so those blocks fall back
//! to a lenient line reader: `key: value` scalars, inline `[a, b]` lists,
//! block `- item` lists and one level of nested maps.

use serde_json::{Number, Value};
use std::path::Path;

/// Frontmatter fields of one note, in document order
pub type Fields = serde_json::Map<String, Value>;

/// Parse the frontmatter of a complete note file
pub fn parse_note_fields(content: &str) -> Fields {
    let (frontmatter, _body) = split_frontmatter(content);
    parse_fields(&frontmatter)
}

/// Split content into (frontmatter_yaml, body). Returns empty frontmatter if none found.
pub fn split_frontmatter(content: &str) -> (String, String) {
    let trimmed = content.trim_start();
    if !trimmed.starts_with("---") {
        return (String::new(), content.to_string());
    }

    // Find the closing ---
    let after_open = &trimmed[3..];
    if let Some(close_idx) = after_open.find("\n---") {
        let yaml = after_open[..close_idx].trim().to_string();
        let body_start = close_idx + 4; // skip \n---
        let body = if body_start < after_open.len() {
            after_open[body_start..].trim_start_matches('\n').to_string()
        } else {
            String::new()
        };
        (yaml, body)
    } else {
        (String::new(), content.to_string())
    }
}

/// Block content collected under a `key:` line with no inline value
enum Block {
    Pending,
    List(Vec<Value>),
    Map(Fields),
}

/// Parse a frontmatter YAML string into fields
pub fn parse_fields(yaml: &str) -> Fields {
    if yaml.trim().is_empty() {
        return Fields::new();
    }
    match serde_yaml::from_str::<Value>(yaml) {
        Ok(Value::Object(fields)) => fields,
        Ok(Value::Null) => Fields::new(),
        Ok(other) => {
            log::debug!("[NOTES] Frontmatter is a bare {}, reading it leniently", json_kind(&other));
            parse_lenient(yaml)
        }
        Err(e) => {
            log::debug!("[NOTES] Frontmatter is not strict YAML ({}), reading it leniently", e);
            parse_lenient(yaml)
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Array(_) => "list",
        Value::Object(_) => "map",
        _ => "scalar",
    }
}

/// Line-oriented reader for frontmatter that strict YAML rejects
fn parse_lenient(yaml: &str) -> Fields {
    let mut fields = Fields::new();
    let mut open: Option<(String, Block)> = None;

    for line in yaml.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let indent = line.len() - line.trim_start().len();
        let list_item = trimmed.strip_prefix("- ").or(if trimmed == "-" { Some("") } else { None });

        // Block list items may sit at the key's own indentation
        if let (Some(item), Some((_, block))) = (list_item, open.as_mut()) {
            match block {
                Block::Pending => *block = Block::List(vec![parse_scalar(item)]),
                Block::List(items) => items.push(parse_scalar(item)),
                Block::Map(_) => {}
            }
            continue;
        }

        if indent > 0 {
            if let (Some((_, block)), Some((key, value))) = (open.as_mut(), split_key_value(trimmed)) {
                match block {
                    Block::Pending => {
                        let mut map = Fields::new();
                        map.insert(key, parse_value(value));
                        *block = Block::Map(map);
                    }
                    Block::Map(map) => {
                        map.insert(key, parse_value(value));
                    }
                    Block::List(_) => {}
                }
            }
            continue;
        }

        flush_block(&mut fields, open.take());

        if let Some((key, value)) = split_key_value(trimmed) {
            if value.is_empty() {
                open = Some((key, Block::Pending));
            } else {
                fields.insert(key, parse_value(value));
            }
        }
    }

    flush_block(&mut fields, open.take());
    fields
}

fn flush_block(fields: &mut Fields, open: Option<(String, Block)>) {
    if let Some((key, block)) = open {
        let value = match block {
            Block::Pending => Value::Null,
            Block::List(items) => Value::Array(items),
            Block::Map(map) => Value::Object(map),
        };
        fields.insert(key, value);
    }
}

/// Split `key: value` at the first colon followed by whitespace or end of line
fn split_key_value(line: &str) -> Option<(String, &str)> {
    for (idx, ch) in line.char_indices() {
        if ch != ':' {
            continue;
        }
        let rest = &line[idx + 1..];
        if rest.is_empty() || rest.starts_with(' ') || rest.starts_with('\t') {
            let key = unquote(line[..idx].trim());
            if key.is_empty() {
                return None;
            }
            return Some((key, rest.trim()));
        }
    }
    None
}

fn parse_value(value: &str) -> Value {
    if value.starts_with('[') {
        Value::Array(parse_inline_list(value).iter().map(|item| parse_scalar(item)).collect())
    } else {
        parse_scalar(value)
    }
}

/// Parse a scalar: quoted strings stay strings, otherwise bool/null/number are detected
fn parse_scalar(raw: &str) -> Value {
    let raw = raw.trim();
    if is_quoted(raw) {
        return Value::String(unquote(raw));
    }

    // Trailing comment on an unquoted scalar
    let raw = match raw.find(" #") {
        Some(idx) => raw[..idx].trim_end(),
        None => raw,
    };

    match raw {
        "" | "null" | "~" => return Value::Null,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }

    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Ok(float) = raw.parse::<f64>() {
        if let Some(number) = Number::from_f64(float) {
            if float.is_finite() {
                return Value::Number(number);
            }
        }
    }

    Value::String(raw.to_string())
}

fn is_quoted(s: &str) -> bool {
    s.len() >= 2 && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
}

/// Remove surrounding quotes from a string
fn unquote(s: &str) -> String {
    let s = s.trim();
    if is_quoted(s) {
        s[1..s.len() - 1].replace("\\\"", "\"")
    } else {
        s.to_string()
    }
}

/// Split an inline YAML list like [foo, bar, "baz, qux"] into raw items
fn parse_inline_list(s: &str) -> Vec<String> {
    let s = s.trim();
    let inner = if s.starts_with('[') && s.ends_with(']') {
        &s[1..s.len() - 1]
    } else {
        s
    };

    let mut items = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in inner.chars() {
        match (ch, quote) {
            ('"' | '\'', None) => {
                quote = Some(ch);
                current.push(ch);
            }
            (c, Some(q)) if c == q => {
                quote = None;
                current.push(ch);
            }
            (',', None) => {
                items.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    items.push(current.trim().to_string());

    items.into_iter().filter(|item| !item.is_empty()).collect()
}

/// Title from frontmatter, falling back to the filename without extension
pub fn note_title(fields: &Fields, path: &str) -> String {
    match fields.get("title") {
        Some(Value::String(title)) if !title.trim().is_empty() => title.clone(),
        _ => Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string()),
    }
}
