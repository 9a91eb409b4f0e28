//! Pre-parse security pass shared by simple and block expressions.
//!
//! Runs on the raw source text before any parsing. Keywords are matched
//! case-insensitively on word boundaries, so `this.important` is fine while
//! `import(...)` is not.

use super::{ExpressionError, ExpressionMode};
use regex::Regex;
use std::sync::LazyLock;

/// Names that never belong in a widget expression
pub const BLOCKED_KEYWORDS: &[&str] = &[
    // module / import system
    "require", "import", "export", "exports", "module",
    // global objects
    "process", "global", "globalThis", "window", "document", "self", "Reflect", "Proxy",
    // code execution
    "eval", "Function", "constructor", "__proto__", "prototype",
    "__defineGetter__", "__defineSetter__", "__lookupGetter__", "__lookupSetter__",
    // network
    "fetch", "XMLHttpRequest", "WebSocket", "navigator",
    // filesystem / process spawn
    "fs", "child_process", "spawn", "exec", "execSync", "Buffer", "Deno", "Bun",
    // timers
    "setTimeout", "setInterval", "setImmediate", "clearTimeout", "clearInterval", "queueMicrotask",
];

/// Names bound to an inert value in every block scope
pub const SHADOWED_GLOBALS: &[&str] = &[
    "require", "process", "global", "globalThis", "window", "document", "module", "exports",
    "fetch", "eval", "Function", "setTimeout", "setInterval", "setImmediate", "Buffer",
];

static KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = BLOCKED_KEYWORDS
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)).unwrap()
});

static DANGEROUS_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r"__\w+__").unwrap(), "dunder property access"),
        (Regex::new(r"\[\s*['`]\s*(?:constructor|prototype|__proto__)").unwrap(), "computed prototype access"),
        (Regex::new(r#"\[\s*"\s*(?:constructor|prototype|__proto__)"#).unwrap(), "computed prototype access"),
        (Regex::new(r"`[^`]*\$\{").unwrap(), "template literal interpolation"),
    ]
});

/// `{ key: ...` or `{ "key": ...`, object literal syntax
static OBJECT_LITERAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{\s*(?:"[^"]*"|'[^']*'|[A-Za-z_$][\w$]*)\s*:"#).unwrap()
});

/// A leading object literal, which marks braced text as data rather than a block
static LEADING_OBJECT_LITERAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\{\s*(?:"[^"]*"|'[^']*'|[A-Za-z_$][\w$]*)\s*:"#).unwrap()
});

/// Longest accepted expression source, in bytes
pub const MAX_SOURCE_LEN: usize = 64 * 1024;

/// Validate expression text for the given mode
pub fn validate_expression(source: &str, mode: ExpressionMode) -> Result<(), ExpressionError> {
    if source.len() > MAX_SOURCE_LEN {
        return Err(ExpressionError::Security {
            reason: format!("expression is {} bytes, limit is {}", source.len(), MAX_SOURCE_LEN),
        });
    }

    if let Some(found) = KEYWORD_RE.find(source) {
        return Err(ExpressionError::Security {
            reason: format!("blocked keyword '{}'", found.as_str()),
        });
    }

    for (pattern, label) in DANGEROUS_PATTERNS.iter() {
        if let Some(found) = pattern.find(source) {
            return Err(ExpressionError::Security {
                reason: format!("{} ('{}')", label, found.as_str()),
            });
        }
    }

    if mode == ExpressionMode::Simple && OBJECT_LITERAL_RE.is_match(source) {
        return Err(ExpressionError::Security {
            reason: "object literal syntax is only allowed inside block expressions".to_string(),
        });
    }

    Ok(())
}

/// Braced text is a block unless it opens with an object literal
pub fn looks_like_block(source: &str) -> bool {
    let trimmed = source.trim();
    trimmed.starts_with('{') && trimmed.ends_with('}') && !LEADING_OBJECT_LITERAL_RE.is_match(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple(src: &str) -> Result<(), ExpressionError> {
        validate_expression(src, ExpressionMode::Simple)
    }

    #[test]
    fn test_blocks_dangerous_calls() {
        for src in [
            "require('fs')",
            "process.exit()",
            "this.__proto__",
            "fetch('https://example.com')",
            "PROCESS.env",
            "setTimeout(x, 10)",
            "this['constructor']",
            "`${this.x}`",
            "import('os')",
        ] {
            assert!(
                matches!(simple(src), Err(ExpressionError::Security { .. })),
                "expected security error for {}",
                src
            );
        }
    }

    #[test]
    fn test_allows_words_containing_keywords() {
        for src in [
            "this.important + 1",
            "this.processed * 2",
            "this.globalRank",
            "this.executive",
            "result.imports",
            "this.selfScore",
        ] {
            assert!(simple(src).is_ok(), "expected {} to pass", src);
        }
    }

    #[test]
    fn test_object_literal_only_in_blocks() {
        let src = "{ total: result.a + 1 }";
        assert!(simple(src).is_err());
        assert!(validate_expression("{ const o = { total: 1 }; return o.total }", ExpressionMode::Block).is_ok());
    }

    #[test]
    fn test_source_length_limit() {
        let long = format!("this.a + {}", "1".repeat(MAX_SOURCE_LEN));
        assert!(matches!(simple(&long), Err(ExpressionError::Security { .. })));
    }

    #[test]
    fn test_looks_like_block() {
        assert!(looks_like_block("{ return 1 }"));
        assert!(looks_like_block("  {\n let x = 1;\n return x;\n}  "));
        assert!(!looks_like_block("{ total: 1 }"));
        assert!(!looks_like_block("result.a + 1"));
    }
}
