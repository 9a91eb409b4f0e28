use crate::widgets::EngineSettings;
use crate::widgets::expr::ExpressionEvaluator;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable names - single source of truth
pub mod env_vars {
    pub const VAULT_DIR: &str = "VAULT_DIR";
    /// Widget definition directory, defaults to `<vault>/.widgets`
    pub const WIDGETS_DIR: &str = "WIDGETS_DIR";
    /// Cache namespace, defaults to the vault directory name
    pub const VAULT_ID: &str = "VAULT_ID";
    pub const EXPRESSION_TIMEOUT_MS: &str = "EXPRESSION_TIMEOUT_MS";
    pub const EXPRESSION_MAX_STEPS: &str = "EXPRESSION_MAX_STEPS";
    pub const WIDGET_CACHE_STALE_SECS: &str = "WIDGET_CACHE_STALE_SECS";
    pub const SIMILARITY_DEFAULT_LIMIT: &str = "SIMILARITY_DEFAULT_LIMIT";
}

/// Default values
pub mod defaults {
    pub const VAULT_DIR: &str = ".";
    pub const WIDGETS_DIR_NAME: &str = ".widgets";
    pub const VAULT_ID: &str = "vault";
    pub const EXPRESSION_TIMEOUT_MS: u64 = 1000;
    pub const EXPRESSION_MAX_STEPS: u64 = 100_000;
    pub const WIDGET_CACHE_STALE_SECS: u64 = 300;
    pub const SIMILARITY_DEFAULT_LIMIT: usize = 10;
}

#[derive(Clone, Debug)]
pub struct Config {
    pub vault_dir: PathBuf,
    pub widgets_dir: PathBuf,
    pub vault_id: String,
    pub expression_timeout_ms: u64,
    pub expression_max_steps: u64,
    pub cache_stale_secs: u64,
    pub similarity_limit: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let vault_dir = PathBuf::from(
            lookup(env_vars::VAULT_DIR).unwrap_or_else(|| defaults::VAULT_DIR.to_string()),
        );
        let widgets_dir = lookup(env_vars::WIDGETS_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| vault_dir.join(defaults::WIDGETS_DIR_NAME));
        let vault_id = lookup(env_vars::VAULT_ID).unwrap_or_else(|| vault_name(&vault_dir));

        Self {
            expression_timeout_ms: parse_or(&lookup, env_vars::EXPRESSION_TIMEOUT_MS, defaults::EXPRESSION_TIMEOUT_MS),
            expression_max_steps: parse_or(&lookup, env_vars::EXPRESSION_MAX_STEPS, defaults::EXPRESSION_MAX_STEPS),
            cache_stale_secs: parse_or(&lookup, env_vars::WIDGET_CACHE_STALE_SECS, defaults::WIDGET_CACHE_STALE_SECS),
            similarity_limit: parse_or(&lookup, env_vars::SIMILARITY_DEFAULT_LIMIT, defaults::SIMILARITY_DEFAULT_LIMIT),
            vault_dir,
            widgets_dir,
            vault_id,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            evaluator: ExpressionEvaluator::new(
                Duration::from_millis(self.expression_timeout_ms),
                self.expression_max_steps,
            ),
            stale_after: Duration::from_secs(self.cache_stale_secs),
            similarity_limit: self.similarity_limit,
        }
    }
}

/// Parse a variable, falling back to the default when it is unset or invalid
fn parse_or<T: FromStr + Copy>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("{}='{}' is not a valid number, using the default", key, raw);
                default
            }
        },
    }
}

fn vault_name(vault_dir: &Path) -> String {
    let resolved = vault_dir.canonicalize().unwrap_or_else(|_| vault_dir.to_path_buf());
    resolved
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| defaults::VAULT_ID.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[(env_vars::VAULT_DIR, "/tmp/my-vault")]);
        assert_eq!(config.widgets_dir, PathBuf::from("/tmp/my-vault/.widgets"));
        assert_eq!(config.vault_id, "my-vault");
        assert_eq!(config.expression_timeout_ms, 1000);
        assert_eq!(config.expression_max_steps, 100_000);
        assert_eq!(config.similarity_limit, 10);

        let settings = config.engine_settings();
        assert_eq!(settings.stale_after, Duration::from_secs(300));
        assert_eq!(settings.evaluator.timeout(), Duration::from_millis(1000));
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let config = config(&[
            (env_vars::WIDGETS_DIR, "/etc/widgets"),
            (env_vars::VAULT_ID, "work"),
            (env_vars::EXPRESSION_TIMEOUT_MS, "250"),
            (env_vars::SIMILARITY_DEFAULT_LIMIT, "lots"),
        ]);
        assert_eq!(config.widgets_dir, PathBuf::from("/etc/widgets"));
        assert_eq!(config.vault_id, "work");
        assert_eq!(config.expression_timeout_ms, 250);
        assert_eq!(config.similarity_limit, 10);
    }
}
