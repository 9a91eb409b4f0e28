//! Widget definition discovery.
//!
//! One file per widget in the vault's widget directory. The file stem is the
//! widget id; `.yaml`/`.yml`, `.toml` and `.json` are recognised. A broken
//! file is recorded and skipped, it never stops the others from loading.

use crate::widgets::fields::build_field_specs;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use widget_types::{DisplayType, EditableKind, WidgetConfig, WidgetType};

const EXTENSIONS: &[&str] = &["yaml", "yml", "toml", "json"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid {format}: {message}")]
    Parse { format: &'static str, message: String },
    #[error("empty config")]
    Empty,
    #[error("invalid widget config: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("duplicate widget id '{0}'")]
    Duplicate(String),
}

#[derive(Debug, Clone)]
pub struct LoadedWidgetConfig {
    pub id: String,
    pub config: WidgetConfig,
    pub file_path: PathBuf,
}

#[derive(Debug)]
pub struct LoadError {
    pub id: String,
    pub file_path: PathBuf,
    pub error: ConfigError,
}

#[derive(Debug, Default)]
pub struct ConfigLoadResult {
    pub widgets: Vec<LoadedWidgetConfig>,
    pub errors: Vec<LoadError>,
    pub has_config_dir: bool,
}

/// Load every widget definition in `dir`. A missing directory is not an error.
pub async fn load_widget_configs(dir: &Path) -> ConfigLoadResult {
    let mut result = ConfigLoadResult::default();

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("[WIDGETS] Failed to read widget directory {}: {}", dir.display(), e);
            }
            return result;
        }
    };
    result.has_config_dir = true;

    let mut paths = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => paths.push(entry.path()),
            Ok(None) => break,
            Err(e) => {
                log::warn!("[WIDGETS] Error listing {}: {}", dir.display(), e);
                break;
            }
        }
    }
    paths.sort();

    let mut seen = HashSet::new();
    for path in paths {
        let Some((id, extension)) = widget_file(&path) else {
            continue;
        };

        if !seen.insert(id.clone()) {
            log::warn!("[WIDGETS] Duplicate widget id '{}' in {}", id, path.display());
            result.errors.push(LoadError {
                error: ConfigError::Duplicate(id.clone()),
                id,
                file_path: path,
            });
            continue;
        }

        let loaded = match tokio::fs::read_to_string(&path).await {
            Ok(text) => parse_widget_config(&id, &text, &extension),
            Err(e) => Err(ConfigError::Io(e)),
        };

        match loaded {
            Ok(config) => {
                log::debug!("[WIDGETS] Loaded widget '{}' from {}", id, path.display());
                result.widgets.push(LoadedWidgetConfig {
                    id,
                    config,
                    file_path: path,
                });
            }
            Err(error) => {
                log::warn!("[WIDGETS] Skipping {}: {}", path.display(), error);
                result.errors.push(LoadError {
                    id,
                    file_path: path,
                    error,
                });
            }
        }
    }

    log::info!(
        "[WIDGETS] Loaded {} widget(s) from {} ({} error(s))",
        result.widgets.len(),
        dir.display(),
        result.errors.len()
    );
    result
}

/// `(id, extension)` for recognised, non-hidden widget files
fn widget_file(path: &Path) -> Option<(String, String)> {
    let file_name = path.file_name()?.to_str()?;
    if file_name.starts_with('.') || !path.is_file() {
        return None;
    }
    let extension = path.extension()?.to_str()?.to_lowercase();
    if !EXTENSIONS.contains(&extension.as_str()) {
        return None;
    }
    let id = path.file_stem()?.to_str()?.to_string();
    Some((id, extension))
}

/// Parse and validate one widget definition
pub fn parse_widget_config(id: &str, text: &str, extension: &str) -> Result<WidgetConfig, ConfigError> {
    if is_blank(text) {
        return Err(ConfigError::Empty);
    }

    let raw: serde_json::Value = match extension {
        "yaml" | "yml" => serde_yaml::from_str(text).map_err(|e| ConfigError::Parse {
            format: "YAML",
            message: e.to_string(),
        })?,
        "toml" => toml::from_str(text).map_err(|e| ConfigError::Parse {
            format: "TOML",
            message: e.to_string(),
        })?,
        _ => serde_json::from_str(text).map_err(|e| ConfigError::Parse {
            format: "JSON",
            message: e.to_string(),
        })?,
    };
    if raw.is_null() {
        return Err(ConfigError::Empty);
    }

    let mut config: WidgetConfig =
        serde_json::from_value(raw).map_err(|e| ConfigError::Validation(vec![e.to_string()]))?;
    if config.name.trim().is_empty() {
        config.name = id.to_string();
    }

    let problems = validate_widget_config(id, &config);
    if problems.is_empty() {
        Ok(config)
    } else {
        Err(ConfigError::Validation(problems))
    }
}

/// Nothing but whitespace and `#` comments
fn is_blank(text: &str) -> bool {
    text.lines().map(str::trim).all(|line| line.is_empty() || line.starts_with('#'))
}

/// Every rule a config breaks; empty when valid
pub fn validate_widget_config(id: &str, config: &WidgetConfig) -> Vec<String> {
    let mut problems = Vec::new();

    if config.source.pattern.trim().is_empty() {
        problems.push("source.pattern must not be empty".to_string());
    }

    match config.widget_type {
        WidgetType::Aggregate => {
            if config.fields.is_empty() {
                problems.push("aggregate widgets need at least one field".to_string());
            }
            if let Err(errors) = build_field_specs(&config.fields) {
                problems.extend(errors);
            }
        }
        WidgetType::Similarity => {
            if config.dimensions.is_empty() {
                problems.push("similarity widgets need at least one dimension".to_string());
            }
        }
    }

    for dim in &config.dimensions {
        if dim.field.trim().is_empty() {
            problems.push("dimension field must not be empty".to_string());
        }
        if !(dim.weight >= 0.0 && dim.weight.is_finite()) {
            problems.push(format!("dimension '{}' has an invalid weight", dim.field));
        }
    }

    for (name, field) in config.fields.iter() {
        let Some(sim) = &field.similarity else { continue };
        if !config.includes.contains(&sim.reference) {
            problems.push(format!(
                "field '{}' references similarity widget '{}' which is not in includes",
                name, sim.reference
            ));
        }
    }

    if config.includes.iter().any(|included| included == id) {
        problems.push("a widget cannot include itself".to_string());
    }

    let display = &config.display;
    match display.display_type {
        DisplayType::Table if display.columns.is_empty() => {
            problems.push("table display needs at least one column".to_string());
        }
        DisplayType::Meter if display.min.is_none() || display.max.is_none() => {
            problems.push("meter display needs min and max".to_string());
        }
        _ => {}
    }

    for editable in &config.editable {
        match editable.kind {
            EditableKind::Select if editable.options.is_empty() => {
                problems.push(format!("select field '{}' needs options", editable.field));
            }
            EditableKind::Slider => match (editable.min, editable.max) {
                (Some(min), Some(max)) if min < max => {}
                _ => problems.push(format!("slider field '{}' needs min < max", editable.field)),
            },
            _ => {}
        }
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use widget_types::WidgetLocation;

    #[test]
    fn test_parse_yaml_keeps_field_order() {
        let yaml = r#"
name: Reading
type: aggregate
source:
  pattern: "books/*.md"
fields:
  total:
    count: true
  pages:
    sum: pages
display:
  type: stat
"#;
        let config = parse_widget_config("reading", yaml, "yaml").unwrap();
        assert_eq!(config.name, "Reading");
        let names: Vec<&str> = config.fields.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["total", "pages"]);
    }

    #[test]
    fn test_parse_toml_and_json() {
        let toml = r#"
type = "similarity"
location = "recall"

[source]
pattern = "books/*.md"

[[dimensions]]
field = "tags"
"#;
        let config = parse_widget_config("related", toml, "toml").unwrap();
        assert_eq!(config.widget_type, WidgetType::Similarity);
        assert_eq!(config.location, WidgetLocation::Recall);
        assert_eq!(config.name, "related");
        assert_eq!(config.dimensions[0].weight, 1.0);

        let json = r#"{"type": "aggregate", "source": {"pattern": "*.md"}, "fields": {"n": {"count": true}}}"#;
        assert!(parse_widget_config("n", json, "json").is_ok());
    }

    #[test]
    fn test_empty_and_comment_only() {
        assert!(matches!(parse_widget_config("a", "", "yaml"), Err(ConfigError::Empty)));
        assert!(matches!(
            parse_widget_config("a", "# nothing yet\n\n  # still nothing\n", "yml"),
            Err(ConfigError::Empty)
        ));
        assert!(matches!(parse_widget_config("a", "null", "yaml"), Err(ConfigError::Empty)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_widget_config("a", "type: [unclosed", "yaml"),
            Err(ConfigError::Parse { format: "YAML", .. })
        ));
        assert!(matches!(
            parse_widget_config("a", "{not json", "json"),
            Err(ConfigError::Parse { format: "JSON", .. })
        ));
        // schema mismatch is a validation failure
        assert!(matches!(
            parse_widget_config("a", "type: pie\nsource:\n  pattern: x\n", "yaml"),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_validation_rules() {
        let yaml = r#"
type: aggregate
source:
  pattern: "*.md"
fields:
  nothing: {}
  predicted:
    similarity:
      ref: related
      field: rating
includes: [me]
display:
  type: meter
  min: 0
editable:
  - field: status
    type: select
  - field: score
    type: slider
    min: 5
    max: 1
"#;
        let Err(ConfigError::Validation(problems)) = parse_widget_config("me", yaml, "yaml") else {
            panic!("expected validation failure");
        };
        let joined = problems.join("\n");
        assert!(joined.contains("'nothing'"), "{}", joined);
        assert!(joined.contains("not in includes"), "{}", joined);
        assert!(joined.contains("include itself"), "{}", joined);
        assert!(joined.contains("meter"), "{}", joined);
        assert!(joined.contains("select field 'status'"), "{}", joined);
        assert!(joined.contains("slider field 'score'"), "{}", joined);
    }

    #[test]
    fn test_type_specific_requirements() {
        let no_fields = "type: aggregate\nsource:\n  pattern: '*.md'\n";
        let no_dims = "type: similarity\nsource:\n  pattern: '*.md'\n";
        let no_columns = "type: aggregate\nsource:\n  pattern: '*.md'\nfields:\n  n:\n    count: true\ndisplay:\n  type: table\n";
        for text in [no_fields, no_dims, no_columns] {
            assert!(matches!(
                parse_widget_config("w", text, "yaml"),
                Err(ConfigError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        let good = "type: aggregate\nsource:\n  pattern: '*.md'\nfields:\n  n:\n    count: true\n";
        std::fs::write(dir.path().join("count.yaml"), good).unwrap();
        std::fs::write(dir.path().join("count.yml"), good).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{}").unwrap();
        std::fs::write(dir.path().join("empty.yml"), "# todo\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join(".hidden.yaml"), good).unwrap();

        let loaded = load_widget_configs(dir.path()).await;
        assert!(loaded.has_config_dir);
        assert_eq!(loaded.widgets.len(), 1);
        assert_eq!(loaded.widgets[0].id, "count");

        let mut errors: Vec<(&str, bool)> = loaded
            .errors
            .iter()
            .map(|e| (e.id.as_str(), matches!(e.error, ConfigError::Duplicate(_))))
            .collect();
        errors.sort();
        assert_eq!(errors, vec![("broken", false), ("count", true), ("empty", false)]);
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_widget_configs(&dir.path().join("absent")).await;
        assert!(!loaded.has_config_dir);
        assert!(loaded.widgets.is_empty());
        assert!(loaded.errors.is_empty());
    }
}
