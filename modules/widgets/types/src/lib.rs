//! Shared types for the widget engine and its API consumers.
//!
//! Widget definitions are read from one structured file per widget; the raw
//! shapes below mirror that file format. Computed output (`WidgetResult`) is
//! serialized camelCase for the web UI.

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use strum::AsRefStr;

// =====================================================
// Widget Definition Types
// =====================================================

/// What a widget computes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WidgetType {
    /// Named fields: aggregators over the collection and per-item expressions
    Aggregate,
    /// Ranked list of notes similar to the current one
    Similarity,
}

/// Where a widget is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WidgetLocation {
    /// Computed over the whole collection, no current note
    #[default]
    Ground,
    /// Computed relative to the note being viewed
    Recall,
}

/// Which files a widget reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Glob relative to the vault root, e.g. `books/*.md`
    pub pattern: String,
    /// Expression over `this` (frontmatter); truthy keeps the file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Reference to another widget's similarity ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityRef {
    #[serde(rename = "ref")]
    pub reference: String,
    pub field: String,
}

/// One field definition as written in the config file.
///
/// Every key is optional; at least one must be present for the field to be
/// valid. The engine turns this into a typed operation list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stddev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<SimilarityRef>,
}

/// Field definitions in declaration order.
///
/// Declaration order is significant (it breaks ties in the computation
/// order), so this is a list of pairs rather than a hash map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap(pub Vec<(String, FieldConfig)>);

impl FieldMap {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldConfig)> {
        self.0.iter().map(|(name, config)| (name, config))
    }

    pub fn get(&self, name: &str) -> Option<&FieldConfig> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }
}

impl<'de> Deserialize<'de> for FieldMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldMapVisitor;

        impl<'de> Visitor<'de> for FieldMapVisitor {
            type Value = FieldMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of field names to field definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<FieldMap, A::Error> {
                let mut fields: Vec<(String, FieldConfig)> = Vec::new();
                while let Some((name, config)) = access.next_entry::<String, FieldConfig>()? {
                    if fields.iter().any(|(n, _)| *n == name) {
                        return Err(de::Error::custom(format!("duplicate field '{}'", name)));
                    }
                    fields.push((name, config));
                }
                Ok(FieldMap(fields))
            }
        }

        deserializer.deserialize_map(FieldMapVisitor)
    }
}

impl Serialize for FieldMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, config) in &self.0 {
            map.serialize_entry(name, config)?;
        }
        map.end()
    }
}

/// Per-dimension scoring method for similarity widgets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMethod {
    /// Set overlap for array-valued fields
    #[default]
    Jaccard,
    /// Normalized inverse distance for numeric fields
    Proximity,
    /// Vector cosine
    Cosine,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionConfig {
    pub field: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub method: SimilarityMethod,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayType {
    #[default]
    Stat,
    Table,
    List,
    Meter,
    Chart,
    Cards,
}

/// A table column: either a bare field name or a field with a label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DisplayColumn {
    Field(String),
    Labeled {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
}

impl DisplayColumn {
    pub fn field(&self) -> &str {
        match self {
            DisplayColumn::Field(field) => field,
            DisplayColumn::Labeled { field, .. } => field,
        }
    }
}

/// Rendering hints. Unknown keys are kept and passed through to the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(rename = "type", default)]
    pub display_type: DisplayType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<DisplayColumn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Maximum rows for ranked lists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditableKind {
    Text,
    Number,
    Select,
    Slider,
    Toggle,
    Date,
}

/// A frontmatter field the UI may edit in place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditableField {
    pub field: String,
    #[serde(rename = "type")]
    pub kind: EditableKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
}

/// A complete widget definition (one file)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetConfig {
    /// Display name; the loader falls back to the file id when empty
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub widget_type: WidgetType,
    #[serde(default)]
    pub location: WidgetLocation,
    pub source: SourceConfig,
    #[serde(default, skip_serializing_if = "FieldMap::is_empty")]
    pub fields: FieldMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dimensions: Vec<DimensionConfig>,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub editable: Vec<EditableField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<String>,
}

// =====================================================
// Computed Output Types
// =====================================================

/// One neighbor in a similarity ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarItem {
    pub path: String,
    pub title: String,
    pub score: f64,
}

/// Computed output of one widget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetResult {
    pub widget_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub widget_type: WidgetType,
    pub location: WidgetLocation,
    /// Field map for aggregate widgets, ranked list for similarity widgets
    pub data: Option<Value>,
    pub is_empty: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_reason: Option<String>,
    pub compute_time_ms: f64,
    pub display: DisplayConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editable: Option<Vec<EditableField>>,
    /// Set by stale-while-revalidate reads when the cached copy is past its age limit
    #[serde(default)]
    pub is_stale: bool,
}

// =====================================================
// Engine Reporting Types
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Issue pushed to the health sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthIssue {
    pub id: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub widget_entries: usize,
    pub similarity_entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Outcome of a file-change notification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationReport {
    pub invalidated: Vec<String>,
    pub cleared_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_map_keeps_declaration_order() {
        let raw = r#"{
            "type": "aggregate",
            "source": { "pattern": "books/*.md" },
            "fields": {
                "zeta": { "count": true },
                "alpha": { "sum": "pages" },
                "mid": { "expr": "result.alpha / result.zeta" }
            }
        }"#;
        let config: WidgetConfig = serde_json::from_str(raw).unwrap();
        let names: Vec<&str> = config.fields.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(config.location, WidgetLocation::Ground);
        assert_eq!(config.fields.get("alpha").unwrap().sum.as_deref(), Some("pages"));
    }

    #[test]
    fn test_field_config_rejects_unknown_keys() {
        let raw = r#"{ "avgg": "rating" }"#;
        assert!(serde_json::from_str::<FieldConfig>(raw).is_err());
    }

    #[test]
    fn test_similarity_ref_uses_ref_key() {
        let raw = r#"{ "similarity": { "ref": "related", "field": "rating" } }"#;
        let config: FieldConfig = serde_json::from_str(raw).unwrap();
        let sim = config.similarity.unwrap();
        assert_eq!(sim.reference, "related");
        assert_eq!(sim.field, "rating");
    }

    #[test]
    fn test_display_columns_accept_both_forms() {
        let raw = r#"{ "type": "table", "columns": ["title", { "field": "rating", "label": "Rating" }], "accent": "blue" }"#;
        let display: DisplayConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(display.display_type, DisplayType::Table);
        assert_eq!(display.columns.len(), 2);
        assert_eq!(display.columns[1].field(), "rating");
        assert_eq!(display.extra.get("accent"), Some(&Value::String("blue".into())));
    }

    #[test]
    fn test_widget_result_serializes_camel_case() {
        let result = WidgetResult {
            widget_id: "reading".into(),
            name: "Reading".into(),
            widget_type: WidgetType::Aggregate,
            location: WidgetLocation::Ground,
            data: None,
            is_empty: true,
            empty_reason: Some("no files".into()),
            compute_time_ms: 1.5,
            display: DisplayConfig::default(),
            editable: None,
            is_stale: false,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["widgetId"], "reading");
        assert_eq!(json["isEmpty"], true);
        assert_eq!(json["emptyReason"], "no files");
        assert_eq!(json["type"], "aggregate");
        assert!(json.get("editable").is_none());
    }

    #[test]
    fn test_enum_string_forms() {
        assert_eq!(WidgetType::Similarity.as_ref(), "similarity");
        assert_eq!(WidgetLocation::Recall.as_ref(), "recall");
        assert_eq!(Severity::Warning.as_ref(), "warning");
        assert_eq!(SimilarityMethod::default(), SimilarityMethod::Jaccard);
    }
}
