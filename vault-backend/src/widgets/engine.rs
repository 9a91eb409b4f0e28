//! Per-vault widget engine.
//!
//! Owns the loaded widget definitions, their computation plans and the result
//! cache for exactly one vault. Lifecycle is `new -> initialize -> ... ->
//! shutdown`; computing before `initialize` or after `shutdown` is an error.

use crate::notes::frontmatter::note_title;
use crate::notes::vault::pattern_matches;
use crate::notes::VaultSource;
use crate::widgets::cache::WidgetCache;
use crate::widgets::expr::{EvalContext, ExpressionEvaluator, Value, ValueMap};
use crate::widgets::fields::{FieldSpec, build_field_specs};
use crate::widgets::graph::DependencyGraph;
use crate::widgets::loader::{self, LoadError};
use crate::widgets::pipeline::{self, Neighbor, PipelineInput, VaultItem};
use crate::widgets::similarity::rank_similar;
use crate::widgets::topo::{ComputationPlan, build_plan, describe_cycle};
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use widget_types::{
    CacheStats, HealthIssue, InvalidationReport, Severity, SimilarItem, WidgetConfig, WidgetLocation,
    WidgetResult, WidgetType,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("widget engine is not initialized")]
    NotInitialized,
    #[error("widget engine has been shut down")]
    ShutDown,
    #[error("widget engine is already initialized")]
    AlreadyInitialized,
    #[error("unknown widget '{0}'")]
    UnknownWidget(String),
    #[error("widget '{0}' is not a similarity widget")]
    NotSimilarity(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Uninitialized,
    Initialized,
    ShutDown,
}

pub type HealthCallback = Box<dyn Fn(HealthIssue) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default)]
pub struct ComputeOptions {
    /// Skip the cache and recompute
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub evaluator: ExpressionEvaluator,
    /// Age after which a cached result is reported stale
    pub stale_after: Duration,
    /// Ranking length when a widget sets no `display.limit`
    pub similarity_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            evaluator: ExpressionEvaluator::default(),
            stale_after: Duration::from_secs(300),
            similarity_limit: 10,
        }
    }
}

/// A validated widget with its precomputed plan
struct LoadedWidget {
    id: String,
    config: WidgetConfig,
    fields: Vec<FieldSpec>,
    plan: ComputationPlan,
}

pub struct WidgetEngine {
    vault_id: String,
    config_dir: PathBuf,
    source: Arc<dyn VaultSource>,
    settings: EngineSettings,
    state: EngineState,
    widgets: Vec<LoadedWidget>,
    load_errors: Vec<LoadError>,
    has_config_dir: bool,
    cache: WidgetCache,
    health: Option<HealthCallback>,
}

impl WidgetEngine {
    pub fn new(
        vault_id: impl Into<String>,
        config_dir: impl Into<PathBuf>,
        source: Arc<dyn VaultSource>,
        settings: EngineSettings,
    ) -> Self {
        let vault_id = vault_id.into();
        let cache = WidgetCache::new(vault_id.clone(), settings.stale_after);
        Self {
            vault_id,
            config_dir: config_dir.into(),
            source,
            settings,
            state: EngineState::Uninitialized,
            widgets: Vec::new(),
            load_errors: Vec::new(),
            has_config_dir: false,
            cache,
            health: None,
        }
    }

    pub fn set_health_callback(&mut self, callback: HealthCallback) {
        self.health = Some(callback);
    }

    fn report(&self, issue: HealthIssue) {
        match &self.health {
            Some(callback) => callback(issue),
            None => log::debug!(
                "[WIDGETS] {} {} (no health sink): {}",
                issue.severity.as_ref(),
                issue.id,
                issue.message
            ),
        }
    }

    fn ensure_ready(&self) -> Result<(), EngineError> {
        match self.state {
            EngineState::Initialized => Ok(()),
            EngineState::Uninitialized => Err(EngineError::NotInitialized),
            EngineState::ShutDown => Err(EngineError::ShutDown),
        }
    }

    // =====================================================
    // Lifecycle
    // =====================================================

    /// Load widget definitions. Broken files are reported, not fatal.
    pub async fn initialize(&mut self) -> Result<(), EngineError> {
        match self.state {
            EngineState::Uninitialized => {}
            EngineState::Initialized => return Err(EngineError::AlreadyInitialized),
            EngineState::ShutDown => return Err(EngineError::ShutDown),
        }

        let loaded = loader::load_widget_configs(&self.config_dir).await;
        self.has_config_dir = loaded.has_config_dir;

        for error in &loaded.errors {
            self.report(HealthIssue {
                id: format!("widget-config-{}", error.id),
                severity: Severity::Error,
                message: format!("Widget '{}' failed to load: {}", error.id, error.error),
                details: json!({
                    "file": error.file_path.display().to_string(),
                    "error": error.error.to_string(),
                }),
            });
        }

        self.widgets = loaded
            .widgets
            .into_iter()
            .map(|w| {
                let fields = build_field_specs(&w.config.fields).unwrap_or_default();
                let plan = build_plan(&DependencyGraph::build(&fields));
                LoadedWidget {
                    id: w.id,
                    config: w.config,
                    fields,
                    plan,
                }
            })
            .collect();
        self.load_errors = loaded.errors;
        self.state = EngineState::Initialized;

        log::info!(
            "[WIDGETS] Engine ready for vault '{}': {} widget(s), {} load error(s)",
            self.vault_id,
            self.widgets.len(),
            self.load_errors.len()
        );
        Ok(())
    }

    /// Drop all state. The engine cannot be used again.
    pub fn shutdown(&mut self) {
        let cleared = self.cache.clear();
        self.widgets.clear();
        self.load_errors.clear();
        self.health = None;
        self.state = EngineState::ShutDown;
        log::info!(
            "[WIDGETS] Engine for vault '{}' shut down ({} cache entries dropped)",
            self.vault_id,
            cleared
        );
    }

    /// `{id, name, type, location}` per loaded widget, for listings
    pub fn widget_summaries(&self) -> Vec<serde_json::Value> {
        self.widgets
            .iter()
            .map(|w| {
                json!({
                    "id": w.id,
                    "name": w.config.name,
                    "type": w.config.widget_type.as_ref(),
                    "location": w.config.location.as_ref(),
                })
            })
            .collect()
    }

    pub fn load_errors(&self) -> &[LoadError] {
        &self.load_errors
    }

    pub fn has_config_dir(&self) -> bool {
        self.has_config_dir
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    fn widget(&self, id: &str) -> Option<&LoadedWidget> {
        self.widgets.iter().find(|w| w.id == id)
    }

    // =====================================================
    // Computation API
    // =====================================================

    pub async fn compute_ground_widgets(&self, options: ComputeOptions) -> Result<Vec<WidgetResult>, EngineError> {
        self.ensure_ready()?;
        let mut results = Vec::new();
        for widget in self.widgets.iter().filter(|w| w.config.location == WidgetLocation::Ground) {
            results.push(self.widget_result(widget, None, options.force, Vec::new()).await);
        }
        Ok(results)
    }

    /// Recall widgets whose source pattern matches `path`
    pub async fn compute_recall_widgets(
        &self,
        path: &str,
        options: ComputeOptions,
    ) -> Result<Vec<WidgetResult>, EngineError> {
        self.ensure_ready()?;
        let mut results = Vec::new();
        for widget in self.widgets.iter().filter(|w| {
            w.config.location == WidgetLocation::Recall && pattern_matches(&w.config.source.pattern, path)
        }) {
            results.push(self.widget_result(widget, Some(path), options.force, Vec::new()).await);
        }
        Ok(results)
    }

    /// Ranked neighbors of `path` for one similarity widget
    pub async fn compute_similarity(&self, widget_id: &str, path: &str) -> Result<Vec<SimilarItem>, EngineError> {
        self.ensure_ready()?;
        let widget = self
            .widget(widget_id)
            .ok_or_else(|| EngineError::UnknownWidget(widget_id.to_string()))?;
        if widget.config.widget_type != WidgetType::Similarity {
            return Err(EngineError::NotSimilarity(widget_id.to_string()));
        }
        Ok(self.similar_items(widget, path, false).await.unwrap_or_default())
    }

    /// Stale-while-revalidate read of the ground widgets: cached copies are
    /// returned as-is with `is_stale` set, missing ones are computed.
    pub async fn ground_widgets_swr(&self) -> Result<Vec<WidgetResult>, EngineError> {
        self.ensure_ready()?;
        let mut results = Vec::new();
        for widget in self.widgets.iter().filter(|w| w.config.location == WidgetLocation::Ground) {
            let result = match self.cache.get_with_staleness(&widget.id, None) {
                Some(cached) => cached,
                None => self.compute_and_store(widget, None, false, Vec::new()).await,
            };
            results.push(result);
        }
        Ok(results)
    }

    /// Recompute every stale cache entry, bypassing cached rankings and
    /// includes. Returns the refreshed widget ids.
    pub async fn revalidate_stale(&self) -> Result<Vec<String>, EngineError> {
        self.ensure_ready()?;
        let mut refreshed: Vec<String> = Vec::new();
        for (widget_id, item_path) in self.cache.stale_entries() {
            let Some(widget) = self.widget(&widget_id) else { continue };
            self.compute_and_store(widget, item_path.as_deref(), true, Vec::new()).await;
            if !refreshed.contains(&widget_id) {
                refreshed.push(widget_id);
            }
        }
        if !refreshed.is_empty() {
            log::debug!("[WIDGETS] Revalidated {} stale widget(s)", refreshed.len());
        }
        Ok(refreshed)
    }

    // =====================================================
    // Invalidation
    // =====================================================

    /// Invalidate widgets reading any of `paths`, plus every widget that
    /// includes one of them, directly or through other includes.
    pub fn handle_files_changed(&self, paths: &[String]) -> Result<InvalidationReport, EngineError> {
        self.ensure_ready()?;

        let mut affected: HashSet<&str> = self
            .widgets
            .iter()
            .filter(|w| paths.iter().any(|p| pattern_matches(&w.config.source.pattern, p)))
            .map(|w| w.id.as_str())
            .collect();

        loop {
            let includers: Vec<&str> = self
                .widgets
                .iter()
                .filter(|w| !affected.contains(w.id.as_str()))
                .filter(|w| w.config.includes.iter().any(|inc| affected.contains(inc.as_str())))
                .map(|w| w.id.as_str())
                .collect();
            if includers.is_empty() {
                break;
            }
            affected.extend(includers);
        }

        let mut report = InvalidationReport::default();
        for widget in self.widgets.iter().filter(|w| affected.contains(w.id.as_str())) {
            report.cleared_entries += self.cache.invalidate_widget(&widget.id);
            report.invalidated.push(widget.id.clone());
        }
        if !report.invalidated.is_empty() {
            log::debug!(
                "[WIDGETS] {} changed file(s) invalidated {:?} ({} entries)",
                paths.len(),
                report.invalidated,
                report.cleared_entries
            );
        }
        Ok(report)
    }

    pub fn invalidate_widget(&self, widget_id: &str) -> usize {
        self.cache.invalidate_widget(widget_id)
    }

    pub fn invalidate_all(&self) -> usize {
        self.cache.clear()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // =====================================================
    // Widget computation
    // =====================================================

    /// Cached result, computing on a miss. Boxed because includes recurse.
    fn widget_result<'a>(
        &'a self,
        widget: &'a LoadedWidget,
        item_path: Option<&'a str>,
        force: bool,
        chain: Vec<String>,
    ) -> BoxFuture<'a, WidgetResult> {
        async move {
            let item_path = match widget.config.location {
                WidgetLocation::Recall => item_path,
                WidgetLocation::Ground => None,
            };
            if !force {
                if let Some(cached) = self.cache.get(&widget.id, item_path) {
                    log::debug!("[WIDGETS] Cache hit for '{}'", widget.id);
                    return cached;
                }
            }
            self.compute_and_store(widget, item_path, force, chain).await
        }
        .boxed()
    }

    async fn compute_and_store(
        &self,
        widget: &LoadedWidget,
        item_path: Option<&str>,
        force: bool,
        chain: Vec<String>,
    ) -> WidgetResult {
        let result = self.compute_widget(widget, item_path, force, chain).await;
        self.cache.insert(&widget.id, item_path, result.clone());
        result
    }

    /// `force` also recomputes included widgets and similarity rankings
    async fn compute_widget(
        &self,
        widget: &LoadedWidget,
        item_path: Option<&str>,
        force: bool,
        mut chain: Vec<String>,
    ) -> WidgetResult {
        let started = Instant::now();
        chain.push(widget.id.clone());

        let outcome = match widget.config.widget_type {
            WidgetType::Similarity => self.similarity_data(widget, item_path, force).await,
            WidgetType::Aggregate => self.aggregate_data(widget, item_path, force, chain).await,
        };

        let (data, empty_reason) = match outcome {
            Ok(data) => (Some(data), None),
            Err(reason) => (None, Some(reason)),
        };
        let result = WidgetResult {
            widget_id: widget.id.clone(),
            name: widget.config.name.clone(),
            widget_type: widget.config.widget_type,
            location: widget.config.location,
            is_empty: data.is_none(),
            data,
            empty_reason,
            compute_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            display: widget.config.display.clone(),
            editable: (!widget.config.editable.is_empty()).then(|| widget.config.editable.clone()),
            is_stale: false,
        };
        log::debug!(
            "[WIDGETS] Computed {} '{}' in {:.2}ms{}",
            widget.config.widget_type.as_ref(),
            widget.id,
            result.compute_time_ms,
            if result.is_empty { " (empty)" } else { "" }
        );
        result
    }

    /// Ranking JSON, or the reason the widget is empty
    async fn similarity_data(
        &self,
        widget: &LoadedWidget,
        item_path: Option<&str>,
        force: bool,
    ) -> Result<serde_json::Value, String> {
        let Some(path) = item_path else {
            return Err("Similarity widgets need a current note".to_string());
        };
        match self.similar_items(widget, path, force).await {
            Some(items) => serde_json::to_value(items).map_err(|e| e.to_string()),
            None => Err(format!("File not found: {}", path)),
        }
    }

    /// Field values JSON, or the reason the widget is empty
    async fn aggregate_data(
        &self,
        widget: &LoadedWidget,
        item_path: Option<&str>,
        force: bool,
        chain: Vec<String>,
    ) -> Result<serde_json::Value, String> {
        let items = self.collect_items(&widget.config).await;
        if items.is_empty() {
            return Err(format!("No files match '{}'", widget.config.source.pattern));
        }

        let current = match item_path {
            Some(path) => match items.iter().position(|item| item.path == path) {
                Some(index) => Some(index),
                None => return Err(format!("File not found: {}", path)),
            },
            None => None,
        };

        if !widget.plan.cycles.is_empty() {
            self.report_cycles(widget);
        }

        let included = self.included_values(widget, item_path, force, chain).await;
        let neighbors = match item_path {
            Some(path) => self.similarity_neighbors(widget, path, force).await,
            None => HashMap::new(),
        };

        let input = PipelineInput {
            items: &items,
            current,
            included: &included,
            neighbors: &neighbors,
        };
        let output = pipeline::run_plan(&widget.plan, &widget.fields, &input, &self.settings.evaluator);
        for error in &output.errors {
            log::warn!("[WIDGETS] {}.{}: {}", widget.id, error.field, error.message);
        }
        Ok(output.to_json())
    }

    fn report_cycles(&self, widget: &LoadedWidget) {
        for warning in &widget.plan.warnings {
            log::warn!("[WIDGETS] {}: {}", widget.id, warning);
        }
        let described: Vec<String> = widget.plan.cycles.iter().map(|c| describe_cycle(c)).collect();
        self.report(HealthIssue {
            id: format!("widget-cycle-{}", widget.id),
            severity: Severity::Warning,
            message: format!(
                "Widget '{}' has dependency cycles: {}",
                widget.id,
                described.join(", ")
            ),
            details: json!({
                "cycles": widget.plan.cycles,
                "fields": widget.plan.cycle_fields,
            }),
        });
    }

    /// Values of included widgets keyed by id. Unknown and cyclic includes are null.
    async fn included_values(
        &self,
        widget: &LoadedWidget,
        item_path: Option<&str>,
        force: bool,
        chain: Vec<String>,
    ) -> ValueMap {
        let mut included = ValueMap::new();
        for id in &widget.config.includes {
            let value = if chain.contains(id) {
                log::warn!("[WIDGETS] Include cycle: {} -> {}", chain.join(" -> "), id);
                Value::Null
            } else if let Some(target) = self.widget(id) {
                let result = self.widget_result(target, item_path, force, chain.clone()).await;
                result.data.as_ref().map(Value::from_json).unwrap_or(Value::Null)
            } else {
                log::warn!("[WIDGETS] '{}' includes unknown widget '{}'", widget.id, id);
                Value::Null
            };
            included.insert(id.clone(), value);
        }
        included
    }

    /// Ranked neighbor frontmatter for every similarity field of `widget`
    async fn similarity_neighbors(
        &self,
        widget: &LoadedWidget,
        path: &str,
        force: bool,
    ) -> HashMap<String, Vec<Neighbor>> {
        let mut neighbors = HashMap::new();
        for spec in &widget.fields {
            for reference in spec.similarity_refs() {
                if neighbors.contains_key(reference) {
                    continue;
                }
                let target = match self.widget(reference) {
                    Some(target) if target.config.widget_type == WidgetType::Similarity => target,
                    _ => {
                        log::warn!(
                            "[WIDGETS] {}.{}: '{}' is not a similarity widget",
                            widget.id,
                            spec.name,
                            reference
                        );
                        continue;
                    }
                };

                let ranked = self.similar_items(target, path, force).await.unwrap_or_default();
                let mut list = Vec::with_capacity(ranked.len());
                for item in ranked {
                    match self.source.read_fields(&item.path).await {
                        Ok(fields) => list.push(Neighbor {
                            score: item.score,
                            fields: Value::map_from_json(&fields),
                        }),
                        Err(e) => log::debug!("[WIDGETS] Skipping neighbor {}: {}", item.path, e),
                    }
                }
                neighbors.insert(reference.to_string(), list);
            }
        }
        neighbors
    }

    /// Ranking for `path`, or `None` when the note is not in the widget's source
    async fn similar_items(&self, widget: &LoadedWidget, path: &str, force: bool) -> Option<Vec<SimilarItem>> {
        if !force {
            if let Some(cached) = self.cache.get_similarity(&widget.id, path) {
                return Some(cached);
            }
        }

        let items = self.collect_items(&widget.config).await;
        let source = items.iter().find(|item| item.path == path)?;
        let limit = widget.config.display.limit.unwrap_or(self.settings.similarity_limit);
        let ranked = rank_similar(source, &items, &widget.config.dimensions, limit);
        self.cache.insert_similarity(&widget.id, path, ranked.clone());
        Some(ranked)
    }

    /// Notes matching the source pattern and passing the filter, in path order
    async fn collect_items(&self, config: &WidgetConfig) -> Vec<VaultItem> {
        let paths = match self.source.list_files(&config.source.pattern).await {
            Ok(paths) => paths,
            Err(e) => {
                log::warn!("[WIDGETS] Cannot list '{}': {}", config.source.pattern, e);
                return Vec::new();
            }
        };

        let filter = match &config.source.filter {
            Some(source) => match self.settings.evaluator.compile(source) {
                Ok(compiled) => Some(compiled),
                Err(e) => {
                    log::warn!("[WIDGETS] Filter for '{}' rejected, no files match: {}", config.name, e);
                    return Vec::new();
                }
            },
            None => None,
        };

        let mut items = Vec::with_capacity(paths.len());
        for path in paths {
            let fields = match self.source.read_fields(&path).await {
                Ok(fields) => fields,
                Err(e) => {
                    log::warn!("[WIDGETS] Skipping {}: {}", path, e);
                    continue;
                }
            };
            let title = note_title(&fields, &path);
            let values = Value::map_from_json(&fields);

            if let Some(compiled) = &filter {
                let no_results = ValueMap::new();
                match self.settings.evaluator.run(compiled, &EvalContext::new(&values, &no_results)) {
                    Ok(keep) if keep.is_truthy() => {}
                    Ok(_) => continue,
                    Err(e) => {
                        log::debug!("[WIDGETS] Filter failed for {}: {}", path, e);
                        continue;
                    }
                }
            }

            items.push(VaultItem {
                path,
                title,
                fields: values,
            });
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::vault::compile_pattern;
    use crate::notes::{Fields, SourceError};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::{Mutex, RwLock};

    struct MemoryVault {
        notes: RwLock<BTreeMap<String, Fields>>,
    }

    impl MemoryVault {
        fn insert(&self, path: &str, fields: serde_json::Value) {
            let fields = fields.as_object().unwrap().clone();
            self.notes.write().unwrap().insert(path.to_string(), fields);
        }
    }

    #[async_trait]
    impl VaultSource for MemoryVault {
        async fn list_files(&self, pattern: &str) -> Result<Vec<String>, SourceError> {
            compile_pattern(pattern)?;
            Ok(self
                .notes
                .read()
                .unwrap()
                .keys()
                .filter(|path| pattern_matches(pattern, path))
                .cloned()
                .collect())
        }

        async fn read_fields(&self, path: &str) -> Result<Fields, SourceError> {
            self.notes
                .read()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| SourceError::NotFound(path.to_string()))
        }
    }

    fn vault() -> Arc<MemoryVault> {
        let notes: Vec<(&str, serde_json::Value)> = vec![
            ("books/a.md", json!({"title": "Alpha", "tags": ["x", "y"], "value": 10})),
            ("books/b.md", json!({"tags": ["x", "y"], "rating": 8, "value": 20})),
            ("books/c.md", json!({"tags": ["x"], "rating": 10})),
            ("books/d.md", json!({"tags": ["y"], "rating": 6})),
            ("books/e.md", json!({"tags": ["z"], "rating": 100})),
            ("journal/2026-01-01.md", json!({"mood": 3})),
        ];
        let notes = notes
            .into_iter()
            .map(|(path, fields)| (path.to_string(), fields.as_object().unwrap().clone()))
            .collect();
        Arc::new(MemoryVault {
            notes: RwLock::new(notes),
        })
    }

    struct Fixture {
        engine: WidgetEngine,
        vault: Arc<MemoryVault>,
        issues: Arc<Mutex<Vec<HealthIssue>>>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(files: &[(&str, &str)], settings: EngineSettings) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        for (name, text) in files {
            std::fs::write(dir.path().join(name), text).unwrap();
        }
        let vault = vault();
        let mut engine = WidgetEngine::new("test-vault", dir.path(), vault.clone(), settings);
        let issues = Arc::new(Mutex::new(Vec::new()));
        let sink = issues.clone();
        engine.set_health_callback(Box::new(move |issue| sink.lock().unwrap().push(issue)));
        engine.initialize().await.unwrap();
        Fixture {
            engine,
            vault,
            issues,
            _dir: dir,
        }
    }

    const DIAMOND: &str = r#"
name: Diamond
type: aggregate
source:
  pattern: "books/*.md"
fields:
  d:
    expr: "result.b + result.c"
  b:
    expr: "result.a * 2"
  c:
    expr: "result.a + 1"
  a:
    sum: value
"#;

    const RELATED: &str = r#"
type: similarity
location: recall
source:
  pattern: "books/*.md"
dimensions:
  - field: tags
    method: jaccard
display:
  type: list
"#;

    const PREDICT: &str = r#"
type: aggregate
location: recall
source:
  pattern: "books/*.md"
includes: [related]
fields:
  predicted:
    similarity:
      ref: related
      field: rating
"#;

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = WidgetEngine::new("v", dir.path(), vault(), EngineSettings::default());
        assert_eq!(
            engine.compute_ground_widgets(ComputeOptions::default()).await.unwrap_err(),
            EngineError::NotInitialized
        );
        engine.initialize().await.unwrap();
        assert!(engine.has_config_dir());
        assert!(engine.widget_summaries().is_empty());
        assert_eq!(engine.initialize().await.unwrap_err(), EngineError::AlreadyInitialized);

        engine.shutdown();
        assert_eq!(
            engine.compute_recall_widgets("books/a.md", ComputeOptions::default()).await.unwrap_err(),
            EngineError::ShutDown
        );
        assert_eq!(engine.initialize().await.unwrap_err(), EngineError::ShutDown);
    }

    #[tokio::test]
    async fn test_ground_diamond() {
        let f = fixture(&[("diamond.yaml", DIAMOND)], EngineSettings::default()).await;
        let results = f.engine.compute_ground_widgets(ComputeOptions::default()).await.unwrap();
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.widget_id, "diamond");
        assert_eq!(result.name, "Diamond");
        assert!(!result.is_empty);
        assert_eq!(result.data, Some(json!({"d": 91, "b": 60, "c": 31, "a": 30})));
        let keys: Vec<&String> = result.data.as_ref().unwrap().as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["d", "b", "c", "a"]);
        assert!(f.issues.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_collection() {
        let config = "type: aggregate\nsource:\n  pattern: 'movies/*.md'\nfields:\n  n:\n    count: true\n";
        let f = fixture(&[("movies.yaml", config)], EngineSettings::default()).await;
        let results = f.engine.compute_ground_widgets(ComputeOptions::default()).await.unwrap();
        assert!(results[0].is_empty);
        assert!(results[0].data.is_none());
        assert!(results[0].empty_reason.as_deref().unwrap().contains("movies/*.md"));
    }

    #[tokio::test]
    async fn test_source_filter() {
        let good = "type: aggregate\nsource:\n  pattern: 'books/*.md'\n  filter: 'this.rating >= 8'\nfields:\n  n:\n    count: true\n";
        let bad = "type: aggregate\nsource:\n  pattern: 'books/*.md'\n  filter: \"require('fs')\"\nfields:\n  n:\n    count: true\n";
        let f = fixture(&[("bad.yaml", bad), ("good.yaml", good)], EngineSettings::default()).await;
        let results = f.engine.compute_ground_widgets(ComputeOptions::default()).await.unwrap();
        assert!(results[0].is_empty);
        assert_eq!(results[1].data, Some(json!({"n": 3})));
    }

    #[tokio::test]
    async fn test_cycles_reported_and_null() {
        let config = r#"
type: aggregate
source:
  pattern: "books/*.md"
fields:
  x:
    expr: "result.y + 1"
  y:
    expr: "result.x + 1"
  n:
    count: true
"#;
        let f = fixture(&[("loop.yaml", config)], EngineSettings::default()).await;
        let results = f.engine.compute_ground_widgets(ComputeOptions::default()).await.unwrap();
        assert_eq!(results[0].data, Some(json!({"x": null, "y": null, "n": 5})));

        let issues = f.issues.lock().unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].id, "widget-cycle-loop");
        assert_eq!(issues[0].severity, Severity::Warning);
        assert_eq!(issues[0].details["cycles"], json!([["x", "y"]]));
        assert!(issues[0].message.contains("x -> y -> x"));
    }

    #[tokio::test]
    async fn test_recall_similarity_and_weighted_prediction() {
        let f = fixture(
            &[("predict.yaml", PREDICT), ("related.yaml", RELATED), ("diamond.yaml", DIAMOND)],
            EngineSettings::default(),
        )
        .await;
        let results = f
            .engine
            .compute_recall_widgets("books/a.md", ComputeOptions::default())
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.widget_id.as_str()).collect();
        assert_eq!(ids, vec!["predict", "related"]);

        assert_eq!(results[0].data, Some(json!({"predicted": 8})));
        let ranked = results[1].data.as_ref().unwrap().as_array().unwrap();
        let paths: Vec<&str> = ranked.iter().map(|r| r["path"].as_str().unwrap()).collect();
        assert_eq!(paths, vec!["books/b.md", "books/c.md", "books/d.md"]);
        assert_eq!(ranked[0]["title"], "b");

        let direct = f.engine.compute_similarity("related", "books/a.md").await.unwrap();
        assert_eq!(direct.len(), 3);
        assert_eq!(direct[0].score, 1.0);

        // journal notes do not match any recall widget
        let none = f
            .engine
            .compute_recall_widgets("journal/2026-01-01.md", ComputeOptions::default())
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_recall_missing_file() {
        let f = fixture(&[("predict.yaml", PREDICT), ("related.yaml", RELATED)], EngineSettings::default()).await;
        let results = f
            .engine
            .compute_recall_widgets("books/zzz.md", ComputeOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        for result in &results {
            assert!(result.is_empty);
            assert_eq!(result.empty_reason.as_deref(), Some("File not found: books/zzz.md"));
        }
    }

    #[tokio::test]
    async fn test_compute_similarity_errors() {
        let f = fixture(&[("diamond.yaml", DIAMOND), ("related.yaml", RELATED)], EngineSettings::default()).await;
        assert_eq!(
            f.engine.compute_similarity("nope", "books/a.md").await.unwrap_err(),
            EngineError::UnknownWidget("nope".into())
        );
        assert_eq!(
            f.engine.compute_similarity("diamond", "books/a.md").await.unwrap_err(),
            EngineError::NotSimilarity("diamond".into())
        );
        assert!(f.engine.compute_similarity("related", "books/missing.md").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_errors_reported() {
        let f = fixture(
            &[("broken.yaml", "type: aggregate\n"), ("diamond.yaml", DIAMOND)],
            EngineSettings::default(),
        )
        .await;
        assert_eq!(
            f.engine.widget_summaries(),
            vec![json!({"id": "diamond", "name": "Diamond", "type": "aggregate", "location": "ground"})]
        );
        assert_eq!(f.engine.load_errors().len(), 1);
        let issues = f.issues.lock().unwrap();
        assert_eq!(issues[0].id, "widget-config-broken");
        assert_eq!(issues[0].severity, Severity::Error);
    }

    const SUMMARY: &str = r#"
type: aggregate
source:
  pattern: "journal/*.md"
includes: [diamond]
fields:
  entries:
    count: true
  book_total:
    expr: "included.diamond.a"
"#;

    #[tokio::test]
    async fn test_includes_cache_and_invalidation() {
        let f = fixture(&[("diamond.yaml", DIAMOND), ("summary.yaml", SUMMARY)], EngineSettings::default()).await;
        let first = f.engine.compute_ground_widgets(ComputeOptions::default()).await.unwrap();
        assert_eq!(first[1].data, Some(json!({"entries": 1, "book_total": 30})));

        let stats = f.engine.cache_stats();
        assert_eq!(stats.widget_entries, 2);
        assert_eq!(stats.hits, 1); // summary's include of diamond

        f.engine.compute_ground_widgets(ComputeOptions::default()).await.unwrap();
        assert_eq!(f.engine.cache_stats().hits, 3);

        let report = f.engine.handle_files_changed(&["books/new.md".to_string()]).unwrap();
        assert_eq!(report.invalidated, vec!["diamond", "summary"]);
        assert_eq!(report.cleared_entries, 2);

        let untouched = f.engine.handle_files_changed(&["misc/other.md".to_string()]).unwrap();
        assert!(untouched.invalidated.is_empty());

        f.engine.compute_ground_widgets(ComputeOptions { force: true }).await.unwrap();
        assert_eq!(f.engine.invalidate_widget("summary"), 1);
        assert_eq!(f.engine.invalidate_all(), 1);
        assert_eq!(f.engine.cache_stats().widget_entries, 0);
    }

    #[tokio::test]
    async fn test_stale_while_revalidate() {
        let settings = EngineSettings {
            stale_after: Duration::ZERO,
            ..Default::default()
        };
        let f = fixture(&[("diamond.yaml", DIAMOND)], settings).await;

        let fresh = f.engine.ground_widgets_swr().await.unwrap();
        assert!(!fresh[0].is_stale);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let stale = f.engine.ground_widgets_swr().await.unwrap();
        assert!(stale[0].is_stale);
        assert_eq!(stale[0].data, fresh[0].data);

        assert_eq!(f.engine.revalidate_stale().await.unwrap(), vec!["diamond"]);
    }

    #[tokio::test]
    async fn test_force_sees_new_notes() {
        let f = fixture(
            &[("diamond.yaml", DIAMOND), ("predict.yaml", PREDICT), ("related.yaml", RELATED)],
            EngineSettings::default(),
        )
        .await;
        let ground = f.engine.compute_ground_widgets(ComputeOptions::default()).await.unwrap();
        assert_eq!(ground[0].data.as_ref().unwrap()["a"], 30);
        let recall = f
            .engine
            .compute_recall_widgets("books/a.md", ComputeOptions::default())
            .await
            .unwrap();
        assert_eq!(recall[0].data, Some(json!({"predicted": 8})));
        assert_eq!(recall[1].data.as_ref().unwrap().as_array().unwrap().len(), 3);

        f.vault.insert("books/f.md", json!({"tags": ["x", "y"], "rating": 2, "value": 5}));

        // cached reads still see the old vault
        let cached = f.engine.compute_ground_widgets(ComputeOptions::default()).await.unwrap();
        assert_eq!(cached[0].data.as_ref().unwrap()["a"], 30);

        let ground = f.engine.compute_ground_widgets(ComputeOptions { force: true }).await.unwrap();
        assert_eq!(ground[0].data.as_ref().unwrap()["a"], 35);

        let recall = f
            .engine
            .compute_recall_widgets("books/a.md", ComputeOptions { force: true })
            .await
            .unwrap();
        let ranked = recall[1].data.as_ref().unwrap().as_array().unwrap();
        let paths: Vec<&str> = ranked.iter().map(|r| r["path"].as_str().unwrap()).collect();
        assert_eq!(paths, vec!["books/b.md", "books/f.md", "books/c.md", "books/d.md"]);
        assert_eq!(recall[0].data, Some(json!({"predicted": 6})));
    }

    #[tokio::test]
    async fn test_revalidate_refreshes_similarity() {
        let settings = EngineSettings {
            stale_after: Duration::ZERO,
            ..Default::default()
        };
        let f = fixture(&[("related.yaml", RELATED)], settings).await;
        let before = f
            .engine
            .compute_recall_widgets("books/a.md", ComputeOptions::default())
            .await
            .unwrap();
        assert_eq!(before[0].data.as_ref().unwrap().as_array().unwrap().len(), 3);

        f.vault.insert("books/f.md", json!({"tags": ["x"]}));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(f.engine.revalidate_stale().await.unwrap(), vec!["related"]);

        let after = f
            .engine
            .compute_recall_widgets("books/a.md", ComputeOptions::default())
            .await
            .unwrap();
        assert_eq!(after[0].data.as_ref().unwrap().as_array().unwrap().len(), 4);
    }
}
