//! In-memory result cache for one vault.
//!
//! Widget results are keyed by `(vault, widget, item path)`; similarity
//! rankings are kept separately per `(widget, path)`. Entries live until they
//! are invalidated, and carry the instant they were computed so readers can
//! judge staleness.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use widget_types::{CacheStats, SimilarItem, WidgetResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub vault_id: String,
    pub widget_id: String,
    pub item_path: Option<String>,
}

pub struct CachedResult {
    pub result: WidgetResult,
    pub computed_at: Instant,
}

struct CachedRanking {
    items: Vec<SimilarItem>,
}

pub struct WidgetCache {
    vault_id: String,
    entries: DashMap<CacheKey, CachedResult>,
    similarity: DashMap<(String, String), CachedRanking>,
    hits: AtomicU64,
    misses: AtomicU64,
    stale_after: Duration,
}

impl WidgetCache {
    pub fn new(vault_id: impl Into<String>, stale_after: Duration) -> Self {
        Self {
            vault_id: vault_id.into(),
            entries: DashMap::new(),
            similarity: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_after,
        }
    }

    fn key(&self, widget_id: &str, item_path: Option<&str>) -> CacheKey {
        CacheKey {
            vault_id: self.vault_id.clone(),
            widget_id: widget_id.to_string(),
            item_path: item_path.map(str::to_string),
        }
    }

    fn count(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, widget_id: &str, item_path: Option<&str>) -> Option<WidgetResult> {
        let found = self
            .entries
            .get(&self.key(widget_id, item_path))
            .map(|entry| entry.result.clone());
        self.count(found.is_some());
        found
    }

    /// Cached result flagged with whether it is older than the stale limit
    pub fn get_with_staleness(&self, widget_id: &str, item_path: Option<&str>) -> Option<WidgetResult> {
        let found = self.entries.get(&self.key(widget_id, item_path)).map(|entry| {
            let mut result = entry.result.clone();
            result.is_stale = entry.computed_at.elapsed() > self.stale_after;
            result
        });
        self.count(found.is_some());
        found
    }

    pub fn insert(&self, widget_id: &str, item_path: Option<&str>, result: WidgetResult) {
        self.entries.insert(
            self.key(widget_id, item_path),
            CachedResult {
                result,
                computed_at: Instant::now(),
            },
        );
    }

    pub fn get_similarity(&self, widget_id: &str, path: &str) -> Option<Vec<SimilarItem>> {
        let found = self
            .similarity
            .get(&(widget_id.to_string(), path.to_string()))
            .map(|entry| entry.items.clone());
        self.count(found.is_some());
        found
    }

    pub fn insert_similarity(&self, widget_id: &str, path: &str, items: Vec<SimilarItem>) {
        self.similarity
            .insert((widget_id.to_string(), path.to_string()), CachedRanking { items });
    }

    /// `(widget_id, item_path)` of every entry past the stale limit
    pub fn stale_entries(&self) -> Vec<(String, Option<String>)> {
        let mut stale: Vec<(String, Option<String>)> = self
            .entries
            .iter()
            .filter(|entry| entry.computed_at.elapsed() > self.stale_after)
            .map(|entry| (entry.key().widget_id.clone(), entry.key().item_path.clone()))
            .collect();
        stale.sort();
        stale
    }

    /// Drop every entry of one widget. Returns how many were removed.
    pub fn invalidate_widget(&self, widget_id: &str) -> usize {
        let before = self.entries.len() + self.similarity.len();
        self.entries.retain(|key, _| key.widget_id != widget_id);
        self.similarity.retain(|(id, _), _| id != widget_id);
        before - (self.entries.len() + self.similarity.len())
    }

    pub fn clear(&self) -> usize {
        let cleared = self.entries.len() + self.similarity.len();
        self.entries.clear();
        self.similarity.clear();
        cleared
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            widget_entries: self.entries.len(),
            similarity_entries: self.similarity.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use widget_types::{DisplayConfig, WidgetLocation, WidgetType};

    fn result(id: &str) -> WidgetResult {
        WidgetResult {
            widget_id: id.to_string(),
            name: id.to_string(),
            widget_type: WidgetType::Aggregate,
            location: WidgetLocation::Ground,
            data: None,
            is_empty: true,
            empty_reason: None,
            compute_time_ms: 0.0,
            display: DisplayConfig::default(),
            editable: None,
            is_stale: false,
        }
    }

    #[test]
    fn test_get_insert_and_stats() {
        let cache = WidgetCache::new("vault", Duration::from_secs(60));
        assert!(cache.get("a", None).is_none());
        cache.insert("a", None, result("a"));
        cache.insert("b", Some("notes/x.md"), result("b"));

        assert_eq!(cache.get("a", None).unwrap().widget_id, "a");
        assert!(cache.get("b", None).is_none());
        assert!(cache.get("b", Some("notes/x.md")).is_some());

        let stats = cache.stats();
        assert_eq!(stats.widget_entries, 2);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_invalidate_counts_both_maps() {
        let cache = WidgetCache::new("vault", Duration::from_secs(60));
        cache.insert("a", None, result("a"));
        cache.insert("a", Some("p.md"), result("a"));
        cache.insert("b", None, result("b"));
        cache.insert_similarity("a", "p.md", Vec::new());

        assert_eq!(cache.invalidate_widget("a"), 3);
        assert_eq!(cache.invalidate_widget("a"), 0);
        assert_eq!(cache.clear(), 1);
        assert_eq!(cache.stats().widget_entries, 0);
    }

    #[test]
    fn test_staleness() {
        let cache = WidgetCache::new("vault", Duration::ZERO);
        cache.insert("a", None, result("a"));
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get_with_staleness("a", None).unwrap().is_stale);
        assert_eq!(cache.stale_entries(), vec![("a".to_string(), None)]);

        let fresh = WidgetCache::new("vault", Duration::from_secs(3600));
        fresh.insert("a", None, result("a"));
        assert!(!fresh.get_with_staleness("a", None).unwrap().is_stale);
        assert!(fresh.stale_entries().is_empty());
    }
}
