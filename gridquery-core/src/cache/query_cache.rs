//! Compiled-query cache
//!
//! Holds compiled object filters and index-predicate expansions keyed by
//! canonical query text. The backing map is created on first `put` and never
//! replaced, so lookups against a warm cache take no lock beyond the map's own
//! shard guard. Entries are bounded by count and by idle time; the cache is
//! owned by whoever builds the engine and shared behind an `Arc`.

use crate::cache::eviction::EvictionPolicy;
use crate::monitoring::metrics::QueryMetrics;
use crate::query::filter::MatcherKind;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace};

/// What kind of artifact an entry holds
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Object filter compiled by a matcher of the given kind
    Filter(MatcherKind),
    /// Shannon expansion of a WHERE clause
    IndexPredicate,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Filter(kind) => write!(f, "filter/{}", kind),
            ArtifactKind::IndexPredicate => write!(f, "index-predicate"),
        }
    }
}

/// Cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Canonical query text
    pub query_text: String,
    pub kind: ArtifactKind,
    /// Accumulator signature, for filters that partially aggregate
    pub accumulators: Option<String>,
}

impl CacheKey {
    pub fn new(query_text: impl Into<String>, kind: ArtifactKind) -> Self {
        Self {
            query_text: query_text.into(),
            kind,
            accumulators: None,
        }
    }

    /// Attach an accumulator signature
    pub fn with_accumulators(mut self, signature: impl Into<String>) -> Self {
        self.accumulators = Some(signature.into());
        self
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.query_text)?;
        if let Some(signature) = &self.accumulators {
            write!(f, " {{{}}}", signature)?;
        }
        Ok(())
    }
}

/// Stored artifact with access bookkeeping
///
/// Access stamps are atomics so lookups only need the shard's read guard.
pub struct CacheEntry {
    artifact: Arc<dyn Any + Send + Sync>,
    /// Insertion time
    pub created_at: DateTime<Utc>,
    /// Milliseconds since the epoch of the last lookup that returned the entry
    last_accessed: AtomicI64,
    access_count: AtomicU64,
}

impl CacheEntry {
    /// Wrap a freshly compiled artifact
    pub fn new(artifact: Arc<dyn Any + Send + Sync>) -> Self {
        let now = Utc::now();
        Self {
            artifact,
            created_at: now,
            last_accessed: AtomicI64::new(now.timestamp_millis()),
            access_count: AtomicU64::new(0),
        }
    }

    /// Last time the entry was returned by a lookup
    pub fn last_accessed(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_accessed.load(Ordering::Relaxed)).unwrap_or(self.created_at)
    }

    /// Number of lookups that returned the entry
    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_accessed(&self, now: DateTime<Utc>) {
        self.last_accessed.fetch_max(now.timestamp_millis(), Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn set_last_accessed(&self, at: DateTime<Utc>) {
        self.last_accessed.store(at.timestamp_millis(), Ordering::Relaxed);
    }

    fn artifact<T: Clone + 'static>(&self) -> Option<T> {
        self.artifact.downcast_ref::<T>().cloned()
    }
}

impl Clone for CacheEntry {
    fn clone(&self) -> Self {
        Self {
            artifact: self.artifact.clone(),
            created_at: self.created_at,
            last_accessed: AtomicI64::new(self.last_accessed.load(Ordering::Relaxed)),
            access_count: AtomicU64::new(self.access_count()),
        }
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("created_at", &self.created_at)
            .field("last_accessed", &self.last_accessed())
            .field("access_count", &self.access_count())
            .finish_non_exhaustive()
    }
}

/// Compiled-query cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryCacheConfig {
    /// Maximum number of entries
    pub max_entries: usize,
    /// Idle time after which an entry is dropped, 0 disables idle expiry
    pub max_idle_secs: u64,
    /// Which entries go first when the cache is over capacity
    pub eviction_policy: EvictionPolicy,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_idle_secs: 300,
            eviction_policy: EvictionPolicy::LRU,
        }
    }
}

/// Cache of compiled query artifacts
pub struct QueryCache {
    store: OnceLock<DashMap<CacheKey, CacheEntry>>,
    config: QueryCacheConfig,
    stats: CacheStats,
    metrics: Option<Arc<QueryMetrics>>,
}

impl QueryCache {
    /// Create an empty cache; storage is allocated on first insertion
    pub fn new(config: QueryCacheConfig) -> Self {
        Self {
            store: OnceLock::new(),
            config,
            stats: CacheStats::default(),
            metrics: None,
        }
    }

    /// Create a cache with default configuration
    pub fn with_defaults() -> Self {
        Self::new(QueryCacheConfig::default())
    }

    /// Report hits, misses and evictions to prometheus as well
    pub fn with_metrics(mut self, metrics: Arc<QueryMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &QueryCacheConfig {
        &self.config
    }

    /// Look up an artifact. A type mismatch counts as a miss.
    pub fn get<T: Clone + 'static>(&self, key: &CacheKey) -> Option<T> {
        let Some(store) = self.store.get() else {
            self.record_miss();
            return None;
        };

        let now = Utc::now();
        let found = match store.get(key) {
            Some(entry) if !self.is_idle(&entry, now) => {
                entry.mark_accessed(now);
                entry.artifact::<T>()
            }
            Some(entry) => {
                // the guard must be released before removing from the same shard
                drop(entry);
                if store.remove(key).is_some() {
                    debug!(key = %key, "Dropping idle cache entry");
                    self.record_eviction();
                }
                None
            }
            None => None,
        };

        match found {
            Some(artifact) => {
                trace!(key = %key, "Query cache hit");
                self.record_hit();
                Some(artifact)
            }
            None => {
                self.record_miss();
                None
            }
        }
    }

    /// Store an artifact, replacing any previous one under the same key
    pub fn put<T: Send + Sync + 'static>(&self, key: CacheKey, artifact: T) {
        let store = self.store.get_or_init(|| {
            debug!(
                max_entries = self.config.max_entries,
                max_idle_secs = self.config.max_idle_secs,
                "Initializing query cache"
            );
            DashMap::new()
        });

        self.purge_idle(store);
        store.insert(key.clone(), CacheEntry::new(Arc::new(artifact)));
        self.evict_overflow(store, &key);
    }

    /// Return the cached artifact or compile, store and return a new one
    pub fn get_or_compile<T, E, F>(&self, key: CacheKey, compile: F) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(artifact) = self.get::<T>(&key) {
            return Ok(artifact);
        }
        let artifact = compile()?;
        self.put(key, artifact.clone());
        Ok(artifact)
    }

    /// Drop one entry
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.store
            .get()
            .map(|store| store.remove(key).is_some())
            .unwrap_or(false)
    }

    /// Drop every entry
    pub fn clear(&self) {
        if let Some(store) = self.store.get() {
            store.clear();
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.store.get().map(DashMap::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn is_idle(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        self.config.max_idle_secs > 0
            && now.signed_duration_since(entry.last_accessed()).num_milliseconds()
                > (self.config.max_idle_secs as i64).saturating_mul(1000)
    }

    fn purge_idle(&self, store: &DashMap<CacheKey, CacheEntry>) {
        if self.config.max_idle_secs == 0 {
            return;
        }
        let now = Utc::now();
        let before = store.len();
        store.retain(|_, entry| !self.is_idle(entry, now));
        for _ in store.len()..before {
            self.record_eviction();
        }
    }

    fn evict_overflow(&self, store: &DashMap<CacheKey, CacheEntry>, keep: &CacheKey) {
        let len = store.len();
        if self.config.max_entries == 0 || len <= self.config.max_entries {
            return;
        }

        let candidates: Vec<(CacheKey, CacheEntry)> = store
            .iter()
            .filter(|entry| entry.key() != keep)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let candidate_refs: Vec<_> = candidates.iter().map(|(k, v)| (k, v)).collect();

        let victims = self
            .config
            .eviction_policy
            .select_victims(candidate_refs, len - self.config.max_entries);

        for key in victims {
            if store.remove(&key).is_some() {
                debug!(key = %key, policy = %self.config.eviction_policy, "Evicting cache entry");
                self.record_eviction();
            }
        }
    }

    fn record_hit(&self) {
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_hit();
        }
    }

    fn record_miss(&self) {
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_miss();
        }
    }

    fn record_eviction(&self) {
        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_eviction();
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.len())
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    /// Get total hits
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get total misses
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Entries dropped for capacity or idleness
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Calculate hit rate
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(text: &str) -> CacheKey {
        CacheKey::new(text, ArtifactKind::Filter(MatcherKind::Document))
    }

    fn cache(max_entries: usize, eviction_policy: EvictionPolicy) -> QueryCache {
        QueryCache::new(QueryCacheConfig {
            max_entries,
            max_idle_secs: 0,
            eviction_policy,
        })
    }

    #[test]
    fn test_lazy_store() {
        let cache = QueryCache::with_defaults();
        assert!(cache.store.get().is_none());
        assert_eq!(cache.get::<String>(&key("a")), None);
        assert!(cache.store.get().is_none());

        cache.put(key("a"), "compiled".to_string());
        assert!(cache.store.get().is_some());
        assert_eq!(cache.get::<String>(&key("a")).as_deref(), Some("compiled"));
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert_eq!(cache.stats().hit_rate(), 0.5);
    }

    #[test]
    fn test_last_write_wins() {
        let cache = QueryCache::with_defaults();
        cache.put(key("a"), 1u32);
        cache.put(key("a"), 2u32);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get::<u32>(&key("a")), Some(2));
    }

    #[test]
    fn test_key_components_are_distinct() {
        let cache = QueryCache::with_defaults();
        let plain = key("FROM Person");
        let with_accumulators = key("FROM Person").with_accumulators("COUNT(C1->C1)");
        let row = CacheKey::new("FROM Person", ArtifactKind::Filter(MatcherKind::Row("C0:Any".into())));

        cache.put(plain.clone(), 1u32);
        assert_eq!(cache.get::<u32>(&with_accumulators), None);
        assert_eq!(cache.get::<u32>(&row), None);
        assert_eq!(cache.get::<u32>(&plain), Some(1));
    }

    #[test]
    fn test_type_mismatch_is_miss() {
        let cache = QueryCache::with_defaults();
        cache.put(key("a"), 1u32);
        assert_eq!(cache.get::<String>(&key("a")), None);
    }

    #[test]
    fn test_count_bound_lru() {
        let cache = cache(2, EvictionPolicy::LRU);
        cache.put(key("a"), 1u32);
        cache.put(key("b"), 2u32);
        {
            let store = cache.store.get().unwrap();
            store.get(&key("a")).unwrap().set_last_accessed(Utc::now() - chrono::Duration::seconds(10));
        }
        cache.put(key("c"), 3u32);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get::<u32>(&key("a")), None);
        assert_eq!(cache.get::<u32>(&key("c")), Some(3));
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn test_count_bound_lfu_keeps_new_entry() {
        let cache = cache(2, EvictionPolicy::LFU);
        cache.put(key("a"), 1u32);
        cache.put(key("b"), 2u32);
        cache.get::<u32>(&key("a"));
        cache.get::<u32>(&key("a"));
        cache.get::<u32>(&key("b"));
        cache.put(key("c"), 3u32);

        assert_eq!(cache.get::<u32>(&key("b")), None);
        assert_eq!(cache.get::<u32>(&key("a")), Some(1));
        assert_eq!(cache.get::<u32>(&key("c")), Some(3));
    }

    #[test]
    fn test_idle_expiry() {
        let cache = QueryCache::new(QueryCacheConfig {
            max_idle_secs: 60,
            ..QueryCacheConfig::default()
        });
        cache.put(key("a"), 1u32);
        {
            let store = cache.store.get().unwrap();
            store.get(&key("a")).unwrap().set_last_accessed(Utc::now() - chrono::Duration::seconds(61));
        }
        assert_eq!(cache.get::<u32>(&key("a")), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn test_lookup_refreshes_access_stamps() {
        let cache = QueryCache::with_defaults();
        cache.put(key("a"), 1u32);
        let stale = Utc::now() - chrono::Duration::seconds(30);
        cache.store.get().unwrap().get(&key("a")).unwrap().set_last_accessed(stale);

        let hits: Vec<Option<u32>> = std::thread::scope(|scope| {
            let lookups: Vec<_> = (0..4).map(|_| scope.spawn(|| cache.get::<u32>(&key("a")))).collect();
            lookups.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(hits, vec![Some(1); 4]);

        let store = cache.store.get().unwrap();
        let entry = store.get(&key("a")).unwrap();
        assert_eq!(entry.access_count(), 4);
        assert!(entry.last_accessed() > stale);
        assert_eq!(entry.clone().access_count(), 4);
    }

    #[test]
    fn test_get_or_compile_recompiles_after_eviction() {
        let cache = QueryCache::with_defaults();
        let mut compiled = 0;
        let mut compile = || -> Result<u32, String> {
            compiled += 1;
            Ok(7)
        };

        assert_eq!(cache.get_or_compile(key("a"), &mut compile), Ok(7));
        assert_eq!(cache.get_or_compile(key("a"), &mut compile), Ok(7));
        assert!(cache.invalidate(&key("a")));
        assert_eq!(cache.get_or_compile(key("a"), &mut compile), Ok(7));
        assert_eq!(compiled, 2);

        let failed: Result<u32, String> = cache.get_or_compile(key("b"), || Err("bad".into()));
        assert!(failed.is_err());
        assert_eq!(cache.get::<u32>(&key("b")), None);
    }

    #[test]
    fn test_metrics_reporting() {
        let metrics = Arc::new(QueryMetrics::new().unwrap());
        let cache = QueryCache::with_defaults().with_metrics(metrics.clone());
        cache.get::<u32>(&key("a"));
        cache.put(key("a"), 1u32);
        cache.get::<u32>(&key("a"));
        assert_eq!(metrics.cache_counts(), (1, 1));
    }

    #[test]
    fn test_key_display() {
        let key = key("FROM Person").with_accumulators("-,COUNT(C1->C1)");
        assert_eq!(key.to_string(), "[filter/document] FROM Person {-,COUNT(C1->C1)}");
    }
}
