//! Cache eviction policies

use crate::cache::query_cache::{CacheEntry, CacheKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cache eviction policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least Recently Used
    #[default]
    LRU,
    /// Least Frequently Used
    LFU,
}

impl EvictionPolicy {
    /// Calculate the eviction score of an entry
    pub fn calculate_score(&self, entry: &CacheEntry, now: DateTime<Utc>) -> f64 {
        match self {
            // Idle time, older = higher score
            EvictionPolicy::LRU => now.signed_duration_since(entry.last_accessed()).num_milliseconds() as f64,
            // Less frequent = lower score
            EvictionPolicy::LFU => entry.access_count() as f64,
        }
    }

    /// Select keys to evict, best victims first
    pub fn select_victims(&self, candidates: Vec<(&CacheKey, &CacheEntry)>, count: usize) -> Vec<CacheKey> {
        let now = Utc::now();
        let mut scored: Vec<_> = candidates
            .into_iter()
            .map(|(key, entry)| (key.clone(), self.calculate_score(entry, now)))
            .collect();

        match self {
            EvictionPolicy::LRU => {
                scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            }
            EvictionPolicy::LFU => {
                scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            }
        }

        scored.into_iter().take(count).map(|(key, _)| key).collect()
    }
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionPolicy::LRU => write!(f, "lru"),
            EvictionPolicy::LFU => write!(f, "lfu"),
        }
    }
}
