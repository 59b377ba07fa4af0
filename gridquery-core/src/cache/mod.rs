//! Compiled-query cache
//!
//! Bounded, lazily initialized store for compiled filters and index
//! predicate expansions, shared by every plan an engine builds.

pub mod eviction;
pub mod query_cache;

pub use eviction::EvictionPolicy;
pub use query_cache::{ArtifactKind, CacheEntry, CacheKey, CacheStats, QueryCache, QueryCacheConfig};
