//! Bounded, time-limited cache for STAC search results.
//!
//! The only shared mutable state in the core. Population is
//! last-writer-wins: two concurrent identical searches may both hit the
//! network, which is cheaper than serializing them behind a lock.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::trace;

use crate::config::CacheConfig;
use crate::stac::Item;

/// Composite key identifying one search request.
///
/// Geometry, query and headers are their serialized JSON forms; two
/// requests share an entry only when all four parts match exactly.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct SearchCacheKey {
    /// Catalog base URL.
    pub endpoint: String,
    /// Serialized GeoJSON geometry.
    pub geometry: String,
    /// Serialized passthrough search query.
    pub query: String,
    /// Serialized request headers.
    pub headers: String,
}

/// Time- and capacity-bounded store of search results.
///
/// Failed searches are never inserted; expiry and capacity pressure are
/// the only ways entries leave.
#[derive(Debug, Clone)]
pub struct SearchCache(Cache<SearchCacheKey, Arc<Vec<Item>>>);

impl SearchCache {
    /// Creates a cache holding up to `max_entries` results for `ttl` each.
    #[must_use]
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        Self(
            Cache::builder()
                .name("stac_search_cache")
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build(),
        )
    }

    /// Creates a cache from its configuration.
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries, config.ttl)
    }

    /// Returns the cached result for `key`, if still live.
    pub async fn get(&self, key: &SearchCacheKey) -> Option<Arc<Vec<Item>>> {
        let entry = self.0.get(key).await;
        trace!(
            "Search cache {} for {key:?} ({} entries)",
            if entry.is_some() { "HIT" } else { "MISS" },
            self.0.entry_count(),
        );
        entry
    }

    /// Stores a successful search result.
    pub async fn insert(&self, key: SearchCacheKey, items: Arc<Vec<Item>>) {
        self.0.insert(key, items).await;
    }

    /// Number of live entries.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.0.entry_count()
    }

    /// Applies pending internal operations so counts are accurate.
    pub async fn sync(&self) {
        self.0.run_pending_tasks().await;
    }
}

impl Default for SearchCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(geometry: &str) -> SearchCacheKey {
        SearchCacheKey {
            endpoint: "https://stac.example.com".to_string(),
            geometry: geometry.to_string(),
            query: "{}".to_string(),
            headers: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn entries_round_trip() {
        let cache = SearchCache::new(16, Duration::from_secs(60));
        assert!(cache.get(&key("a")).await.is_none());

        cache.insert(key("a"), Arc::new(vec![])).await;
        assert!(cache.get(&key("a")).await.is_some());
        // a different geometry is a different entry
        assert!(cache.get(&key("b")).await.is_none());
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = SearchCache::new(16, Duration::from_millis(50));
        cache.insert(key("a"), Arc::new(vec![])).await;
        assert!(cache.get(&key("a")).await.is_some());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.get(&key("a")).await.is_none());
    }

    #[tokio::test]
    async fn capacity_is_bounded() {
        let cache = SearchCache::new(1, Duration::from_secs(60));
        cache.insert(key("a"), Arc::new(vec![])).await;
        cache.insert(key("b"), Arc::new(vec![])).await;
        cache.sync().await;
        assert!(cache.entry_count() <= 1);
    }
}
