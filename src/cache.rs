//! Review result caching.
//!
//! Keys reviews on the artifact fingerprint combined with the effective
//! session configuration, so an identical resubmission returns the prior
//! review without consulting the judge. Entries are evicted least-recently
//! -used past capacity and dropped lazily once older than the TTL.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::types::StructuredReview;

/// Cache key over artifact content and config digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(pub String);

impl CacheKey {
    /// Generate a key from the artifact and the effective config digest.
    pub fn for_audit(artifact: &str, config_digest: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"artifact:");
        hasher.update(artifact.as_bytes());
        hasher.update(b"\nconfig:");
        hasher.update(config_digest.as_bytes());
        CacheKey(format!("{:x}", hasher.finalize()))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0[..16]) // Short form for display
    }
}

/// Result cache sizing.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries before LRU eviction
    pub capacity: usize,
    /// Time-to-live for entries
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            ttl: Duration::minutes(30),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Entries evicted for capacity
    pub evictions: u64,
    /// Entries dropped past TTL
    pub expirations: u64,
    /// Number of live entries
    pub entry_count: u64,
}

impl CacheStats {
    /// Hit rate over all lookups.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct StoredEntry {
    review: StructuredReview,
    inserted_at: DateTime<Utc>,
    /// Monotonic recency tick; larger is more recent
    last_used: u64,
}

impl StoredEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        Utc::now() - self.inserted_at > ttl
    }
}

struct CacheInner {
    entries: HashMap<CacheKey, StoredEntry>,
    stats: CacheStats,
    tick: u64,
}

/// Shared review cache with LRU eviction and TTL expiry.
///
/// Stored reviews are returned by clone and never mutated in place; a single
/// mutex guards the map and no long work happens under it.
pub struct ResultCache {
    inner: Mutex<CacheInner>,
    config: CacheConfig,
}

impl ResultCache {
    /// Create a cache with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                stats: CacheStats::default(),
                tick: 0,
            }),
            config,
        }
    }

    /// Look up a review. Refreshes recency on hit; drops the entry and
    /// reports a miss when it has outlived the TTL.
    pub async fn get(&self, key: &CacheKey) -> Option<StructuredReview> {
        let mut inner = self.inner.lock().await;
        inner.tick += 1;
        let tick = inner.tick;

        let expired = match inner.entries.get(key) {
            Some(entry) => entry.is_expired(self.config.ttl),
            None => {
                inner.stats.misses += 1;
                return None;
            }
        };

        if expired {
            inner.entries.remove(key);
            inner.stats.expirations += 1;
            inner.stats.misses += 1;
            inner.stats.entry_count = inner.entries.len() as u64;
            return None;
        }

        let entry = inner.entries.get_mut(key).expect("checked above");
        entry.last_used = tick;
        let review = entry.review.clone();
        inner.stats.hits += 1;
        Some(review)
    }

    /// Insert or overwrite a review, evicting the least-recently-used entry
    /// when capacity is exceeded.
    pub async fn put(&self, key: CacheKey, review: StructuredReview) {
        let mut inner = self.inner.lock().await;
        inner.tick += 1;
        let tick = inner.tick;

        inner.entries.insert(
            key,
            StoredEntry {
                review,
                inserted_at: Utc::now(),
                last_used: tick,
            },
        );

        while inner.entries.len() > self.config.capacity {
            let lru = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match lru {
                Some(key) => {
                    inner.entries.remove(&key);
                    inner.stats.evictions += 1;
                }
                None => break,
            }
        }

        inner.stats.entry_count = inner.entries.len() as u64;
    }

    /// Remove entries whose review matches the predicate.
    pub async fn invalidate<F>(&self, predicate: F)
    where
        F: Fn(&CacheKey, &StructuredReview) -> bool,
    {
        let mut inner = self.inner.lock().await;
        inner.entries.retain(|k, e| !predicate(k, &e.review));
        inner.stats.entry_count = inner.entries.len() as u64;
    }

    /// Drop everything.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
        inner.stats.entry_count = 0;
    }

    /// Current statistics snapshot.
    pub async fn stats(&self) -> CacheStats {
        self.inner.lock().await.stats.clone()
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StructuredReview;

    fn review() -> StructuredReview {
        StructuredReview::fallback("test review", 1)
    }

    #[test]
    fn test_key_generation_is_deterministic() {
        let a = CacheKey::for_audit("artifact", "config");
        let b = CacheKey::for_audit("artifact", "config");
        let c = CacheKey::for_audit("artifact", "other config");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_get_miss_then_hit() {
        let cache = ResultCache::default();
        let key = CacheKey::for_audit("a", "c");

        assert!(cache.get(&key).await.is_none());
        cache.put(key.clone(), review()).await;
        assert!(cache.get(&key).await.is_some());

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry_is_lazy() {
        let cache = ResultCache::new(CacheConfig {
            capacity: 10,
            ttl: Duration::zero(),
        });
        let key = CacheKey::for_audit("a", "c");
        cache.put(key.clone(), review()).await;

        assert!(cache.get(&key).await.is_none());
        let stats = cache.stats().await;
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.entry_count, 0);
    }

    #[tokio::test]
    async fn test_lru_eviction_order() {
        let cache = ResultCache::new(CacheConfig {
            capacity: 2,
            ttl: Duration::hours(1),
        });
        let k1 = CacheKey::for_audit("one", "c");
        let k2 = CacheKey::for_audit("two", "c");
        let k3 = CacheKey::for_audit("three", "c");

        cache.put(k1.clone(), review()).await;
        cache.put(k2.clone(), review()).await;
        // Touch k1 so k2 becomes the LRU entry.
        assert!(cache.get(&k1).await.is_some());
        cache.put(k3.clone(), review()).await;

        assert!(cache.get(&k1).await.is_some());
        assert!(cache.get(&k2).await.is_none());
        assert!(cache.get(&k3).await.is_some());
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let cache = ResultCache::default();
        let key = CacheKey::for_audit("a", "c");

        let mut first = review();
        first.overall_score = 40.0;
        cache.put(key.clone(), first).await;

        let mut second = review();
        second.overall_score = 60.0;
        cache.put(key.clone(), second).await;

        assert_eq!(cache.get(&key).await.unwrap().overall_score, 60.0);
        assert_eq!(cache.stats().await.entry_count, 1);
    }

    #[tokio::test]
    async fn test_invalidate_by_predicate() {
        let cache = ResultCache::default();
        let k1 = CacheKey::for_audit("one", "c");
        let k2 = CacheKey::for_audit("two", "c");

        let mut low = review();
        low.overall_score = 30.0;
        let mut high = review();
        high.overall_score = 90.0;

        cache.put(k1.clone(), low).await;
        cache.put(k2.clone(), high).await;

        cache.invalidate(|_, r| r.overall_score < 50.0).await;

        assert!(cache.get(&k1).await.is_none());
        assert!(cache.get(&k2).await.is_some());
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = ResultCache::default();
        cache.put(CacheKey::for_audit("a", "c"), review()).await;
        cache.clear().await;
        assert_eq!(cache.stats().await.entry_count, 0);
    }
}
