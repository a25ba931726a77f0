//! Expiring key/value cache shared by every query coordinator
//!
//! Provides an `ExpiringCache` that stores cloned values alongside the instant
//! they were stored and the TTL they were stored with. Stale entries are
//! evicted on the read that discovers them.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// A single cached value with its freshness metadata
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    /// The cached value
    value: V,
    /// When the value was stored
    stored_at: Instant,
    /// How long the value stays valid
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_valid(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) <= self.ttl
    }
}

/// Thread-safe TTL cache keyed by strings
///
/// TTL is supplied on every `set`, so a single cache can hold entries for
/// domains with very different refresh rates.
#[derive(Debug)]
pub struct ExpiringCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V> Default for ExpiringCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ExpiringCache<V> {
    /// Creates an empty cache
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Stores `value` under `key`, replacing any previous entry
    ///
    /// # Arguments
    ///
    /// * `key` - Cache key, usually `"<domain>_<params key>"`
    /// * `value` - Value returned by later reads
    /// * `ttl` - How long the entry stays valid from now
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "cache set");
        self.entries.lock().insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Removes a single entry
    pub fn invalidate(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Removes every entry
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        debug!(entries = entries.len(), "cache cleared");
        entries.clear();
    }

    /// Number of stored entries, including stale ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no entries are stored, stale ones included
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<V: Clone> ExpiringCache<V> {
    /// Returns the value for `key` if it is still within its TTL
    ///
    /// A stale entry is removed and reported as absent.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get(key) {
            Some(entry) if entry.is_valid(now) => Some(entry.value.clone()),
            Some(_) => {
                debug!(key = %key, "cache entry expired, evicting");
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_get_returns_value_immediately_after_set() {
        let cache = ExpiringCache::new();
        cache.set("publications__", vec!["a".to_string()], Duration::from_secs(60));

        assert_eq!(cache.get("publications__"), Some(vec!["a".to_string()]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_returns_none_for_missing_key() {
        let cache: ExpiringCache<u32> = ExpiringCache::new();
        assert!(cache.get("nonexistent").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_valid_exactly_at_ttl() {
        let cache = ExpiringCache::new();
        cache.set("key", 1, Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(10)).await;

        assert_eq!(cache.get("key"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_absent_and_evicted() {
        let cache = ExpiringCache::new();
        cache.set("key", 1, Duration::from_secs(10));

        tokio::time::advance(Duration::from_millis(10_001)).await;

        assert!(cache.get("key").is_none());
        assert_eq!(cache.len(), 0, "Stale entry should be evicted on read");

        cache.set("key", 2, Duration::from_secs(10));
        assert_eq!(cache.get("key"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_entry_ttl() {
        let cache = ExpiringCache::new();
        cache.set("short", "listing", Duration::from_secs(5));
        cache.set("long", "reference", Duration::from_secs(3600));

        tokio::time::advance(Duration::from_secs(60)).await;

        assert!(cache.get("short").is_none());
        assert_eq!(cache.get("long"), Some("reference"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_overwrites_and_resets_timestamp() {
        let cache = ExpiringCache::new();
        cache.set("key", "first", Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(8)).await;
        cache.set("key", "second", Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(8)).await;

        assert_eq!(cache.get("key"), Some("second"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_removes_everything() {
        let cache = ExpiringCache::new();
        cache.set("a", 1, Duration::from_secs(60));
        cache.set("b", 2, Duration::from_secs(60));

        cache.clear();

        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_removes_single_entry() {
        let cache = ExpiringCache::new();
        cache.set("a", 1, Duration::from_secs(60));
        cache.set("b", 2, Duration::from_secs(60));

        cache.invalidate("a");

        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b"), Some(2));
    }
}
