//! Typed TTL caches.
//!
//! Each concern (domains, alias sets, return paths, DKIM keys, credentials, MX hosts)
//! owns its own cache instance, so sizing and eviction are independent.
//! Backed by `DashMap`, which gives per-key insert-or-get atomicity without a global lock.
//!
//! Expiry is measured with [`tokio::time::Instant`] so paused-clock tests can advance time.

use core::{hash::Hash, time::Duration};

use dashmap::DashMap;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// A concurrent cache where every entry carries its own expiry.
#[derive(Debug)]
pub struct TtlCache<K: Eq + Hash, V> {
    entries: DashMap<K, Entry<V>>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    /// A cache holding at most `capacity` entries. Zero means unbounded.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
        }
    }

    /// Fetch a live entry, dropping it if it has expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_live(now) {
                return Some(entry.value.clone());
            }
        }

        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        None
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        if self.capacity > 0
            && self.entries.len() >= self.capacity
            && !self.entries.contains_key(&key)
        {
            self.purge_expired();

            if self.entries.len() >= self.capacity {
                let victim = self.entries.iter().next().map(|entry| entry.key().clone());
                if let Some(victim) = victim {
                    self.entries.remove(&victim);
                }
            }
        }

        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.is_live(now));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

/// Outcome of a cached lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cached<V> {
    Found(V),
    Missing,
}

/// A lookup cache holding both positive and negative results.
///
/// A key maps to at most one of [`Cached::Found`] or [`Cached::Missing`]; recording one
/// replaces the other. Found and missing entries have separate TTLs.
#[derive(Debug)]
pub struct LookupCache<K: Eq + Hash, V> {
    entries: TtlCache<K, Cached<V>>,
    found_ttl: Duration,
    missing_ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> LookupCache<K, V> {
    pub fn new(capacity: usize, found_ttl: Duration, missing_ttl: Duration) -> Self {
        Self {
            entries: TtlCache::with_capacity(capacity),
            found_ttl,
            missing_ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<Cached<V>> {
        self.entries.get(key)
    }

    pub fn found(&self, key: K, value: V) {
        self.entries
            .insert_with_ttl(key, Cached::Found(value), self.found_ttl);
    }

    pub fn missing(&self, key: K) {
        self.entries
            .insert_with_ttl(key, Cached::Missing, self.missing_ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use pretty_assertions::assert_eq;

    use super::{Cached, LookupCache, TtlCache};

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let cache = TtlCache::default();
        cache.insert_with_ttl("key", 7, Duration::from_secs(10));

        assert_eq!(cache.get(&"key"), Some(7));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get(&"key"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_is_respected() {
        let cache = TtlCache::with_capacity(2);
        cache.insert_with_ttl(1, "a", Duration::from_secs(60));
        cache.insert_with_ttl(2, "b", Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.insert_with_ttl(3, "c", Duration::from_secs(60));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1), Some("a"));
        assert_eq!(cache.get(&3), Some("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn found_and_missing_are_exclusive() {
        let cache = LookupCache::new(0, Duration::from_secs(3600), Duration::from_secs(60));

        cache.missing("example.com");
        assert_eq!(cache.get(&"example.com"), Some(Cached::Missing));

        cache.found("example.com", 1);
        assert_eq!(cache.get(&"example.com"), Some(Cached::Found(1)));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn negative_ttl_is_shorter() {
        let cache = LookupCache::new(0, Duration::from_secs(3600), Duration::from_secs(60));
        cache.found("a", 1);
        cache.missing("b");

        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(cache.get(&"a"), Some(Cached::Found(1)));
        assert_eq!(cache.get(&"b"), None);
    }
}
