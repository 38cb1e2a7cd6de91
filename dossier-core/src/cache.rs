//! Time-boxed, bounded caches for evidence recovery and geocoding.
//!
//! Entries expire after a fixed TTL and the least recently used entry is
//! evicted once capacity is reached. Caches snapshot to plain JSON so they can
//! outlive the process through a [`SnapshotPort`](crate::persistence::SnapshotPort).

use crate::persistence::SnapshotPort;
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// A cached value with the time it was stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub value: V,
    pub stored_at: DateTime<Utc>,
}

/// Serializable form of a [`TtlCache`], oldest entry first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot<V> {
    pub entries: Vec<(String, CacheEntry<V>)>,
}

impl<V> Default for CacheSnapshot<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
}

impl CacheStats {
    /// Compute the hit rate as a fraction (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
pub struct TtlCache<V> {
    entries: LruCache<String, CacheEntry<V>>,
    ttl: Duration,
    stats: CacheStats,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl_secs: u64, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            ttl: Duration::seconds(
                i64::try_from(ttl_secs)
                    .unwrap_or(i64::MAX)
                    .min(i64::MAX / 1000),
            ),
            stats: CacheStats::default(),
        }
    }

    /// Restore from a snapshot, dropping anything already expired.
    pub fn from_snapshot(snapshot: CacheSnapshot<V>, ttl_secs: u64, capacity: usize) -> Self {
        let mut cache = Self::new(ttl_secs, capacity);
        let now = Utc::now();
        for (key, entry) in snapshot.entries {
            if !cache.is_expired(&entry, now) {
                cache.entries.put(key, entry);
            }
        }
        cache
    }

    pub fn get(&mut self, key: &str) -> Option<V> {
        self.get_at(key, Utc::now())
    }

    /// Lookup as of `now`; an expired entry is removed and counts as a miss.
    pub fn get_at(&mut self, key: &str, now: DateTime<Utc>) -> Option<V> {
        let expired = match self.entries.peek(key) {
            Some(entry) => self.is_expired(entry, now),
            None => {
                self.stats.misses += 1;
                return None;
            }
        };
        if expired {
            self.entries.pop(key);
            self.stats.expired += 1;
            self.stats.misses += 1;
            return None;
        }
        self.stats.hits += 1;
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        self.insert_at(key, value, Utc::now());
    }

    pub fn insert_at(&mut self, key: impl Into<String>, value: V, now: DateTime<Utc>) {
        self.entries.put(
            key.into(),
            CacheEntry {
                value,
                stored_at: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn snapshot(&self) -> CacheSnapshot<V> {
        let mut entries: Vec<(String, CacheEntry<V>)> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.reverse();
        CacheSnapshot { entries }
    }

    fn is_expired(&self, entry: &CacheEntry<V>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(entry.stored_at) > self.ttl
    }
}

/// Build a cache key from parts: lower-cased, whitespace collapsed, `|`-joined.
pub fn cache_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| {
            part.split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase()
        })
        .collect::<Vec<_>>()
        .join("|")
}

/// A [`TtlCache`] shared across tasks and persisted through a snapshot port.
///
/// Every insert writes the snapshot back; a failed write is logged and the
/// in-memory entry is kept.
pub struct PersistentCache<V> {
    inner: Mutex<TtlCache<V>>,
    port: Arc<dyn SnapshotPort<CacheSnapshot<V>>>,
}

impl<V: Clone> PersistentCache<V> {
    /// Restore from the port; unreadable snapshots start an empty cache.
    pub fn open(
        port: Arc<dyn SnapshotPort<CacheSnapshot<V>>>,
        ttl_secs: u64,
        capacity: usize,
    ) -> Self {
        let cache = match port.load() {
            Ok(Some(snapshot)) => TtlCache::from_snapshot(snapshot, ttl_secs, capacity),
            Ok(None) => TtlCache::new(ttl_secs, capacity),
            Err(e) => {
                warn!(error = %e, "Failed to load cache snapshot; starting empty");
                TtlCache::new(ttl_secs, capacity)
            }
        };
        Self {
            inner: Mutex::new(cache),
            port,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TtlCache<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.lock().get(key)
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        let snapshot = {
            let mut cache = self.lock();
            cache.insert(key, value);
            cache.snapshot()
        };
        if let Err(e) = self.port.save(&snapshot) {
            warn!(error = %e, "Failed to persist cache snapshot");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut cache: TtlCache<u32> = TtlCache::new(60, 4);
        cache.insert("a", 1);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().hit_rate(), 0.5);
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let mut cache: TtlCache<&'static str> = TtlCache::new(7 * 24 * 3600, 4);
        let stored = Utc::now() - Duration::days(8);
        cache.insert_at("old", "stale", stored);
        cache.insert_at("fresh", "ok", Utc::now() - Duration::days(6));

        assert_eq!(cache.get("old"), None);
        assert_eq!(cache.get("fresh"), Some("ok"));
        assert_eq!(cache.stats().expired, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let mut cache: TtlCache<u32> = TtlCache::new(60, 2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get("a"), Some(1));
        cache.insert("c", 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn test_zero_capacity_still_holds_one() {
        let mut cache: TtlCache<u32> = TtlCache::new(60, 0);
        cache.insert("a", 1);
        assert_eq!(cache.get("a"), Some(1));
    }

    #[test]
    fn test_snapshot_roundtrip_drops_expired() {
        let mut cache: TtlCache<u32> = TtlCache::new(3600, 10);
        cache.insert_at("expired", 0, Utc::now() - Duration::hours(2));
        cache.insert("first", 1);
        cache.insert("second", 2);

        let json = serde_json::to_string(&cache.snapshot()).unwrap();
        let snapshot: CacheSnapshot<u32> = serde_json::from_str(&json).unwrap();
        let mut restored = TtlCache::from_snapshot(snapshot, 3600, 10);

        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get("first"), Some(1));
        assert_eq!(restored.get("second"), Some(2));
        assert_eq!(restored.get("expired"), None);
    }

    #[test]
    fn test_persistent_cache_survives_reopen() {
        use crate::persistence::MemoryPort;

        let port: Arc<MemoryPort<CacheSnapshot<u32>>> = Arc::new(MemoryPort::new());
        let cache = PersistentCache::<u32>::open(port.clone(), 3600, 8);
        assert!(cache.is_empty());
        cache.insert("mock|topic|query", 7);

        let reopened = PersistentCache::<u32>::open(port, 3600, 8);
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get("mock|topic|query"), Some(7));
        assert_eq!(reopened.stats().hits, 1);
    }

    #[test]
    fn test_cache_key_normalizes() {
        assert_eq!(
            cache_key(&["Mock", "  123 Main   St ", "County ASSESSOR"]),
            "mock|123 main st|county assessor"
        );
    }
}
