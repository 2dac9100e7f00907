//! In-memory TTL caches.
//!
//! The gateway keeps exactly two pieces of cross-request mutable state: the
//! verification cache (proof hash → successful result) and the proxy
//! response cache (request signature → upstream response). Both are advisory
//! performance optimizations: entries may be dropped, raced, or cleared at
//! any time without affecting payment decisions.

use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// A concurrent map with wall-clock entry expiry, checked on read.
///
/// Expired entries are removed lazily: on the read that finds them stale and
/// on explicit [`TtlCache::purge`] sweeps. There is no background reaper.
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: DashMap<K, Entry<V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the live value for `key`, dropping it if expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let hit = match self.entries.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => Some(entry.value.clone()),
            Some(_) => None,
            None => return None,
        };
        if hit.is_none() {
            self.entries.remove(key);
        }
        hit
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Removes every expired entry. Purely housekeeping.
    pub fn purge(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| now < entry.expires_at);
    }

    pub fn clear(&self) {
        self.entries.clear();
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
    use super::*;

    #[test]
    fn returns_live_entries() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("a".into(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"b".to_string()), None);
    }

    #[test]
    fn drops_expired_entries_on_read() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::ZERO);
        cache.insert("a".into(), 1);
        assert_eq!(cache.get(&"a".to_string()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn purge_sweeps_expired_entries() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::ZERO);
        cache.insert(1, 1);
        cache.insert(2, 2);
        cache.purge();
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_is_always_safe() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_secs(60));
        cache.insert(1, 1);
        cache.clear();
        assert_eq!(cache.get(&1), None);
    }
}
