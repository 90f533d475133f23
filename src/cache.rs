//! Process-scoped TTL cache.
//!
//! One abstraction backs the search-response cache, fuzzy scan state,
//! enrichment entries and the positive/negative resolution caches. Expiry is
//! lazy (checked on read, no sweeper task), so the key space only grows for
//! the lifetime of the process — an accepted open risk; bounding (LRU or a
//! periodic sweep) is future work.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct TtlCache<K, V> {
    ttl: Duration,
    map: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        TtlCache {
            ttl,
            map: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the live value, evicting it if its TTL has elapsed.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut map = self.map.lock().unwrap_or_else(|p| p.into_inner());
        match map.get(key) {
            Some((written, value)) if written.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: K, value: V) {
        let mut map = self.map.lock().unwrap_or_else(|p| p.into_inner());
        map.insert(key, (Instant::now(), value));
    }

    pub fn remove(&self, key: &K) {
        let mut map = self.map.lock().unwrap_or_else(|p| p.into_inner());
        map.remove(key);
    }

    /// Count of stored entries, expired or not (expiry is lazy).
    pub fn len(&self) -> usize {
        self.map.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_within_ttl_miss_after() {
        let cache: TtlCache<&str, i32> = TtlCache::new(Duration::from_millis(40));
        cache.put("k", 1);
        assert_eq!(cache.get(&"k"), Some(1));
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get(&"k"), None);
        // Lazy eviction removed the entry on that read.
        assert!(cache.is_empty());
    }

    #[test]
    fn put_overwrites_and_refreshes() {
        let cache: TtlCache<&str, i32> = TtlCache::new(Duration::from_secs(10));
        cache.put("k", 1);
        cache.put("k", 2);
        assert_eq!(cache.get(&"k"), Some(2));
        assert_eq!(cache.len(), 1);
    }
}
