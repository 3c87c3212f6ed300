//! Expiring cache: short-lived lookups with explicit expiry
//!
//! Entries become invisible once their time-to-live has elapsed and are
//! dropped lazily on access or eagerly via [`ExpiringCache::purge_expired`].
//!
//! # Example
//!
//! ```
//! use courier_core_resilience::expiring::ExpiringCache;
//! use std::time::Duration;
//!
//! let cache = ExpiringCache::new(Duration::from_secs(60));
//! cache.insert("k".to_string(), 42);
//! assert_eq!(cache.get("k"), Some(42));
//! ```

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Thread-safe key/value map whose entries expire after a fixed TTL
#[derive(Debug)]
pub struct ExpiringCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert or refresh an entry
    pub fn insert(&self, key: K, value: V) {
        let expires_at = Instant::now() + self.ttl;
        self.lock().insert(key, Entry { value, expires_at });
    }

    /// Live value for `key`, if any
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.lock()
            .remove(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of stored entries, including ones not yet purged
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Entry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_insert_and_get() {
        let cache = ExpiringCache::new(Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);

        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_entries_expire() {
        let cache = ExpiringCache::new(Duration::from_millis(20));
        cache.insert("a".to_string(), 1);
        thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.get("a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_refreshes_expiry() {
        let cache = ExpiringCache::new(Duration::from_millis(200));
        cache.insert("a".to_string(), 1);
        thread::sleep(Duration::from_millis(120));
        cache.insert("a".to_string(), 2);
        thread::sleep(Duration::from_millis(120));

        assert_eq!(cache.get("a"), Some(2));
    }

    #[test]
    fn test_purge_expired() {
        let cache = ExpiringCache::new(Duration::from_millis(20));
        cache.insert(1u32, "x");
        cache.insert(2u32, "y");
        thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.purge_expired(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_returns_live_value() {
        let cache = ExpiringCache::new(Duration::from_secs(60));
        cache.insert(7u32, "seven");

        assert_eq!(cache.remove(&7), Some("seven"));
        assert_eq!(cache.remove(&7), None);
    }
}
