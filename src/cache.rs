//! Score cache: an LRU-bounded, TTL-expiring cache keyed by
//! `(symbol, timeframe, group)` used by `ScoringEngine` (`spec.md` §4.6).
//! Concurrent misses on the same key are single-flighted: the first caller
//! computes, later callers for the same key wait on its result rather than
//! recomputing.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    last_accessed: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() > ttl
    }
}

/// A small TTL + LRU cache with per-key single-flight computation.
pub struct ScoreCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
    max_entries: usize,
    ttl: Duration,
}

impl<K, V> ScoreCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            max_entries,
            ttl,
        }
    }

    async fn key_lock(&self, key: &K) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Returns the cached value if present and unexpired, otherwise
    /// computes it via `compute` under a per-key lock so concurrent callers
    /// for the same key share one computation.
    pub async fn get_or_compute<F, Fut>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = V>,
    {
        if let Some(hit) = self.peek(&key).await {
            return hit;
        }

        let key_lock = self.key_lock(&key).await;
        let _guard = key_lock.lock().await;

        if let Some(hit) = self.peek(&key).await {
            return hit;
        }

        let value = compute().await;
        self.insert(key, value.clone()).await;
        value
    }

    async fn peek(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(self.ttl) => {
                entry.last_accessed = Instant::now();
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            if let Some(lru_key) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone())
            {
                debug!("score cache evicting lru entry");
                entries.remove(&lru_key);
            }
        }
        let now = Instant::now();
        entries.insert(key, CacheEntry { value, inserted_at: now, last_accessed: now });
    }

    pub async fn invalidate_all(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn hit_avoids_recomputation() {
        let cache: ScoreCache<String, u32> = ScoreCache::new(10, Duration::from_secs(60));
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let v = cache
                .get_or_compute("k".to_string(), || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    42
                })
                .await;
            assert_eq!(v, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn eviction_respects_capacity() {
        let cache: ScoreCache<u32, u32> = ScoreCache::new(2, Duration::from_secs(60));
        for k in 0..3 {
            cache.get_or_compute(k, || async move { k * 10 }).await;
        }
        assert!(cache.len().await <= 2);
    }

    #[tokio::test]
    async fn invalidate_all_clears_entries() {
        let cache: ScoreCache<u32, u32> = ScoreCache::new(10, Duration::from_secs(60));
        cache.get_or_compute(1, || async { 100 }).await;
        cache.invalidate_all().await;
        assert_eq!(cache.len().await, 0);
    }
}
