//! TTL cache for collaborator data (prices, token metadata)
//!
//! Injected as a dependency wherever caching is needed; there are no global
//! caches. Reads are concurrent; refreshes go through the single
//! `get_or_refresh` write path, so two callers never fetch the same key at
//! the same time. Staleness inside the TTL is tolerated.

use crate::Result;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Fresh value for `key`, if one is cached and inside the TTL.
    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.inserted_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone())
    }

    pub async fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Return the cached value or run `refresh` to produce, store, and return
    /// a new one. The write lock is held across the refresh, so concurrent
    /// misses for any key collapse into one upstream call.
    pub async fn get_or_refresh<F, Fut>(&self, key: K, refresh: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(&key).await {
            return Ok(value);
        }

        let mut entries = self.entries.write().await;

        // Re-check under the write lock: another task may have refreshed
        // while we waited for it.
        if let Some(entry) = entries.get(&key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Ok(entry.value.clone());
            }
        }

        let value = refresh().await?;
        entries.insert(
            key.clone(),
            CacheEntry {
                value: value.clone(),
                inserted_at: Instant::now(),
            },
        );

        Ok(value)
    }

    /// Number of entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
