//! Bounded TTL caches.
//!
//! Thin wrapper over mini-moka-wasm's thread-safe cache so call sites don't
//! depend on the builder API directly. Every process-wide cache in folio goes
//! through here, which keeps them bounded.

use std::hash::Hash;
use std::time::Duration;

pub type Cache<K, V> = mini_moka_wasm::sync::Cache<K, V>;

pub fn new_cache<K, V>(max_capacity: u64, ttl: Duration) -> Cache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    mini_moka_wasm::sync::Cache::builder()
        .max_capacity(max_capacity)
        .time_to_live(ttl)
        .build()
}

pub fn get<K, V>(cache: &Cache<K, V>, key: &K) -> Option<V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    cache.get(key)
}

pub fn insert<K, V>(cache: &Cache<K, V>, key: K, value: V)
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    cache.insert(key, value);
}
