// In-process cache for admin read models

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    generation: u64,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration, generation: u64) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
            generation,
        }
    }

    /// Expired, or computed before an invalidation that came after `generation`
    fn is_stale(&self, generation: u64) -> bool {
        self.generation < generation || Instant::now() > self.expires_at
    }
}

/// Keyed cache with a TTL and whole-cache invalidation.
///
/// Used for the admin order listing: every write that changes an order or a
/// purchase status calls [`InMemoryCache::invalidate_all`].
///
/// Readers that fill the cache from the database take [`InMemoryCache::generation`]
/// before reading and store with [`InMemoryCache::insert_as_of`], so a result
/// read before a concurrent invalidation never outlives it.
#[derive(Debug, Clone)]
pub struct InMemoryCache<V> {
    store: Arc<DashMap<String, CacheEntry<V>>>,
    generation: Arc<AtomicU64>,
    ttl: Duration,
}

impl<V: Clone> Default for InMemoryCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl<V: Clone> InMemoryCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
            ttl,
        }
    }

    /// Bumped by every [`InMemoryCache::invalidate_all`]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let generation = self.generation();
        if let Some(entry) = self.store.get(key) {
            if !entry.is_stale(generation) {
                return Some(entry.value.clone());
            }
        }
        // Re-checked under the shard lock so a fresh entry written meanwhile survives.
        self.store
            .remove_if(key, |_, entry| entry.is_stale(generation));
        None
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_as_of(key, value, self.generation());
    }

    /// Stores a value computed from state observed at `generation`.
    /// Returns false, storing nothing, when an invalidation has happened since.
    pub fn insert_as_of(&self, key: impl Into<String>, value: V, generation: u64) -> bool {
        if generation < self.generation() {
            return false;
        }
        self.store
            .insert(key.into(), CacheEntry::new(value, self.ttl, generation));
        true
    }

    pub fn invalidate_all(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let dropped = self.store.len();
        self.store.clear();
        tracing::debug!(dropped, generation, "cache invalidated");
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
