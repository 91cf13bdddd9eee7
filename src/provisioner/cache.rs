//! Bounded cache of unwrapped data keys.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use crate::crypto::DataKey;
use crate::observability::metrics;

/// Capacity used when none is configured.
pub const DEFAULT_CACHE_CAPACITY: usize = 128;

/// Least-recently-used map of principal → data key.
///
/// Entries never expire by time; they leave only under capacity pressure or
/// explicit removal. Every lookup updates recency, so reads take the lock too.
/// The lock is never held across an await point.
pub struct KeyCache {
    inner: Mutex<LruCache<String, DataKey>>,
}

impl KeyCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, DataKey>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Cached key for `principal`, marking it most recently used.
    pub fn get(&self, principal: &str) -> Option<DataKey> {
        self.lock().get(principal).cloned()
    }

    /// Whether `principal` is cached, without touching recency.
    pub fn contains(&self, principal: &str) -> bool {
        self.lock().contains(principal)
    }

    /// Insert a key. Returns the principal evicted to make room, if any.
    pub fn insert(&self, principal: &str, key: DataKey) -> Option<String> {
        let mut cache = self.lock();
        let evicted = cache
            .push(principal.to_string(), key)
            .and_then(|(old, _)| if old != principal { Some(old) } else { None });
        metrics::record_cache_size(cache.len());
        evicted
    }

    /// Drop `principal` from the cache. Returns whether it was present.
    pub fn remove(&self, principal: &str) -> bool {
        let mut cache = self.lock();
        let removed = cache.pop(principal).is_some();
        metrics::record_cache_size(cache.len());
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    /// Cached principals, most recently used first.
    pub fn principals(&self) -> Vec<String> {
        self.lock().iter().map(|(principal, _)| principal.clone()).collect()
    }
}

impl Default for KeyCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
