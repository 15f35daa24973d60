//! Bounded LRU store mapping flow keys to per-flow state.
//!
//! `put` and `get` promote an entry to most-recently-used; `exists` and
//! `peek` never touch the order. When a `put` pushes the store past its
//! capacity, the least-recently-used entry is removed and the attached
//! cleanup hook runs with it before `put` returns.
//!
//! The store is not synchronized. Callers hold one lock per registry around
//! every call.

use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::error::{Result, StackError};

type CleanupHook<K, V> = Box<dyn FnMut(K, V) + Send>;

pub struct FlowRegistry<K: Hash + Eq, V> {
    cache: LruCache<K, V>,
    cleanup: Option<CleanupHook<K, V>>,
}

impl<K: Hash + Eq, V> FlowRegistry<K, V> {
    /// Create a registry holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or(StackError::InvalidCapacity)?;
        Ok(Self {
            cache: LruCache::new(capacity),
            cleanup: None,
        })
    }

    /// Hook invoked once per entry evicted by capacity pressure.
    pub fn attach_cleanup(&mut self, hook: impl FnMut(K, V) + Send + 'static) {
        self.cleanup = Some(Box::new(hook));
    }

    /// Insert or replace `key`, making it most-recently-used.
    ///
    /// Replacing an existing key drops the old value without running the
    /// cleanup hook; only evictions do.
    pub fn put(&mut self, key: K, value: V) {
        if let Some((old_key, old_value)) = self.cache.push(key, value) {
            // push hands back either the replaced entry (key still present)
            // or the evicted LRU tail (key gone)
            if !self.cache.contains(&old_key) {
                if let Some(hook) = self.cleanup.as_mut() {
                    hook(old_key, old_value);
                }
            }
        }
    }

    /// Look up `key` and promote it to most-recently-used.
    pub fn get(&mut self, key: &K) -> Result<&V>
    where
        K: std::fmt::Debug,
    {
        self.cache.get(key).ok_or_else(|| StackError::NotFound {
            key: format!("{:?}", key),
        })
    }

    /// Promoting lookup that reports a miss as `None`.
    pub fn find(&mut self, key: &K) -> Option<&V> {
        self.cache.get(key)
    }

    /// Lookup that leaves the order untouched.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.cache.peek(key)
    }

    /// Whether `key` is present, without touching the order.
    pub fn exists(&self, key: &K) -> bool {
        self.cache.contains(key)
    }

    /// Delete `key`; returns whether anything was removed.
    pub fn remove(&mut self, key: &K) -> bool {
        self.take(key).is_some()
    }

    /// Delete `key` and hand back its value.
    pub fn take(&mut self, key: &K) -> Option<V> {
        self.cache.pop(key)
    }

    /// Drop every entry without running the cleanup hook.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Remove every entry, least-recently-used first.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        let mut out = Vec::with_capacity(self.cache.len());
        while let Some(entry) = self.cache.pop_lru() {
            out.push(entry);
        }
        out
    }

    /// Entries from most- to least-recently-used.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.cache.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }
}
