//! Read cache
//!
//! Bounded, recency-evicted map of key hash → encoded value. Purely an
//! optimization: losing it never affects what a read returns.

use std::num::NonZeroUsize;

use bytes::Bytes;
use lru::LruCache;

use crate::codec::KeyHash;

pub struct ReadCache {
    entries: LruCache<KeyHash, Bytes>,
    hits: u64,
    misses: u64,
}

impl ReadCache {
    /// Create a cache holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a key, refreshing its recency on a hit
    pub fn get(&mut self, key: &KeyHash) -> Option<Bytes> {
        match self.entries.get(key) {
            Some(value) => {
                self.hits += 1;
                Some(value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert or overwrite, evicting the least recently used entry when full
    pub fn put(&mut self, key: KeyHash, value: Bytes) {
        self.entries.put(key, value);
    }

    /// Overwrite the entry for `key` only if it is already cached
    pub fn refresh(&mut self, key: &KeyHash, value: &Bytes) {
        if let Some(cached) = self.entries.peek_mut(key) {
            *cached = value.clone();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (hits, misses) since creation
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
