//! Buffer Module
//!
//! In-memory staging in front of the segments.
//!
//! ## Responsibilities
//! - Write buffer: first write of a key not yet in the index
//! - Edit buffer: overwrite of a key already in the index
//! - Read cache: bounded, recency-evicted copies of recently read values
//!
//! Reads check the cache, then the write buffer, then the edit buffer.
//! A staged write overwrites a cached copy of the same key, so the cache
//! never serves a value older than the newest staged one.

mod cache;
mod staging;

use bytes::Bytes;

use crate::codec::KeyHash;

pub use cache::ReadCache;
pub use staging::StagingBuffer;

/// Which staging map a write was routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// Key had no index entry: write buffer
    New,
    /// Key already indexed: edit buffer
    Edit,
}

/// Write buffer + edit buffer + read cache
pub struct BufferLayer {
    writes: StagingBuffer,
    edits: StagingBuffer,
    cache: ReadCache,
}

impl BufferLayer {
    pub fn new(write_capacity: usize, edit_capacity: usize, cache_capacity: usize) -> Self {
        Self {
            writes: StagingBuffer::with_capacity(write_capacity),
            edits: StagingBuffer::with_capacity(edit_capacity),
            cache: ReadCache::new(cache_capacity),
        }
    }

    /// Stage the first write of a key
    pub fn stage_new(&mut self, key: KeyHash, value: Bytes) {
        self.cache.refresh(&key, &value);
        self.writes.stage(key, value);
    }

    /// Stage an overwrite of an indexed key
    pub fn stage_edit(&mut self, key: KeyHash, value: Bytes) {
        self.cache.refresh(&key, &value);
        self.edits.stage(key, value);
    }

    /// Stage into the map `kind` names
    pub fn stage(&mut self, kind: WriteKind, key: KeyHash, value: Bytes) {
        match kind {
            WriteKind::New => self.stage_new(key, value),
            WriteKind::Edit => self.stage_edit(key, value),
        }
    }

    /// Resolve a key from cache, write buffer, then edit buffer
    ///
    /// A buffer hit is copied into the cache.
    pub fn read(&mut self, key: &KeyHash) -> Option<Bytes> {
        if let Some(value) = self.cache.get(key) {
            return Some(value);
        }

        let staged = self.writes.get(key).or_else(|| self.edits.get(key)).cloned()?;
        self.cache.put(key.clone(), staged.clone());
        Some(staged)
    }

    /// Remember a value resolved from a segment
    pub fn cache_value(&mut self, key: KeyHash, value: Bytes) {
        self.cache.put(key, value);
    }

    /// Take every entry of the write buffer
    pub fn drain_new(&mut self) -> Vec<(KeyHash, Bytes)> {
        self.writes.drain()
    }

    /// Take every entry of the edit buffer
    pub fn drain_edits(&mut self) -> Vec<(KeyHash, Bytes)> {
        self.edits.drain()
    }

    /// Return unflushed entries to the write buffer
    pub fn restore_new<I: IntoIterator<Item = (KeyHash, Bytes)>>(&mut self, entries: I) {
        self.writes.restore(entries);
    }

    /// Return unflushed entries to the edit buffer
    pub fn restore_edits<I: IntoIterator<Item = (KeyHash, Bytes)>>(&mut self, entries: I) {
        self.edits.restore(entries);
    }

    pub fn writes(&self) -> &StagingBuffer {
        &self.writes
    }

    pub fn edits(&self) -> &StagingBuffer {
        &self.edits
    }

    pub fn cache(&self) -> &ReadCache {
        &self.cache
    }
}
