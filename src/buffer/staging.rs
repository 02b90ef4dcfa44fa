//! Staging buffer
//!
//! HashMap of key hash → encoded value awaiting a flush.

use std::collections::HashMap;

use bytes::Bytes;

use crate::codec::KeyHash;

/// One staging map (write buffer or edit buffer)
#[derive(Debug, Default)]
pub struct StagingBuffer {
    entries: HashMap<KeyHash, Bytes>,
    /// Approximate payload size (keys + values) in bytes
    size: usize,
}

impl StagingBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            size: 0,
        }
    }

    /// Stage a value, replacing any earlier unflushed value for the key
    pub fn stage(&mut self, key: KeyHash, value: Bytes) -> Option<Bytes> {
        let key_len = key.as_str().len();
        let value_len = value.len();
        let previous = self.entries.insert(key, value);
        match &previous {
            Some(old) => self.size = self.size - old.len() + value_len,
            None => self.size += key_len + value_len,
        }
        previous
    }

    pub fn get(&self, key: &KeyHash) -> Option<&Bytes> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &KeyHash) -> bool {
        self.entries.contains_key(key)
    }

    /// Take every entry, leaving the buffer empty
    pub fn drain(&mut self) -> Vec<(KeyHash, Bytes)> {
        self.size = 0;
        self.entries.drain().collect()
    }

    /// Put back entries a failed flush did not persist
    ///
    /// An entry staged again since the drain wins over the restored one.
    pub fn restore<I: IntoIterator<Item = (KeyHash, Bytes)>>(&mut self, entries: I) {
        for (key, value) in entries {
            if !self.entries.contains_key(&key) {
                self.stage(key, value);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}
