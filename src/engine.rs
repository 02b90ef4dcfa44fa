//! Engine Module
//!
//! The storage engine that coordinates buffers, index and segments.
//!
//! ## Responsibilities
//! - Route writes to the write or edit buffer
//! - Resolve reads through cache → buffers → index → segment
//! - Flush buffers into the active segment (rotating it by size)
//! - Persist index snapshots
//! - Compact segments that hold superseded records
//! - Reconcile the data directory on startup

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::buffer::{BufferLayer, WriteKind};
use crate::codec::{DeflateCodec, KeyHash, KeyHasher, Sha256Hasher, ValueCodec};
use crate::config::Config;
use crate::error::{AllyError, Result};
use crate::protocol::{Command, Response};
use crate::storage::{Index, IndexFile, StorageManager, ValuePointer};

/// Result of a `put` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Value staged in the named buffer
    Staged(WriteKind),
    /// Empty value; nothing was written
    Rejected,
}

/// Summary of one compaction pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    pub segments_compacted: usize,
    pub records_removed: usize,
    pub segments_retired: usize,
}

/// Everything guarded by the engine's exclusive section
struct EngineState {
    buffers: BufferLayer,
    index: Index,
    storage: StorageManager,
    /// Segments holding at least one superseded record
    dirty: BTreeSet<String>,
    /// Index mutated since the last successful persist
    index_changed: bool,
}

/// The main storage engine
///
/// ## Concurrency Model: one exclusive section
///
/// Every caller operation and every maintenance task runs under the single
/// `state` mutex, including the segment I/O it performs. Nothing observes a
/// half-applied flush or compaction. Hashing and value encoding/decoding
/// happen outside the lock.
///
/// ## Failure Model
///
/// Storage failures are returned to the operation that hit them, after the
/// buffers and segment have been rolled back to a consistent state. A failure
/// that cannot be rolled back (`AllyError::Fatal`) halts the engine: every
/// later call returns `AllyError::Halted`. A `Fatal` returned by a custom
/// `ValueCodec` halts it the same way.
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Persisted index location
    index_file: IndexFile,

    hasher: Arc<dyn KeyHasher>,
    codec: Arc<dyn ValueCodec>,

    state: Mutex<EngineState>,

    /// Set once a fatal failure has been observed
    halted: AtomicBool,
}

impl Engine {
    /// Open or create an engine with SHA-256 key hashing and DEFLATE values
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with(config, Arc::new(Sha256Hasher), Arc::new(DeflateCodec::default()))
    }

    /// Open or create an engine with custom primitives
    ///
    /// On startup:
    /// 1. Create the data directory if needed
    /// 2. If both a non-empty index and segments exist, load them
    /// 3. Otherwise reset the directory: delete stray segments, write an
    ///    empty index and create one fresh segment. This discards any
    ///    segment data that has no persisted index.
    pub fn open_with(
        config: Config,
        hasher: Arc<dyn KeyHasher>,
        codec: Arc<dyn ValueCodec>,
    ) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let data_dir = config.data_dir.clone();
        let index_file = IndexFile::new(&data_dir);

        if index_file.discard_temp()? {
            tracing::warn!("Removed leftover index snapshot from an interrupted persist");
        }

        let segment_paths = StorageManager::discover(&data_dir)?;
        let index_has_entries = index_file.has_entries()?;

        let (index, storage, dirty) = if index_has_entries && !segment_paths.is_empty() {
            let index = index_file.load()?;
            let storage =
                StorageManager::open(&data_dir, &segment_paths, config.segment_target_size)?;
            verify_pointers(&index, &storage)?;
            let dirty = garbage_segments(&index, &storage);

            tracing::info!(
                keys = index.len(),
                segments = storage.segment_count(),
                dirty = dirty.len(),
                active = %storage.active().name(),
                "Loaded data directory"
            );
            (index, storage, dirty)
        } else {
            if index_file.exists() || !segment_paths.is_empty() {
                tracing::warn!(
                    index_has_entries,
                    stray_segments = segment_paths.len(),
                    "Index and segments disagree, resetting data directory"
                );
            } else {
                tracing::info!(dir = %data_dir.display(), "Initializing empty data directory");
            }

            StorageManager::reset(&segment_paths)?;
            index_file.remove()?;
            index_file.create_empty()?;
            let storage = StorageManager::create(&data_dir, config.segment_target_size)?;
            (Index::new(), storage, BTreeSet::new())
        };

        let buffers = BufferLayer::new(
            config.write_buffer_capacity,
            config.edit_buffer_capacity,
            config.read_cache_capacity,
        );

        Ok(Self {
            config,
            index_file,
            hasher,
            codec,
            state: Mutex::new(EngineState {
                buffers,
                index,
                storage,
                dirty,
                index_changed: false,
            }),
            halted: AtomicBool::new(false),
        })
    }

    /// Execute a protocol command
    pub fn execute(&self, command: Command) -> Result<Response> {
        match command {
            Command::Get { key } => Ok(match self.get(&key)? {
                Some(value) => Response::ok(Some(value)),
                None => Response::not_found(),
            }),
            Command::Put { key, value } => Ok(match self.put(&key, &value)? {
                PutOutcome::Staged(_) => Response::ok(None),
                PutOutcome::Rejected => Response::error("value must not be empty"),
            }),
            Command::Ping => Ok(Response::ok(Some(b"PONG".to_vec()))),
        }
    }

    /// Stage a key-value pair
    ///
    /// Never touches disk: the value is hashed, encoded and placed in the
    /// write buffer (unindexed key) or edit buffer (indexed key).
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<PutOutcome> {
        if value.is_empty() {
            tracing::warn!("Rejected put with empty value");
            return Ok(PutOutcome::Rejected);
        }
        self.ensure_running()?;

        let key_hash = self.hasher.hash(key);
        let encoded = Bytes::from(self.observe(self.codec.encode(value))?);

        let mut state = self.state.lock();
        let kind = if state.index.contains(&key_hash) {
            WriteKind::Edit
        } else {
            WriteKind::New
        };
        tracing::trace!(key = %key_hash, ?kind, "Staged write");
        state.buffers.stage(kind, key_hash, encoded);

        Ok(PutOutcome::Staged(kind))
    }

    /// Get a value by key
    ///
    /// Search order:
    /// 1. Read cache
    /// 2. Write buffer
    /// 3. Edit buffer
    /// 4. Index → segment
    ///
    /// A key that was never written is `Ok(None)`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_running()?;

        let key_hash = self.hasher.hash(key);
        let encoded = {
            let mut state = self.state.lock();
            let found = state.lookup(&key_hash);
            self.observe(found)?
        };

        match encoded {
            Some(encoded) => Ok(Some(self.observe(self.codec.decode(&encoded))?)),
            None => {
                tracing::debug!(key = %key_hash, "No value found");
                Ok(None)
            }
        }
    }

    /// Append every write-buffer entry to the active segment and index it
    ///
    /// Returns the number of records flushed.
    pub fn flush_new(&self) -> Result<usize> {
        self.ensure_running()?;
        let mut state = self.state.lock();
        let flushed = state.flush(WriteKind::New);
        self.observe(flushed)
    }

    /// Append every edit-buffer entry as a new record and repoint the index
    ///
    /// The segment holding each replaced record is marked dirty.
    pub fn flush_edits(&self) -> Result<usize> {
        self.ensure_running()?;
        let mut state = self.state.lock();
        let flushed = state.flush(WriteKind::Edit);
        self.observe(flushed)
    }

    /// Persist an index snapshot if the index changed since the last one
    ///
    /// Returns true when a snapshot was written.
    pub fn persist_index(&self) -> Result<bool> {
        self.ensure_running()?;
        let mut state = self.state.lock();
        let persisted = state.persist_index(&self.index_file);
        self.observe(persisted)
    }

    /// Rewrite every dirty segment keeping only live records
    pub fn compact(&self) -> Result<CompactionStats> {
        self.ensure_running()?;
        let mut state = self.state.lock();
        let stats = state.compact(&self.index_file);
        self.observe(stats)
    }

    /// Flush both buffers and persist the index
    pub fn close(self) -> Result<()> {
        self.flush_new()?;
        self.flush_edits()?;
        self.persist_index()?;
        tracing::info!(dir = %self.config.data_dir.display(), "Engine closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn index_path(&self) -> &Path {
        self.index_file.path()
    }

    /// Hash a caller key the way the engine does
    pub fn key_hash(&self, key: &[u8]) -> KeyHash {
        self.hasher.hash(key)
    }

    /// Current index pointer for a caller key
    pub fn index_pointer(&self, key: &[u8]) -> Option<ValuePointer> {
        let key_hash = self.hasher.hash(key);
        self.state.lock().index.get(&key_hash).cloned()
    }

    /// Decoded value of the record a pointer refers to
    pub fn resolve_pointer(&self, pointer: &ValuePointer) -> Result<Vec<u8>> {
        let (_, encoded) = self.state.lock().storage.read(pointer)?;
        self.codec.decode(&encoded)
    }

    pub fn index_len(&self) -> usize {
        self.state.lock().index.len()
    }

    pub fn write_buffer_len(&self) -> usize {
        self.state.lock().buffers.writes().len()
    }

    pub fn edit_buffer_len(&self) -> usize {
        self.state.lock().buffers.edits().len()
    }

    pub fn cache_len(&self) -> usize {
        self.state.lock().buffers.cache().len()
    }

    pub fn active_segment(&self) -> String {
        self.state.lock().storage.active().name().to_string()
    }

    pub fn sealed_segment_count(&self) -> usize {
        self.state.lock().storage.sealed_count()
    }

    pub fn segment_count(&self) -> usize {
        self.state.lock().storage.segment_count()
    }

    pub fn segment_record_counts(&self) -> BTreeMap<String, u64> {
        self.state.lock().storage.record_counts()
    }

    pub fn dirty_segments(&self) -> Vec<String> {
        self.state.lock().dirty.iter().cloned().collect()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_running(&self) -> Result<()> {
        if self.halted.load(Ordering::SeqCst) {
            return Err(AllyError::Halted);
        }
        Ok(())
    }

    /// Halt the engine if `result` is a fatal failure
    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() && !self.halted.swap(true, Ordering::SeqCst) {
                tracing::error!(error = %e, "Engine halted");
            }
        }
        result
    }
}

impl EngineState {
    fn lookup(&mut self, key: &KeyHash) -> Result<Option<Bytes>> {
        if let Some(value) = self.buffers.read(key) {
            return Ok(Some(value));
        }

        let pointer = match self.index.get(key) {
            Some(pointer) => pointer.clone(),
            None => return Ok(None),
        };

        let (stored_key, value) = self.storage.read(&pointer)?;
        if &stored_key != key {
            return Err(AllyError::Corruption(format!(
                "{} record {} holds key {}, index expected {}",
                pointer.segment, pointer.offset, stored_key, key
            )));
        }

        self.buffers.cache_value(key.clone(), value.clone());
        Ok(Some(value))
    }

    /// Drain one buffer into the active segment
    ///
    /// Entries not durably appended go back into the buffer before the error
    /// is returned.
    fn flush(&mut self, kind: WriteKind) -> Result<usize> {
        let bytes = match kind {
            WriteKind::New => self.buffers.writes().size(),
            WriteKind::Edit => self.buffers.edits().size(),
        };
        let entries = match kind {
            WriteKind::New => self.buffers.drain_new(),
            WriteKind::Edit => self.buffers.drain_edits(),
        };
        if entries.is_empty() {
            return Ok(0);
        }

        let total = entries.len();
        let mut pending = entries.into_iter();

        while let Some((key, value)) = pending.next() {
            match self.storage.append(&key, &value) {
                Ok(pointer) => {
                    if let Some(previous) = self.index.put(key, pointer) {
                        // The replaced record is now garbage
                        self.dirty.insert(previous.segment);
                    }
                    self.index_changed = true;
                }
                Err(e) => {
                    let unflushed = std::iter::once((key, value)).chain(pending);
                    match kind {
                        WriteKind::New => self.buffers.restore_new(unflushed),
                        WriteKind::Edit => self.buffers.restore_edits(unflushed),
                    }
                    tracing::error!(error = %e, ?kind, "Flush aborted");
                    return Err(e);
                }
            }
        }

        self.storage.sync()?;
        tracing::debug!(records = total, bytes, ?kind, "Flushed buffer");
        Ok(total)
    }

    fn persist_index(&mut self, index_file: &IndexFile) -> Result<bool> {
        if !self.index_changed {
            return Ok(false);
        }

        let snapshot = self.index.snapshot();
        index_file.persist(&snapshot)?;
        self.index_changed = false;

        let (cache_hits, cache_misses) = self.buffers.cache().stats();
        tracing::info!(
            entries = snapshot.len(),
            cache_hits,
            cache_misses,
            "Index was written to disk"
        );
        Ok(true)
    }

    fn compact(&mut self, index_file: &IndexFile) -> Result<CompactionStats> {
        let mut stats = CompactionStats::default();
        if self.dirty.is_empty() {
            return Ok(stats);
        }

        let dirty: Vec<String> = std::mem::take(&mut self.dirty).into_iter().collect();
        let mut emptied = Vec::new();
        let mut failure = None;

        for (i, name) in dirty.iter().enumerate() {
            match self.compact_segment(name) {
                Ok(Some((removed, live))) => {
                    stats.segments_compacted += 1;
                    stats.records_removed += removed;
                    if live == 0 && !self.storage.is_active(name) {
                        emptied.push(name.clone());
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    // Still dirty: retried on the next pass
                    self.dirty.extend(dirty[i..].iter().cloned());
                    failure = Some(e);
                    break;
                }
            }
        }

        if stats.segments_compacted > 0 {
            // Compaction moved record positions; the persisted index must follow
            self.persist_index(index_file)?;

            for name in emptied {
                if self.storage.retire(&name)? {
                    stats.segments_retired += 1;
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => {
                tracing::info!(
                    segments = stats.segments_compacted,
                    removed = stats.records_removed,
                    retired = stats.segments_retired,
                    "Compaction finished"
                );
                Ok(stats)
            }
        }
    }

    /// Rewrite one segment keeping the records the index still points at
    ///
    /// Returns (records removed, records kept), or None when there was
    /// nothing to do.
    fn compact_segment(&mut self, name: &str) -> Result<Option<(usize, usize)>> {
        let segment = match self.storage.segment_mut(name) {
            Some(segment) => segment,
            None => {
                tracing::debug!(segment = %name, "Dirty segment no longer exists");
                return Ok(None);
            }
        };

        let records = segment.read_all()?;
        let total = records.len();

        let kept: Vec<(KeyHash, Bytes)> = records
            .into_iter()
            .enumerate()
            .filter(|(position, (key, _))| {
                self.index
                    .get(key)
                    .map(|p| p.segment == name && p.offset == *position as u64)
                    .unwrap_or(false)
            })
            .map(|(_, record)| record)
            .collect();

        if kept.len() == total {
            return Ok(None);
        }

        let positions = segment.rewrite(&kept)?;
        for ((key, _), offset) in kept.iter().zip(positions) {
            self.index.put(key.clone(), ValuePointer::new(name, offset));
        }
        self.index_changed = true;

        tracing::info!(
            segment = %name,
            before = total,
            after = kept.len(),
            "Compacted segment"
        );
        Ok(Some((total - kept.len(), kept.len())))
    }
}

/// Segments holding more records than the index points into
///
/// Catches garbage left by edits flushed before a restart and by records
/// appended after the last persisted index.
fn garbage_segments(index: &Index, storage: &StorageManager) -> BTreeSet<String> {
    storage
        .record_counts()
        .into_iter()
        .filter(|(name, count)| *count > index.live_records(name) as u64)
        .map(|(name, _)| name)
        .collect()
}

/// Every index pointer must name a loaded segment and an existing record
fn verify_pointers(index: &Index, storage: &StorageManager) -> Result<()> {
    for (key, pointer) in index.iter() {
        let segment = storage.segment(&pointer.segment).ok_or_else(|| {
            AllyError::Corruption(format!(
                "index entry {} names missing segment {}",
                key, pointer.segment
            ))
        })?;

        if pointer.offset >= segment.record_count() {
            return Err(AllyError::Corruption(format!(
                "index entry {} points past the end of {} ({} >= {})",
                key,
                pointer.segment,
                pointer.offset,
                segment.record_count()
            )));
        }
    }
    Ok(())
}
