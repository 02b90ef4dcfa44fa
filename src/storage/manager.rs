//! Storage Manager
//!
//! Owns the set of segments in the data directory.
//!
//! ## Responsibilities
//! - Discover existing segment files on startup
//! - Hold exactly one active segment plus any number of sealed ones
//! - Rotate the active segment once it outgrows the target size
//! - Resolve value pointers to records
//! - Retire segments that no longer hold live records

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::codec::KeyHash;
use crate::error::{AllyError, Result};

use super::segment::{segment_name, COMPACT_EXTENSION};
use super::{Segment, ValuePointer};

/// Manages the segment files of one data directory
///
/// Not internally synchronized: the engine holds it inside its single
/// exclusive section.
pub struct StorageManager {
    /// Directory where segments are stored
    data_dir: PathBuf,

    /// Size in bytes beyond which the active segment is sealed
    target_size: u64,

    /// Segment currently receiving appends
    active: Segment,

    /// Rotated-out segments, written to only by compaction
    sealed: HashMap<String, Segment>,
}

impl StorageManager {
    /// List segment files in `dir`, sorted by name
    ///
    /// Scratch files from an interrupted compaction are removed on the way;
    /// the segment they were replacing is still intact.
    pub fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }

            if path.extension().and_then(|e| e.to_str()) == Some(COMPACT_EXTENSION) {
                tracing::warn!(path = %path.display(), "Removing leftover compaction file");
                fs::remove_file(&path)?;
                continue;
            }

            if segment_name(&path).is_some() {
                paths.push(path);
            }
        }

        paths.sort();
        Ok(paths)
    }

    /// Start over with a single fresh segment
    pub fn create(dir: &Path, target_size: u64) -> Result<Self> {
        let active = Segment::create(dir)?;

        Ok(Self {
            data_dir: dir.to_path_buf(),
            target_size,
            active,
            sealed: HashMap::new(),
        })
    }

    /// Load existing segments
    ///
    /// Every segment is loaded as sealed, then the one with the fewest
    /// records becomes active (rotated away immediately if already oversized).
    pub fn open(dir: &Path, paths: &[PathBuf], target_size: u64) -> Result<Self> {
        let mut sealed = HashMap::with_capacity(paths.len());
        for path in paths {
            let segment = Segment::open(path)?;
            sealed.insert(segment.name().to_string(), segment);
        }

        let active_name = sealed
            .values()
            .min_by(|a, b| {
                a.record_count()
                    .cmp(&b.record_count())
                    .then_with(|| a.name().cmp(b.name()))
            })
            .map(|s| s.name().to_string())
            .ok_or_else(|| AllyError::Storage("no segments to open".to_string()))?;

        let active = sealed
            .remove(&active_name)
            .ok_or_else(|| AllyError::Storage(format!("segment {} vanished", active_name)))?;

        let mut manager = Self {
            data_dir: dir.to_path_buf(),
            target_size,
            active,
            sealed,
        };
        manager.rotate_if_needed()?;

        Ok(manager)
    }

    /// Delete stray segment files during a directory reset
    pub fn reset(paths: &[PathBuf]) -> Result<usize> {
        for path in paths {
            fs::remove_file(path)?;
            tracing::info!(path = %path.display(), "Deleted stray segment");
        }
        Ok(paths.len())
    }

    /// Append a record to the active segment, rotating first if needed
    pub fn append(&mut self, key: &KeyHash, value: &[u8]) -> Result<ValuePointer> {
        self.rotate_if_needed()?;
        let offset = self.active.append(key, value)?;
        Ok(ValuePointer::new(self.active.name(), offset))
    }

    /// Seal the active segment if it exceeds the target size
    ///
    /// Returns true when a rotation happened.
    pub fn rotate_if_needed(&mut self) -> Result<bool> {
        if self.active.size_in_bytes() <= self.target_size {
            return Ok(false);
        }

        let fresh = Segment::create(&self.data_dir)?;
        self.active.sync()?;
        let previous = std::mem::replace(&mut self.active, fresh);

        tracing::info!(
            sealed = %previous.name(),
            records = previous.record_count(),
            bytes = previous.size_in_bytes(),
            active = %self.active.name(),
            "Rotated active segment"
        );

        self.sealed.insert(previous.name().to_string(), previous);
        Ok(true)
    }

    /// Read the record a pointer refers to
    pub fn read(&self, pointer: &ValuePointer) -> Result<(KeyHash, Bytes)> {
        let segment = self.segment(&pointer.segment).ok_or_else(|| {
            AllyError::Corruption(format!("pointer names unknown segment {}", pointer.segment))
        })?;
        segment.read(pointer.offset)
    }

    /// Sync the active segment
    pub fn sync(&self) -> Result<()> {
        self.active.sync()
    }

    /// Delete a sealed segment
    ///
    /// The active segment is never retired. Returns false when `name` is not
    /// a sealed segment.
    pub fn retire(&mut self, name: &str) -> Result<bool> {
        match self.sealed.remove(name) {
            Some(segment) => {
                segment.delete()?;
                tracing::info!(segment = %name, "Retired empty segment");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn segment(&self, name: &str) -> Option<&Segment> {
        if self.active.name() == name {
            Some(&self.active)
        } else {
            self.sealed.get(name)
        }
    }

    pub fn segment_mut(&mut self, name: &str) -> Option<&mut Segment> {
        if self.active.name() == name {
            Some(&mut self.active)
        } else {
            self.sealed.get_mut(name)
        }
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active.name() == name
    }

    pub fn active(&self) -> &Segment {
        &self.active
    }

    pub fn sealed_count(&self) -> usize {
        self.sealed.len()
    }

    /// Total number of segments, active included
    pub fn segment_count(&self) -> usize {
        self.sealed.len() + 1
    }

    /// Record count of every segment, keyed by name
    pub fn record_counts(&self) -> BTreeMap<String, u64> {
        self.sealed
            .values()
            .chain(std::iter::once(&self.active))
            .map(|s| (s.name().to_string(), s.record_count()))
            .collect()
    }
}
