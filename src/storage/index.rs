//! Index
//!
//! Maps key hashes to the location of their current record, and persists
//! that mapping as a whole-file snapshot.
//!
//! ## File Format
//! ```text
//! KEYHASH|segment_<id>.seg|RECORD_POSITION\n
//! ... one line per entry, sorted by key hash ...
//! ```
//! The file is never edited in place: a snapshot is written to
//! `index.idx.tmp`, synced, then renamed over `index.idx`.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::codec::KeyHash;
use crate::error::{AllyError, Result};

use super::segment::is_segment_file_name;

/// Canonical index file name
pub(crate) const INDEX_FILENAME: &str = "index.idx";

/// Scratch file a snapshot is written to before the rename
pub(crate) const INDEX_TEMP_FILENAME: &str = "index.idx.tmp";

/// Location of one record: segment name + logical record position
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValuePointer {
    pub segment: String,
    pub offset: u64,
}

impl ValuePointer {
    pub fn new(segment: impl Into<String>, offset: u64) -> Self {
        Self {
            segment: segment.into(),
            offset,
        }
    }
}

/// In-memory index of every flushed key
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Index {
    entries: HashMap<KeyHash, ValuePointer>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &KeyHash) -> Option<&ValuePointer> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &KeyHash) -> bool {
        self.entries.contains_key(key)
    }

    /// Install a pointer, returning the one it replaced
    pub fn put(&mut self, key: KeyHash, pointer: ValuePointer) -> Option<ValuePointer> {
        self.entries.insert(key, pointer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Point-in-time copy of every entry, sorted by key hash
    pub fn snapshot(&self) -> Vec<(KeyHash, ValuePointer)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(k, p)| (k.clone(), p.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Number of keys whose current record lives in `segment`
    pub fn live_records(&self, segment: &str) -> usize {
        self.entries.values().filter(|p| p.segment == segment).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KeyHash, &ValuePointer)> {
        self.entries.iter()
    }
}

impl FromIterator<(KeyHash, ValuePointer)> for Index {
    fn from_iter<I: IntoIterator<Item = (KeyHash, ValuePointer)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

// =============================================================================
// Persistence
// =============================================================================

/// The on-disk index file and its scratch file
#[derive(Debug, Clone)]
pub struct IndexFile {
    path: PathBuf,
    temp_path: PathBuf,
}

impl IndexFile {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(INDEX_FILENAME),
            temp_path: dir.join(INDEX_TEMP_FILENAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// True when the index is a regular, non-empty file
    pub fn has_entries(&self) -> Result<bool> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.is_file() && meta.len() > 0),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Create (or truncate to) an empty index file
    pub fn create_empty(&self) -> Result<()> {
        File::create(&self.path)?.sync_all()?;
        Ok(())
    }

    /// Remove the index file if present
    pub fn remove(&self) -> Result<()> {
        remove_if_exists(&self.path)
    }

    /// Remove a scratch file left behind by an interrupted persist
    pub fn discard_temp(&self) -> Result<bool> {
        if self.temp_path.exists() {
            remove_if_exists(&self.temp_path)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Load the persisted index
    ///
    /// Any malformed line fails the whole load.
    pub fn load(&self) -> Result<Index> {
        let content = fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData => {
                AllyError::Corruption("index file is not valid UTF-8".to_string())
            }
            _ => AllyError::Io(e),
        })?;

        let mut index = Index::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let (key, pointer) = parse_entry(line).map_err(|e| {
                AllyError::Corruption(format!("index line {}: {}", line_no + 1, e))
            })?;
            index.put(key, pointer);
        }

        Ok(index)
    }

    /// Durably replace the index file with `snapshot`
    pub fn persist(&self, snapshot: &[(KeyHash, ValuePointer)]) -> Result<()> {
        let mut writer = BufWriter::new(File::create(&self.temp_path)?);
        for (key, pointer) in snapshot {
            writeln!(writer, "{}|{}|{}", key, pointer.segment, pointer.offset)?;
        }

        let file = writer
            .into_inner()
            .map_err(|e| AllyError::Storage(format!("failed to flush index snapshot: {}", e)))?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.temp_path, &self.path)?;
        Ok(())
    }
}

fn parse_entry(line: &str) -> Result<(KeyHash, ValuePointer)> {
    let mut fields = line.split('|');
    let (key, segment, offset) = match (fields.next(), fields.next(), fields.next(), fields.next()) {
        (Some(k), Some(s), Some(o), None) => (k, s, o),
        _ => {
            return Err(AllyError::Corruption(format!(
                "expected 3 fields, got {:?}",
                line
            )))
        }
    };

    let key = KeyHash::parse(key)?;
    if !is_segment_file_name(segment) {
        return Err(AllyError::Corruption(format!("invalid segment name: {:?}", segment)));
    }
    let offset = offset
        .parse::<u64>()
        .map_err(|e| AllyError::Corruption(format!("invalid record position {:?}: {}", offset, e)))?;

    Ok((key, ValuePointer::new(segment, offset)))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
