//! Segment
//!
//! Append-only record file. Records are addressed by their logical position
//! (0-based line index); the byte offset of every record is kept in memory
//! so a read is a single seek.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use uuid::Uuid;

use crate::codec::KeyHash;
use crate::error::{AllyError, Result};

/// Filename prefix shared by every segment file
pub(crate) const SEGMENT_PREFIX: &str = "segment_";

/// Filename extension shared by every segment file
pub(crate) const SEGMENT_EXTENSION: &str = "seg";

/// Extension of the scratch file a compaction rewrite goes through
pub(crate) const COMPACT_EXTENSION: &str = "compact";

const FIELD_SEPARATOR: char = '|';
const RECORD_TERMINATOR: u8 = b'\n';

/// A single append-only segment file
pub struct Segment {
    /// Full path of the segment file
    path: PathBuf,
    /// File name, used as the segment identifier in value pointers
    name: String,
    /// Read + append handle
    file: File,
    /// Byte offset of each record, indexed by logical position
    offsets: Vec<u64>,
    /// Current file size in bytes
    size: u64,
}

impl Segment {
    /// Create a new empty segment with a generated unique name
    pub fn create(dir: &Path) -> Result<Self> {
        let name = format!(
            "{}{}.{}",
            SEGMENT_PREFIX,
            Uuid::new_v4().simple(),
            SEGMENT_EXTENSION
        );
        let path = dir.join(&name);

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create_new(true)
            .open(&path)?;

        tracing::info!(segment = %name, "Created segment");

        Ok(Self {
            path,
            name,
            file,
            offsets: Vec::new(),
            size: 0,
        })
    }

    /// Open an existing segment, validating every record
    ///
    /// A trailing record without a terminator is the remainder of an
    /// interrupted append and is truncated away. Any other unparsable
    /// record is corruption.
    pub fn open(path: &Path) -> Result<Self> {
        let name = segment_name(path).ok_or_else(|| {
            AllyError::Corruption(format!("not a segment file: {}", path.display()))
        })?;

        let mut file = OpenOptions::new().read(true).append(true).open(path)?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let (offsets, valid_len) = scan_records(&contents, &name)?;

        if valid_len < contents.len() as u64 {
            tracing::warn!(
                segment = %name,
                torn_bytes = contents.len() as u64 - valid_len,
                "Truncating incomplete trailing record"
            );
            file.set_len(valid_len)?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            name,
            file,
            offsets,
            size: valid_len,
        })
    }

    /// Append a record, returning its logical position
    ///
    /// On a failed write the file is truncated back to its previous length.
    /// If that truncation also fails the error is `Fatal`.
    pub fn append(&mut self, key: &KeyHash, value: &[u8]) -> Result<u64> {
        let record = encode_record(key, value);

        if let Err(e) = self.file.write_all(&record) {
            return Err(self.roll_back(e));
        }

        let position = self.offsets.len() as u64;
        self.offsets.push(self.size);
        self.size += record.len() as u64;

        Ok(position)
    }

    /// Read the record at a logical position
    pub fn read(&self, position: u64) -> Result<(KeyHash, Bytes)> {
        let idx = usize::try_from(position)
            .ok()
            .filter(|&i| i < self.offsets.len())
            .ok_or_else(|| {
                AllyError::Corruption(format!(
                    "record {} out of range in {} ({} records)",
                    position,
                    self.name,
                    self.offsets.len()
                ))
            })?;

        let start = self.offsets[idx];
        let end = self.offsets.get(idx + 1).copied().unwrap_or(self.size);

        let mut line = vec![0u8; (end - start) as usize];
        let mut file = &self.file;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut line)?;
        line.pop();

        parse_record(&line).map_err(|e| self.corrupt(idx, e))
    }

    /// Read every record in logical order
    pub fn read_all(&self) -> Result<Vec<(KeyHash, Bytes)>> {
        let mut contents = vec![0u8; self.size as usize];
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut contents)?;

        let mut records = Vec::with_capacity(self.offsets.len());
        for (idx, &start) in self.offsets.iter().enumerate() {
            let end = self.offsets.get(idx + 1).copied().unwrap_or(self.size);
            // Exclude the terminator
            let line = &contents[start as usize..end as usize - 1];
            records.push(parse_record(line).map_err(|e| self.corrupt(idx, e))?);
        }

        Ok(records)
    }

    /// Replace the segment content with `kept`, in order
    ///
    /// Returns the new logical position of each kept record. The new content
    /// is written to a scratch file and renamed over the segment, so a failure
    /// before the rename leaves the old content untouched.
    pub fn rewrite(&mut self, kept: &[(KeyHash, Bytes)]) -> Result<Vec<u64>> {
        let temp_path = self.path.with_extension(format!("{}.{}", SEGMENT_EXTENSION, COMPACT_EXTENSION));

        let (offsets, size) = match write_records(&temp_path, kept) {
            Ok(layout) => layout,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                return Err(AllyError::Storage(format!(
                    "rewrite of {} failed: {}",
                    self.name, e
                )));
            }
        };

        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(AllyError::Storage(format!(
                "rewrite of {} failed to replace file: {}",
                self.name, e
            )));
        }

        // The old handle now points at the unlinked inode
        self.file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                AllyError::Fatal(format!("cannot reopen {} after rewrite: {}", self.name, e))
            })?;
        self.offsets = offsets;
        self.size = size;

        Ok((0..kept.len() as u64).collect())
    }

    /// Flush appended records to stable storage
    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Delete the segment file
    pub fn delete(self) -> Result<()> {
        fs::remove_file(&self.path)?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_count(&self) -> u64 {
        self.offsets.len() as u64
    }

    pub fn size_in_bytes(&self) -> u64 {
        self.size
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn roll_back(&mut self, cause: io::Error) -> AllyError {
        match self.file.set_len(self.size) {
            Ok(()) => AllyError::Storage(format!("append to {} failed: {}", self.name, cause)),
            Err(e) => AllyError::Fatal(format!(
                "append to {} failed ({}) and truncation failed: {}",
                self.name, cause, e
            )),
        }
    }

    fn corrupt(&self, idx: usize, cause: AllyError) -> AllyError {
        AllyError::Corruption(format!("{} record {}: {}", self.name, idx, cause))
    }
}

// =============================================================================
// Record Format
// =============================================================================

/// Extract the segment name from a path, if it follows the naming convention
/// "segment_<id>.seg" → Some("segment_<id>.seg")
pub(crate) fn segment_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    is_segment_file_name(name).then(|| name.to_string())
}

pub(crate) fn is_segment_file_name(name: &str) -> bool {
    name.strip_prefix(SEGMENT_PREFIX)
        .and_then(|rest| rest.strip_suffix(SEGMENT_EXTENSION))
        .and_then(|rest| rest.strip_suffix('.'))
        .map(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or(false)
}

/// `KEYHASH|HEXVALUE\n`
fn encode_record(key: &KeyHash, value: &[u8]) -> Vec<u8> {
    let hex_value = hex::encode_upper(value);
    let mut record = Vec::with_capacity(key.as_str().len() + hex_value.len() + 2);
    record.extend_from_slice(key.as_str().as_bytes());
    record.push(FIELD_SEPARATOR as u8);
    record.extend_from_slice(hex_value.as_bytes());
    record.push(RECORD_TERMINATOR);
    record
}

/// Parse one record line (without its terminator)
fn parse_record(line: &[u8]) -> Result<(KeyHash, Bytes)> {
    let text = std::str::from_utf8(line)
        .map_err(|_| AllyError::Corruption("record is not valid UTF-8".to_string()))?;

    let (key, value) = text
        .split_once(FIELD_SEPARATOR)
        .ok_or_else(|| AllyError::Corruption("record has no field separator".to_string()))?;

    let key = KeyHash::parse(key)?;
    let value = hex::decode(value)
        .map_err(|e| AllyError::Corruption(format!("record value is not hex: {}", e)))?;

    Ok((key, Bytes::from(value)))
}

/// Validate every complete record, returning their offsets and the length of
/// the valid prefix
fn scan_records(contents: &[u8], name: &str) -> Result<(Vec<u64>, u64)> {
    let mut offsets = Vec::new();
    let mut start = 0usize;

    while let Some(len) = contents[start..].iter().position(|&b| b == RECORD_TERMINATOR) {
        parse_record(&contents[start..start + len]).map_err(|e| {
            AllyError::Corruption(format!("{} record {}: {}", name, offsets.len(), e))
        })?;
        offsets.push(start as u64);
        start += len + 1;
    }

    Ok((offsets, start as u64))
}

fn write_records(path: &Path, records: &[(KeyHash, Bytes)]) -> Result<(Vec<u64>, u64)> {
    let mut writer = BufWriter::new(File::create(path)?);
    let mut offsets = Vec::with_capacity(records.len());
    let mut size = 0u64;

    for (key, value) in records {
        let record = encode_record(key, value);
        writer.write_all(&record)?;
        offsets.push(size);
        size += record.len() as u64;
    }

    let file = writer
        .into_inner()
        .map_err(|e| AllyError::Storage(format!("failed to flush compacted segment: {}", e)))?;
    file.sync_all()?;

    Ok((offsets, size))
}
