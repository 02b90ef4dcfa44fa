//! Tests for Segment
//!
//! These tests verify:
//! - Unique segment naming
//! - Append / read by logical position
//! - Reopening and torn-tail truncation
//! - Corruption detection
//! - Rewrite through a scratch file

use std::fs::{self, OpenOptions};
use std::io::Write;

use allykv::codec::{KeyHasher, Sha256Hasher};
use allykv::storage::Segment;
use allykv::AllyError;
use bytes::Bytes;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn key(name: &str) -> allykv::codec::KeyHash {
    Sha256Hasher.hash(name.as_bytes())
}

// =============================================================================
// Creation Tests
// =============================================================================

#[test]
fn test_create_names_segment_file() {
    let temp_dir = TempDir::new().unwrap();
    let segment = Segment::create(temp_dir.path()).unwrap();

    assert!(segment.name().starts_with("segment_"));
    assert!(segment.name().ends_with(".seg"));
    assert!(segment.path().exists());
    assert_eq!(segment.record_count(), 0);
    assert_eq!(segment.size_in_bytes(), 0);
}

#[test]
fn test_create_generates_unique_names() {
    let temp_dir = TempDir::new().unwrap();
    let a = Segment::create(temp_dir.path()).unwrap();
    let b = Segment::create(temp_dir.path()).unwrap();

    assert_ne!(a.name(), b.name());
}

// =============================================================================
// Append / Read Tests
// =============================================================================

#[test]
fn test_append_returns_sequential_positions() {
    let temp_dir = TempDir::new().unwrap();
    let mut segment = Segment::create(temp_dir.path()).unwrap();

    assert_eq!(segment.append(&key("a"), b"one").unwrap(), 0);
    assert_eq!(segment.append(&key("b"), b"two").unwrap(), 1);
    assert_eq!(segment.append(&key("a"), b"three").unwrap(), 2);
    assert_eq!(segment.record_count(), 3);
}

#[test]
fn test_read_by_position() {
    let temp_dir = TempDir::new().unwrap();
    let mut segment = Segment::create(temp_dir.path()).unwrap();

    segment.append(&key("a"), b"one").unwrap();
    segment.append(&key("b"), &[0u8, 255, 7]).unwrap();

    let (k, v) = segment.read(1).unwrap();
    assert_eq!(k, key("b"));
    assert_eq!(v, Bytes::from_static(&[0u8, 255, 7]));

    let (k, v) = segment.read(0).unwrap();
    assert_eq!(k, key("a"));
    assert_eq!(v, Bytes::from_static(b"one"));
}

#[test]
fn test_read_out_of_range_is_corruption() {
    let temp_dir = TempDir::new().unwrap();
    let mut segment = Segment::create(temp_dir.path()).unwrap();
    segment.append(&key("a"), b"one").unwrap();

    assert!(matches!(segment.read(1), Err(AllyError::Corruption(_))));
}

#[test]
fn test_record_line_format() {
    let temp_dir = TempDir::new().unwrap();
    let mut segment = Segment::create(temp_dir.path()).unwrap();
    segment.append(&key("a"), &[0xAB, 0x01]).unwrap();
    segment.sync().unwrap();

    let content = fs::read_to_string(segment.path()).unwrap();
    assert_eq!(content, format!("{}|AB01\n", key("a")));
    assert_eq!(segment.size_in_bytes(), content.len() as u64);
}

#[test]
fn test_read_all_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let mut segment = Segment::create(temp_dir.path()).unwrap();

    for i in 0..10 {
        segment
            .append(&key(&format!("k{}", i)), format!("v{}", i).as_bytes())
            .unwrap();
    }

    let records = segment.read_all().unwrap();
    assert_eq!(records.len(), 10);
    for (i, (k, v)) in records.iter().enumerate() {
        assert_eq!(*k, key(&format!("k{}", i)));
        assert_eq!(v.as_ref(), format!("v{}", i).as_bytes());
    }
}

// =============================================================================
// Reopen Tests
// =============================================================================

#[test]
fn test_reopen_preserves_records() {
    let temp_dir = TempDir::new().unwrap();
    let path = {
        let mut segment = Segment::create(temp_dir.path()).unwrap();
        segment.append(&key("a"), b"one").unwrap();
        segment.append(&key("b"), b"two").unwrap();
        segment.sync().unwrap();
        segment.path().to_path_buf()
    };

    let mut segment = Segment::open(&path).unwrap();
    assert_eq!(segment.record_count(), 2);
    assert_eq!(segment.read(1).unwrap().1.as_ref(), b"two");

    // Appends continue after the existing records
    assert_eq!(segment.append(&key("c"), b"three").unwrap(), 2);
    assert_eq!(segment.read(2).unwrap().1.as_ref(), b"three");
}

#[test]
fn test_reopen_truncates_torn_tail() {
    let temp_dir = TempDir::new().unwrap();
    let (path, intact_len) = {
        let mut segment = Segment::create(temp_dir.path()).unwrap();
        segment.append(&key("a"), b"one").unwrap();
        segment.sync().unwrap();
        (segment.path().to_path_buf(), segment.size_in_bytes())
    };

    // Half-written record with no terminator
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(format!("{}|DEAD", key("b")).as_bytes()).unwrap();
    drop(file);

    let segment = Segment::open(&path).unwrap();
    assert_eq!(segment.record_count(), 1);
    assert_eq!(segment.size_in_bytes(), intact_len);
    assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);
}

#[test]
fn test_reopen_rejects_malformed_record() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("segment_bad.seg");
    fs::write(&path, format!("{}|0A\nnot a record\n", key("a"))).unwrap();

    assert!(matches!(Segment::open(&path), Err(AllyError::Corruption(_))));
}

#[test]
fn test_reopen_rejects_non_hex_value() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("segment_bad.seg");
    fs::write(&path, format!("{}|XYZ\n", key("a"))).unwrap();

    assert!(matches!(Segment::open(&path), Err(AllyError::Corruption(_))));
}

#[test]
fn test_open_rejects_foreign_file_name() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("notes.txt");
    fs::write(&path, "").unwrap();

    assert!(Segment::open(&path).is_err());
}

// =============================================================================
// Rewrite Tests
// =============================================================================

#[test]
fn test_rewrite_replaces_content() {
    let temp_dir = TempDir::new().unwrap();
    let mut segment = Segment::create(temp_dir.path()).unwrap();

    for i in 0..5 {
        segment
            .append(&key(&format!("k{}", i)), format!("v{}", i).as_bytes())
            .unwrap();
    }

    let kept = vec![
        (key("k1"), Bytes::from_static(b"v1")),
        (key("k4"), Bytes::from_static(b"v4")),
    ];
    let positions = segment.rewrite(&kept).unwrap();

    assert_eq!(positions, vec![0, 1]);
    assert_eq!(segment.record_count(), 2);
    assert_eq!(segment.read(0).unwrap(), kept[0]);
    assert_eq!(segment.read(1).unwrap(), kept[1]);

    // No scratch file left behind
    let leftovers: Vec<_> = fs::read_dir(temp_dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .filter(|n| n.ends_with(".compact"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn test_rewrite_then_append_and_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let mut segment = Segment::create(temp_dir.path()).unwrap();
    segment.append(&key("a"), b"old").unwrap();
    segment.append(&key("b"), b"keep").unwrap();

    segment
        .rewrite(&[(key("b"), Bytes::from_static(b"keep"))])
        .unwrap();
    assert_eq!(segment.append(&key("c"), b"new").unwrap(), 1);
    segment.sync().unwrap();

    let reopened = Segment::open(segment.path()).unwrap();
    let records = reopened.read_all().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].0, key("b"));
    assert_eq!(records[1].0, key("c"));
}

#[test]
fn test_rewrite_to_empty() {
    let temp_dir = TempDir::new().unwrap();
    let mut segment = Segment::create(temp_dir.path()).unwrap();
    segment.append(&key("a"), b"old").unwrap();

    let positions = segment.rewrite(&[]).unwrap();
    assert!(positions.is_empty());
    assert_eq!(segment.record_count(), 0);
    assert_eq!(segment.size_in_bytes(), 0);
}

#[test]
fn test_delete_removes_file() {
    let temp_dir = TempDir::new().unwrap();
    let segment = Segment::create(temp_dir.path()).unwrap();
    let path = segment.path().to_path_buf();

    segment.delete().unwrap();
    assert!(!path.exists());
}
