//! Tests for StorageManager
//!
//! These tests verify:
//! - Segment discovery
//! - Active segment selection on open
//! - Rotation by target size
//! - Pointer resolution
//! - Retirement of sealed segments

use std::fs;

use allykv::codec::{KeyHash, KeyHasher, Sha256Hasher};
use allykv::storage::{Segment, StorageManager, ValuePointer};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn key(name: &str) -> KeyHash {
    Sha256Hasher.hash(name.as_bytes())
}

/// Create a segment holding `count` records
fn segment_with_records(dir: &std::path::Path, count: usize) -> String {
    let mut segment = Segment::create(dir).unwrap();
    for i in 0..count {
        segment.append(&key(&format!("k{}", i)), b"v").unwrap();
    }
    segment.sync().unwrap();
    segment.name().to_string()
}

// =============================================================================
// Discovery Tests
// =============================================================================

#[test]
fn test_discover_empty_directory() {
    let temp_dir = TempDir::new().unwrap();
    assert!(StorageManager::discover(temp_dir.path()).unwrap().is_empty());
}

#[test]
fn test_discover_ignores_other_files() {
    let temp_dir = TempDir::new().unwrap();
    let name = segment_with_records(temp_dir.path(), 1);
    fs::write(temp_dir.path().join("index.idx"), "").unwrap();
    fs::write(temp_dir.path().join("notes.txt"), "hello").unwrap();
    fs::create_dir(temp_dir.path().join("segment_dir.seg")).unwrap();

    let paths = StorageManager::discover(temp_dir.path()).unwrap();
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].file_name().unwrap().to_str().unwrap(), name);
}

#[test]
fn test_discover_removes_compaction_leftovers() {
    let temp_dir = TempDir::new().unwrap();
    segment_with_records(temp_dir.path(), 1);
    let leftover = temp_dir.path().join("segment_abc.seg.compact");
    fs::write(&leftover, "partial").unwrap();

    let paths = StorageManager::discover(temp_dir.path()).unwrap();
    assert_eq!(paths.len(), 1);
    assert!(!leftover.exists());
}

// =============================================================================
// Open Tests
// =============================================================================

#[test]
fn test_create_has_one_active_segment() {
    let temp_dir = TempDir::new().unwrap();
    let manager = StorageManager::create(temp_dir.path(), 1024).unwrap();

    assert_eq!(manager.segment_count(), 1);
    assert_eq!(manager.sealed_count(), 0);
    assert_eq!(manager.active().record_count(), 0);
}

#[test]
fn test_open_picks_fewest_records_as_active() {
    let temp_dir = TempDir::new().unwrap();
    segment_with_records(temp_dir.path(), 5);
    let smallest = segment_with_records(temp_dir.path(), 1);
    segment_with_records(temp_dir.path(), 3);

    let paths = StorageManager::discover(temp_dir.path()).unwrap();
    let manager = StorageManager::open(temp_dir.path(), &paths, 1024 * 1024).unwrap();

    assert_eq!(manager.active().name(), smallest);
    assert!(manager.is_active(&smallest));
    assert_eq!(manager.sealed_count(), 2);
    assert_eq!(manager.segment_count(), 3);
}

#[test]
fn test_open_rotates_oversized_active() {
    let temp_dir = TempDir::new().unwrap();
    let name = segment_with_records(temp_dir.path(), 4);

    let paths = StorageManager::discover(temp_dir.path()).unwrap();
    // Target smaller than the only segment
    let manager = StorageManager::open(temp_dir.path(), &paths, 10).unwrap();

    assert!(!manager.is_active(&name));
    assert!(manager.segment(&name).is_some());
    assert_eq!(manager.segment_count(), 2);
    assert_eq!(manager.active().record_count(), 0);
}

#[test]
fn test_open_without_segments_fails() {
    let temp_dir = TempDir::new().unwrap();
    assert!(StorageManager::open(temp_dir.path(), &[], 1024).is_err());
}

#[test]
fn test_reset_deletes_segments() {
    let temp_dir = TempDir::new().unwrap();
    segment_with_records(temp_dir.path(), 2);
    segment_with_records(temp_dir.path(), 2);

    let paths = StorageManager::discover(temp_dir.path()).unwrap();
    assert_eq!(StorageManager::reset(&paths).unwrap(), 2);
    assert!(StorageManager::discover(temp_dir.path()).unwrap().is_empty());
}

// =============================================================================
// Append / Rotation Tests
// =============================================================================

#[test]
fn test_append_and_read_pointer() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = StorageManager::create(temp_dir.path(), 1024 * 1024).unwrap();

    let pointer = manager.append(&key("a"), b"value").unwrap();
    assert_eq!(pointer.segment, manager.active().name());
    assert_eq!(pointer.offset, 0);

    let (k, v) = manager.read(&pointer).unwrap();
    assert_eq!(k, key("a"));
    assert_eq!(v.as_ref(), b"value");
}

#[test]
fn test_rotation_once_target_exceeded() {
    let temp_dir = TempDir::new().unwrap();
    // One record is ~70 bytes, so the second append exceeds the target
    let mut manager = StorageManager::create(temp_dir.path(), 100).unwrap();

    let first = manager.append(&key("a"), b"1").unwrap();
    let second = manager.append(&key("b"), b"2").unwrap();
    assert_eq!(first.segment, second.segment);
    assert_eq!(manager.sealed_count(), 0);

    // Active now exceeds the target: next append rotates first
    let third = manager.append(&key("c"), b"3").unwrap();
    assert_ne!(third.segment, first.segment);
    assert_eq!(third.offset, 0);
    assert_eq!(manager.sealed_count(), 1);

    // Sealed records stay readable
    assert_eq!(manager.read(&first).unwrap().1.as_ref(), b"1");
    assert_eq!(manager.read(&third).unwrap().1.as_ref(), b"3");
}

#[test]
fn test_rotate_if_needed_noop_below_target() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = StorageManager::create(temp_dir.path(), 1024).unwrap();
    manager.append(&key("a"), b"1").unwrap();

    assert!(!manager.rotate_if_needed().unwrap());
    assert_eq!(manager.segment_count(), 1);
}

#[test]
fn test_read_unknown_segment_is_corruption() {
    let temp_dir = TempDir::new().unwrap();
    let manager = StorageManager::create(temp_dir.path(), 1024).unwrap();

    let result = manager.read(&ValuePointer::new("segment_missing.seg", 0));
    assert!(matches!(result, Err(allykv::AllyError::Corruption(_))));
}

#[test]
fn test_record_counts() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = StorageManager::create(temp_dir.path(), 100).unwrap();
    for name in ["a", "b", "c"] {
        manager.append(&key(name), b"v").unwrap();
    }

    let counts = manager.record_counts();
    assert_eq!(counts.len(), manager.segment_count());
    assert_eq!(counts.values().sum::<u64>(), 3);
}

// =============================================================================
// Retire Tests
// =============================================================================

#[test]
fn test_retire_sealed_segment() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = StorageManager::create(temp_dir.path(), 100).unwrap();
    let first = manager.append(&key("a"), b"1").unwrap();
    manager.append(&key("b"), b"2").unwrap();
    manager.append(&key("c"), b"3").unwrap();

    let path = temp_dir.path().join(&first.segment);
    assert!(manager.retire(&first.segment).unwrap());
    assert!(manager.segment(&first.segment).is_none());
    assert!(!path.exists());
}

#[test]
fn test_retire_never_removes_active() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = StorageManager::create(temp_dir.path(), 1024).unwrap();
    let active = manager.active().name().to_string();

    assert!(!manager.retire(&active).unwrap());
    assert!(manager.segment(&active).is_some());
    assert!(manager.active().path().exists());
}
