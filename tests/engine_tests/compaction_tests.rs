//! Tests for compaction
//!
//! These tests verify:
//! - Superseded records are removed from dirty segments
//! - Values and pointers stay correct after a rewrite
//! - Empty sealed segments are retired
//! - The persisted index follows the rewrite
//! - Garbage written before a restart is found again at open

use std::path::Path;

use allykv::config::Config;
use allykv::engine::{CompactionStats, Engine};
use allykv::storage::IndexFile;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn open_engine(dir: &Path, target_size: u64) -> Engine {
    let config = Config::builder()
        .data_dir(dir)
        .segment_target_size(target_size)
        .build();
    Engine::open(config).unwrap()
}

/// Number of keys whose index pointer lands in `segment`
fn live_in(engine: &Engine, keys: &[&str], segment: &str) -> u64 {
    keys.iter()
        .filter(|k| {
            engine
                .index_pointer(k.as_bytes())
                .map(|p| p.segment == segment)
                .unwrap_or(false)
        })
        .count() as u64
}

// =============================================================================
// Compaction Tests
// =============================================================================

#[test]
fn test_compact_nothing_dirty() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path(), 1024 * 1024);

    engine.put(b"a", b"1").unwrap();
    engine.flush_new().unwrap();

    assert_eq!(engine.compact().unwrap(), CompactionStats::default());
}

#[test]
fn test_compact_active_segment_removes_garbage() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path(), 1024 * 1024);
    let keys = ["a", "b", "c"];

    for key in keys {
        engine.put(key.as_bytes(), b"old").unwrap();
    }
    engine.flush_new().unwrap();
    engine.put(b"a", b"new-a").unwrap();
    engine.put(b"b", b"new-b").unwrap();
    engine.flush_edits().unwrap();

    let active = engine.active_segment();
    assert_eq!(engine.segment_record_counts()[&active], 5);
    assert_eq!(engine.dirty_segments(), vec![active.clone()]);

    let stats = engine.compact().unwrap();
    assert_eq!(stats.segments_compacted, 1);
    assert_eq!(stats.records_removed, 2);
    assert_eq!(stats.segments_retired, 0);

    assert_eq!(engine.segment_record_counts()[&active], 3);
    assert_eq!(live_in(&engine, &keys, &active), 3);
    assert!(engine.dirty_segments().is_empty());

    assert_eq!(engine.get(b"a").unwrap(), Some(b"new-a".to_vec()));
    assert_eq!(engine.get(b"b").unwrap(), Some(b"new-b".to_vec()));
    assert_eq!(engine.get(b"c").unwrap(), Some(b"old".to_vec()));
}

#[test]
fn test_compact_reassigns_pointers() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path(), 1024 * 1024);

    engine.put(b"a", b"1").unwrap();
    engine.put(b"b", b"2").unwrap();
    engine.flush_new().unwrap();
    engine.put(b"a", b"3").unwrap();
    engine.flush_edits().unwrap();

    engine.compact().unwrap();

    let mut offsets: Vec<u64> = [b"a", b"b"]
        .iter()
        .map(|k| engine.index_pointer(*k).unwrap().offset)
        .collect();
    offsets.sort();
    assert_eq!(offsets, vec![0, 1]);

    for (key, value) in [(b"a", b"3"), (b"b", b"2")] {
        let pointer = engine.index_pointer(key).unwrap();
        assert_eq!(engine.resolve_pointer(&pointer).unwrap(), value);
    }
}

#[test]
fn test_compact_sealed_segment_and_retire_when_empty() {
    let temp_dir = TempDir::new().unwrap();
    // Every append after the first in a segment rotates
    let engine = open_engine(temp_dir.path(), 16);

    engine.put(b"a", b"1").unwrap();
    engine.flush_new().unwrap();
    let original = engine.index_pointer(b"a").unwrap().segment;

    engine.put(b"a", b"2").unwrap();
    engine.flush_edits().unwrap();
    assert_ne!(engine.index_pointer(b"a").unwrap().segment, original);
    assert_eq!(engine.dirty_segments(), vec![original.clone()]);
    assert_eq!(engine.segment_count(), 2);

    let stats = engine.compact().unwrap();
    assert_eq!(stats.segments_compacted, 1);
    assert_eq!(stats.records_removed, 1);
    assert_eq!(stats.segments_retired, 1);

    assert_eq!(engine.segment_count(), 1);
    assert!(!temp_dir.path().join(&original).exists());
    assert_eq!(engine.get(b"a").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn test_compact_keeps_other_segments_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path(), 16);

    for key in ["a", "b", "c"] {
        engine.put(key.as_bytes(), b"v1").unwrap();
    }
    engine.flush_new().unwrap();
    let before = engine.segment_record_counts();

    engine.put(b"b", b"v2").unwrap();
    engine.flush_edits().unwrap();
    let dirty = engine.dirty_segments();
    assert_eq!(dirty.len(), 1);

    engine.compact().unwrap();

    let after = engine.segment_record_counts();
    for (name, count) in before {
        if name == dirty[0] {
            assert!(!after.contains_key(&name));
        } else {
            assert_eq!(after[&name], count);
        }
    }
    for (key, value) in [("a", "v1"), ("b", "v2"), ("c", "v1")] {
        assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(value.as_bytes().to_vec()));
    }
}

#[test]
fn test_compaction_persists_index() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = open_engine(temp_dir.path(), 1024 * 1024);
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
        engine.flush_new().unwrap();
        engine.persist_index().unwrap();
        engine.put(b"a", b"3").unwrap();
        engine.flush_edits().unwrap();
        engine.compact().unwrap();

        // The rewrite moved record positions; the snapshot on disk matches
        let loaded = IndexFile::new(temp_dir.path()).load().unwrap();
        for key in [b"a", b"b"] {
            assert_eq!(
                loaded.get(&engine.key_hash(key)),
                engine.index_pointer(key).as_ref()
            );
        }
        assert!(!engine.persist_index().unwrap());
        // Dropped without close
    }

    let engine = open_engine(temp_dir.path(), 1024 * 1024);
    assert_eq!(engine.get(b"a").unwrap(), Some(b"3".to_vec()));
    assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn test_repeated_edits_then_compact() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path(), 1024 * 1024);

    for round in 0..5 {
        engine.put(b"hot", format!("v{}", round).as_bytes()).unwrap();
        engine.flush_new().unwrap();
        engine.flush_edits().unwrap();
    }
    let active = engine.active_segment();
    assert_eq!(engine.segment_record_counts()[&active], 5);

    let stats = engine.compact().unwrap();
    assert_eq!(stats.records_removed, 4);
    assert_eq!(engine.segment_record_counts()[&active], 1);
    assert_eq!(engine.get(b"hot").unwrap(), Some(b"v4".to_vec()));

    // A second pass has nothing to do
    assert_eq!(engine.compact().unwrap(), CompactionStats::default());
}

#[test]
fn test_edits_flushed_before_restart_are_compacted() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = open_engine(temp_dir.path(), 1024 * 1024);
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
        engine.flush_new().unwrap();
        engine.put(b"a", b"3").unwrap();
        engine.flush_edits().unwrap();
        engine.close().unwrap();
    }

    let engine = open_engine(temp_dir.path(), 1024 * 1024);
    let active = engine.active_segment();
    assert_eq!(engine.segment_record_counts()[&active], 3);
    assert_eq!(engine.dirty_segments(), vec![active.clone()]);

    let stats = engine.compact().unwrap();
    assert_eq!(stats.segments_compacted, 1);
    assert_eq!(stats.records_removed, 1);

    assert_eq!(engine.segment_record_counts()[&active], 2);
    assert_eq!(live_in(&engine, &["a", "b"], &active), 2);
    assert_eq!(engine.get(b"a").unwrap(), Some(b"3".to_vec()));
    assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn test_records_missing_from_persisted_index_are_compacted() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = open_engine(temp_dir.path(), 1024 * 1024);
        engine.put(b"a", b"1").unwrap();
        engine.flush_new().unwrap();
        engine.persist_index().unwrap();

        // Appended but never indexed on disk
        engine.put(b"b", b"2").unwrap();
        engine.flush_new().unwrap();
        // Dropped without close
    }

    let engine = open_engine(temp_dir.path(), 1024 * 1024);
    assert_eq!(engine.get(b"b").unwrap(), None);
    assert_eq!(engine.dirty_segments().len(), 1);

    let stats = engine.compact().unwrap();
    assert_eq!(stats.records_removed, 1);
    assert_eq!(engine.segment_record_counts().values().sum::<u64>(), 1);
    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
}

#[test]
fn test_clean_restart_marks_nothing_dirty() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = open_engine(temp_dir.path(), 1024 * 1024);
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
        engine.close().unwrap();
    }

    let engine = open_engine(temp_dir.path(), 1024 * 1024);
    assert!(engine.dirty_segments().is_empty());
    assert_eq!(engine.compact().unwrap(), CompactionStats::default());
}
