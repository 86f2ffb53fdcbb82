// End-to-end behaviour of the DB handle: reads, writes, flushes, close.

use std::fs;
use std::path::{Path, PathBuf};

use lsm_kv::sstable::tmp_path;
use lsm_kv::types::ENTRY_HEADER_SIZE;
use lsm_kv::{DB, Error, Options};
use tempfile::tempdir;

fn quiet(memtable: usize) -> Options {
    Options::new().max_memtable_size(memtable).background_compaction(false)
}

/// Put directories where the next `count` segment builds would create
/// their temporary files, so those builds fail.
fn block_segment_builds(dir: &Path, from: u64, count: u64) -> Vec<PathBuf> {
    (from..from + count)
        .map(|generation| {
            let path = tmp_path(dir, generation);
            fs::create_dir(&path).unwrap();
            path
        })
        .collect()
}

fn unblock(paths: &[PathBuf]) {
    for path in paths {
        fs::remove_dir(path).unwrap();
    }
}

fn put_n(db: &DB, i: usize) -> lsm_kv::Result<()> {
    db.put(format!("k{i:02}").as_bytes(), &[b'x'; 30])
}

// =============================================================================
// Test 1: Put then get, across a flush
// =============================================================================
#[test]
fn put_get_roundtrip() {
    let dir = tempdir().unwrap();
    let db = DB::open_with(dir.path(), quiet(64 * 1024)).unwrap();

    db.put(b"alpha", b"1").unwrap();
    db.put(b"beta", b"2").unwrap();
    assert_eq!(db.get(b"alpha").unwrap(), Some(b"1".to_vec()));
    assert_eq!(db.get(b"gamma").unwrap(), None);

    db.flush().unwrap();
    assert_eq!(db.stats().segments.len(), 1);
    assert_eq!(db.get(b"alpha").unwrap(), Some(b"1".to_vec()));
    assert_eq!(db.get(b"beta").unwrap(), Some(b"2".to_vec()));
    assert_eq!(db.get(b"gamma").unwrap(), None);
}

// =============================================================================
// Test 2: Deletes shadow older values, in memory and on disk
// =============================================================================
#[test]
fn delete_shadows_flushed_value() {
    let dir = tempdir().unwrap();
    let db = DB::open_with(dir.path(), quiet(64 * 1024)).unwrap();

    db.put(b"k", b"v").unwrap();
    db.flush().unwrap();
    db.delete(b"k").unwrap();
    assert_eq!(db.get(b"k").unwrap(), None);

    db.flush().unwrap();
    assert_eq!(db.get(b"k").unwrap(), None);
    assert_eq!(db.stats().segments.len(), 2);

    // Deleting a key that never existed is fine.
    db.delete(b"ghost").unwrap();
    assert_eq!(db.get(b"ghost").unwrap(), None);
}

// =============================================================================
// Test 3: The most recent write wins across memtable and segments
// =============================================================================
#[test]
fn last_writer_wins() {
    let dir = tempdir().unwrap();
    {
        let db = DB::open_with(dir.path(), quiet(64 * 1024)).unwrap();
        db.put(b"k", b"v1").unwrap();
        db.flush().unwrap();
        db.put(b"k", b"v2").unwrap();
        db.flush().unwrap();
        db.put(b"k", b"v3").unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(b"v3".to_vec()));
        db.flush().unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(b"v3".to_vec()));
        db.delete(b"k").unwrap();
        db.put(b"k", b"v4").unwrap();
    }

    let db = DB::open_with(dir.path(), quiet(64 * 1024)).unwrap();
    assert_eq!(db.get(b"k").unwrap(), Some(b"v4".to_vec()));
}

// =============================================================================
// Test 4: Reaching the threshold flushes on the next write; generations count up by one
// =============================================================================
#[test]
fn threshold_flush_assigns_next_generation() {
    let dir = tempdir().unwrap();
    let entry = ENTRY_HEADER_SIZE + 3 + 30;
    let db = DB::open_with(dir.path(), quiet(4 * entry)).unwrap();

    // Four entries land the memtable exactly on the threshold and stay there.
    for i in 0..4 {
        db.put(format!("k{i:02}").as_bytes(), &[b'x'; 30]).unwrap();
    }
    let stats = db.stats();
    assert_eq!(stats.flushes, 0);
    assert_eq!(stats.memtable_bytes, 4 * entry);
    assert_eq!(stats.memtable_entries, 4);

    // The fifth write flushes all four before it is buffered.
    for i in 4..9 {
        db.put(format!("k{i:02}").as_bytes(), &[b'x'; 30]).unwrap();
    }

    let stats = db.stats();
    assert_eq!(stats.flushes, 2);
    let generations: Vec<u64> = stats.segments.iter().map(|m| m.generation).collect();
    assert_eq!(generations, vec![2, 1]);
    assert!(stats.segments.iter().all(|m| m.level == 0 && m.entry_count == 4));
    assert_eq!(stats.memtable_entries, 1);
    assert_eq!(stats.memtable_bytes, entry);
    assert_eq!(stats.last_sequence, 9);

    for i in 0..9 {
        assert!(db.get(format!("k{i:02}").as_bytes()).unwrap().is_some());
    }
}

// =============================================================================
// Test 5: A single entry bigger than the threshold goes straight to disk
// =============================================================================
#[test]
fn oversized_entry_is_flushed_alone() {
    let dir = tempdir().unwrap();
    let db = DB::open_with(dir.path(), quiet(128)).unwrap();
    let big = vec![7u8; 4096];

    db.put(b"big", &big).unwrap();

    let stats = db.stats();
    assert_eq!(stats.flushes, 1);
    assert_eq!(stats.memtable_entries, 0);
    assert_eq!(stats.wal_bytes, 0);
    assert_eq!(db.get(b"big").unwrap(), Some(big));
}

// =============================================================================
// Test 6: Empty keys and values are ordinary data
// =============================================================================
#[test]
fn empty_key_and_value() {
    let dir = tempdir().unwrap();
    let db = DB::open_with(dir.path(), quiet(64 * 1024)).unwrap();
    db.put(b"", b"empty key").unwrap();
    db.put(b"empty value", b"").unwrap();
    db.flush().unwrap();

    assert_eq!(db.get(b"").unwrap(), Some(b"empty key".to_vec()));
    assert_eq!(db.get(b"empty value").unwrap(), Some(Vec::new()));
}

// =============================================================================
// Test 7: Every operation after close fails with EngineClosed
// =============================================================================
#[test]
fn closed_engine_rejects_operations() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path()).unwrap();
    db.put(b"k", b"v").unwrap();
    db.close().unwrap();
    db.close().unwrap();

    assert!(matches!(db.put(b"k", b"v"), Err(Error::EngineClosed)));
    assert!(matches!(db.delete(b"k"), Err(Error::EngineClosed)));
    assert!(matches!(db.get(b"k"), Err(Error::EngineClosed)));
    assert!(matches!(db.flush(), Err(Error::EngineClosed)));
    assert!(matches!(db.compact(), Err(Error::EngineClosed)));
}

// =============================================================================
// Test 8: Close writes the memtable out and empties the WAL
// =============================================================================
#[test]
fn close_flushes_memtable() {
    let dir = tempdir().unwrap();
    {
        let db = DB::open_with(dir.path(), quiet(64 * 1024)).unwrap();
        db.put(b"a", b"1").unwrap();
        db.put(b"b", b"2").unwrap();
        db.close().unwrap();
    }

    let db = DB::open_with(dir.path(), quiet(64 * 1024)).unwrap();
    let stats = db.stats();
    assert_eq!(stats.segments.len(), 1);
    assert_eq!(stats.memtable_entries, 0);
    assert_eq!(stats.wal_bytes, 0);
    assert_eq!(stats.last_sequence, 2);
    assert_eq!(db.get(b"b").unwrap(), Some(b"2".to_vec()));
}

// =============================================================================
// Test 9: Unusable options are refused at open
// =============================================================================
#[test]
fn invalid_options_rejected() {
    let dir = tempdir().unwrap();
    let bad = [
        Options::new().block_size(0),
        Options::new().max_memtable_size(0),
        Options::new().max_memtable_size(1024).memtable_hard_cap(512),
        Options::new().false_positive_rate(1.5),
        Options::new().max_levels(0),
    ];
    for options in bad {
        let result = DB::open_with(dir.path(), options.clone());
        assert!(matches!(result, Err(Error::InvalidOptions(_))), "{options:?} accepted");
    }
}

// =============================================================================
// Test 10: A missing directory is only created when asked to
// =============================================================================
#[test]
fn create_if_missing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("db");

    assert!(DB::open_with(&path, Options::new().create_if_missing(false)).is_err());
    assert!(!path.exists());

    let db = DB::open(&path).unwrap();
    db.put(b"k", b"v").unwrap();
    assert!(path.join("wal.log").exists());
}

// =============================================================================
// Test 11: Overwriting a buffered key counts only the size difference
// =============================================================================
#[test]
fn overwrite_does_not_trigger_early_flush() {
    let dir = tempdir().unwrap();
    let entry = ENTRY_HEADER_SIZE + 3 + 30;
    let db = DB::open_with(dir.path(), quiet(3 * entry)).unwrap();

    put_n(&db, 0).unwrap();
    put_n(&db, 1).unwrap();
    for _ in 0..10 {
        db.put(b"k00", &[b'y'; 30]).unwrap();
    }
    let stats = db.stats();
    assert_eq!(stats.flushes, 0);
    assert_eq!(stats.memtable_entries, 2);
    assert_eq!(stats.memtable_bytes, 2 * entry);

    put_n(&db, 2).unwrap();
    assert_eq!(db.stats().flushes, 0);
    put_n(&db, 3).unwrap();
    let stats = db.stats();
    assert_eq!(stats.flushes, 1);
    assert_eq!(stats.segments[0].entry_count, 3);
    assert_eq!(db.get(b"k00").unwrap(), Some(vec![b'y'; 30]));
}

// =============================================================================
// Test 12: Failed flushes reject the triggering write, buffer up to the hard cap, then recover
// =============================================================================
#[test]
fn flush_failure_buffers_until_hard_cap() {
    let dir = tempdir().unwrap();
    let entry = ENTRY_HEADER_SIZE + 3 + 30;
    let options = quiet(2 * entry).memtable_hard_cap(6 * entry);
    let db = DB::open_with(dir.path(), options).unwrap();

    put_n(&db, 0).unwrap();
    put_n(&db, 1).unwrap();
    let blocked = block_segment_builds(dir.path(), db.stats().next_generation, 32);

    // The write that finds the memtable full fails and changes nothing.
    assert!(matches!(put_n(&db, 2), Err(Error::Io(_))));
    let stats = db.stats();
    assert_eq!(stats.flush_failures, 1);
    assert_eq!(stats.memtable_entries, 2);
    assert_eq!(stats.memtable_bytes, 2 * entry);
    assert_eq!(stats.last_sequence, 2);
    assert!(stats.segments.is_empty());
    assert_eq!(db.get(b"k02").unwrap(), None);
    assert!(db.get(b"k00").unwrap().is_some());

    // Later writes buffer past the threshold until the hard cap.
    for i in 2..6 {
        put_n(&db, i).unwrap();
    }
    assert_eq!(db.stats().memtable_bytes, 6 * entry);
    match put_n(&db, 6) {
        Err(Error::MemtableFull { size, cap }) => {
            assert_eq!(size, 7 * entry);
            assert_eq!(cap, 6 * entry);
        }
        other => panic!("expected MemtableFull, got {other:?}"),
    }
    // Same-size overwrite stays within the cap.
    db.put(b"k05", &[b'z'; 30]).unwrap();

    let stats = db.stats();
    assert_eq!(stats.flush_failures, 7);
    assert_eq!(stats.flushes, 0);
    assert_eq!(stats.memtable_entries, 6);
    assert_eq!(stats.last_sequence, 7);
    assert_eq!(db.get(b"k06").unwrap(), None);
    assert_eq!(db.get(b"k05").unwrap(), Some(vec![b'z'; 30]));

    // Once the disk cooperates again a flush writes everything out.
    unblock(&blocked);
    db.flush().unwrap();
    let stats = db.stats();
    assert_eq!(stats.flushes, 1);
    assert_eq!(stats.memtable_entries, 0);
    assert_eq!(stats.wal_bytes, 0);
    assert_eq!(stats.segments.len(), 1);
    assert_eq!(stats.segments[0].entry_count, 6);
    for i in 0..5 {
        assert!(db.get(format!("k{i:02}").as_bytes()).unwrap().is_some());
    }
}

// =============================================================================
// Test 13: After recovering from a failed flush, oversized writes flush right away again
// =============================================================================
#[test]
fn recovered_flush_resumes_oversized_flushing() {
    let dir = tempdir().unwrap();
    let entry = ENTRY_HEADER_SIZE + 3 + 30;
    let db = DB::open_with(dir.path(), quiet(2 * entry)).unwrap();

    put_n(&db, 0).unwrap();
    put_n(&db, 1).unwrap();
    let blocked = block_segment_builds(dir.path(), db.stats().next_generation, 4);
    assert!(put_n(&db, 2).is_err());
    unblock(&blocked);
    db.flush().unwrap();
    assert_eq!(db.stats().flushes, 1);

    let big = vec![9u8; 4 * entry];
    db.put(b"big", &big).unwrap();
    let stats = db.stats();
    assert_eq!(stats.flushes, 2);
    assert_eq!(stats.memtable_entries, 0);
    assert_eq!(db.get(b"big").unwrap(), Some(big));
}

// =============================================================================
// Test 14: Close lets go of segments and the WAL but leaves the files
// =============================================================================
#[test]
fn close_releases_segments() {
    let dir = tempdir().unwrap();
    let db = DB::open_with(dir.path(), quiet(64 * 1024)).unwrap();
    db.put(b"a", b"1").unwrap();
    db.flush().unwrap();
    db.put(b"b", b"2").unwrap();
    db.close().unwrap();

    let stats = db.stats();
    assert!(stats.segments.is_empty());
    assert_eq!(stats.wal_bytes, 0);
    assert!(lsm_kv::sstable::segment_path(dir.path(), 1).exists());
    assert!(lsm_kv::sstable::segment_path(dir.path(), 2).exists());
    drop(db);

    let db = DB::open_with(dir.path(), quiet(64 * 1024)).unwrap();
    assert_eq!(db.stats().segments.len(), 2);
    assert_eq!(db.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(db.get(b"b").unwrap(), Some(b"2".to_vec()));
}
