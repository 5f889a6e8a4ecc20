//! Integration tests for the public `Engine` API.
//!
//! These tests exercise the full storage stack (WAL → memtable → SSTable →
//! leveled compaction) through the public `aeternusdb::engine::{Engine,
//! EngineConfig, EngineError}` surface only. No internal modules are
//! referenced.
//!
//! ## Coverage areas
//! - **Lifecycle**: open, close, idempotent close, Drop-based cleanup
//! - **CRUD**: put, get, delete, delete_range, overwrite, nonexistent keys
//! - **Scan**: range queries, empty ranges, tombstone filtering
//! - **Persistence**: data survives close → reopen, deletes survive reopen
//! - **Compaction**: `maybe_compact` convergence preserves data, removes
//!   deleted keys
//! - **Concurrency**: multi-thread writes, concurrent readers during writes
//! - **Full-stack**: end-to-end lifecycle with writes, deletes, range-deletes,
//!   compaction, and scan verification
//!
//! ## See also
//! - `engine::tests` — internal engine-level unit tests covering the same
//!   surface from inside the crate boundary, plus crash/recovery scenarios
//!   that require access to on-disk layout

use aeternusdb::compaction::CompactionStrategyType;
use aeternusdb::engine::{Engine, EngineConfig};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

fn default_config() -> EngineConfig {
    EngineConfig {
        write_buffer_size: 4 * 1024 * 1024,
        compaction_strategy: CompactionStrategyType::Leveled,
        l0_compaction_trigger: 4,
        target_file_size: 2 * 1024 * 1024,
        max_levels: 7,
    }
}

/// Small write buffer to trigger frequent freezes and background flushes.
fn small_buffer_config() -> EngineConfig {
    EngineConfig {
        write_buffer_size: 1024,
        ..default_config()
    }
}

/// Reopen a database at the same path with default config.
fn reopen(path: &std::path::Path) -> Engine {
    Engine::open(path, default_config()).expect("reopen")
}

fn key(s: &str) -> Vec<u8> {
    s.as_bytes().to_vec()
}

// ================================================================================================
// Lifecycle
// ================================================================================================

/// # Scenario
/// Open a fresh database and immediately close it.
///
/// # Starting environment
/// Empty temporary directory — no prior data.
///
/// # Actions
/// 1. `Engine::open` with default config.
/// 2. `db.close()`.
///
/// # Expected behavior
/// Both operations succeed without error.
#[test]
fn open_close_empty() {
    let dir = TempDir::new().unwrap();
    let db = Engine::open(dir.path(), default_config()).unwrap();
    db.close().unwrap();
}

/// # Scenario
/// Calling `close()` twice must not panic or return an error.
///
/// # Starting environment
/// Freshly opened database with default config.
///
/// # Actions
/// 1. `db.close()` — first close.
/// 2. `db.close()` — second close (should be a no-op).
///
/// # Expected behavior
/// Both calls return `Ok(())`.
#[test]
fn close_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let db = Engine::open(dir.path(), default_config()).unwrap();
    db.close().unwrap();
    db.close().unwrap(); // second close is a no-op
}

/// # Scenario
/// Dropping the handle without calling `close()` must still persist data.
///
/// # Starting environment
/// Freshly opened database with default config.
///
/// # Actions
/// 1. Put key `"key"` → `"value"`.
/// 2. `drop(db)` without calling `close()`.
/// 3. Reopen database from the same directory.
/// 4. `get("key")`.
///
/// # Expected behavior
/// The WAL persists the write; reopened `get` returns `Some("value")`.
#[test]
fn drop_without_close() {
    let dir = TempDir::new().unwrap();
    let db = Engine::open(dir.path(), default_config()).unwrap();
    db.put(key("key"), key("value")).unwrap();
    drop(db);

    // Reopen should recover the data via WAL replay.
    let db = reopen(dir.path());
    assert_eq!(db.get(key("key")).unwrap(), Some(b"value".to_vec()));
    db.close().unwrap();
}

// ================================================================================================
// Basic CRUD
// ================================================================================================

/// # Scenario
/// Basic put/get round-trip for a single key.
///
/// # Starting environment
/// Freshly opened database — no data.
///
/// # Actions
/// 1. Put `"hello"` → `"world"`.
/// 2. `get("hello")`.
///
/// # Expected behavior
/// `get` returns `Some("world")`.
#[test]
fn put_get_single() {
    let dir = TempDir::new().unwrap();
    let db = Engine::open(dir.path(), default_config()).unwrap();

    db.put(key("hello"), key("world")).unwrap();
    assert_eq!(db.get(key("hello")).unwrap(), Some(b"world".to_vec()));

    db.close().unwrap();
}

/// # Scenario
/// Overwriting a key must return the latest value.
///
/// # Starting environment
/// Freshly opened database — no data.
///
/// # Actions
/// 1. Put `"key"` → `"v1"`.
/// 2. Put `"key"` → `"v2"` (overwrite).
/// 3. `get("key")`.
///
/// # Expected behavior
/// `get` returns `Some("v2")` — the second write wins.
#[test]
fn put_overwrite() {
    let dir = TempDir::new().unwrap();
    let db = Engine::open(dir.path(), default_config()).unwrap();

    db.put(key("key"), key("v1")).unwrap();
    db.put(key("key"), key("v2")).unwrap();
    assert_eq!(db.get(key("key")).unwrap(), Some(b"v2".to_vec()));

    db.close().unwrap();
}

/// # Scenario
/// Deleting a key makes it invisible to subsequent reads.
///
/// # Starting environment
/// Freshly opened database — no data.
///
/// # Actions
/// 1. Put `"key"` → `"value"`.
/// 2. Verify `get("key")` returns `Some("value")`.
/// 3. `delete("key")`.
/// 4. `get("key")`.
///
/// # Expected behavior
/// After deletion, `get` returns `None`.
#[test]
fn delete_key() {
    let dir = TempDir::new().unwrap();
    let db = Engine::open(dir.path(), default_config()).unwrap();

    db.put(key("key"), key("value")).unwrap();
    assert_eq!(db.get(key("key")).unwrap(), Some(b"value".to_vec()));

    db.delete(key("key")).unwrap();
    assert_eq!(db.get(key("key")).unwrap(), None);

    db.close().unwrap();
}

/// # Scenario
/// Range-delete hides keys in `[start, end)` while leaving others intact.
///
/// # Starting environment
/// Freshly opened database — no data.
///
/// # Actions
/// 1. Put keys `"a"` through `"e"` with single-byte values.
/// 2. `delete_range("b", "d")` — removes `"b"` and `"c"`.
/// 3. Get each key.
///
/// # Expected behavior
/// `"a"`, `"d"`, `"e"` survive; `"b"` and `"c"` return `None`.
#[test]
fn delete_range_basic() {
    let dir = TempDir::new().unwrap();
    let db = Engine::open(dir.path(), default_config()).unwrap();

    for c in b'a'..=b'e' {
        db.put(vec![c], vec![c]).unwrap();
    }

    // Delete [b, d)
    db.delete_range(key("b"), key("d")).unwrap();

    assert_eq!(db.get(key("a")).unwrap(), Some(vec![b'a']));
    assert_eq!(db.get(key("b")).unwrap(), None);
    assert_eq!(db.get(key("c")).unwrap(), None);
    assert_eq!(db.get(key("d")).unwrap(), Some(vec![b'd']));
    assert_eq!(db.get(key("e")).unwrap(), Some(vec![b'e']));

    db.close().unwrap();
}

/// # Scenario
/// Getting a key that was never inserted returns `None`.
///
/// # Starting environment
/// Freshly opened database — no data.
///
/// # Actions
/// 1. `get("missing")` without any prior writes.
///
/// # Expected behavior
/// Returns `Ok(None)` — not an error.
#[test]
fn get_nonexistent_key() {
    let dir = TempDir::new().unwrap();
    let db = Engine::open(dir.path(), default_config()).unwrap();

    assert_eq!(db.get(key("missing")).unwrap(), None);

    db.close().unwrap();
}

// ================================================================================================
// Scan
// ================================================================================================

/// # Scenario
/// Scan returns key-value pairs in the half-open range `[start, end)`,
/// sorted by key.
///
/// # Starting environment
/// Freshly opened database — no data.
///
/// # Actions
/// 1. Put keys `"a"` through `"d"` with values `"1"` through `"4"`.
/// 2. `scan("b", "d")` — should return `"b"` and `"c"` only.
///
/// # Expected behavior
/// Two key-value pairs returned in sorted order; `"a"` and `"d"` excluded.
#[test]
fn scan_basic() {
    let dir = TempDir::new().unwrap();
    let db = Engine::open(dir.path(), default_config()).unwrap();

    db.put(key("a"), key("1")).unwrap();
    db.put(key("b"), key("2")).unwrap();
    db.put(key("c"), key("3")).unwrap();
    db.put(key("d"), key("4")).unwrap();

    let results: Vec<_> = db.scan(b"b", b"d").unwrap().collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0], (b"b".to_vec(), b"2".to_vec()));
    assert_eq!(results[1], (b"c".to_vec(), b"3".to_vec()));

    db.close().unwrap();
}

/// # Scenario
/// Scanning an empty or inverted range returns an empty result.
///
/// # Starting environment
/// Database with one key `"a"` → `"1"`.
///
/// # Actions
/// 1. `scan("z", "a")` — start > end (inverted).
/// 2. `scan("x", "z")` — valid range but no keys fall within it.
///
/// # Expected behavior
/// Both scans return an empty iterator.
#[test]
fn scan_empty_range() {
    let dir = TempDir::new().unwrap();
    let db = Engine::open(dir.path(), default_config()).unwrap();

    db.put(key("a"), key("1")).unwrap();

    // start >= end → empty result
    let results: Vec<_> = db.scan(b"z", b"a").unwrap().collect();
    assert!(results.is_empty());

    // No keys in range
    let results: Vec<_> = db.scan(b"x", b"z").unwrap().collect();
    assert!(results.is_empty());

    db.close().unwrap();
}

/// # Scenario
/// Scan must exclude keys hidden by a point-delete tombstone.
///
/// # Starting environment
/// Freshly opened database — no data.
///
/// # Actions
/// 1. Put `"a"`, `"b"`, `"c"`.
/// 2. `delete("b")`.
/// 3. `scan("a", "d")`.
///
/// # Expected behavior
/// Only `"a"` and `"c"` appear; `"b"` is filtered out.
#[test]
fn scan_excludes_deleted_keys() {
    let dir = TempDir::new().unwrap();
    let db = Engine::open(dir.path(), default_config()).unwrap();

    db.put(key("a"), key("1")).unwrap();
    db.put(key("b"), key("2")).unwrap();
    db.put(key("c"), key("3")).unwrap();
    db.delete(key("b")).unwrap();

    let results: Vec<_> = db.scan(b"a", b"d").unwrap().collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, b"a".to_vec());
    assert_eq!(results[1].0, b"c".to_vec());

    db.close().unwrap();
}

// ================================================================================================
// Persistence
// ================================================================================================

/// # Scenario
/// Data written before `close()` is readable after reopening.
///
/// # Starting environment
/// Empty temporary directory.
///
/// # Actions
/// 1. Open database, put `"persist_key"` → `"persist_value"`, close.
/// 2. Reopen database from the same directory.
/// 3. `get("persist_key")`.
///
/// # Expected behavior
/// The reopened database returns `Some("persist_value")`.
#[test]
fn persistence_across_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let db = Engine::open(dir.path(), default_config()).unwrap();
        db.put(key("persist_key"), key("persist_value")).unwrap();
        db.close().unwrap();
    }

    {
        let db = reopen(dir.path());
        assert_eq!(
            db.get(key("persist_key")).unwrap(),
            Some(b"persist_value".to_vec())
        );
        db.close().unwrap();
    }
}

/// # Scenario
/// Hundreds of writes survive close → reopen with a small write buffer
/// that triggers multiple flushes.
///
/// # Starting environment
/// Empty temporary directory, 1 KiB write buffer (forces frequent flushes).
///
/// # Actions
/// 1. Write 500 sequentially-named keys, close.
/// 2. Reopen and verify all 500 keys.
///
/// # Expected behavior
/// Every key is present with its original value after reopen.
#[test]
fn persistence_many_writes() {
    let dir = TempDir::new().unwrap();

    {
        let db = Engine::open(dir.path(), small_buffer_config()).unwrap();
        for i in 0..500u32 {
            let k = format!("key_{:04}", i);
            let v = format!("val_{:04}", i);
            db.put(k.into_bytes(), v.into_bytes()).unwrap();
        }
        db.close().unwrap();
    }

    {
        let db = Engine::open(dir.path(), small_buffer_config()).unwrap();
        for i in 0..500u32 {
            let k = format!("key_{:04}", i);
            let v = format!("val_{:04}", i);
            assert_eq!(
                db.get(k.into_bytes()).unwrap(),
                Some(v.into_bytes()),
                "key_{:04} should be present after reopen",
                i
            );
        }
        db.close().unwrap();
    }
}

/// # Scenario
/// Point-delete tombstones survive close → reopen.
///
/// # Starting environment
/// Empty temporary directory.
///
/// # Actions
/// 1. Put `"alive"` → `"yes"` and `"dead"` → `"soon"`, then `delete("dead")`, close.
/// 2. Reopen and get both keys.
///
/// # Expected behavior
/// `"alive"` returns `Some("yes")`; `"dead"` returns `None`.
#[test]
fn persistence_deletes_survive_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let db = Engine::open(dir.path(), default_config()).unwrap();
        db.put(key("alive"), key("yes")).unwrap();
        db.put(key("dead"), key("soon")).unwrap();
        db.delete(key("dead")).unwrap();
        db.close().unwrap();
    }

    {
        let db = reopen(dir.path());
        assert_eq!(db.get(key("alive")).unwrap(), Some(b"yes".to_vec()));
        assert_eq!(db.get(key("dead")).unwrap(), None);
        db.close().unwrap();
    }
}

// ================================================================================================
// Compaction
// ================================================================================================

/// # Scenario
/// Driving `maybe_compact` to convergence merges multiple SSTables while
/// preserving all live data.
///
/// # Starting environment
/// 1 KiB write buffer — 200 writes produce multiple SSTables.
///
/// # Actions
/// 1. Write 200 keys, close (flushes all frozen memtables).
/// 2. Reopen, call `maybe_compact()` until it returns `false`.
/// 3. Verify all 200 keys are still readable.
///
/// # Expected behavior
/// At least one compaction round runs. All keys survive.
#[test]
fn compaction_preserves_data() {
    let dir = TempDir::new().unwrap();
    let db = Engine::open(dir.path(), small_buffer_config()).unwrap();

    // Write enough data to create multiple SSTables.
    for i in 0..200u32 {
        let k = format!("mc_{:04}", i);
        let v = format!("val_{:04}", i);
        db.put(k.into_bytes(), v.into_bytes()).unwrap();
    }
    // Close flushes everything.
    db.close().unwrap();

    // Reopen and run compaction to convergence.
    let db = Engine::open(dir.path(), small_buffer_config()).unwrap();
    let mut rounds = 0;
    while db.maybe_compact().unwrap() {
        rounds += 1;
    }
    assert!(rounds > 0, "should have compacted multiple SSTables");

    // All data should still be present.
    for i in 0..200u32 {
        let k = format!("mc_{:04}", i);
        let v = format!("val_{:04}", i);
        assert_eq!(
            db.get(k.into_bytes()).unwrap(),
            Some(v.into_bytes()),
            "mc_{:04} should survive compaction",
            i
        );
    }

    db.close().unwrap();
}

/// # Scenario
/// Compaction physically drops point-deleted keys from SSTables.
///
/// # Starting environment
/// 1 KiB write buffer — writes produce multiple SSTables.
///
/// # Actions
/// 1. Write 100 keys, point-delete even-indexed keys, close.
/// 2. Reopen, run `maybe_compact()` to convergence.
/// 3. Verify even keys return `None`, odd keys return their values.
///
/// # Expected behavior
/// Tombstones are applied during compaction; deleted keys are gone.
#[test]
fn compaction_removes_deleted_keys() {
    let dir = TempDir::new().unwrap();

    {
        let db = Engine::open(dir.path(), small_buffer_config()).unwrap();
        for i in 0..100u32 {
            let k = format!("del_{:04}", i);
            let v = format!("val_{:04}", i);
            db.put(k.into_bytes(), v.into_bytes()).unwrap();
        }
        // Delete half the keys.
        for i in (0..100u32).step_by(2) {
            let k = format!("del_{:04}", i);
            db.delete(k.into_bytes()).unwrap();
        }
        db.close().unwrap();
    }

    {
        let db = Engine::open(dir.path(), small_buffer_config()).unwrap();
        while db.maybe_compact().unwrap() {}

        for i in 0..100u32 {
            let k = format!("del_{:04}", i);
            if i % 2 == 0 {
                assert_eq!(db.get(k.into_bytes()).unwrap(), None);
            } else {
                let v = format!("val_{:04}", i);
                assert_eq!(db.get(k.into_bytes()).unwrap(), Some(v.into_bytes()));
            }
        }
        db.close().unwrap();
    }
}

// ================================================================================================
// Concurrency
// ================================================================================================

/// # Scenario
/// Four threads write 100 disjoint keys each; all 400 are readable
/// after the threads join.
///
/// # Starting environment
/// Freshly opened database shared via `Arc<Engine>`.
///
/// # Actions
/// 1. Spawn 4 writer threads, each writing `t{id}_k{0..99}`.
/// 2. Join all threads.
/// 3. Read all 400 keys from the main thread.
///
/// # Expected behavior
/// All 400 keys return their corresponding values — no data loss.
#[test]
fn concurrent_writes_and_reads() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(Engine::open(dir.path(), default_config()).unwrap());

    let mut handles = vec![];

    // 4 writer threads, 100 keys each.
    for t in 0..4u32 {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            for i in 0..100u32 {
                let k = format!("t{}_k{:04}", t, i);
                let v = format!("t{}_v{:04}", t, i);
                db.put(k.into_bytes(), v.into_bytes()).unwrap();
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    // Verify all 400 keys.
    for t in 0..4u32 {
        for i in 0..100u32 {
            let k = format!("t{}_k{:04}", t, i);
            let v = format!("t{}_v{:04}", t, i);
            assert_eq!(
                db.get(k.clone().into_bytes()).unwrap(),
                Some(v.into_bytes()),
                "missing: {k}"
            );
        }
    }

    db.close().unwrap();
}

/// # Scenario
/// Reader threads observe previously-written keys while a writer thread
/// adds new keys concurrently.
///
/// # Starting environment
/// Database pre-populated with 50 keys `pre_0000..pre_0049`.
///
/// # Actions
/// 1. Spawn 1 writer adding `pre_0050..pre_0149`.
/// 2. Spawn 3 reader threads each reading all 50 pre-existing keys.
/// 3. Join all threads.
///
/// # Expected behavior
/// Readers never see a `None` for pre-existing keys — writes do not
/// interfere with concurrent reads of stable data.
#[test]
fn concurrent_reads_during_writes() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(Engine::open(dir.path(), default_config()).unwrap());

    // Pre-populate some keys.
    for i in 0..50u32 {
        let k = format!("pre_{:04}", i);
        let v = format!("val_{:04}", i);
        db.put(k.into_bytes(), v.into_bytes()).unwrap();
    }

    let mut handles = vec![];

    // Writer thread adds new keys.
    {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            for i in 50..150u32 {
                let k = format!("pre_{:04}", i);
                let v = format!("val_{:04}", i);
                db.put(k.into_bytes(), v.into_bytes()).unwrap();
            }
        }));
    }

    // Reader threads read pre-existing keys concurrently.
    for _ in 0..3 {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            for i in 0..50u32 {
                let k = format!("pre_{:04}", i);
                let v = format!("val_{:04}", i);
                assert_eq!(
                    db.get(k.clone().into_bytes()).unwrap(),
                    Some(v.into_bytes()),
                    "reader couldn't find {k}"
                );
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    db.close().unwrap();
}

// ================================================================================================
// Full-stack orchestration
// ================================================================================================

/// # Scenario
/// End-to-end lifecycle: bulk writes, point-deletes, range-deletes,
/// close → reopen, compaction to convergence, and full scan verification.
///
/// # Starting environment
/// Empty directory, 1 KiB write buffer (many flushes).
///
/// # Actions
/// **Phase 1** — populate and mutate:
/// 1. Write 300 sequentially-named keys.
/// 2. Point-delete all even-indexed keys.
/// 3. Range-delete `[life_0200, life_0250)`.
/// 4. Close.
///
/// **Phase 2** — compact and verify:
/// 1. Reopen, run `maybe_compact()` to convergence.
/// 2. Verify each key: even → `None` (point-deleted),
///    odd in `[200..250)` → `None` (range-deleted),
///    remaining odd → original value.
/// 3. Scan all surviving keys and assert count = 125.
///
/// # Expected behavior
/// 125 odd keys outside the range-deleted interval survive.
#[test]
fn full_lifecycle_with_compaction() {
    let dir = TempDir::new().unwrap();

    // Phase 1: Write, delete, range-delete with small buffer (triggers flushes).
    {
        let db = Engine::open(dir.path(), small_buffer_config()).unwrap();

        for i in 0..300u32 {
            let k = format!("life_{:04}", i);
            let v = format!("val_{:04}", i);
            db.put(k.into_bytes(), v.into_bytes()).unwrap();
        }

        // Point-delete even keys.
        for i in (0..300u32).step_by(2) {
            let k = format!("life_{:04}", i);
            db.delete(k.into_bytes()).unwrap();
        }

        // Range-delete [life_0200, life_0250).
        db.delete_range(key("life_0200"), key("life_0250")).unwrap();

        db.close().unwrap();
    }

    // Phase 2: Reopen, compact to convergence, verify.
    {
        let db = Engine::open(dir.path(), small_buffer_config()).unwrap();
        while db.maybe_compact().unwrap() {}

        for i in 0..300u32 {
            let k = format!("life_{:04}", i);
            let result = db.get(k.clone().into_bytes()).unwrap();

            if i % 2 == 0 {
                // Even keys were point-deleted.
                assert_eq!(result, None, "{k} should be deleted (even)");
            } else if (200..250).contains(&i) {
                // Range-deleted (but odd keys in this range were NOT point-deleted,
                // they were range-deleted).
                assert_eq!(result, None, "{k} should be range-deleted");
            } else {
                let v = format!("val_{:04}", i);
                assert_eq!(result, Some(v.into_bytes()), "{k} should exist");
            }
        }

        // Scan surviving keys.
        let scan: Vec<_> = db.scan(b"life_0000", b"life_9999").unwrap().collect();
        // Odd keys outside [200,250) range: there are 150 odd keys total,
        // minus those in [200..250) that are odd (201,203,...,249 = 25 keys).
        let expected_count = 150 - 25;
        assert_eq!(
            scan.len(),
            expected_count,
            "scan should return {expected_count} surviving keys"
        );

        db.close().unwrap();
    }
}
