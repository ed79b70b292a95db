//! Durable Store Recovery Tests
//!
//! Tests for recovery invariants per STORE.md:
//! - Reopening a store rebuilds exactly the state that was durable
//! - Version issue resumes past everything ever written
//! - A record torn by a crash is discarded; the clean prefix survives
//! - Damage anywhere but the tail refuses to open

use chronodb::history::Lookup;
use chronodb::index::VersionedKv;
use chronodb::store::{FileStore, FileStoreConfig};
use chronodb::version::Version;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

type DurableMap = VersionedKv<String, String, FileStore<String, String>>;

fn open_map(dir: &Path) -> DurableMap {
    VersionedKv::with_store(FileStore::open(dir).expect("Failed to open store"))
        .expect("Failed to restore map")
}

fn insert(map: &DurableMap, key: &str, value: &str) -> Version {
    map.insert(key.to_string(), value.to_string()).unwrap()
}

fn store_log(dir: &Path) -> std::path::PathBuf {
    dir.join("store.log")
}

/// Tears `count` bytes off the end of the record file, as a crash during
/// the final write would.
fn tear_tail(dir: &Path, count: u64) {
    let path = store_log(dir);
    let len = fs::metadata(&path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - count).unwrap();
}

// =============================================================================
// Round-Trip Recovery (STORE.md §5)
// =============================================================================

/// Everything written before a clean shutdown is visible after reopen,
/// including full per-key histories.
#[test]
fn test_reopen_restores_full_state() {
    let dir = TempDir::new().unwrap();
    let (snapshot, latest, history) = {
        let map = open_map(dir.path());
        insert(&map, "apple", "red");
        insert(&map, "banana", "yellow");
        insert(&map, "apple", "green");
        map.remove(&"banana".to_string()).unwrap();
        insert(&map, "cherry", "dark");
        (
            map.snapshot(Version::MAX),
            map.latest(),
            map.key_history(&"apple".to_string()),
        )
    };

    let map = open_map(dir.path());
    assert_eq!(map.snapshot(Version::MAX), snapshot);
    assert_eq!(map.latest(), latest);
    assert_eq!(map.key_history(&"apple".to_string()), history);
    assert_eq!(map.len(), 3);

    // Historical bounds replay identically too.
    assert_eq!(
        map.find(&"apple".to_string(), Version::new(1)).into_value(),
        Some("red".to_string())
    );
    assert_eq!(
        map.find(&"banana".to_string(), Version::new(2)).into_value(),
        Some("yellow".to_string())
    );
}

/// Tombstones are as durable as values.
#[test]
fn test_tombstones_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let map = open_map(dir.path());
        insert(&map, "key", "value");
        map.remove(&"key".to_string()).unwrap();
    }

    let map = open_map(dir.path());
    assert_eq!(map.find(&"key".to_string(), Version::MAX), Lookup::Absent);
    assert_eq!(
        map.find(&"key".to_string(), Version::new(1)).into_value(),
        Some("value".to_string())
    );
    assert_eq!(
        map.key_history(&"key".to_string()),
        vec![(Version::new(1), "value".to_string())]
    );
}

/// Versions issued after reopen continue past the restored watermark; no
/// version is ever issued twice for durable state.
#[test]
fn test_version_issue_resumes_past_watermark() {
    let dir = TempDir::new().unwrap();
    let latest = {
        let map = open_map(dir.path());
        insert(&map, "a", "1");
        insert(&map, "b", "2");
        map.remove(&"a".to_string()).unwrap();
        map.latest()
    };

    let map = open_map(dir.path());
    assert_eq!(map.latest(), latest);
    let next = insert(&map, "c", "3");
    assert_eq!(next, Version::new(latest.value() + 1));
}

/// State accumulates across any number of reopen generations.
#[test]
fn test_reopen_generations_accumulate() {
    let dir = TempDir::new().unwrap();
    {
        let map = open_map(dir.path());
        insert(&map, "first", "1");
    }
    {
        let map = open_map(dir.path());
        insert(&map, "second", "2");
        insert(&map, "first", "1b");
    }

    let map = open_map(dir.path());
    assert_eq!(map.len(), 2);
    assert_eq!(
        map.find(&"first".to_string(), Version::MAX).into_value(),
        Some("1b".to_string())
    );
    assert_eq!(map.key_history(&"first".to_string()).len(), 2);
    assert_eq!(map.latest(), Version::new(3));
}

/// An empty directory opens as an empty map and is usable immediately.
#[test]
fn test_empty_store_opens_empty() {
    let dir = TempDir::new().unwrap();
    let map = open_map(dir.path());
    assert!(map.is_empty());
    assert_eq!(map.latest(), Version::ZERO);
    assert_eq!(insert(&map, "k", "v"), Version::new(1));
}

/// The buffered configuration restores everything written in-process.
#[test]
fn test_buffered_config_round_trips() {
    let dir = TempDir::new().unwrap();
    {
        let store =
            FileStore::open_with(dir.path(), FileStoreConfig::buffered()).expect("Failed to open");
        let map: DurableMap = VersionedKv::with_store(store).unwrap();
        insert(&map, "k", "v");
    }

    let map = open_map(dir.path());
    assert_eq!(
        map.find(&"k".to_string(), Version::MAX).into_value(),
        Some("v".to_string())
    );
}

// =============================================================================
// Crash Tails (STORE.md §5)
// =============================================================================

/// An update record torn mid-write disappears on reopen; the key keeps
/// its previous value and the unacknowledged version is reissued.
#[test]
fn test_torn_update_discards_last_mutation() {
    let dir = TempDir::new().unwrap();
    let torn = {
        let map = open_map(dir.path());
        insert(&map, "kept", "safe");
        insert(&map, "kept", "lost")
    };
    tear_tail(dir.path(), 4);

    let map = open_map(dir.path());
    assert_eq!(
        map.find(&"kept".to_string(), Version::MAX).into_value(),
        Some("safe".to_string())
    );
    assert_eq!(map.key_history(&"kept".to_string()).len(), 1);
    assert_eq!(map.latest(), Version::new(torn.value() - 1));
    assert_eq!(insert(&map, "next", "fresh"), torn);
}

/// A fresh key whose binding tore loses the key, but its orphaned entry
/// still pins the watermark so the version is never issued twice.
#[test]
fn test_torn_bind_drops_key_but_holds_version() {
    let dir = TempDir::new().unwrap();
    let torn = {
        let map = open_map(dir.path());
        insert(&map, "kept", "safe");
        insert(&map, "torn", "lost")
    };
    tear_tail(dir.path(), 4);

    let map = open_map(dir.path());
    assert_eq!(map.find(&"torn".to_string(), Version::MAX), Lookup::Absent);
    assert_eq!(map.len(), 1);
    assert_eq!(map.latest(), torn);
    assert_eq!(insert(&map, "next", "fresh"), Version::new(torn.value() + 1));
}

/// Writes after a torn-tail recovery land on the clean prefix and replay
/// cleanly on the following reopen.
#[test]
fn test_writes_after_torn_recovery_are_durable() {
    let dir = TempDir::new().unwrap();
    {
        let map = open_map(dir.path());
        insert(&map, "kept", "safe");
        insert(&map, "torn", "lost");
    }
    tear_tail(dir.path(), 6);

    {
        let map = open_map(dir.path());
        insert(&map, "after", "tear");
    }

    let map = open_map(dir.path());
    assert_eq!(map.len(), 2);
    assert_eq!(
        map.find(&"after".to_string(), Version::MAX).into_value(),
        Some("tear".to_string())
    );
}

/// A byte flipped away from the tail makes the store refuse to open.
#[test]
fn test_interior_damage_refuses_to_open() {
    let dir = TempDir::new().unwrap();
    {
        let map = open_map(dir.path());
        insert(&map, "a", "one");
        insert(&map, "b", "two");
        insert(&map, "c", "three");
    }

    let path = store_log(dir.path());
    let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(9)).unwrap();
    let mut byte = [0u8; 1];
    file.read_exact(&mut byte).unwrap();
    file.seek(SeekFrom::Start(9)).unwrap();
    file.write_all(&[byte[0] ^ 0xFF]).unwrap();
    drop(file);

    let store = FileStore::<String, String>::open(dir.path()).expect("Failed to open store");
    let err = VersionedKv::<String, String, _>::with_store(store).unwrap_err();
    assert!(err.is_corruption(), "got {err:?}");
}

/// An undersized length prefix is structural damage, not a crash tail:
/// torn writes shorten a record but never rewrite its length.
#[test]
fn test_undersized_length_prefix_refuses_to_open() {
    let dir = TempDir::new().unwrap();
    {
        let map = open_map(dir.path());
        insert(&map, "a", "one");
    }

    let path = store_log(dir.path());
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&3u32.to_le_bytes()).unwrap();
    file.write_all(&[0u8; 16]).unwrap();
    drop(file);

    let store = FileStore::<String, String>::open(dir.path()).expect("Failed to open store");
    let err = VersionedKv::<String, String, _>::with_store(store).unwrap_err();
    assert!(err.is_corruption(), "got {err:?}");
}
