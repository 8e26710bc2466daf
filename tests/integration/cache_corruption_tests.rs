use std::fs;

use rusqlite::Connection;
use tempfile::TempDir;
use vidupe::cache::{CacheError, FingerprintCache, SCHEMA_VERSION};
use vidupe::fingerprint::Fingerprint;
use vidupe::scanner::FileIdentity;

fn identity(name: &str) -> FileIdentity {
    FileIdentity::new(format!("/videos/{name}").into(), 1024, 1_700_000_000_000_000_000)
}

fn seeded_store(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("fp.db");
    let cache = FingerprintCache::open(&path).unwrap();
    cache.store(identity("a.mp4"), Fingerprint::new([1; 32], 1000, 640, 480, "h264", 0));
    cache.ignore_group("deadbeef");
    cache.flush().unwrap();
    path
}

#[test]
fn test_garbage_file_is_replaced() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fp.db");
    fs::write(&path, b"this is not a sqlite database at all").unwrap();

    let cache = FingerprintCache::open(&path).unwrap();

    assert!(cache.recovered_from_corruption());
    assert!(cache.is_empty());
    cache.store(identity("a.mp4"), Fingerprint::content_only([2; 32]));
    assert_eq!(cache.flush().unwrap(), 1);

    let reopened = FingerprintCache::open(&path).unwrap();
    assert!(!reopened.recovered_from_corruption());
    assert_eq!(reopened.len(), 1);
}

#[test]
fn test_unknown_schema_version_is_treated_as_corruption() {
    let dir = TempDir::new().unwrap();
    let path = seeded_store(&dir);
    {
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(&format!("PRAGMA user_version = {};", SCHEMA_VERSION + 1))
            .unwrap();
    }

    let cache = FingerprintCache::open(&path).unwrap();

    assert!(cache.recovered_from_corruption());
    assert!(cache.is_empty());
    assert!(cache.ignored_groups().is_empty());
}

#[test]
fn test_invalid_row_is_treated_as_corruption() {
    let dir = TempDir::new().unwrap();
    let path = seeded_store(&dir);
    {
        let conn = Connection::open(&path).unwrap();
        conn.execute("UPDATE fingerprints SET content_hash = x'0102'", [])
            .unwrap();
    }

    let cache = FingerprintCache::open(&path).unwrap();
    assert!(cache.recovered_from_corruption());
    assert!(cache.is_empty());
}

#[test]
fn test_write_failure_keeps_memory_state() {
    let dir = TempDir::new().unwrap();
    let path = seeded_store(&dir);
    let cache = FingerprintCache::open(&path).unwrap();
    assert_eq!(cache.len(), 1);

    {
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("DROP TABLE fingerprints;").unwrap();
    }
    cache.store(identity("b.mp4"), Fingerprint::content_only([3; 32]));

    let err = cache.flush().unwrap_err();
    assert!(matches!(err, CacheError::WriteFailure(_)));
    assert!(err.to_string().contains("write"));

    assert_eq!(cache.len(), 2);
    assert!(cache.lookup(&identity("a.mp4")).is_some());
    assert!(cache.lookup(&identity("b.mp4")).is_some());
}

#[test]
fn test_unwritable_location_is_an_error() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("file");
    fs::write(&blocker, b"x").unwrap();

    let err = FingerprintCache::open(&blocker.join("fp.db")).unwrap_err();
    assert!(matches!(err, CacheError::Io { .. }));
}
