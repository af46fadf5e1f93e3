//! Unreadable store files are fatal and reported, never silently replaced.

use std::fs;

use rusqlite::Connection;
use songdedupe::cache::{StoreError, TrackStore, SCHEMA_VERSION};
use tempfile::tempdir;

#[test]
fn test_garbage_file_is_corruption() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("tracks.db");
    fs::write(&db, vec![0xA5u8; 8192]).unwrap();

    let err = TrackStore::open(&db).unwrap_err();
    assert!(matches!(err, StoreError::Corruption { .. }));
    assert!(err.is_fatal());
    assert!(err.to_string().contains("tracks.db"));

    // The file is left for the user to inspect.
    assert_eq!(fs::read(&db).unwrap().len(), 8192);
}

#[test]
fn test_newer_schema_is_corruption() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("tracks.db");
    {
        let conn = Connection::open(&db).unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();
    }

    let err = TrackStore::open(&db).unwrap_err();
    assert!(matches!(err, StoreError::Corruption { .. }));
}

#[test]
fn test_empty_file_becomes_fresh_store() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("tracks.db");
    fs::write(&db, b"").unwrap();

    let store = TrackStore::open(&db).unwrap();
    assert_eq!(store.stats().unwrap().records, 0);
}
