//! Fingerprint store behaviour across process runs.

use std::path::Path;
use std::sync::Arc;

use songdedupe::cache::{StoreError, TrackRecord, TrackStore};
use songdedupe::scanner::{
    ContentHash, ExtractError, Fingerprint, FingerprintExtractor, Fingerprinter, TagField,
};
use tempfile::tempdir;

struct OnePoint;

impl FingerprintExtractor for OnePoint {
    fn extract(&self, _path: &Path) -> Result<Fingerprint, ExtractError> {
        Ok(Fingerprint::new(vec![42, 43], 3.5))
    }
}

fn record(tag: &str, path: &str) -> TrackRecord {
    let mut r = TrackRecord::new(ContentHash::of_bytes(tag.as_bytes()), path, 1000);
    r.artist = TagField::new("Artist");
    r.title = TagField::Missing;
    r
}

#[test]
fn test_records_and_fingerprints_survive_reopen() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("nested").join("tracks.db");
    let fingerprinter = Fingerprinter::new(Arc::new(OnePoint));
    let rec = record("a", "/m/a.mp3");

    {
        let store = TrackStore::open(&db).unwrap();
        store.upsert(&rec).unwrap();
        store.ensure_fingerprint(&rec.content_hash, &fingerprinter).unwrap();
        store.close().unwrap();
    }

    let store = TrackStore::open(&db).unwrap();
    let loaded = store.get(&rec.content_hash).unwrap().unwrap();
    assert_eq!(loaded.artist, TagField::new("Artist"));
    assert_eq!(loaded.title, TagField::Missing);
    assert_eq!(loaded.fingerprint, Some(Fingerprint::new(vec![42, 43], 3.5)));

    store.ensure_fingerprint(&rec.content_hash, &fingerprinter).unwrap();
    assert_eq!(store.fingerprints_computed(), 0);
    assert_eq!(store.fingerprint_cache_hits(), 1);
}

#[test]
fn test_fingerprint_count_grows_monotonically() {
    let store = TrackStore::open_in_memory().unwrap();
    let fingerprinter = Fingerprinter::new(Arc::new(OnePoint));
    let mut last = 0;

    for (i, tag) in ["a", "b", "c"].iter().enumerate() {
        let rec = record(tag, &format!("/m/{i}.mp3"));
        store.upsert(&rec).unwrap();
        // Re-upserting without a fingerprint never drops the stored one.
        store.upsert(&record("a", "/m/0.mp3")).unwrap();
        store.ensure_fingerprint(&rec.content_hash, &fingerprinter).unwrap();

        let count = store.fingerprint_count().unwrap();
        assert!(count >= last);
        last = count;
    }
    assert_eq!(last, 3);
}

#[test]
fn test_moved_file_keeps_fingerprint() {
    let store = TrackStore::open_in_memory().unwrap();
    let fingerprinter = Fingerprinter::new(Arc::new(OnePoint));
    let rec = record("a", "/old/a.mp3");
    store.upsert(&rec).unwrap();
    store.ensure_fingerprint(&rec.content_hash, &fingerprinter).unwrap();

    let moved = TrackRecord {
        file_path: "/new/a.mp3".into(),
        fingerprint: None,
        ..rec.clone()
    };
    store.upsert(&moved).unwrap();

    assert_eq!(store.lookup_path(Path::new("/old/a.mp3")).unwrap(), None);
    assert_eq!(
        store.lookup_path(Path::new("/new/a.mp3")).unwrap(),
        Some(rec.content_hash)
    );
    assert!(store.get(&rec.content_hash).unwrap().unwrap().has_fingerprint());
}

#[test]
fn test_ensure_fingerprint_unknown_hash() {
    let store = TrackStore::open_in_memory().unwrap();
    let fingerprinter = Fingerprinter::new(Arc::new(OnePoint));
    let err = store
        .ensure_fingerprint(&ContentHash::of_bytes(b"nope"), &fingerprinter)
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
    assert!(!err.is_fatal());
}
