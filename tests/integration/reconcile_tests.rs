//! Deletion sync against a scanned library.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use songdedupe::actions::{purge, read_deletion_list, reconcile, DeleteConfig};
use songdedupe::cache::TrackStore;
use songdedupe::output::CandidateList;
use tempfile::tempdir;

use super::common::three_track_library;

#[test]
fn test_reconcile_from_file_with_comments() {
    let dir = tempdir().unwrap();
    let music = dir.path().join("music");
    fs::create_dir(&music).unwrap();
    let lib = three_track_library(&music);
    let store = Arc::new(TrackStore::open_in_memory().unwrap());
    lib.finder(store.clone()).run(&lib.root).unwrap();

    let victim = store.all_records().unwrap()[0].file_path.clone();
    let list = dir.path().join("gone.txt");
    fs::write(
        &list,
        format!(
            "# removed by hand\n\n{}\n/never/scanned.mp3\n",
            victim.display()
        ),
    )
    .unwrap();

    let deleted = read_deletion_list(&list).unwrap();
    let report = reconcile(&store, &deleted).unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(report.unknown_paths, vec![PathBuf::from("/never/scanned.mp3")]);
    assert_eq!(store.all_records().unwrap().len(), 2);
}

#[test]
fn test_reconcile_empty_set() {
    let store = TrackStore::open_in_memory().unwrap();
    let report = reconcile(&store, &BTreeSet::new()).unwrap();
    assert_eq!(report.removed, 0);
    assert!(report.unknown_paths.is_empty());
}

#[test]
fn test_purge_from_json_candidates() {
    let dir = tempdir().unwrap();
    let music = dir.path().join("music");
    fs::create_dir(&music).unwrap();
    let lib = three_track_library(&music);
    let store = Arc::new(TrackStore::open_in_memory().unwrap());
    let report = lib.finder(store.clone()).run(&lib.root).unwrap();

    let json = dir.path().join("candidates.json");
    CandidateList::from_report(&report).save(&json).unwrap();
    let list = CandidateList::load(&json).unwrap();

    let outcome = purge(&store, &list, &DeleteConfig::default().with_permanent(true)).unwrap();
    assert_eq!(outcome.deleted.len(), 2);
    assert!(outcome.all_succeeded());
    assert_eq!(outcome.reconcile.removed, 2);
    assert!(report.groups[0].keeper().path.exists());

    let remaining = store.all_records().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].file_path, report.groups[0].keeper().path);
}
