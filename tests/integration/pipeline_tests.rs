//! End-to-end runs of the dedupe pipeline against fake collaborators.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use songdedupe::actions::{read_deletion_list, reconcile};
use songdedupe::cache::TrackStore;
use songdedupe::duplicates::{RunIssue, Verdict};
use songdedupe::error::ExitCode;
use songdedupe::output::{CandidateList, TextOutput};
use tempfile::tempdir;

use super::common::{
    ordered_contents, three_track_library, ContentExtractor, Library, TableComparator,
};

#[test]
fn test_three_track_matrix() {
    let dir = tempdir().unwrap();
    let lib = three_track_library(dir.path());
    let store = Arc::new(TrackStore::open_in_memory().unwrap());

    let report = lib.finder(store).run(&lib.root).unwrap();

    assert_eq!(report.clusters.len(), 1);
    let rows = &report.clusters[0].rows;
    assert_eq!(rows[0].cells, vec![None, None]);
    assert_eq!(rows[1].cells, vec![Some(0.67), None]);
    assert_eq!(rows[2].cells, vec![Some(1.0), Some(0.67)]);
    assert_eq!(rows[1].rendered(), "0.67 ----");
    assert_eq!(rows[2].rendered(), "1.00 0.67");

    // track2 vs track3 was inferred, never compared.
    assert_eq!(lib.comparisons(), 2);
    assert_eq!(report.summary.matrix.comparisons, 2);
    assert_eq!(report.summary.matrix.inferred, 1);
    assert_eq!(lib.extractions(), 3);

    assert_eq!(report.groups.len(), 1);
    assert_eq!(report.groups[0].len(), 3);
    assert!(report.groups[0]
        .edges
        .iter()
        .any(|e| e.verdict == Verdict::Identical));
    assert_eq!(ExitCode::for_report(&report), ExitCode::Success);
}

#[test]
fn test_three_track_text_render() {
    let dir = tempdir().unwrap();
    let lib = three_track_library(dir.path());
    let store = Arc::new(TrackStore::open_in_memory().unwrap());
    let report = lib.finder(store).run(&lib.root).unwrap();

    let text = TextOutput::new(&report)
        .with_color(false)
        .to_string()
        .unwrap();
    assert!(text.contains("fiona apple - across the universe (3 tracks)"));
    assert!(text.contains("  ---- ----  "));
    assert!(text.contains("  0.67 ----  "));
    assert!(text.contains("  1.00 0.67  "));
}

#[test]
fn test_rerun_does_no_fingerprint_work() {
    let dir = tempdir().unwrap();
    let music = dir.path().join("music");
    fs::create_dir(&music).unwrap();
    let db = dir.path().join("tracks.db");
    let lib = three_track_library(&music);

    let first = {
        let store = Arc::new(TrackStore::open(&db).unwrap());
        lib.finder(store).run(&lib.root).unwrap()
    };
    assert_eq!(first.summary.fingerprints_computed, 3);
    assert_eq!(first.summary.new_records, 3);

    let store = Arc::new(TrackStore::open(&db).unwrap());
    let second = lib.finder(store).run(&lib.root).unwrap();

    assert_eq!(lib.extractions(), 3);
    assert_eq!(second.summary.fingerprints_computed, 0);
    assert_eq!(second.summary.new_records, 0);
    assert_eq!(second.clusters, first.clusters);
    assert_eq!(second.groups, first.groups);
}

#[test]
fn test_delete_then_reconcile_then_rerun() {
    let dir = tempdir().unwrap();
    let music = dir.path().join("music");
    fs::create_dir(&music).unwrap();
    let db = dir.path().join("tracks.db");
    let lib = three_track_library(&music);

    let store = Arc::new(TrackStore::open(&db).unwrap());
    let report = lib.finder(store.clone()).run(&lib.root).unwrap();

    // The user deletes what the plain-text candidate list names.
    let list_path = dir.path().join("delete-me.txt");
    CandidateList::from_report(&report).save(&list_path).unwrap();
    let deleted = read_deletion_list(&list_path).unwrap();
    assert_eq!(deleted.len(), 2);
    assert!(!deleted.contains(&report.groups[0].keeper().path));
    for path in &deleted {
        fs::remove_file(path).unwrap();
    }

    let before = store.fingerprint_count().unwrap();
    let rec = reconcile(&store, &deleted).unwrap();
    assert_eq!(rec.removed, 2);
    assert_eq!(reconcile(&store, &deleted).unwrap().removed, 0);

    let after = lib.finder(store.clone()).run(&lib.root).unwrap();
    assert!(after.clusters.is_empty());
    assert!(after.groups.is_empty());
    assert_eq!(after.summary.fingerprints_computed, 0);
    assert_eq!(after.summary.unique_tracks, 1);
    assert_eq!(store.fingerprint_count().unwrap(), before - 2);
    assert_eq!(ExitCode::for_report(&after), ExitCode::NoDuplicates);
}

#[test]
fn test_missing_files_are_counted_until_reconciled() {
    let dir = tempdir().unwrap();
    let lib = three_track_library(dir.path());
    let store = Arc::new(TrackStore::open_in_memory().unwrap());
    lib.finder(store.clone()).run(&lib.root).unwrap();

    let victim = store.all_records().unwrap()[2].file_path.clone();
    fs::remove_file(&victim).unwrap();

    let report = lib.finder(store.clone()).run(&lib.root).unwrap();
    assert_eq!(report.summary.missing_tracked, 1);
    assert_eq!(report.summary.unique_tracks, 2);
    // Still in the store until reconciled.
    assert!(store.lookup_path(&victim).unwrap().is_some());
}

#[test]
fn test_unmatched_metadata_is_never_compared() {
    let dir = tempdir().unwrap();
    let contents = ordered_contents(3);
    let names = [
        "Fiona Apple--Criminal--a.mp3",
        "Fiona Apple--_--b.mp3",
        "_--Criminal--c.mp3",
    ];
    let mut ids = HashMap::new();
    for (content, name) in contents.iter().zip(names) {
        fs::write(dir.path().join(name), content).unwrap();
        ids.insert(content.clone(), 7);
    }
    let lib = Library {
        root: dir.path().to_path_buf(),
        extractor: Arc::new(ContentExtractor::new(ids)),
        comparator: Arc::new(TableComparator::new(&[])),
    };
    let store = Arc::new(TrackStore::open_in_memory().unwrap());

    let report = lib.finder(store).run(&lib.root).unwrap();

    assert_eq!(report.unmatched.len(), 2);
    let unmatched: BTreeSet<PathBuf> = report.unmatched.iter().map(|u| u.path.clone()).collect();
    assert!(unmatched.contains(&dir.path().join("Fiona Apple--_--b.mp3")));
    assert!(unmatched.contains(&dir.path().join("_--Criminal--c.mp3")));
    assert!(report.clusters.is_empty());
    assert!(report.groups.is_empty());
    assert_eq!(lib.extractions(), 0);
    assert_eq!(lib.comparisons(), 0);
    assert_eq!(report.summary.grouping.unmatched_tracks, 2);
}

#[test]
fn test_undecodable_track_is_reported_not_fatal() {
    let dir = tempdir().unwrap();
    let contents = ordered_contents(3);
    let names = ["A--Song--1.mp3", "A--Song--2.mp3", "A--Song--3.mp3"];
    let mut ids = HashMap::new();
    for (i, (content, name)) in contents.iter().zip(names).enumerate() {
        fs::write(dir.path().join(name), content).unwrap();
        if i != 1 {
            ids.insert(content.clone(), 1);
        }
    }
    let lib = Library {
        root: dir.path().to_path_buf(),
        extractor: Arc::new(ContentExtractor::new(ids)),
        comparator: Arc::new(TableComparator::new(&[])),
    };
    let store = Arc::new(TrackStore::open_in_memory().unwrap());

    let report = lib.finder(store.clone()).run(&lib.root).unwrap();

    let rows = &report.clusters[0].rows;
    assert_eq!(rows[1].cells, vec![None, None]);
    assert_eq!(rows[2].cells, vec![Some(1.0), None]);
    assert_eq!(report.summary.issues.len(), 1);
    assert!(matches!(
        report.summary.issues[0],
        RunIssue::FingerprintUnavailable { .. }
    ));
    assert_eq!(ExitCode::for_report(&report), ExitCode::PartialSuccess);
    assert_eq!(store.all_records().unwrap().len(), 3);
}

#[test]
fn test_exact_copies_are_candidates() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("A--Song--1.mp3"), b"same").unwrap();
    fs::write(dir.path().join("A--Song--2.mp3"), b"same").unwrap();
    let lib = Library {
        root: dir.path().to_path_buf(),
        extractor: Arc::new(ContentExtractor::new(HashMap::new())),
        comparator: Arc::new(TableComparator::new(&[])),
    };
    let store = Arc::new(TrackStore::open_in_memory().unwrap());

    let report = lib.finder(store).run(&lib.root).unwrap();
    assert_eq!(report.exact_copies.len(), 1);
    assert_eq!(report.summary.reclaimable_bytes, 4);
    assert!(report.has_duplicates());

    let list = CandidateList::from_report(&report);
    assert_eq!(
        list.paths().collect::<Vec<_>>(),
        vec![dir.path().join("A--Song--2.mp3").as_path()]
    );
}

#[test]
fn test_second_export_copy_is_candidate() {
    let dir = tempdir().unwrap();
    let export_a = dir.path().join("export_a");
    let export_b = dir.path().join("export_b");
    fs::create_dir(&export_a).unwrap();
    fs::create_dir(&export_b).unwrap();
    fs::write(export_a.join("A--Song--1.mp3"), b"same").unwrap();
    fs::write(export_b.join("A--Song--1.mp3"), b"same").unwrap();
    let lib = Library {
        root: export_a.clone(),
        extractor: Arc::new(ContentExtractor::new(HashMap::new())),
        comparator: Arc::new(TableComparator::new(&[])),
    };
    let store = Arc::new(TrackStore::open_in_memory().unwrap());

    lib.finder(store.clone()).run(&export_a).unwrap();
    let report = lib.finder(store.clone()).run(&export_b).unwrap();

    assert_eq!(report.summary.moved_records, 0);
    assert_eq!(report.exact_copies.len(), 1);
    assert!(export_a.join("A--Song--1.mp3").exists());
    assert_eq!(
        store.lookup_path(&export_a.join("A--Song--1.mp3")).unwrap(),
        Some(report.exact_copies[0].hash)
    );
    let list = CandidateList::from_report(&report);
    assert_eq!(
        list.paths().collect::<Vec<_>>(),
        vec![export_b.join("A--Song--1.mp3").as_path()]
    );
}

#[test]
fn test_rewritten_then_deleted_file_leaves_nothing_behind() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("A--Song--1.mp3");
    fs::write(&path, b"first encode").unwrap();
    let lib = Library {
        root: dir.path().to_path_buf(),
        extractor: Arc::new(ContentExtractor::new(HashMap::new())),
        comparator: Arc::new(TableComparator::new(&[])),
    };
    let store = Arc::new(TrackStore::open_in_memory().unwrap());
    lib.finder(store.clone()).run(&lib.root).unwrap();

    fs::write(&path, b"second encode").unwrap();
    lib.finder(store.clone()).run(&lib.root).unwrap();
    assert_eq!(store.stats().unwrap().detached, 1);

    fs::remove_file(&path).unwrap();
    let deleted: BTreeSet<PathBuf> = [path].into_iter().collect();
    let rec = reconcile(&store, &deleted).unwrap();

    assert_eq!(rec.removed, 1);
    assert_eq!(rec.pruned_detached, 1);
    let stats = store.stats().unwrap();
    assert_eq!(stats.records, 0);
    assert_eq!(stats.detached, 0);
}
