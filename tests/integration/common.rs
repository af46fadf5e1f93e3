//! Fakes shared by the integration tests.
//!
//! Tracks are small files whose bytes are arbitrary. Tags come from the file
//! name (`artist--title--anything.mp3`, `_` for a missing tag) and the
//! fingerprint id comes from a content -> id table, so tests decide which
//! pairs are "the same song" without any audio.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use songdedupe::cache::TrackStore;
use songdedupe::duplicates::{DedupeFinder, FinderConfig};
use songdedupe::scanner::{
    ContentHash, ExtractError, Fingerprint, FingerprintComparator, FingerprintExtractor,
    Fingerprinter, TagField, TagReader, TrackTags,
};

pub struct StemTags;

impl TagReader for StemTags {
    fn read_tags(&self, path: &Path) -> TrackTags {
        let stem = path.file_stem().unwrap().to_string_lossy().into_owned();
        let mut parts = stem.split("--").map(|p| if p == "_" { "" } else { p });
        TrackTags {
            artist: TagField::from_option(parts.next()),
            title: TagField::from_option(parts.next()),
            ..TrackTags::default()
        }
    }
}

/// Fingerprint id looked up by file content. Unknown content fails to decode.
pub struct ContentExtractor {
    ids: HashMap<Vec<u8>, u32>,
    pub calls: AtomicUsize,
}

impl ContentExtractor {
    pub fn new(ids: HashMap<Vec<u8>, u32>) -> Self {
        Self {
            ids,
            calls: AtomicUsize::new(0),
        }
    }
}

impl FingerprintExtractor for ContentExtractor {
    fn extract(&self, path: &Path) -> Result<Fingerprint, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let bytes = fs::read(path)?;
        match self.ids.get(&bytes) {
            Some(id) => Ok(Fingerprint::new(vec![*id], 1.0)),
            None => Err(ExtractError::Decode("unsupported stream".to_string())),
        }
    }
}

/// Similarity looked up by the pair of fingerprint ids; unlisted pairs are 0.
pub struct TableComparator {
    table: HashMap<(u32, u32), f64>,
    pub calls: AtomicUsize,
}

impl TableComparator {
    pub fn new(entries: &[(u32, u32, f64)]) -> Self {
        let table = entries
            .iter()
            .map(|&(a, b, v)| ((a.min(b), a.max(b)), v))
            .collect();
        Self {
            table,
            calls: AtomicUsize::new(0),
        }
    }
}

impl FingerprintComparator for TableComparator {
    fn similarity(&self, a: &Fingerprint, b: &Fingerprint) -> f64 {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if a.points == b.points {
            return 1.0;
        }
        let (x, y) = (a.points[0], b.points[0]);
        self.table.get(&(x.min(y), x.max(y))).copied().unwrap_or(0.0)
    }
}

/// A library on disk plus the fakes that describe it.
pub struct Library {
    pub root: PathBuf,
    pub extractor: Arc<ContentExtractor>,
    pub comparator: Arc<TableComparator>,
}

impl Library {
    pub fn finder(&self, store: Arc<TrackStore>) -> DedupeFinder {
        let config = FinderConfig::default()
            .with_io_threads(2)
            .with_tag_reader(Arc::new(StemTags))
            .with_fingerprinter(Fingerprinter::new(self.extractor.clone()))
            .with_comparator(self.comparator.clone());
        DedupeFinder::new(store, config)
    }

    pub fn extractions(&self) -> usize {
        self.extractor.calls.load(Ordering::SeqCst)
    }

    pub fn comparisons(&self) -> usize {
        self.comparator.calls.load(Ordering::SeqCst)
    }
}

/// Contents whose content hashes are in ascending order, so the n-th entry
/// is the n-th member of its cluster.
pub fn ordered_contents(n: usize) -> Vec<Vec<u8>> {
    let mut contents: Vec<Vec<u8>> = (0..n)
        .map(|i| format!("audio payload {i}").into_bytes())
        .collect();
    contents.sort_by_key(|c| ContentHash::of_bytes(c));
    contents
}

/// The three-track library: the same song under three spellings.
///
/// track1 vs track2 = 0.67, track1 vs track3 = 1.0, track2 vs track3 = 0.5
/// (the last pair should never be compared).
pub fn three_track_library(root: &Path) -> Library {
    let contents = ordered_contents(3);
    let names = [
        "Fiona Apple--Across The Universe--1.mp3",
        "fiona apple--Across the Universe.--2.m4a",
        "FIONA APPLE--across-the-universe--3.flac",
    ];
    let mut ids = HashMap::new();
    for (i, (content, name)) in contents.iter().zip(names).enumerate() {
        fs::write(root.join(name), content).unwrap();
        ids.insert(content.clone(), i as u32 + 1);
    }
    Library {
        root: root.to_path_buf(),
        extractor: Arc::new(ContentExtractor::new(ids)),
        comparator: Arc::new(TableComparator::new(&[
            (1, 2, 0.67),
            (1, 3, 1.0),
            (2, 3, 0.5),
        ])),
    }
}
