//! Pipeline orchestration.
//!
//! [`DedupeFinder`] runs the whole pipeline against one [`TrackStore`]:
//!
//! 1. **Walk** the library for audio files
//! 2. **Hash** them (bounded rayon pool) and read their tags
//! 3. **Ingest**: upsert one record per content hash, following moves;
//!    extra paths with the same bytes become exact copies
//! 4. **Group** the store's records by normalized artist and title
//! 5. **Prefetch** missing fingerprints for comparable clusters,
//!    deduplicated by hash before dispatch, on the same bounded pool
//! 6. **Score** each cluster's matrix (clusters in parallel)
//! 7. **Classify** into duplicate groups and build the [`DedupeReport`]
//!
//! Per-file failures are collected as [`RunIssue`]s. Only store corruption
//! stops a run, and a shutdown request ends it between two fingerprints.
//!
//! # Example
//!
//! ```no_run
//! use songdedupe::cache::TrackStore;
//! use songdedupe::duplicates::{DedupeFinder, FinderConfig};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let store = Arc::new(TrackStore::open(Path::new("tracks.db")).unwrap());
//! let finder = DedupeFinder::new(store, FinderConfig::default().with_io_threads(4));
//! let report = finder.run(Path::new("/music")).unwrap();
//! println!("{} duplicate groups", report.groups.len());
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use super::classifier::{classify, sort_groups, Thresholds};
use super::groups::{group_by_metadata, Cluster};
use super::matrix::{MatrixStats, SimilarityEngine};
use super::report::{
    ClusterReport, DedupeReport, ExactCopy, RunIssue, RunSummary, UnmatchedTrack,
};
use crate::cache::{StoreError, TrackRecord, TrackStore};
use crate::progress::{phase, ProgressCallback};
use crate::scanner::{
    AudioFile, ChromaprintComparator, ContentHash, ContentHasher, FingerprintComparator,
    Fingerprinter, LoftyTagReader, TagReader, TrackTags, Walker, WalkerConfig,
};

/// Configuration for [`DedupeFinder`].
#[derive(Clone)]
pub struct FinderConfig {
    /// Threads for hashing and fingerprinting. Default 4 to avoid disk
    /// thrashing on spinning drives.
    pub io_threads: usize,
    pub walker_config: WalkerConfig,
    pub thresholds: Thresholds,
    pub shutdown_flag: Option<Arc<AtomicBool>>,
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
    pub tag_reader: Arc<dyn TagReader>,
    pub fingerprinter: Fingerprinter,
    pub comparator: Arc<dyn FingerprintComparator>,
}

impl std::fmt::Debug for FinderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinderConfig")
            .field("io_threads", &self.io_threads)
            .field("walker_config", &self.walker_config)
            .field("thresholds", &self.thresholds)
            .field("shutdown_flag", &self.shutdown_flag)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .field("fingerprinter", &self.fingerprinter)
            .finish_non_exhaustive()
    }
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            io_threads: 4,
            walker_config: WalkerConfig::default(),
            thresholds: Thresholds::default(),
            shutdown_flag: None,
            progress_callback: None,
            tag_reader: Arc::new(LoftyTagReader),
            fingerprinter: Fingerprinter::chromaprint(
                crate::scanner::fingerprint::DEFAULT_MAX_FINGERPRINT_SECS,
            ),
            comparator: Arc::new(ChromaprintComparator::default()),
        }
    }
}

impl FinderConfig {
    #[must_use]
    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads.max(1);
        self
    }

    #[must_use]
    pub fn with_walker_config(mut self, config: WalkerConfig) -> Self {
        self.walker_config = config;
        self
    }

    #[must_use]
    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Set the shutdown flag for graceful termination.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    #[must_use]
    pub fn with_tag_reader(mut self, reader: Arc<dyn TagReader>) -> Self {
        self.tag_reader = reader;
        self
    }

    #[must_use]
    pub fn with_fingerprinter(mut self, fingerprinter: Fingerprinter) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    #[must_use]
    pub fn with_comparator(mut self, comparator: Arc<dyn FingerprintComparator>) -> Self {
        self.comparator = comparator;
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }
}

/// Errors that stop a run.
#[derive(thiserror::Error, Debug)]
pub enum FinderError {
    /// Ctrl+C or shutdown flag. Work already written to the store is kept.
    #[error("Run interrupted by user")]
    Interrupted,

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result of the ingest step.
#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    pub files_walked: usize,
    /// Every hash seen by this walk.
    pub seen: BTreeSet<ContentHash>,
    pub new_records: usize,
    pub moved_records: usize,
    pub missing_tracked: usize,
    pub exact_copies: Vec<ExactCopy>,
    pub issues: Vec<RunIssue>,
}

/// Result of fingerprint prefetch.
#[derive(Debug, Clone, Default)]
pub struct PrefetchOutcome {
    /// Distinct hashes dispatched.
    pub dispatched: usize,
    pub computed: usize,
    pub issues: Vec<RunIssue>,
}

/// Pipeline orchestrator bound to one store.
pub struct DedupeFinder {
    config: FinderConfig,
    store: Arc<TrackStore>,
    hasher: ContentHasher,
}

impl DedupeFinder {
    #[must_use]
    pub fn new(store: Arc<TrackStore>, config: FinderConfig) -> Self {
        let mut hasher = ContentHasher::new();
        if let Some(ref flag) = config.shutdown_flag {
            hasher = hasher.with_shutdown_flag(flag.clone());
        }
        Self {
            config,
            store,
            hasher,
        }
    }

    /// The store this finder writes to.
    #[must_use]
    pub fn store(&self) -> &TrackStore {
        &self.store
    }

    fn build_pool(&self) -> Result<rayon::ThreadPool, FinderError> {
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.io_threads)
            .build()?)
    }

    fn callback(&self) -> Option<&Arc<dyn ProgressCallback>> {
        self.config.progress_callback.as_ref()
    }

    /// Walk, hash, tag and ingest: scan a library into the store.
    ///
    /// # Errors
    ///
    /// [`FinderError::PathNotFound`] / [`FinderError::NotADirectory`] for a
    /// bad root, [`FinderError::Interrupted`] on shutdown, store errors.
    pub fn ingest(&self, root: &Path) -> Result<IngestOutcome, FinderError> {
        if !root.exists() {
            return Err(FinderError::PathNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(FinderError::NotADirectory(root.to_path_buf()));
        }
        if self.config.is_shutdown_requested() {
            return Err(FinderError::Interrupted);
        }

        let mut issues = Vec::new();
        let files = self.walk(root, &mut issues);
        if self.config.is_shutdown_requested() {
            return Err(FinderError::Interrupted);
        }
        self.ingest_files(root, files, issues)
    }

    /// Hash, tag and upsert walked files. Stored paths under `root` that are
    /// not among `files` count as missing; a walked file that fails to hash
    /// is an issue, not a missing track.
    fn ingest_files(
        &self,
        root: &Path,
        files: Vec<AudioFile>,
        issues: Vec<RunIssue>,
    ) -> Result<IngestOutcome, FinderError> {
        let mut outcome = IngestOutcome {
            issues,
            ..IngestOutcome::default()
        };
        outcome.files_walked = files.len();
        let walked: HashSet<PathBuf> = files.iter().map(|f| f.path.clone()).collect();

        let hashed = self.hash_files(files)?;
        let mut by_hash: BTreeMap<ContentHash, Vec<(AudioFile, TrackTags)>> = BTreeMap::new();
        for (file, result) in hashed {
            match result {
                Ok((hash, tags)) => by_hash.entry(hash).or_default().push((file, tags)),
                Err(e) => outcome.issues.push(RunIssue::Scan {
                    path: file.path,
                    reason: e.to_string(),
                }),
            }
        }

        for (hash, copies) in by_hash {
            self.ingest_hash(hash, copies, &walked, &mut outcome)?;
            outcome.seen.insert(hash);
        }

        outcome.missing_tracked = self
            .store
            .all_records()?
            .iter()
            .filter(|r| r.file_path.starts_with(root) && !walked.contains(&r.file_path))
            .count();
        if outcome.missing_tracked > 0 {
            log::warn!(
                "{} tracked files under {} were not found; pass a deletion list to `reconcile` to drop them",
                outcome.missing_tracked,
                root.display()
            );
        }

        log::info!(
            "Ingested {} files: {} tracks ({} new, {} moved, {} exact copies)",
            outcome.files_walked,
            outcome.seen.len(),
            outcome.new_records,
            outcome.moved_records,
            outcome.exact_copies.len()
        );
        Ok(outcome)
    }

    fn walk(&self, root: &Path, issues: &mut Vec<RunIssue>) -> Vec<AudioFile> {
        if let Some(callback) = self.callback() {
            callback.on_phase_start(phase::WALKING, 0);
            callback.on_message(&format!("Walking {}", root.display()));
        }

        let mut walker = Walker::new(root, self.config.walker_config.clone());
        if let Some(ref flag) = self.config.shutdown_flag {
            walker = walker.with_shutdown_flag(flag.clone());
        }
        if let Some(callback) = self.callback() {
            walker = walker.with_progress_callback(callback.clone());
        }

        let mut files = Vec::new();
        for result in walker.walk() {
            match result {
                Ok(file) => files.push(file),
                Err(e) => {
                    log::warn!("Skipping {}: {}", e.path().display(), e);
                    issues.push(RunIssue::Scan {
                        path: e.path().to_path_buf(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Some(callback) = self.callback() {
            callback.on_phase_end(phase::WALKING);
        }
        log::info!("Found {} audio files under {}", files.len(), root.display());
        files
    }

    #[allow(clippy::type_complexity)]
    fn hash_files(
        &self,
        files: Vec<AudioFile>,
    ) -> Result<Vec<(AudioFile, Result<(ContentHash, TrackTags), crate::scanner::HashError>)>, FinderError>
    {
        if let Some(callback) = self.callback() {
            callback.on_phase_start(phase::HASHING, files.len());
        }

        let pool = self.build_pool()?;
        let done = AtomicUsize::new(0);
        let results: Vec<_> = pool.install(|| {
            files
                .into_par_iter()
                .filter_map(|file| {
                    if self.config.is_shutdown_requested() {
                        return None;
                    }
                    let result = self
                        .hasher
                        .hash_file(&file.path)
                        .map(|hash| (hash, self.config.tag_reader.read_tags(&file.path)));
                    if let Some(callback) = self.callback() {
                        let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                        callback.on_progress(n, file.path.to_string_lossy().as_ref());
                        callback.on_item_completed(file.size);
                    }
                    Some((file, result))
                })
                .collect()
        });

        if let Some(callback) = self.callback() {
            callback.on_phase_end(phase::HASHING);
        }
        if self.config.is_shutdown_requested() {
            return Err(FinderError::Interrupted);
        }
        Ok(results)
    }

    /// Upsert one content hash. The stored path is kept when it was walked
    /// again, otherwise the first walked path wins; the rest are exact copies.
    ///
    /// A stored path outside this walk that still holds the same bytes (an
    /// earlier scan of another root) stays the record's path, and every
    /// walked path is an exact copy of it.
    fn ingest_hash(
        &self,
        hash: ContentHash,
        copies: Vec<(AudioFile, TrackTags)>,
        walked: &HashSet<PathBuf>,
        outcome: &mut IngestOutcome,
    ) -> Result<(), FinderError> {
        let existing = self.store.get(&hash)?;

        if let Some(ref old) = existing {
            if !walked.contains(&old.file_path) && self.still_holds(&old.file_path, &hash) {
                for (copy, _) in &copies {
                    log::debug!(
                        "Exact copy of {} (not under this root): {}",
                        old.file_path.display(),
                        copy.path.display()
                    );
                    outcome.exact_copies.push(ExactCopy {
                        hash,
                        kept_path: old.file_path.clone(),
                        copy_path: copy.path.clone(),
                        file_size: copy.size,
                    });
                }
                return Ok(());
            }
        }

        let primary = existing
            .as_ref()
            .and_then(|r| copies.iter().position(|(f, _)| f.path == r.file_path))
            .unwrap_or(0);

        let (file, tags) = &copies[primary];
        match existing {
            None => outcome.new_records += 1,
            Some(ref old) if old.file_path != file.path => {
                if walked.contains(&old.file_path) {
                    log::debug!(
                        "{} now holds different bytes; {} keeps track {}",
                        old.file_path.display(),
                        file.path.display(),
                        hash.short()
                    );
                } else {
                    log::info!(
                        "Moved: {} -> {}",
                        old.file_path.display(),
                        file.path.display()
                    );
                }
                outcome.moved_records += 1;
            }
            Some(_) => {}
        }

        let record = TrackRecord::new(hash, file.path.clone(), file.size).with_tags(tags.clone());
        self.store.upsert(&record)?;

        for (i, (copy, _)) in copies.iter().enumerate() {
            if i != primary {
                log::debug!(
                    "Exact copy of {}: {}",
                    file.path.display(),
                    copy.path.display()
                );
                outcome.exact_copies.push(ExactCopy {
                    hash,
                    kept_path: file.path.clone(),
                    copy_path: copy.path.clone(),
                    file_size: copy.size,
                });
            }
        }
        Ok(())
    }

    /// Whether `path` exists and its bytes still hash to `hash`.
    fn still_holds(&self, path: &Path, hash: &ContentHash) -> bool {
        if !path.is_file() {
            return false;
        }
        match self.hasher.hash_file(path) {
            Ok(current) => current == *hash,
            Err(e) => {
                log::debug!("Cannot re-check {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Compute missing fingerprints for the members of `clusters`.
    ///
    /// Hashes are deduplicated before dispatch, so no track is fingerprinted
    /// twice even if it were listed twice. Each result is committed as soon
    /// as it is computed.
    ///
    /// # Errors
    ///
    /// [`FinderError::Interrupted`] on shutdown (finished fingerprints are
    /// kept), fatal store errors.
    pub fn prefetch_fingerprints(
        &self,
        clusters: &[&Cluster],
        records: &HashMap<ContentHash, &TrackRecord>,
    ) -> Result<PrefetchOutcome, FinderError> {
        let todo: BTreeSet<ContentHash> = clusters
            .iter()
            .flat_map(|c| c.members.iter())
            .filter(|h| records.get(h).is_some_and(|r| !r.has_fingerprint()))
            .filter(|h| !self.store.is_unavailable(h))
            .copied()
            .collect();

        let mut outcome = PrefetchOutcome {
            dispatched: todo.len(),
            ..Default::default()
        };
        if todo.is_empty() {
            log::debug!("All candidate fingerprints are cached");
            return Ok(outcome);
        }

        log::info!("Fingerprinting {} uncached tracks", todo.len());
        if let Some(callback) = self.callback() {
            callback.on_phase_start(phase::FINGERPRINTING, todo.len());
        }

        let pool = self.build_pool()?;
        let done = AtomicUsize::new(0);
        let results: Vec<Result<ContentHash, StoreError>> = pool.install(|| {
            todo.par_iter()
                .filter_map(|hash| {
                    if self.config.is_shutdown_requested() {
                        return None;
                    }
                    let result = self
                        .store
                        .ensure_fingerprint(hash, &self.config.fingerprinter)
                        .map(|_| *hash);
                    if let Some(callback) = self.callback() {
                        let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                        let label = records
                            .get(hash)
                            .map_or_else(|| hash.short(), |r| r.file_path.display().to_string());
                        callback.on_progress(n, &label);
                    }
                    Some(result)
                })
                .collect()
        });

        if let Some(callback) = self.callback() {
            callback.on_phase_end(phase::FINGERPRINTING);
        }

        for result in results {
            match result {
                Ok(_) => outcome.computed += 1,
                Err(StoreError::FingerprintUnavailable { hash, path, reason }) => {
                    outcome
                        .issues
                        .push(RunIssue::FingerprintUnavailable { hash, path, reason });
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    log::warn!("Fingerprint prefetch failed: {e}");
                    outcome.issues.push(RunIssue::Scan {
                        path: PathBuf::new(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if self.config.is_shutdown_requested() {
            log::info!(
                "Interrupted after {} fingerprints; they are saved",
                outcome.computed
            );
            return Err(FinderError::Interrupted);
        }
        Ok(outcome)
    }

    /// Group, fingerprint, score and classify the store's records.
    ///
    /// With `scope`, only those content hashes take part (the tracks seen
    /// by the current walk); otherwise every attached record does.
    ///
    /// # Errors
    ///
    /// [`FinderError::Interrupted`] on shutdown, fatal store errors.
    pub fn analyze(&self, scope: Option<&BTreeSet<ContentHash>>) -> Result<DedupeReport, FinderError> {
        let start = Instant::now();
        let computed_before = self.store.fingerprints_computed();
        let hits_before = self.store.fingerprint_cache_hits();

        let mut records = self.store.all_records()?;
        if let Some(scope) = scope {
            records.retain(|r| scope.contains(&r.content_hash));
        }
        let by_hash: HashMap<ContentHash, &TrackRecord> =
            records.iter().map(|r| (r.content_hash, r)).collect();

        let (grouping, grouping_stats) = group_by_metadata(&records);
        let comparable: Vec<&Cluster> = grouping.comparable().collect();

        let prefetch = self.prefetch_fingerprints(&comparable, &by_hash)?;
        let (matrices, matrix_stats) = self.score_clusters(&comparable)?;

        let mut groups = Vec::new();
        let mut clusters = Vec::with_capacity(matrices.len());
        for matrix in &matrices {
            groups.extend(classify(matrix, &self.store, &self.config.thresholds)?);
            clusters.push(ClusterReport::from_matrix(matrix, &by_hash));
        }
        sort_groups(&mut groups);

        let unmatched = grouping
            .unmatched
            .iter()
            .filter_map(|h| by_hash.get(h))
            .map(|r| UnmatchedTrack {
                hash: r.content_hash,
                path: r.file_path.clone(),
                artist: r.artist.clone(),
                title: r.title.clone(),
            })
            .collect();

        let mut issues = prefetch.issues;
        for hash in &matrix_stats.unavailable {
            let already = issues.iter().any(|i| {
                matches!(i, RunIssue::FingerprintUnavailable { hash: h, .. } if h == hash)
            });
            if !already {
                issues.push(RunIssue::FingerprintUnavailable {
                    hash: *hash,
                    path: by_hash
                        .get(hash)
                        .map(|r| r.file_path.clone())
                        .unwrap_or_default(),
                    reason: self.store.unavailable_reason(hash).unwrap_or_default(),
                });
            }
        }

        let summary = RunSummary {
            unique_tracks: records.len(),
            grouping: grouping_stats,
            fingerprints_computed: self.store.fingerprints_computed() - computed_before,
            fingerprint_cache_hits: self.store.fingerprint_cache_hits() - hits_before,
            matrix: matrix_stats,
            duplicate_groups: groups.len(),
            reclaimable_bytes: groups.iter().map(|g| g.reclaimable()).sum(),
            issues,
            elapsed_secs: start.elapsed().as_secs_f64(),
            ..RunSummary::default()
        };

        log::info!(
            "Analysis: {} clusters scored, {} comparisons, {} duplicate groups",
            clusters.len(),
            summary.matrix.comparisons,
            summary.duplicate_groups
        );

        Ok(DedupeReport {
            clusters,
            groups,
            unmatched,
            exact_copies: Vec::new(),
            summary,
        })
    }

    fn score_clusters(
        &self,
        clusters: &[&Cluster],
    ) -> Result<(Vec<super::matrix::SimilarityMatrix>, MatrixStats), FinderError> {
        if let Some(callback) = self.callback() {
            callback.on_phase_start(phase::SCORING, clusters.len());
        }

        let mut engine = SimilarityEngine::new(
            &self.store,
            &self.config.fingerprinter,
            self.config.comparator.as_ref(),
            self.config.thresholds,
        );
        if let Some(ref flag) = self.config.shutdown_flag {
            engine = engine.with_shutdown_flag(flag.clone());
        }

        let pool = self.build_pool()?;
        let done = AtomicUsize::new(0);
        let scored: Vec<_> = pool.install(|| {
            clusters
                .par_iter()
                .map(|cluster| {
                    let result = engine.score(cluster);
                    if let Some(callback) = self.callback() {
                        let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                        callback.on_progress(n, &cluster.key.to_string());
                    }
                    result
                })
                .collect()
        });

        if let Some(callback) = self.callback() {
            callback.on_phase_end(phase::SCORING);
        }

        let mut matrices = Vec::with_capacity(scored.len());
        let mut stats = MatrixStats::default();
        for result in scored {
            let (matrix, s) = result?;
            stats.merge(s);
            matrices.push(matrix);
        }
        if stats.interrupted {
            return Err(FinderError::Interrupted);
        }
        Ok((matrices, stats))
    }

    /// Full pipeline for one library root.
    ///
    /// # Errors
    ///
    /// See [`ingest`](Self::ingest) and [`analyze`](Self::analyze).
    pub fn run(&self, root: &Path) -> Result<DedupeReport, FinderError> {
        let start = Instant::now();
        log::info!("Starting dedupe run on {}", root.display());

        let ingest = self.ingest(root)?;
        let mut report = self.analyze(Some(&ingest.seen))?;

        report.summary.files_walked = ingest.files_walked;
        report.summary.new_records = ingest.new_records;
        report.summary.moved_records = ingest.moved_records;
        report.summary.missing_tracked = ingest.missing_tracked;
        report.summary.exact_copies = ingest.exact_copies.len();
        report.summary.reclaimable_bytes +=
            ingest.exact_copies.iter().map(|c| c.file_size).sum::<u64>();
        let mut issues = ingest.issues;
        issues.append(&mut report.summary.issues);
        report.summary.issues = issues;
        report.summary.elapsed_secs = start.elapsed().as_secs_f64();
        report.exact_copies = ingest.exact_copies;

        Ok(report)
    }
}
