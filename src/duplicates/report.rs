//! Report model produced by a run.
//!
//! Everything a renderer needs lives here as plain data: the lower-triangular
//! score rows per cluster, the duplicate groups, tracks that could not be
//! grouped, byte-identical copies and the run summary. Renderers in
//! [`crate::output`] are pure functions of a [`DedupeReport`].

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use super::classifier::DuplicateGroup;
use super::groups::{ClusterKey, GroupingStats};
use super::matrix::{MatrixStats, SimilarityMatrix};
use crate::cache::TrackRecord;
use crate::scanner::{ContentHash, TagField};

/// Printed for a cell with no score.
pub const PLACEHOLDER: &str = "----";

/// One member's row: scores against the members listed before it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub hash: ContentHash,
    pub path: PathBuf,
    /// `n-1` columns; `None` where nothing is known.
    pub cells: Vec<Option<f64>>,
}

impl ReportRow {
    /// Cells as printed, e.g. `"1.00 0.67"` or `"0.67 ----"`.
    #[must_use]
    pub fn rendered(&self) -> String {
        render_cells(&self.cells)
    }
}

/// Score rows for one cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterReport {
    pub key: ClusterKey,
    pub rows: Vec<ReportRow>,
}

impl ClusterReport {
    /// Rows for a scored matrix. Paths come from `records`; a member missing
    /// there gets an empty path.
    #[must_use]
    pub fn from_matrix(matrix: &SimilarityMatrix, records: &HashMap<ContentHash, &TrackRecord>) -> Self {
        let rows = matrix
            .members()
            .iter()
            .enumerate()
            .map(|(i, hash)| ReportRow {
                hash: *hash,
                path: records
                    .get(hash)
                    .map(|r| r.file_path.clone())
                    .unwrap_or_default(),
                cells: matrix.row(i),
            })
            .collect();
        Self {
            key: matrix.key().clone(),
            rows,
        }
    }
}

/// A track left out of grouping for lack of artist or title.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmatchedTrack {
    pub hash: ContentHash,
    pub path: PathBuf,
    pub artist: TagField,
    pub title: TagField,
}

/// A second path holding bytes identical to a tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExactCopy {
    pub hash: ContentHash,
    /// Path recorded in the store.
    pub kept_path: PathBuf,
    /// Redundant copy.
    pub copy_path: PathBuf,
    pub file_size: u64,
}

/// A per-file problem that did not stop the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RunIssue {
    /// No fingerprint could be produced; the track was not compared.
    FingerprintUnavailable {
        hash: ContentHash,
        path: PathBuf,
        reason: String,
    },
    /// The file could not be walked or hashed.
    Scan { path: PathBuf, reason: String },
    /// A deleted path the store never tracked.
    UnknownPath { path: PathBuf },
}

impl RunIssue {
    /// File the issue is about.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::FingerprintUnavailable { path, .. }
            | Self::Scan { path, .. }
            | Self::UnknownPath { path } => path,
        }
    }
}

impl fmt::Display for RunIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FingerprintUnavailable { hash, path, reason } => write!(
                f,
                "fingerprint unavailable: {} ({}): {}",
                path.display(),
                hash.short(),
                reason
            ),
            Self::Scan { path, reason } => write!(f, "scan error: {}: {}", path.display(), reason),
            Self::UnknownPath { path } => write!(f, "not tracked: {}", path.display()),
        }
    }
}

/// Counters for the whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Audio files found by the walker (0 for `report`).
    pub files_walked: usize,
    /// Distinct content hashes among them.
    pub unique_tracks: usize,
    /// Hashes the store had never seen.
    pub new_records: usize,
    /// Known hashes found at a new path.
    pub moved_records: usize,
    /// Tracked files under the root that were not found by the walk.
    pub missing_tracked: usize,
    pub grouping: GroupingStats,
    /// Fingerprints extracted in this run.
    pub fingerprints_computed: usize,
    /// Fingerprints answered from the store.
    pub fingerprint_cache_hits: usize,
    pub matrix: MatrixStats,
    pub duplicate_groups: usize,
    pub exact_copies: usize,
    /// Bytes freed by deleting every candidate.
    pub reclaimable_bytes: u64,
    pub issues: Vec<RunIssue>,
    pub elapsed_secs: f64,
}

impl RunSummary {
    /// Whether any per-file problem was recorded.
    #[must_use]
    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }
}

/// Output of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DedupeReport {
    pub clusters: Vec<ClusterReport>,
    pub groups: Vec<DuplicateGroup>,
    pub unmatched: Vec<UnmatchedTrack>,
    pub exact_copies: Vec<ExactCopy>,
    pub summary: RunSummary,
}

impl DedupeReport {
    /// Whether anything can be deleted.
    #[must_use]
    pub fn has_duplicates(&self) -> bool {
        !self.groups.is_empty() || !self.exact_copies.is_empty()
    }
}

/// Format a row: scores as `0.00`, everything unknown as [`PLACEHOLDER`].
#[must_use]
pub fn render_cells(cells: &[Option<f64>]) -> String {
    cells
        .iter()
        .map(|c| c.map_or_else(|| PLACEHOLDER.to_string(), |v| format!("{v:.2}")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_cells_placeholder_is_not_zero() {
        assert_eq!(render_cells(&[Some(1.0), Some(0.67)]), "1.00 0.67");
        assert_eq!(render_cells(&[Some(0.67), None]), "0.67 ----");
        assert_eq!(render_cells(&[Some(0.0), None]), "0.00 ----");
        assert_eq!(render_cells(&[]), "");
    }

    #[test]
    fn test_run_issue_display_carries_path() {
        let issue = RunIssue::FingerprintUnavailable {
            hash: ContentHash::of_bytes(b"x"),
            path: PathBuf::from("/m/bad.mp3"),
            reason: "decode error: eof".to_string(),
        };
        let text = issue.to_string();
        assert!(text.contains("/m/bad.mp3"));
        assert!(text.contains("decode error"));
        assert_eq!(issue.path(), std::path::Path::new("/m/bad.mp3"));
    }

    #[test]
    fn test_has_duplicates() {
        let mut report = DedupeReport::default();
        assert!(!report.has_duplicates());
        report.exact_copies.push(ExactCopy {
            hash: ContentHash::of_bytes(b"a"),
            kept_path: PathBuf::from("/a.mp3"),
            copy_path: PathBuf::from("/b.mp3"),
            file_size: 3,
        });
        assert!(report.has_duplicates());
    }
}
