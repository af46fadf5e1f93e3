//! Duplicate detection module.
//!
//! This module provides functionality for:
//! - Metadata grouping by normalized artist/title ([`groups`])
//! - Incremental pairwise scoring per cluster ([`matrix`])
//! - Verdicts and duplicate groups ([`classifier`])
//! - The report model renderers consume ([`report`])
//! - The end-to-end pipeline ([`finder`])

pub mod classifier;
pub mod finder;
pub mod groups;
pub mod matrix;
pub mod report;

pub use classifier::{
    classify, sort_groups, DuplicateGroup, GroupEdge, GroupMember, ThresholdError, Thresholds,
    Verdict, DEFAULT_IDENTICAL_THRESHOLD, DEFAULT_NEAR_THRESHOLD,
};
pub use finder::{DedupeFinder, FinderConfig, FinderError, IngestOutcome, PrefetchOutcome};
pub use groups::{group_by_metadata, normalize, Cluster, ClusterKey, Grouping, GroupingStats};
pub use matrix::{Cell, MatrixStats, Origin, SimilarityEngine, SimilarityMatrix};
pub use report::{
    render_cells, ClusterReport, DedupeReport, ExactCopy, ReportRow, RunIssue, RunSummary,
    UnmatchedTrack, PLACEHOLDER,
};
