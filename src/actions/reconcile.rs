//! Deletion sync: drop removed files from the store.
//!
//! Paths are resolved to content hashes by store lookup only. A deleted file
//! no longer exists, so it can never be re-hashed. Replaying the same list is
//! harmless: every path is already unknown and nothing is removed.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cache::{StoreError, TrackStore};

/// Errors that stop a reconcile.
#[derive(thiserror::Error, Debug)]
pub enum ReconcileError {
    /// The deletion list could not be read.
    #[error("cannot read deletion list {path}: {source}")]
    DeletionList {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a reconcile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Records removed from the store.
    pub removed: usize,
    /// Listed paths the store did not track (already reconciled, or never
    /// scanned).
    pub unknown_paths: Vec<PathBuf>,
    /// Detached records dropped: bytes replaced in place and not seen since.
    pub pruned_detached: usize,
}

/// Remove the records of `deleted_paths` from the store, then prune
/// detached records, which no path can reach.
///
/// # Errors
///
/// Store failures only. Unknown paths are logged and collected.
pub fn reconcile(
    store: &TrackStore,
    deleted_paths: &BTreeSet<PathBuf>,
) -> Result<ReconcileReport, ReconcileError> {
    let mut report = ReconcileReport::default();

    for path in deleted_paths {
        match store.lookup_path(path)? {
            Some(hash) => {
                if store.delete(&hash)? {
                    log::debug!("Removed {} ({})", path.display(), hash.short());
                    report.removed += 1;
                }
            }
            None => {
                log::warn!("Not tracked, skipping: {}", path.display());
                report.unknown_paths.push(path.clone());
            }
        }
    }

    report.pruned_detached = store.prune_detached()?;

    log::info!(
        "Reconciled {} paths: {} removed, {} unknown, {} detached pruned",
        deleted_paths.len(),
        report.removed,
        report.unknown_paths.len(),
        report.pruned_detached
    );
    Ok(report)
}

/// Read a deletion list: one path per line, blank lines and `#` comments
/// ignored, surrounding whitespace trimmed.
///
/// # Errors
///
/// [`ReconcileError::DeletionList`] when the file cannot be read.
pub fn read_deletion_list(path: &Path) -> Result<BTreeSet<PathBuf>, ReconcileError> {
    let content = fs::read_to_string(path).map_err(|source| ReconcileError::DeletionList {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_deletion_list(&content))
}

/// Parse deletion list text; see [`read_deletion_list`].
#[must_use]
pub fn parse_deletion_list(content: &str) -> BTreeSet<PathBuf> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(PathBuf::from)
        .collect()
}
