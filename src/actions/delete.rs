//! Safe deletion of redundant tracks.
//!
//! # Overview
//!
//! [`purge`] takes a [`CandidateList`] and, group by group:
//! - refuses the group when its keeper no longer exists, so the last copy of
//!   a song is never removed
//! - moves every redundant path to the system trash (default, recoverable)
//!   or removes it permanently
//! - reconciles the store with every path that is now gone
//!
//! # Example
//!
//! ```no_run
//! use songdedupe::actions::delete::delete_to_trash;
//! use std::path::PathBuf;
//!
//! let path = PathBuf::from("/music/dupes/track (1).mp3");
//! match delete_to_trash(&path) {
//!     Ok(result) => println!("Deleted: {}", result.path.display()),
//!     Err(e) => eprintln!("Failed: {}", e),
//! }
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use super::reconcile::{reconcile, ReconcileError, ReconcileReport};
use crate::cache::TrackStore;
use crate::output::candidates::CandidateList;

/// Error type for deletion operations.
#[derive(Debug, Error)]
pub enum DeleteError {
    /// File was not found (may have been deleted or moved).
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    /// Permission denied when attempting to delete.
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Trash operation failed.
    #[error("trash operation failed for {path}: {message}")]
    TrashFailed { path: PathBuf, message: String },

    /// Permanent delete operation failed.
    #[error("permanent delete failed for {path}: {message}")]
    PermanentDeleteFailed { path: PathBuf, message: String },

    /// General I/O error.
    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DeleteError {
    fn from_metadata(path: &Path, e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source: e,
            },
        }
    }
}

/// Result of a successful deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteResult {
    pub path: PathBuf,
    /// Size of the deleted file in bytes.
    pub size: u64,
    /// Permanent (true) or to trash (false).
    pub permanent: bool,
}

/// Configuration for [`purge`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteConfig {
    /// Use permanent deletion instead of trash.
    pub permanent: bool,
    /// Only report what would be deleted.
    pub dry_run: bool,
}

impl DeleteConfig {
    #[must_use]
    pub fn with_permanent(mut self, permanent: bool) -> Self {
        self.permanent = permanent;
        self
    }

    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// A group left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedGroup {
    pub label: String,
    pub keeper: PathBuf,
    pub reason: String,
}

/// Outcome of [`purge`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub deleted: Vec<DeleteResult>,
    /// Candidates that were already gone before purge ran.
    pub already_missing: Vec<PathBuf>,
    /// Paths that could not be deleted, with the error.
    pub failures: Vec<(PathBuf, String)>,
    pub skipped_groups: Vec<SkippedGroup>,
    /// Paths a dry run would delete.
    pub planned: Vec<PathBuf>,
    pub reconcile: ReconcileReport,
}

impl PurgeReport {
    /// Total bytes freed.
    #[must_use]
    pub fn bytes_freed(&self) -> u64 {
        self.deleted.iter().map(|d| d.size).sum()
    }

    /// Whether every candidate of every processed group is gone.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty() && self.skipped_groups.is_empty()
    }

    /// Human-readable summary of the operation.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Deleted {} file(s), {} failed, {} group(s) skipped, freed {} bytes; {} store record(s) removed",
            self.deleted.len(),
            self.failures.len(),
            self.skipped_groups.len(),
            self.bytes_freed(),
            self.reconcile.removed
        )
    }
}

/// Move a single file to the system trash.
///
/// # Errors
///
/// - `NotFound` if the file doesn't exist
/// - `PermissionDenied` if deletion is not allowed
/// - `TrashFailed` if the trash operation fails
pub fn delete_to_trash(path: &Path) -> Result<DeleteResult, DeleteError> {
    let size = fs::metadata(path)
        .map_err(|e| DeleteError::from_metadata(path, e))?
        .len();

    trash::delete(path).map_err(|e| {
        log::error!("Trash operation failed for {}: {}", path.display(), e);
        DeleteError::TrashFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    })?;

    log::info!("Moved to trash: {} ({} bytes)", path.display(), size);
    Ok(DeleteResult {
        path: path.to_path_buf(),
        size,
        permanent: false,
    })
}

/// Permanently delete a single file.
///
/// **WARNING**: This operation cannot be undone.
///
/// # Errors
///
/// - `NotFound` if the file doesn't exist
/// - `PermissionDenied` if deletion is not allowed
/// - `PermanentDeleteFailed` if the delete operation fails
pub fn permanent_delete(path: &Path) -> Result<DeleteResult, DeleteError> {
    let size = fs::metadata(path)
        .map_err(|e| DeleteError::from_metadata(path, e))?
        .len();

    fs::remove_file(path).map_err(|e| {
        log::error!("Permanent delete failed for {}: {}", path.display(), e);
        DeleteError::PermanentDeleteFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    })?;

    log::info!("Permanently deleted: {} ({} bytes)", path.display(), size);
    Ok(DeleteResult {
        path: path.to_path_buf(),
        size,
        permanent: true,
    })
}

/// Delete the redundant paths of `list`, then reconcile the store.
///
/// A group whose keeper is missing is skipped whole. Per-file failures are
/// collected and never stop the batch. Files already gone are reconciled
/// like deleted ones.
///
/// # Errors
///
/// Store failures during reconcile.
pub fn purge(
    store: &TrackStore,
    list: &CandidateList,
    config: &DeleteConfig,
) -> Result<PurgeReport, ReconcileError> {
    let mut report = PurgeReport::default();
    let mut gone: BTreeSet<PathBuf> = BTreeSet::new();

    for group in &list.groups {
        if !group.keeper.exists() {
            log::warn!(
                "Skipping {}: keeper {} no longer exists",
                group.label,
                group.keeper.display()
            );
            report.skipped_groups.push(SkippedGroup {
                label: group.label.clone(),
                keeper: group.keeper.clone(),
                reason: "keeper no longer exists".to_string(),
            });
            continue;
        }

        for path in group.redundant.iter().filter(|p| **p != group.keeper) {
            if config.dry_run {
                report.planned.push(path.clone());
                continue;
            }

            let result = if config.permanent {
                permanent_delete(path)
            } else {
                delete_to_trash(path)
            };
            match result {
                Ok(deleted) => {
                    gone.insert(deleted.path.clone());
                    report.deleted.push(deleted);
                }
                Err(DeleteError::NotFound(path)) => {
                    log::debug!("Already gone: {}", path.display());
                    gone.insert(path.clone());
                    report.already_missing.push(path);
                }
                Err(e) => {
                    log::warn!("Failed to delete {}: {}", path.display(), e);
                    report.failures.push((path.clone(), e.to_string()));
                }
            }
        }
    }

    if !gone.is_empty() {
        report.reconcile = reconcile(store, &gone)?;
    }
    log::info!("{}", report.summary());
    Ok(report)
}
