//! File actions module.
//!
//! This module provides functionality for:
//! - Deletion sync: dropping removed files from the store ([`reconcile`])
//! - Safe deletion of redundant tracks via the trash crate ([`delete`])
//!
//! ```no_run
//! use songdedupe::actions::reconcile::{read_deletion_list, reconcile};
//! use songdedupe::cache::TrackStore;
//! use std::path::Path;
//!
//! let store = TrackStore::open(Path::new("tracks.db")).unwrap();
//! let deleted = read_deletion_list(Path::new("deleted.txt")).unwrap();
//! let report = reconcile(&store, &deleted).unwrap();
//! println!("{} records removed", report.removed);
//! ```

pub mod delete;
pub mod reconcile;

pub use delete::{
    delete_to_trash, permanent_delete, purge, DeleteConfig, DeleteError, DeleteResult,
    PurgeReport, SkippedGroup,
};
pub use reconcile::{
    parse_deletion_list, read_deletion_list, reconcile, ReconcileError, ReconcileReport,
};
