//! Persistent fingerprint store.
//!
//! * [`database`]: the SQLite-backed [`TrackStore`], its schema and the
//!   run-scoped pair-score cache
//! * [`entry`]: [`TrackRecord`] and [`StoreStats`]
//!
//! Records are keyed by content hash, not path. A renamed or moved file keeps
//! its record (and its fingerprint); a file whose bytes changed gets a new
//! record, and the old one is detached from the path.

pub mod database;
pub mod entry;

pub use database::{StoreError, StoreResult, TrackStore, SCHEMA_VERSION};
pub use entry::{StoreStats, TrackRecord};
