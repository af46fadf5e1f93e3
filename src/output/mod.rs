//! Output formatters for dedupe reports.
//!
//! This module provides different output formats:
//! - Text for humans: comparison matrices, groups, summary
//! - JSON for automation and scripting
//! - CSV for spreadsheet import
//! - Deletion candidate lists (JSON for `purge`, plain text for `reconcile`)
//!
//! # Example
//!
//! ```no_run
//! use songdedupe::cache::TrackStore;
//! use songdedupe::duplicates::{DedupeFinder, FinderConfig};
//! use songdedupe::error::ExitCode;
//! use songdedupe::output::json::JsonOutput;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let store = Arc::new(TrackStore::open_in_memory().unwrap());
//! let report = DedupeFinder::new(store, FinderConfig::default())
//!     .run(Path::new("/music"))
//!     .unwrap();
//!
//! let output = JsonOutput::new(&report, ExitCode::for_report(&report));
//! println!("{}", output.to_json_pretty().unwrap());
//! ```

pub mod candidates;
pub mod csv;
pub mod json;
pub mod text;

// Re-export main types
pub use candidates::{CandidateError, CandidateGroup, CandidateList, CandidateReason};
pub use csv::CsvOutput;
pub use json::JsonOutput;
pub use text::TextOutput;
