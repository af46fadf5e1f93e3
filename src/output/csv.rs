//! CSV output formatter for dedupe reports.
//!
//! One row is generated for each member of each duplicate group, followed by
//! one row for each side of every exact copy.
//!
//! # Columns
//!
//! - `group_id`: Numeric ID identifying the group
//! - `kind`: `identical`, `near_match` or `exact_copy`
//! - `cluster`: Normalized `artist - title`, empty for exact copies
//! - `role`: `keep` for the suggested keeper, `delete` otherwise
//! - `hash`: BLAKE3 content hash (hexadecimal)
//! - `path`: Path to the file
//! - `size`: File size in bytes
//! - `bitrate_kbps`: Audio bitrate when known

use std::io;

use serde::Serialize;
use thiserror::Error;

use crate::duplicates::{DedupeReport, Verdict};

/// Errors that can occur during CSV output generation.
#[derive(Debug, Error)]
pub enum CsvOutputError {
    /// I/O error during writing.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error during CSV serialization.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    group_id: usize,
    kind: &'static str,
    cluster: String,
    role: &'static str,
    hash: String,
    path: std::borrow::Cow<'a, str>,
    size: u64,
    bitrate_kbps: Option<u32>,
}

/// CSV output formatter.
pub struct CsvOutput<'a> {
    report: &'a DedupeReport,
}

impl<'a> CsvOutput<'a> {
    /// Create a new CSV output formatter.
    #[must_use]
    pub fn new(report: &'a DedupeReport) -> Self {
        Self { report }
    }

    /// Write the CSV output to the given writer.
    ///
    /// # Errors
    ///
    /// Returns `CsvOutputError` if writing or serialization fails.
    pub fn write_to<W: io::Write>(&self, writer: W) -> Result<(), CsvOutputError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        let mut group_id = 0;

        for group in &self.report.groups {
            group_id += 1;
            let kind = if group.edges.iter().any(|e| e.verdict == Verdict::Identical) {
                "identical"
            } else {
                "near_match"
            };
            for (idx, member) in group.members.iter().enumerate() {
                csv_writer.serialize(CsvRow {
                    group_id,
                    kind,
                    cluster: group.key.to_string(),
                    role: if idx == 0 { "keep" } else { "delete" },
                    hash: member.hash.to_hex(),
                    path: member.path.to_string_lossy(),
                    size: member.file_size,
                    bitrate_kbps: member.bitrate_kbps,
                })?;
            }
        }

        for copy in &self.report.exact_copies {
            group_id += 1;
            for (role, path) in [("keep", &copy.kept_path), ("delete", &copy.copy_path)] {
                csv_writer.serialize(CsvRow {
                    group_id,
                    kind: "exact_copy",
                    cluster: String::new(),
                    role,
                    hash: copy.hash.to_hex(),
                    path: path.to_string_lossy(),
                    size: copy.file_size,
                    bitrate_kbps: None,
                })?;
            }
        }

        csv_writer.flush()?;
        Ok(())
    }

    /// Generate CSV output as a string.
    ///
    /// # Errors
    ///
    /// Returns `CsvOutputError` if serialization fails.
    pub fn to_string(&self) -> Result<String, CsvOutputError> {
        let mut buffer = Vec::new();
        self.write_to(&mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }
}
