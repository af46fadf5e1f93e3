//! JSON output formatter for dedupe reports.
//!
//! Provides machine-readable JSON output for scripting and automation.
//!
//! # Output Schema
//!
//! ```json
//! {
//!   "clusters": [
//!     {
//!       "key": "fiona apple - criminal",
//!       "rows": [
//!         { "hash": "ab12...", "path": "/m/a.mp3", "cells": [null, null] },
//!         { "hash": "cd34...", "path": "/m/b.m4a", "cells": [0.67, null] }
//!       ]
//!     }
//!   ],
//!   "groups": [ ... ],
//!   "unmatched": [ ... ],
//!   "exact_copies": [ ... ],
//!   "summary": { ..., "exit_code": 0, "exit_code_name": "SD000" }
//! }
//! ```
//!
//! Unknown cells are `null`, never `0`.

use std::io::Write;

use serde::Serialize;

use crate::duplicates::{
    DedupeReport, DuplicateGroup, ExactCopy, ReportRow, RunSummary, UnmatchedTrack,
};
use crate::error::ExitCode;

/// One cluster's matrix rows.
#[derive(Debug, Clone, Serialize)]
pub struct JsonCluster<'a> {
    /// Display form of the cluster key
    pub key: String,
    pub rows: &'a [ReportRow],
}

/// Summary plus the exit code of the run.
#[derive(Debug, Clone, Serialize)]
pub struct JsonSummary<'a> {
    #[serde(flatten)]
    pub summary: &'a RunSummary,
    /// Tracks ruled out before fingerprinting (%)
    pub elimination_rate: f64,
    /// The exit code number
    pub exit_code: i32,
    /// The machine-readable exit code name (e.g., "SD000")
    pub exit_code_name: &'static str,
}

/// Complete JSON output structure.
#[derive(Debug, Clone, Serialize)]
pub struct JsonOutput<'a> {
    pub clusters: Vec<JsonCluster<'a>>,
    pub groups: &'a [DuplicateGroup],
    pub unmatched: &'a [UnmatchedTrack],
    pub exact_copies: &'a [ExactCopy],
    pub summary: JsonSummary<'a>,
}

impl<'a> JsonOutput<'a> {
    /// Create a new JSON output from a report and exit code.
    ///
    /// # Example
    ///
    /// ```
    /// use songdedupe::duplicates::DedupeReport;
    /// use songdedupe::error::ExitCode;
    /// use songdedupe::output::json::JsonOutput;
    ///
    /// let report = DedupeReport::default();
    /// let output = JsonOutput::new(&report, ExitCode::NoDuplicates);
    /// assert!(output.groups.is_empty());
    /// ```
    #[must_use]
    pub fn new(report: &'a DedupeReport, exit_code: ExitCode) -> Self {
        Self {
            clusters: report
                .clusters
                .iter()
                .map(|c| JsonCluster {
                    key: c.key.to_string(),
                    rows: &c.rows,
                })
                .collect(),
            groups: &report.groups,
            unmatched: &report.unmatched,
            exact_copies: &report.exact_copies,
            summary: JsonSummary {
                summary: &report.summary,
                elimination_rate: report.summary.grouping.elimination_rate(),
                exit_code: exit_code.as_i32(),
                exit_code_name: exit_code.code_prefix(),
            },
        }
    }

    /// Serialize to compact JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (unlikely for valid data).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize to pretty-printed JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (unlikely for valid data).
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write JSON to a writer.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W, pretty: bool) -> Result<(), JsonOutputError> {
        let json = if pretty {
            self.to_json_pretty()?
        } else {
            self.to_json()?
        };
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

/// Errors that can occur during JSON output.
#[derive(thiserror::Error, Debug)]
pub enum JsonOutputError {
    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error during writing
    #[error("I/O error during JSON generation: {0}")]
    Io(#[from] std::io::Error),
}
