//! Human-readable report.
//!
//! Each comparable cluster is printed as its lower-triangular matrix, one row
//! per member in insertion order:
//!
//! ```text
//! fiona apple - across the universe (3 tracks)
//!   ---- ----  /m/track1.mp3
//!   0.67 ----  /m/track2.mp3
//!   1.00 0.67  /m/track3.mp3
//! ```
//!
//! Column `j` of row `i` is the score of members `i` and `j`; `----` marks a
//! pair that was never compared (or the upper triangle). Duplicate groups,
//! exact copies, unmatched tracks and per-file issues follow, then the
//! summary.

use std::io::{self, Write};

use bytesize::ByteSize;
use yansi::{Paint, Style};

use crate::duplicates::{DedupeReport, DuplicateGroup, GroupMember, Verdict, PLACEHOLDER};

const HEADER: Style = Style::new().bold().underline();
const KEY: Style = Style::new().cyan().bold();
const KEEP: Style = Style::new().green();
const DELETE: Style = Style::new().red();
const DIM: Style = Style::new().dim();
const WARN: Style = Style::new().yellow();

/// Text renderer.
pub struct TextOutput<'a> {
    report: &'a DedupeReport,
    color: bool,
}

impl<'a> TextOutput<'a> {
    #[must_use]
    pub fn new(report: &'a DedupeReport) -> Self {
        Self {
            report,
            color: true,
        }
    }

    /// Enable or disable ANSI styling.
    #[must_use]
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    fn paint(&self, text: &str, style: Style) -> String {
        if self.color {
            text.paint(style).to_string()
        } else {
            text.to_string()
        }
    }

    /// Write the whole report.
    ///
    /// # Errors
    ///
    /// I/O failure.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.write_matrices(w)?;
        self.write_groups(w)?;
        self.write_exact_copies(w)?;
        self.write_unmatched(w)?;
        self.write_issues(w)?;
        self.write_summary(w)
    }

    fn write_matrices<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for cluster in &self.report.clusters {
            writeln!(
                w,
                "{} ({} tracks)",
                self.paint(&cluster.key.to_string(), KEY),
                cluster.rows.len()
            )?;
            for row in &cluster.rows {
                let cells = row
                    .cells
                    .iter()
                    .map(|c| match c {
                        Some(v) => format!("{v:.2}"),
                        None => self.paint(PLACEHOLDER, DIM),
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                writeln!(w, "  {}  {}", cells, row.path.display())?;
            }
            writeln!(w)?;
        }
        Ok(())
    }

    fn write_groups<W: Write>(&self, w: &mut W) -> io::Result<()> {
        if self.report.groups.is_empty() {
            return Ok(());
        }
        writeln!(w, "{}", self.paint("Duplicate groups", HEADER))?;
        for group in &self.report.groups {
            writeln!(
                w,
                "  {} [{}]",
                self.paint(&group.key.to_string(), KEY),
                group_kind(group)
            )?;
            for (idx, member) in group.members.iter().enumerate() {
                let (label, style) = if idx == 0 {
                    ("keep  ", KEEP)
                } else {
                    ("delete", DELETE)
                };
                writeln!(
                    w,
                    "    {}  {} ({})",
                    self.paint(label, style),
                    member.path.display(),
                    describe(member)
                )?;
            }
        }
        writeln!(w)
    }

    fn write_exact_copies<W: Write>(&self, w: &mut W) -> io::Result<()> {
        if self.report.exact_copies.is_empty() {
            return Ok(());
        }
        writeln!(w, "{}", self.paint("Exact copies", HEADER))?;
        for copy in &self.report.exact_copies {
            writeln!(
                w,
                "    {}  {}",
                self.paint("keep  ", KEEP),
                copy.kept_path.display()
            )?;
            writeln!(
                w,
                "    {}  {} ({})",
                self.paint("delete", DELETE),
                copy.copy_path.display(),
                ByteSize(copy.file_size)
            )?;
        }
        writeln!(w)
    }

    fn write_unmatched<W: Write>(&self, w: &mut W) -> io::Result<()> {
        if self.report.unmatched.is_empty() {
            return Ok(());
        }
        writeln!(
            w,
            "{}",
            self.paint("Unmatched (missing artist or title, not compared)", HEADER)
        )?;
        for track in &self.report.unmatched {
            writeln!(
                w,
                "    {}  artist: {}, title: {}",
                track.path.display(),
                track.artist,
                track.title
            )?;
        }
        writeln!(w)
    }

    fn write_issues<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let issues = &self.report.summary.issues;
        if issues.is_empty() {
            return Ok(());
        }
        writeln!(w, "{}", self.paint("Skipped files", HEADER))?;
        for issue in issues {
            writeln!(w, "    {}", self.paint(&issue.to_string(), WARN))?;
        }
        writeln!(w)
    }

    fn write_summary<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let s = &self.report.summary;
        writeln!(w, "{}", self.paint("Summary", HEADER))?;
        if s.files_walked > 0 {
            writeln!(
                w,
                "  Files walked:        {} ({} new, {} moved)",
                s.files_walked, s.new_records, s.moved_records
            )?;
        }
        writeln!(w, "  Tracks analysed:     {}", s.unique_tracks)?;
        writeln!(
            w,
            "  Clusters compared:   {} ({:.1}% of tracks ruled out by tags)",
            s.grouping.comparable_clusters,
            s.grouping.elimination_rate()
        )?;
        writeln!(
            w,
            "  Fingerprints:        {} computed, {} cached",
            s.fingerprints_computed, s.fingerprint_cache_hits
        )?;
        writeln!(
            w,
            "  Comparisons:         {} of at most {} ({} inferred)",
            s.matrix.comparisons, s.grouping.max_pairs, s.matrix.inferred
        )?;
        writeln!(w, "  Duplicate groups:    {}", s.duplicate_groups)?;
        writeln!(w, "  Exact copies:        {}", s.exact_copies)?;
        writeln!(w, "  Reclaimable:         {}", ByteSize(s.reclaimable_bytes))?;
        if s.missing_tracked > 0 {
            writeln!(
                w,
                "  {}",
                self.paint(
                    &format!(
                        "{} tracked files were not found; run `reconcile` with a deletion list",
                        s.missing_tracked
                    ),
                    WARN
                )
            )?;
        }
        if s.has_issues() {
            writeln!(
                w,
                "  {}",
                self.paint(&format!("{} files skipped", s.issues.len()), WARN)
            )?;
        }
        writeln!(w, "  Elapsed:             {:.2}s", s.elapsed_secs)
    }

    /// Render to a string.
    ///
    /// # Errors
    ///
    /// Never in practice; writing to a `Vec` cannot fail.
    pub fn to_string(&self) -> io::Result<String> {
        let mut buffer = Vec::new();
        self.write_to(&mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn group_kind(group: &DuplicateGroup) -> &'static str {
    if group.edges.iter().any(|e| e.verdict == Verdict::Identical) {
        "identical"
    } else {
        "near match"
    }
}

fn describe(member: &GroupMember) -> String {
    match member.bitrate_kbps {
        Some(kbps) => format!("{}, {} kbps", ByteSize(member.file_size), kbps),
        None => ByteSize(member.file_size).to_string(),
    }
}
