//! Deletion candidate lists.
//!
//! Two formats are written from a [`DedupeReport`]:
//!
//! - JSON ([`CandidateList`]): one entry per duplicate group with the
//!   suggested keeper and the redundant paths. `purge` reads this back.
//! - Plain text: one redundant path per line, preceded by `#` comments naming
//!   the group and keeper. The file is directly usable as a `reconcile`
//!   deletion list after the listed files have been removed by hand.
//!
//! The keeper is never listed as a candidate.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::duplicates::{DedupeReport, Verdict};

/// Errors reading or writing candidate lists.
#[derive(thiserror::Error, Debug)]
pub enum CandidateError {
    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid candidate list {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Write(#[from] io::Error),
}

/// Why a group's members are considered the same recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateReason {
    /// Byte-identical files.
    ExactCopy,
    /// Fingerprints at or above the identical threshold.
    Identical,
    /// Fingerprints between the near and identical thresholds.
    NearMatch,
}

/// One group: a keeper and the paths that can go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateGroup {
    /// Cluster key, e.g. `fiona apple - criminal`.
    pub label: String,
    pub reason: CandidateReason,
    pub keeper: PathBuf,
    pub redundant: Vec<PathBuf>,
    pub reclaimable_bytes: u64,
}

/// Everything a user may delete, as written by `--candidates <FILE>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateList {
    pub generated_at: DateTime<Utc>,
    pub groups: Vec<CandidateGroup>,
}

impl CandidateList {
    /// Build the list from a report: fingerprint groups first (in report
    /// order), then exact copies grouped by kept path.
    #[must_use]
    pub fn from_report(report: &DedupeReport) -> Self {
        let mut groups: Vec<CandidateGroup> = report
            .groups
            .iter()
            .map(|g| {
                let strongest = g
                    .edges
                    .iter()
                    .any(|e| e.verdict == Verdict::Identical);
                CandidateGroup {
                    label: g.key.to_string(),
                    reason: if strongest {
                        CandidateReason::Identical
                    } else {
                        CandidateReason::NearMatch
                    },
                    keeper: g.keeper().path.clone(),
                    redundant: g.redundant().iter().map(|m| m.path.clone()).collect(),
                    reclaimable_bytes: g.reclaimable(),
                }
            })
            .collect();

        for copy in &report.exact_copies {
            match groups.iter_mut().find(|g| {
                g.reason == CandidateReason::ExactCopy && g.keeper == copy.kept_path
            }) {
                Some(group) => {
                    group.redundant.push(copy.copy_path.clone());
                    group.reclaimable_bytes += copy.file_size;
                }
                None => groups.push(CandidateGroup {
                    label: copy.hash.short(),
                    reason: CandidateReason::ExactCopy,
                    keeper: copy.kept_path.clone(),
                    redundant: vec![copy.copy_path.clone()],
                    reclaimable_bytes: copy.file_size,
                }),
            }
        }

        Self {
            generated_at: Utc::now(),
            groups,
        }
    }

    /// Every redundant path, in list order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.groups
            .iter()
            .flat_map(|g| g.redundant.iter().map(PathBuf::as_path))
    }

    /// Total number of redundant paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.redundant.len()).sum()
    }

    /// Whether there is nothing to delete.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes freed by deleting every candidate.
    #[must_use]
    pub fn reclaimable_bytes(&self) -> u64 {
        self.groups.iter().map(|g| g.reclaimable_bytes).sum()
    }

    /// Write pretty JSON.
    ///
    /// # Errors
    ///
    /// Serialization or I/O failure.
    pub fn write_json<W: Write>(&self, writer: &mut W) -> Result<(), CandidateError> {
        serde_json::to_writer_pretty(&mut *writer, self)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    /// Write the plain-text deletion list.
    ///
    /// # Errors
    ///
    /// I/O failure.
    pub fn write_plain<W: Write>(&self, writer: &mut W) -> Result<(), CandidateError> {
        writeln!(
            writer,
            "# songdedupe deletion candidates, {}",
            self.generated_at.to_rfc3339()
        )?;
        for group in &self.groups {
            writeln!(writer)?;
            writeln!(writer, "# {} (keep {})", group.label, group.keeper.display())?;
            for path in &group.redundant {
                writeln!(writer, "{}", path.display())?;
            }
        }
        Ok(())
    }

    /// Save to `path`: JSON when the name ends in `.json`, plain text
    /// otherwise.
    ///
    /// # Errors
    ///
    /// [`CandidateError::Io`] when the file cannot be created.
    pub fn save(&self, path: &Path) -> Result<(), CandidateError> {
        let file = File::create(path).map_err(|source| CandidateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        if is_json_path(path) {
            self.write_json(&mut writer)?;
        } else {
            self.write_plain(&mut writer)?;
        }
        writer.flush()?;
        log::info!(
            "Wrote {} deletion candidates to {}",
            self.len(),
            path.display()
        );
        Ok(())
    }

    /// Load a JSON candidate list.
    ///
    /// # Errors
    ///
    /// [`CandidateError::Io`] or [`CandidateError::Parse`].
    pub fn load(path: &Path) -> Result<Self, CandidateError> {
        let file = File::open(path).map_err(|source| CandidateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| CandidateError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn is_json_path(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duplicates::{ClusterKey, DuplicateGroup, ExactCopy, GroupEdge, GroupMember};
    use crate::scanner::ContentHash;
    use tempfile::tempdir;

    fn member(tag: &str, path: &str, size: u64) -> GroupMember {
        GroupMember {
            hash: ContentHash::of_bytes(tag.as_bytes()),
            path: PathBuf::from(path),
            file_size: size,
            bitrate_kbps: None,
        }
    }

    fn report() -> DedupeReport {
        let a = member("a", "/m/a.flac", 300);
        let b = member("b", "/m/b.mp3", 100);
        let group = DuplicateGroup {
            key: ClusterKey {
                artist: "fiona apple".into(),
                title: "criminal".into(),
            },
            edges: vec![GroupEdge {
                a: a.hash,
                b: b.hash,
                score: 0.7,
                verdict: Verdict::NearMatch,
                inferred: false,
            }],
            members: vec![a, b],
        };
        let hash = ContentHash::of_bytes(b"c");
        DedupeReport {
            groups: vec![group],
            exact_copies: vec![
                ExactCopy {
                    hash,
                    kept_path: "/m/c.mp3".into(),
                    copy_path: "/m/c (1).mp3".into(),
                    file_size: 10,
                },
                ExactCopy {
                    hash,
                    kept_path: "/m/c.mp3".into(),
                    copy_path: "/m/c (2).mp3".into(),
                    file_size: 10,
                },
            ],
            ..DedupeReport::default()
        }
    }

    #[test]
    fn test_keeper_is_never_a_candidate() {
        let list = CandidateList::from_report(&report());
        assert_eq!(list.groups.len(), 2);
        assert_eq!(list.len(), 3);
        for group in &list.groups {
            assert!(!group.redundant.contains(&group.keeper));
        }
        assert_eq!(list.groups[0].reason, CandidateReason::NearMatch);
        assert_eq!(list.groups[1].reason, CandidateReason::ExactCopy);
        assert_eq!(list.reclaimable_bytes(), 120);
    }

    #[test]
    fn test_plain_text_lists_one_path_per_line() {
        let list = CandidateList::from_report(&report());
        let mut out = Vec::new();
        list.write_plain(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        let paths: Vec<&str> = text
            .lines()
            .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
            .collect();
        assert_eq!(paths, vec!["/m/b.mp3", "/m/c (1).mp3", "/m/c (2).mp3"]);
    }

    #[test]
    fn test_save_and_load_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("candidates.json");
        let list = CandidateList::from_report(&report());
        list.save(&path).unwrap();

        let loaded = CandidateList::load(&path).unwrap();
        assert_eq!(loaded, list);
    }

    #[test]
    fn test_load_rejects_plain_text() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("candidates.txt");
        CandidateList::from_report(&report()).save(&path).unwrap();
        assert!(matches!(
            CandidateList::load(&path),
            Err(CandidateError::Parse { .. })
        ));
    }
}
