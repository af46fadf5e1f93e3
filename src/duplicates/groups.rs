//! Candidate grouping by normalized artist and title.
//!
//! # Overview
//!
//! Fingerprint comparison is expensive, so tracks are first bucketed by a
//! coarse key: artist and title, lowercased, stripped of accents and
//! punctuation. Only tracks in the same bucket are ever compared.
//!
//! A track without a usable artist or title never joins a cluster. It is
//! reported as unmatched and excluded from every pairwise comparison, since
//! grouping on missing metadata would only produce false positives.
//!
//! # Example
//!
//! ```
//! use songdedupe::cache::TrackRecord;
//! use songdedupe::duplicates::group_by_metadata;
//! use songdedupe::scanner::{ContentHash, TagField};
//!
//! let mut a = TrackRecord::new(ContentHash::of_bytes(b"a"), "/a.mp3", 1);
//! a.artist = TagField::new("Fiona Apple");
//! a.title = TagField::new("Across The Universe");
//! let mut b = TrackRecord::new(ContentHash::of_bytes(b"b"), "/b.m4a", 1);
//! b.artist = TagField::new("FIONA APPLE");
//! b.title = TagField::new("Across the Universe!");
//!
//! let (grouping, stats) = group_by_metadata(&[a, b]);
//! assert_eq!(grouping.clusters.len(), 1);
//! assert_eq!(stats.candidate_tracks, 2);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::cache::TrackRecord;
use crate::scanner::{ContentHash, TagField};

/// Normalized (artist, title) pair shared by a cluster.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ClusterKey {
    pub artist: String,
    pub title: String,
}

impl ClusterKey {
    /// Build a key from tags. `None` when either side is missing or
    /// normalizes to nothing.
    #[must_use]
    pub fn from_tags(artist: &TagField, title: &TagField) -> Option<Self> {
        let artist = normalize(artist.as_str()?);
        let title = normalize(title.as_str()?);
        if artist.is_empty() || title.is_empty() {
            return None;
        }
        Some(Self { artist, title })
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.artist, self.title)
    }
}

/// Tracks sharing a [`ClusterKey`], sorted by content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub key: ClusterKey,
    pub members: Vec<ContentHash>,
}

impl Cluster {
    /// Create a cluster, sorting and deduplicating members.
    #[must_use]
    pub fn new(key: ClusterKey, mut members: Vec<ContentHash>) -> Self {
        members.sort_unstable();
        members.dedup();
        Self { key, members }
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the cluster has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether there is at least one pair to compare.
    #[must_use]
    pub fn is_comparable(&self) -> bool {
        self.members.len() > 1
    }

    /// Number of distinct pairs, n(n-1)/2.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        let n = self.members.len();
        n * n.saturating_sub(1) / 2
    }
}

/// Result of grouping: keyed clusters plus tracks that could not be keyed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grouping {
    pub clusters: BTreeMap<ClusterKey, Cluster>,
    /// Each of these is a singleton that is never compared. Sorted.
    pub unmatched: Vec<ContentHash>,
}

impl Grouping {
    /// Clusters with two or more members, in key order.
    pub fn comparable(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.values().filter(|c| c.is_comparable())
    }
}

/// Statistics from grouping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroupingStats {
    /// Records considered
    pub total_tracks: usize,
    /// Distinct cluster keys
    pub clusters: usize,
    /// Clusters with 2+ members
    pub comparable_clusters: usize,
    /// Tracks in comparable clusters
    pub candidate_tracks: usize,
    /// Tracks alone under their key
    pub singleton_tracks: usize,
    /// Tracks with missing or empty artist/title
    pub unmatched_tracks: usize,
    /// Upper bound on comparisons, sum of n(n-1)/2 over clusters
    pub max_pairs: usize,
}

impl GroupingStats {
    /// Fraction of tracks ruled out without any fingerprint work.
    #[must_use]
    pub fn elimination_rate(&self) -> f64 {
        if self.total_tracks == 0 {
            return 0.0;
        }
        (self.total_tracks - self.candidate_tracks) as f64 / self.total_tracks as f64 * 100.0
    }
}

/// Normalize a tag value for keying.
///
/// NFKD-decomposes and drops combining marks (so "Beyoncé" keys like
/// "Beyonce"), lowercases, removes apostrophes ("Don't" keys like "Dont"),
/// turns every other run of non-alphanumeric characters into one space and
/// trims.
#[must_use]
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for c in text.nfkd().filter(|c| !is_combining_mark(*c)) {
        if matches!(c, '\'' | '\u{2018}' | '\u{2019}' | '`' | '\u{00b4}') {
            continue;
        }
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(c.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

/// Bucket records by normalized (artist, title).
///
/// Output depends only on the set of records, not their order.
#[must_use]
pub fn group_by_metadata(records: &[TrackRecord]) -> (Grouping, GroupingStats) {
    let mut buckets: BTreeMap<ClusterKey, Vec<ContentHash>> = BTreeMap::new();
    let mut unmatched = Vec::new();

    for record in records {
        match ClusterKey::from_tags(&record.artist, &record.title) {
            Some(key) => buckets.entry(key).or_default().push(record.content_hash),
            None => {
                log::debug!(
                    "Unmatched (missing artist or title): {}",
                    record.file_path.display()
                );
                unmatched.push(record.content_hash);
            }
        }
    }
    unmatched.sort_unstable();
    unmatched.dedup();

    let clusters: BTreeMap<ClusterKey, Cluster> = buckets
        .into_iter()
        .map(|(key, members)| (key.clone(), Cluster::new(key, members)))
        .collect();

    let mut stats = GroupingStats {
        total_tracks: records.len(),
        clusters: clusters.len(),
        unmatched_tracks: unmatched.len(),
        ..GroupingStats::default()
    };
    for cluster in clusters.values() {
        if cluster.is_comparable() {
            stats.comparable_clusters += 1;
            stats.candidate_tracks += cluster.len();
            stats.max_pairs += cluster.pair_count();
        } else {
            stats.singleton_tracks += cluster.len();
        }
    }

    log::info!(
        "Grouping: {} tracks -> {} comparable clusters ({} candidates, {} unmatched)",
        stats.total_tracks,
        stats.comparable_clusters,
        stats.candidate_tracks,
        stats.unmatched_tracks
    );

    (Grouping { clusters, unmatched }, stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(tag: &str, artist: &str, title: &str, path: &str) -> TrackRecord {
        let mut r = TrackRecord::new(ContentHash::of_bytes(tag.as_bytes()), path, 100);
        r.artist = TagField::new(artist);
        r.title = TagField::new(title);
        r
    }

    #[test]
    fn test_normalize_casing_and_punctuation() {
        assert_eq!(normalize("Across The Universe"), "across the universe");
        assert_eq!(normalize("  Across--the   Universe!! "), "across the universe");
        assert_eq!(normalize("FIONA_APPLE"), "fiona apple");
    }

    #[test]
    fn test_normalize_accents_and_apostrophes() {
        assert_eq!(normalize("Beyoncé"), "beyonce");
        assert_eq!(normalize("Don't Stop"), "dont stop");
        assert_eq!(normalize("Don’t Stop"), "dont stop");
    }

    #[test]
    fn test_normalize_only_punctuation_is_empty() {
        assert_eq!(normalize("?!..."), "");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_same_song_different_spelling_and_path() {
        let records = vec![
            track("1", "Fiona Apple", "Across The Universe", "/a/01.mp3"),
            track("2", "fiona apple", "Across the Universe.", "/b/x/track.m4a"),
            track("3", "FIONA APPLE", "across-the-universe", "/c.flac"),
        ];
        let (grouping, stats) = group_by_metadata(&records);

        assert_eq!(grouping.clusters.len(), 1);
        let cluster = grouping.clusters.values().next().unwrap();
        assert_eq!(cluster.key.artist, "fiona apple");
        assert_eq!(cluster.key.title, "across the universe");
        assert_eq!(cluster.len(), 3);
        assert_eq!(stats.max_pairs, 3);
    }

    #[test]
    fn test_members_sorted_by_hash() {
        let records = vec![
            track("z", "A", "B", "/1.mp3"),
            track("y", "A", "B", "/2.mp3"),
            track("x", "A", "B", "/3.mp3"),
        ];
        let (grouping, _) = group_by_metadata(&records);
        let members = &grouping.clusters.values().next().unwrap().members;
        let mut sorted = members.clone();
        sorted.sort();
        assert_eq!(members, &sorted);
    }

    #[test]
    fn test_missing_or_empty_title_is_unmatched() {
        let mut no_title = track("1", "Fiona Apple", "", "/a.mp3");
        no_title.title = TagField::Missing;
        let records = vec![
            no_title,
            track("2", "Fiona Apple", "!!!", "/b.mp3"),
            track("3", "Fiona Apple", "Criminal", "/c.mp3"),
        ];
        let (grouping, stats) = group_by_metadata(&records);

        assert_eq!(grouping.unmatched.len(), 2);
        assert_eq!(stats.unmatched_tracks, 2);
        assert_eq!(stats.comparable_clusters, 0);
        assert_eq!(stats.singleton_tracks, 1);
        assert_eq!(grouping.comparable().count(), 0);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let records = vec![
            track("1", "A", "Song", "/1.mp3"),
            track("2", "B", "Song", "/2.mp3"),
            track("3", "a", "song", "/3.mp3"),
            track("4", "", "Song", "/4.mp3"),
        ];
        let mut reversed = records.clone();
        reversed.reverse();

        assert_eq!(group_by_metadata(&records).0, group_by_metadata(&reversed).0);
    }

    #[test]
    fn test_elimination_rate() {
        let stats = GroupingStats {
            total_tracks: 10,
            candidate_tracks: 4,
            ..Default::default()
        };
        assert!((stats.elimination_rate() - 60.0).abs() < 1e-9);
        assert_eq!(GroupingStats::default().elimination_rate(), 0.0);
    }
}
