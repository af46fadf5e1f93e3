//! Verdicts and duplicate groups.
//!
//! A score maps to a [`Verdict`] through two thresholds. Duplicate groups are
//! the connected components of the graph whose edges are the
//! Identical-or-NearMatch cells of a matrix, so a chain A–B–C forms one group
//! even when A–C was never scored.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::groups::ClusterKey;
use super::matrix::{Cell, Origin, SimilarityMatrix};
use crate::cache::{StoreError, TrackStore};
use crate::scanner::ContentHash;

/// Default lower bound for [`Verdict::Identical`].
pub const DEFAULT_IDENTICAL_THRESHOLD: f64 = 0.95;
/// Default lower bound for [`Verdict::NearMatch`].
pub const DEFAULT_NEAR_THRESHOLD: f64 = 0.55;

/// Invalid threshold configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ThresholdError {
    #[error("thresholds must lie in [0, 1] (identical={identical}, near={near})")]
    OutOfRange { identical: f64, near: f64 },

    #[error("near threshold {near} is above identical threshold {identical}")]
    Inverted { identical: f64, near: f64 },
}

/// Score bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub identical: f64,
    pub near: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            identical: DEFAULT_IDENTICAL_THRESHOLD,
            near: DEFAULT_NEAR_THRESHOLD,
        }
    }
}

impl Thresholds {
    /// Validated thresholds.
    ///
    /// # Errors
    ///
    /// [`ThresholdError`] unless `0 <= near <= identical <= 1`.
    pub fn new(identical: f64, near: f64) -> Result<Self, ThresholdError> {
        let t = Self { identical, near };
        t.validate()?;
        Ok(t)
    }

    /// Check `0 <= near <= identical <= 1`.
    ///
    /// # Errors
    ///
    /// [`ThresholdError`] when the bounds are out of range or inverted.
    pub fn validate(&self) -> Result<(), ThresholdError> {
        let in_range = |v: f64| (0.0..=1.0).contains(&v);
        if !in_range(self.identical) || !in_range(self.near) {
            return Err(ThresholdError::OutOfRange {
                identical: self.identical,
                near: self.near,
            });
        }
        if self.near > self.identical {
            return Err(ThresholdError::Inverted {
                identical: self.identical,
                near: self.near,
            });
        }
        Ok(())
    }
}

/// Classification of one pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Identical,
    NearMatch,
    Distinct,
    /// Never compared.
    Unknown,
}

impl Verdict {
    /// Verdict for an optional score.
    #[must_use]
    pub fn from_score(score: Option<f64>, thresholds: &Thresholds) -> Self {
        match score {
            None => Self::Unknown,
            Some(s) if s >= thresholds.identical => Self::Identical,
            Some(s) if s >= thresholds.near => Self::NearMatch,
            Some(_) => Self::Distinct,
        }
    }

    /// Whether this verdict links two tracks into a group.
    #[must_use]
    pub fn is_match(self) -> bool {
        matches!(self, Self::Identical | Self::NearMatch)
    }
}

/// A track inside a duplicate group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMember {
    pub hash: ContentHash,
    pub path: PathBuf,
    pub file_size: u64,
    pub bitrate_kbps: Option<u32>,
}

/// One scored edge that holds a group together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupEdge {
    pub a: ContentHash,
    pub b: ContentHash,
    pub score: f64,
    pub verdict: Verdict,
    /// Copied from a neighbouring cell rather than measured.
    pub inferred: bool,
}

/// Tracks judged to be the same song. The first member is the suggested
/// keeper.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    pub key: ClusterKey,
    pub members: Vec<GroupMember>,
    pub edges: Vec<GroupEdge>,
}

impl DuplicateGroup {
    /// Suggested keeper.
    #[must_use]
    pub fn keeper(&self) -> &GroupMember {
        &self.members[0]
    }

    /// Deletion candidates: every member except the keeper.
    #[must_use]
    pub fn redundant(&self) -> &[GroupMember] {
        &self.members[1..]
    }

    /// Bytes freed by removing the redundant members.
    #[must_use]
    pub fn reclaimable(&self) -> u64 {
        self.redundant().iter().map(|m| m.file_size).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Connected components of the match graph of one matrix.
///
/// Members are ordered by file size (largest first), then bitrate (highest
/// first), then path. Groups come back sorted by keeper path.
///
/// # Errors
///
/// [`StoreError::NotFound`] if a member vanished from the store.
pub fn classify(
    matrix: &SimilarityMatrix,
    store: &TrackStore,
    thresholds: &Thresholds,
) -> Result<Vec<DuplicateGroup>, StoreError> {
    let n = matrix.len();
    let mut sets = DisjointSet::new(n);
    let mut edges = Vec::new();

    for (i, j, score) in matrix.known_pairs() {
        let verdict = Verdict::from_score(Some(score), thresholds);
        if verdict.is_match() {
            sets.union(i, j);
            edges.push((i, j, score, verdict));
        }
    }

    let mut components: Vec<Vec<usize>> = vec![Vec::new(); n];
    for i in 0..n {
        let root = sets.find(i);
        components[root].push(i);
    }

    let members = matrix.members();
    let mut groups = Vec::new();
    for component in components.into_iter().filter(|c| c.len() > 1) {
        let mut group_members = Vec::with_capacity(component.len());
        for &idx in &component {
            let record = store.require(&members[idx])?;
            group_members.push(GroupMember {
                hash: record.content_hash,
                path: record.file_path,
                file_size: record.file_size,
                bitrate_kbps: record.bitrate_kbps,
            });
        }
        group_members.sort_by(|a, b| {
            b.file_size
                .cmp(&a.file_size)
                .then_with(|| b.bitrate_kbps.cmp(&a.bitrate_kbps))
                .then_with(|| a.path.cmp(&b.path))
        });

        let root = sets.find(component[0]);
        let group_edges = edges
            .iter()
            .filter(|(i, _, _, _)| sets.find(*i) == root)
            .map(|&(i, j, score, verdict)| GroupEdge {
                a: members[i],
                b: members[j],
                score,
                verdict,
                inferred: matches!(
                    matrix.get(i, j),
                    Cell::Score {
                        origin: Origin::Inferred { .. },
                        ..
                    }
                ),
            })
            .collect();

        groups.push(DuplicateGroup {
            key: matrix.key().clone(),
            members: group_members,
            edges: group_edges,
        });
    }

    groups.sort_by(|a, b| a.keeper().path.cmp(&b.keeper().path));
    Ok(groups)
}

/// Report order: cluster key, then keeper path.
pub fn sort_groups(groups: &mut [DuplicateGroup]) {
    groups.sort_by(|a, b| {
        a.key
            .cmp(&b.key)
            .then_with(|| a.keeper().path.cmp(&b.keeper().path))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TrackRecord;
    use crate::duplicates::groups::Cluster;

    fn key() -> ClusterKey {
        ClusterKey {
            artist: "a".to_string(),
            title: "t".to_string(),
        }
    }

    fn setup(store: &TrackStore, specs: &[(&str, u64, Option<u32>)]) -> SimilarityMatrix {
        let mut members = Vec::new();
        for (i, (path, size, bitrate)) in specs.iter().enumerate() {
            let mut bytes = [0u8; 32];
            bytes[0] = i as u8 + 1;
            let hash = ContentHash::from_bytes(bytes);
            let mut rec = TrackRecord::new(hash, *path, *size);
            rec.bitrate_kbps = *bitrate;
            store.upsert(&rec).unwrap();
            members.push(hash);
        }
        SimilarityMatrix::new(&Cluster::new(key(), members))
    }

    #[test]
    fn test_threshold_boundary() {
        let t = Thresholds::default();
        assert_eq!(Verdict::from_score(Some(0.95), &t), Verdict::Identical);
        assert_eq!(
            Verdict::from_score(Some(0.95 - f64::EPSILON), &t),
            Verdict::NearMatch
        );
        assert_eq!(Verdict::from_score(Some(0.55), &t), Verdict::NearMatch);
        assert_eq!(Verdict::from_score(Some(0.549), &t), Verdict::Distinct);
        assert_eq!(Verdict::from_score(None, &t), Verdict::Unknown);
    }

    #[test]
    fn test_threshold_validation() {
        assert!(Thresholds::new(0.9, 0.5).is_ok());
        assert!(matches!(
            Thresholds::new(0.5, 0.9),
            Err(ThresholdError::Inverted { .. })
        ));
        assert!(matches!(
            Thresholds::new(1.5, 0.5),
            Err(ThresholdError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_chain_forms_one_group() {
        let store = TrackStore::open_in_memory().unwrap();
        let mut matrix = setup(
            &store,
            &[("/a.mp3", 10, None), ("/b.mp3", 10, None), ("/c.mp3", 10, None)],
        );
        matrix.set(1, 0, 0.6, Origin::Measured);
        matrix.set(2, 1, 0.7, Origin::Measured);

        let groups = classify(&matrix, &store, &Thresholds::default()).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 3);
        assert_eq!(groups[0].edges.len(), 2);
    }

    #[test]
    fn test_distinct_and_unknown_do_not_group() {
        let store = TrackStore::open_in_memory().unwrap();
        let mut matrix = setup(&store, &[("/a.mp3", 1, None), ("/b.mp3", 1, None), ("/c.mp3", 1, None)]);
        matrix.set(1, 0, 0.2, Origin::Measured);

        let groups = classify(&matrix, &store, &Thresholds::default()).unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn test_keeper_is_largest_then_highest_bitrate() {
        let store = TrackStore::open_in_memory().unwrap();
        let mut matrix = setup(
            &store,
            &[
                ("/small.mp3", 100, Some(320)),
                ("/big-low.mp3", 500, Some(128)),
                ("/big-high.m4a", 500, Some(256)),
            ],
        );
        matrix.set(1, 0, 1.0, Origin::Measured);
        matrix.set(2, 0, 1.0, Origin::Measured);

        let groups = classify(&matrix, &store, &Thresholds::default()).unwrap();
        let paths: Vec<_> = groups[0]
            .members
            .iter()
            .map(|m| m.path.to_string_lossy().into_owned())
            .collect();
        assert_eq!(paths, vec!["/big-high.m4a", "/big-low.mp3", "/small.mp3"]);
        assert_eq!(groups[0].keeper().path, PathBuf::from("/big-high.m4a"));
        assert_eq!(groups[0].reclaimable(), 600);
    }

    #[test]
    fn test_inferred_edges_are_marked() {
        let store = TrackStore::open_in_memory().unwrap();
        let mut matrix = setup(&store, &[("/a.mp3", 1, None), ("/b.mp3", 1, None)]);
        let via = matrix.members()[0];
        matrix.set(1, 0, 0.99, Origin::Inferred { via });

        let groups = classify(&matrix, &store, &Thresholds::default()).unwrap();
        assert!(groups[0].edges[0].inferred);
        assert_eq!(groups[0].edges[0].verdict, Verdict::Identical);
    }

    #[test]
    fn test_sort_groups_by_key_then_keeper() {
        let member = |p: &str| GroupMember {
            hash: ContentHash::of_bytes(p.as_bytes()),
            path: PathBuf::from(p),
            file_size: 1,
            bitrate_kbps: None,
        };
        let group = |artist: &str, keeper: &str| DuplicateGroup {
            key: ClusterKey {
                artist: artist.to_string(),
                title: "t".to_string(),
            },
            members: vec![member(keeper), member("/zz.mp3")],
            edges: Vec::new(),
        };
        let mut groups = vec![group("b", "/1.mp3"), group("a", "/9.mp3"), group("a", "/2.mp3")];
        sort_groups(&mut groups);
        let order: Vec<_> = groups
            .iter()
            .map(|g| (g.key.artist.clone(), g.keeper().path.clone()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("a".to_string(), PathBuf::from("/2.mp3")),
                ("a".to_string(), PathBuf::from("/9.mp3")),
                ("b".to_string(), PathBuf::from("/1.mp3")),
            ]
        );
    }
}
