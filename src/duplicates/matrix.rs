//! Lazily filled similarity matrix for one cluster.
//!
//! # Overview
//!
//! Members are taken in content-hash order. The matrix stores only the strict
//! lower triangle, so `(i, j)` and `(j, i)` share one slot and a cluster of
//! `n` tracks has at most `n(n-1)/2` cells. A filled cell is never
//! overwritten.
//!
//! # Scoring order
//!
//! For each member `i`, the earlier members are visited nearest-neighbour
//! first: once `i` has a best match `a`, the next candidate is the one with
//! the highest known score against `a` (ties and unknowns by earliest
//! position). As soon as `i` reaches the identical threshold against some
//! `via`, comparisons for `i` stop. Each remaining candidate `k` then gets an
//! inferred copy of `score(via, k)` when that cell is known, and stays
//! unknown otherwise.
//!
//! For the three-track example where `t2~t1 = 0.67` and `t3~t1 = 1.00`, only
//! those two comparisons run; `t3~t2` is inferred as `0.67` via `t1`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use super::classifier::Thresholds;
use super::groups::{Cluster, ClusterKey};
use crate::cache::{StoreError, TrackStore};
use crate::scanner::{ContentHash, FingerprintComparator, Fingerprinter};

/// How a score got into the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Origin {
    /// The comparator ran on this pair (now or earlier in the run).
    Measured,
    /// Copied from `score(via, other)` after the row hit the identical threshold.
    Inferred { via: ContentHash },
}

/// One matrix slot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum Cell {
    /// Never compared.
    #[default]
    Unknown,
    /// Similarity in `[0, 1]`.
    Score { value: f64, origin: Origin },
}

impl Cell {
    /// The score, if known.
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Unknown => None,
            Self::Score { value, .. } => Some(*value),
        }
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

/// Strictly lower-triangular matrix over a cluster's members.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
    key: ClusterKey,
    members: Vec<ContentHash>,
    cells: Vec<Cell>,
}

impl SimilarityMatrix {
    /// Empty matrix for a cluster.
    #[must_use]
    pub fn new(cluster: &Cluster) -> Self {
        let n = cluster.members.len();
        Self {
            key: cluster.key.clone(),
            members: cluster.members.clone(),
            cells: vec![Cell::Unknown; n * n.saturating_sub(1) / 2],
        }
    }

    #[must_use]
    pub fn key(&self) -> &ClusterKey {
        &self.key
    }

    /// Members in row order.
    #[must_use]
    pub fn members(&self) -> &[ContentHash] {
        &self.members
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Row index of a member.
    #[must_use]
    pub fn position(&self, hash: &ContentHash) -> Option<usize> {
        self.members.iter().position(|m| m == hash)
    }

    fn index(&self, i: usize, j: usize) -> Option<usize> {
        let n = self.members.len();
        if i == j || i >= n || j >= n {
            return None;
        }
        let (hi, lo) = if i > j { (i, j) } else { (j, i) };
        Some(hi * (hi - 1) / 2 + lo)
    }

    /// Cell for the pair, in either order. The diagonal is always unknown.
    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> Cell {
        self.index(i, j).map_or(Cell::Unknown, |idx| self.cells[idx])
    }

    /// Score for the pair, in either order.
    #[must_use]
    pub fn score(&self, i: usize, j: usize) -> Option<f64> {
        self.get(i, j).value()
    }

    /// Fill an unknown cell. Returns `false` (and changes nothing) when the
    /// cell is already filled or the pair is invalid.
    pub fn set(&mut self, i: usize, j: usize, value: f64, origin: Origin) -> bool {
        let Some(idx) = self.index(i, j) else {
            return false;
        };
        if !self.cells[idx].is_unknown() {
            return false;
        }
        self.cells[idx] = Cell::Score {
            value: value.clamp(0.0, 1.0),
            origin,
        };
        true
    }

    /// Number of slots, `n(n-1)/2`.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Number of filled slots.
    #[must_use]
    pub fn known_count(&self) -> usize {
        self.cells.iter().filter(|c| !c.is_unknown()).count()
    }

    /// Every known pair as `(i, j, value)` with `i > j`.
    pub fn known_pairs(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        let n = self.members.len();
        (1..n).flat_map(move |i| {
            (0..i).filter_map(move |j| self.score(i, j).map(|v| (i, j, v)))
        })
    }

    /// Row `i` as rendered: `n-1` columns, the score against column `j`
    /// when `j < i` and known, `None` otherwise.
    #[must_use]
    pub fn row(&self, i: usize) -> Vec<Option<f64>> {
        let columns = self.members.len().saturating_sub(1);
        (0..columns)
            .map(|j| if j < i { self.score(i, j) } else { None })
            .collect()
    }
}

/// Counters from scoring one or more clusters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatrixStats {
    /// Comparator invocations.
    pub comparisons: usize,
    /// Scores reused from the store's pair cache.
    pub score_cache_hits: usize,
    /// Cells filled by inference.
    pub inferred: usize,
    /// Cells still unknown afterwards.
    pub unknown_cells: usize,
    /// Members skipped because no fingerprint could be produced.
    pub unavailable: Vec<ContentHash>,
    /// Scoring stopped early on shutdown.
    pub interrupted: bool,
}

impl MatrixStats {
    /// Add another cluster's counters.
    pub fn merge(&mut self, other: MatrixStats) {
        self.comparisons += other.comparisons;
        self.score_cache_hits += other.score_cache_hits;
        self.inferred += other.inferred;
        self.unknown_cells += other.unknown_cells;
        self.unavailable.extend(other.unavailable);
        self.interrupted |= other.interrupted;
    }
}

/// Fills similarity matrices, consulting and filling the store.
pub struct SimilarityEngine<'a> {
    store: &'a TrackStore,
    fingerprinter: &'a Fingerprinter,
    comparator: &'a dyn FingerprintComparator,
    identical: f64,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl<'a> SimilarityEngine<'a> {
    #[must_use]
    pub fn new(
        store: &'a TrackStore,
        fingerprinter: &'a Fingerprinter,
        comparator: &'a dyn FingerprintComparator,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            store,
            fingerprinter,
            comparator,
            identical: thresholds.identical,
            shutdown_flag: None,
        }
    }

    /// Stop between comparisons when the flag is set.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Score a cluster from scratch.
    ///
    /// # Errors
    ///
    /// Only fatal store errors; unavailable fingerprints leave cells unknown
    /// and are listed in [`MatrixStats::unavailable`].
    pub fn score(&self, cluster: &Cluster) -> Result<(SimilarityMatrix, MatrixStats), StoreError> {
        let mut matrix = SimilarityMatrix::new(cluster);
        let stats = self.score_into(&mut matrix)?;
        Ok((matrix, stats))
    }

    /// Fill the unknown cells of an existing matrix.
    ///
    /// # Errors
    ///
    /// See [`score`](Self::score).
    pub fn score_into(&self, matrix: &mut SimilarityMatrix) -> Result<MatrixStats, StoreError> {
        let mut stats = MatrixStats::default();
        let n = matrix.len();
        let mut unavailable: Vec<bool> = matrix
            .members()
            .iter()
            .map(|h| self.store.is_unavailable(h))
            .collect();

        'rows: for i in 1..n {
            if unavailable[i] {
                continue;
            }

            let mut pending: Vec<usize> = (0..i)
                .filter(|&j| !unavailable[j] && matrix.get(i, j).is_unknown())
                .collect();
            let mut anchor = best_match(matrix, i);

            while !pending.is_empty() {
                if anchor.is_some_and(|(_, s)| s >= self.identical) {
                    break;
                }
                if self.is_shutdown_requested() {
                    stats.interrupted = true;
                    break 'rows;
                }

                let pos = next_candidate(matrix, &pending, anchor);
                let j = pending.remove(pos);
                match self.compare(matrix, i, j, &mut stats) {
                    Ok(value) => {
                        matrix.set(i, j, value, Origin::Measured);
                        let better = match anchor {
                            None => true,
                            Some((a, s)) => value > s || (value == s && j < a),
                        };
                        if better {
                            anchor = Some((j, value));
                        }
                    }
                    Err(StoreError::FingerprintUnavailable { hash, .. }) => {
                        let who = if hash == matrix.members()[i] { i } else { j };
                        unavailable[who] = true;
                        stats.unavailable.push(hash);
                        if who == i {
                            continue 'rows;
                        }
                    }
                    Err(e) => return Err(e),
                }
            }

            if let Some((via, s)) = anchor {
                if s >= self.identical {
                    let via_hash = matrix.members()[via];
                    for k in pending {
                        if let Some(v) = matrix.score(via, k) {
                            if matrix.set(i, k, v, Origin::Inferred { via: via_hash }) {
                                stats.inferred += 1;
                            }
                        }
                    }
                }
            }
        }

        stats.unavailable.sort_unstable();
        stats.unavailable.dedup();
        stats.unknown_cells = matrix.cell_count() - matrix.known_count();
        log::debug!(
            "Scored cluster '{}': {} comparisons, {} cached, {} inferred, {} unknown",
            matrix.key(),
            stats.comparisons,
            stats.score_cache_hits,
            stats.inferred,
            stats.unknown_cells
        );
        Ok(stats)
    }

    fn compare(
        &self,
        matrix: &SimilarityMatrix,
        i: usize,
        j: usize,
        stats: &mut MatrixStats,
    ) -> Result<f64, StoreError> {
        let a = matrix.members()[i];
        let b = matrix.members()[j];
        if let Some(value) = self.store.cached_score(&a, &b) {
            stats.score_cache_hits += 1;
            log::trace!("Score cache hit {} ~ {}", a.short(), b.short());
            return Ok(value);
        }

        let fa = self.store.ensure_fingerprint(&a, self.fingerprinter)?;
        let fb = self.store.ensure_fingerprint(&b, self.fingerprinter)?;
        let raw = self.comparator.similarity(&fb, &fa);
        let value = if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.0 };

        self.store.record_score(&a, &b, value);
        stats.comparisons += 1;
        log::trace!("Compared {} ~ {} = {:.3}", a.short(), b.short(), value);
        Ok(value)
    }
}

/// Best known score in row `i` against earlier members; ties go to the
/// earliest member.
fn best_match(matrix: &SimilarityMatrix, i: usize) -> Option<(usize, f64)> {
    (0..i)
        .filter_map(|j| matrix.score(i, j).map(|v| (j, v)))
        .fold(None, |best, (j, v)| match best {
            Some((_, s)) if s >= v => best,
            _ => Some((j, v)),
        })
}

/// Index into `pending` of the next member to compare against.
fn next_candidate(
    matrix: &SimilarityMatrix,
    pending: &[usize],
    anchor: Option<(usize, f64)>,
) -> usize {
    let Some((a, _)) = anchor else {
        return 0;
    };
    let mut best = 0;
    let mut best_score = matrix.score(a, pending[0]);
    for (pos, &k) in pending.iter().enumerate().skip(1) {
        let s = matrix.score(a, k);
        let wins = match (s, best_score) {
            (Some(x), Some(y)) => x > y,
            (Some(_), None) => true,
            _ => false,
        };
        if wins {
            best = pos;
            best_score = s;
        }
    }
    best
}
