//! Destination scoring and the per-epoch load ledger.
//!
//! # Score
//!
//! ```text
//! score = w_distance      · distance / longest_candidate_distance
//!       + w_congestion    · length-weighted mean level along the path
//!       + w_load_imbalance· max(0, count_d / mean − 1)
//!       + w_accessibility · length-weighted accessibility shortfall
//! ```
//!
//! Lower is better; ties go to the lower `DestinationId`.  The function is
//! pure so a dispatcher can recompute any decision from its inputs.
//!
//! Ranking is lexicographic: a clean path beats any path through a congested
//! edge, whatever the scores.

use std::cmp::Ordering;

use ef_core::{DestinationId, Epoch, ScoringWeights};
use ef_spatial::Path;

// ── Score ─────────────────────────────────────────────────────────────────────

/// Normalised inputs of one candidate's score.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ScoreInputs {
    /// Path distance divided by the longest candidate path, in `[0, 1]`.
    pub distance_norm:  f64,
    /// Length-weighted mean congestion level along the path.
    pub exposure:       f64,
    /// Assignments at the destination divided by the running mean.
    pub load_ratio:     f64,
    /// Length-weighted accessibility shortfall along the path.
    pub access_penalty: f64,
}

/// Weighted sum of the score inputs.  Lower is better.
pub fn score(w: &ScoringWeights, s: &ScoreInputs) -> f64 {
    w.distance * s.distance_norm
        + w.congestion * s.exposure
        + w.load_imbalance * (s.load_ratio - 1.0).max(0.0)
        + w.accessibility * s.access_penalty
}

/// A routed, scored destination candidate.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub dest:    DestinationId,
    pub path:    Path,
    pub inputs:  ScoreInputs,
    pub score:   f64,
    /// Assignments already at this destination in the current epoch.
    pub count:   u32,
    /// Pushed behind every non-demoted candidate by the balance guard.
    pub demoted: bool,
}

/// Order candidates for reservation: clean paths first, then non-demoted,
/// then by score, then by destination id.
pub fn rank(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        a.path
            .uses_congested
            .cmp(&b.path.uses_congested)
            .then_with(|| a.demoted.cmp(&b.demoted))
            .then_with(|| a.score.total_cmp(&b.score))
            .then_with(|| a.dest.cmp(&b.dest))
    });
}

/// Balance guard.
///
/// While any destination sits below `low × mean`, candidates that would rise
/// above `high × mean` after taking `unit_size` more people are demoted.
/// `floor` is the lowest count over every active destination, not only the
/// candidates.  Inactive until the mean reaches one assignment per
/// destination.
pub fn apply_balance_guard(
    candidates: &mut [Candidate],
    mean:       f64,
    floor:      u32,
    unit_size:  u32,
    low:        f64,
    high:       f64,
) {
    if mean < 1.0 {
        return;
    }
    let starved = (floor as f64) < low * mean
        || candidates.iter().any(|c| (c.count as f64) < low * mean);
    if !starved {
        return;
    }
    for c in candidates.iter_mut() {
        if (c.count + unit_size) as f64 > high * mean {
            c.demoted = true;
        }
    }
}

// ── LoadLedger ────────────────────────────────────────────────────────────────

/// Assignment counts per destination for one epoch.
///
/// Zone workers each take a copy at the start of the epoch, count their own
/// assignments, and hand back the difference with [`delta_since`]; the deltas
/// are merged once when the epoch closes.
///
/// [`delta_since`]: LoadLedger::delta_since
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadLedger {
    epoch:  Epoch,
    counts: Vec<u32>,
}

impl LoadLedger {
    pub fn new(destinations: usize) -> Self {
        Self { epoch: Epoch::ZERO, counts: vec![0; destinations] }
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn count(&self, dest: DestinationId) -> u32 {
        self.counts.get(dest.index()).copied().unwrap_or(0)
    }

    pub fn add(&mut self, dest: DestinationId, n: u32) {
        if dest.index() >= self.counts.len() {
            self.counts.resize(dest.index() + 1, 0);
        }
        self.counts[dest.index()] += n;
    }

    pub fn remove(&mut self, dest: DestinationId, n: u32) {
        if let Some(c) = self.counts.get_mut(dest.index()) {
            *c = c.saturating_sub(n);
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }

    /// Mean count over the given destinations (the active ones); 0 when empty.
    pub fn mean_over(&self, active: impl Iterator<Item = DestinationId>) -> f64 {
        let (mut sum, mut n) = (0u64, 0u64);
        for d in active {
            sum += self.count(d) as u64;
            n += 1;
        }
        if n == 0 { 0.0 } else { sum as f64 / n as f64 }
    }

    /// Lowest count over the given destinations; 0 when empty.
    pub fn min_over(&self, active: impl Iterator<Item = DestinationId>) -> u32 {
        active.map(|d| self.count(d)).min().unwrap_or(0)
    }

    /// Signed per-destination change relative to `base`.
    pub fn delta_since(&self, base: &LoadLedger) -> Vec<i64> {
        let len = self.counts.len().max(base.counts.len());
        (0..len)
            .map(|i| {
                let d = DestinationId(i as u32);
                self.count(d) as i64 - base.count(d) as i64
            })
            .collect()
    }

    /// Fold a worker's delta into this ledger.
    pub fn merge_delta(&mut self, delta: &[i64]) {
        for (i, &d) in delta.iter().enumerate() {
            let dest = DestinationId(i as u32);
            match d.cmp(&0) {
                Ordering::Greater => self.add(dest, d as u32),
                Ordering::Less    => self.remove(dest, d.unsigned_abs() as u32),
                Ordering::Equal   => {}
            }
        }
    }

    /// Start a new epoch.  Counts carry over; only the stamp advances.
    pub fn advance(&mut self) -> Epoch {
        self.epoch = self.epoch.next();
        self.epoch
    }

    /// Clear every count (end of event).
    pub fn reset(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
        self.epoch = Epoch::ZERO;
    }
}
