//! Per-edge congestion estimator.
//!
//! # Level
//!
//! `level = observed_flow / expected_flow`, smoothed with an exponentially
//! weighted moving average:
//!
//! ```text
//! level ← α · (observed / expected) + (1 − α) · level
//! ```
//!
//! The level is stored as the bit pattern of an `f64` in an `AtomicU64` and
//! updated with a compare-and-swap loop, so any number of telemetry threads may
//! report flows for the same edge without a lock.
//!
//! # Planned load
//!
//! The solver records how many assignees' paths cross each edge.  The
//! *effective* level used for path scoring adds
//! `planned_load_factor × planned / expected_per_hour` on top of the measured
//! level, so the solver steers later requests away from roads it has just
//! filled before telemetry catches up.  Breach detection uses the measured
//! level only.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use ef_core::{CongestionConfig, EdgeId, Timestamp, HOUR};
use ef_spatial::{CongestionView, EdgeStatus, RoadNetwork, SpatialError, SpatialResult};

use crate::trend::{SampleRing, Trend};

// ── LevelChange ───────────────────────────────────────────────────────────────

/// Result of one telemetry update.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LevelChange {
    pub edge:     EdgeId,
    pub previous: f64,
    pub level:    f64,
}

impl LevelChange {
    /// `true` if this update moved the edge to or above `threshold`.
    pub fn crossed_up(&self, threshold: f64) -> bool {
        self.previous < threshold && self.level >= threshold
    }
}

// ── CongestionEstimator ───────────────────────────────────────────────────────

struct EdgeCell {
    level_bits: AtomicU64,
    planned:    AtomicU32,
    samples:    Mutex<SampleRing>,
}

/// Owner of every edge's congestion state.
pub struct CongestionEstimator {
    cells:    Vec<EdgeCell>,
    /// Expected hourly throughput, copied from the network at construction.
    expected: Vec<f64>,
    cfg:      CongestionConfig,
}

impl CongestionEstimator {
    /// One cell per edge of `network`, all at level 0.
    pub fn new(network: &RoadNetwork, cfg: CongestionConfig) -> Self {
        let cells = (0..network.edge_count())
            .map(|_| EdgeCell {
                level_bits: AtomicU64::new(0f64.to_bits()),
                planned:    AtomicU32::new(0),
                samples:    Mutex::new(SampleRing::new(cfg.trend_samples)),
            })
            .collect();
        let expected = network
            .edge_capacity_per_hour
            .iter()
            .map(|&c| (c as f64).max(1.0))
            .collect();
        Self { cells, expected, cfg }
    }

    pub fn config(&self) -> &CongestionConfig {
        &self.cfg
    }

    pub fn edge_count(&self) -> usize {
        self.cells.len()
    }

    fn cell(&self, edge: EdgeId) -> SpatialResult<&EdgeCell> {
        self.cells.get(edge.index()).ok_or(SpatialError::EdgeNotFound(edge))
    }

    // ── Telemetry ─────────────────────────────────────────────────────────

    /// Fold one flow observation (people or vehicles per hour) into the EWMA.
    pub fn record_flow(&self, edge: EdgeId, observed_per_hour: f64, now: Timestamp) -> SpatialResult<LevelChange> {
        let cell = self.cell(edge)?;
        let ratio = (observed_per_hour / self.expected[edge.index()]).max(0.0);
        let alpha = self.cfg.ewma_alpha;

        let prev_bits = cell
            .level_bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let prev = f64::from_bits(bits);
                Some((alpha * ratio + (1.0 - alpha) * prev).max(0.0).to_bits())
            })
            .unwrap_or_else(|bits| bits);
        let previous = f64::from_bits(prev_bits);
        let level = (alpha * ratio + (1.0 - alpha) * previous).max(0.0);

        cell.samples.lock().push(now.0, level);
        if (previous < self.cfg.congested_threshold) != (level < self.cfg.congested_threshold) {
            debug!(%edge, previous, level, "edge crossed congestion threshold");
        }
        Ok(LevelChange { edge, previous, level })
    }

    /// Convert a count of location pings crossing `edge` during
    /// `interval_secs` into an hourly flow and record it.
    pub fn record_movement(
        &self,
        edge:          EdgeId,
        count:         u32,
        interval_secs: u64,
        now:           Timestamp,
    ) -> SpatialResult<LevelChange> {
        let per_hour = count as f64 * HOUR as f64 / interval_secs.max(1) as f64;
        self.record_flow(edge, per_hour, now)
    }

    /// Overwrite the level with an authoritative measurement (e.g. a traffic
    /// sensor reporting a ratio directly), bypassing the EWMA.
    pub fn set_level(&self, edge: EdgeId, level: f64, now: Timestamp) -> SpatialResult<LevelChange> {
        let cell = self.cell(edge)?;
        let level = level.max(0.0);
        let previous = f64::from_bits(cell.level_bits.swap(level.to_bits(), Ordering::AcqRel));
        cell.samples.lock().push(now.0, level);
        Ok(LevelChange { edge, previous, level })
    }

    // ── Planned load ──────────────────────────────────────────────────────

    /// Add `n` planned travellers to every edge of a path.
    pub fn add_planned(&self, edges: &[EdgeId], n: u32) {
        for e in edges {
            if let Some(cell) = self.cells.get(e.index()) {
                cell.planned.fetch_add(n, Ordering::AcqRel);
            }
        }
    }

    /// Remove `n` planned travellers from every edge of a path.
    pub fn remove_planned(&self, edges: &[EdgeId], n: u32) {
        for e in edges {
            if let Some(cell) = self.cells.get(e.index()) {
                let _ = cell
                    .planned
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| Some(p.saturating_sub(n)));
            }
        }
    }

    pub fn planned(&self, edge: EdgeId) -> u32 {
        self.cells
            .get(edge.index())
            .map_or(0, |c| c.planned.load(Ordering::Acquire))
    }

    // ── Reads ─────────────────────────────────────────────────────────────

    /// Measured (EWMA) level of `edge`; 0 for unknown edges.
    #[inline]
    pub fn level(&self, edge: EdgeId) -> f64 {
        self.cells
            .get(edge.index())
            .map_or(0.0, |c| f64::from_bits(c.level_bits.load(Ordering::Acquire)))
    }

    /// Measured level plus the planned-load contribution.
    pub fn effective_level(&self, edge: EdgeId) -> f64 {
        let Some(&expected) = self.expected.get(edge.index()) else {
            return 0.0;
        };
        self.level(edge) + self.cfg.planned_load_factor * self.planned(edge) as f64 / expected
    }

    /// Least-squares slope over the recent samples, level per second.
    pub fn slope(&self, edge: EdgeId) -> f64 {
        self.cells.get(edge.index()).map_or(0.0, |c| c.samples.lock().slope())
    }

    pub fn sample_count(&self, edge: EdgeId) -> usize {
        self.cells.get(edge.index()).map_or(0, |c| c.samples.lock().len())
    }

    pub fn trend(&self, edge: EdgeId) -> Trend {
        Trend::from_slope(self.slope(edge), self.cfg.trend_dead_band)
    }

    /// Observable status, with administrative closure taking precedence.
    pub fn status(&self, network: &RoadNetwork, edge: EdgeId) -> EdgeStatus {
        EdgeStatus::classify(
            network.contains_edge(edge) && network.is_closed(edge),
            self.level(edge),
            self.cfg.congested_threshold,
        )
    }

    pub fn is_breached(&self, edge: EdgeId) -> bool {
        self.level(edge) >= self.cfg.congested_threshold
    }

    /// Edges whose measured level is at or above the congested threshold,
    /// ascending by id.
    pub fn breached_edges(&self) -> Vec<EdgeId> {
        (0..self.cells.len())
            .map(|i| EdgeId(i as u32))
            .filter(|&e| self.is_breached(e))
            .collect()
    }

    /// Point-in-time copy for path scoring.
    pub fn snapshot(&self, now: Timestamp) -> CongestionSnapshot {
        let n = self.cells.len();
        let mut measured = Vec::with_capacity(n);
        let mut effective = Vec::with_capacity(n);
        for i in 0..n {
            let e = EdgeId(i as u32);
            measured.push(self.level(e));
            effective.push(self.effective_level(e));
        }
        CongestionSnapshot { taken_at: now, measured, effective }
    }
}

impl CongestionView for CongestionEstimator {
    #[inline]
    fn level(&self, edge: EdgeId) -> f64 {
        self.effective_level(edge)
    }
}

// ── CongestionSnapshot ────────────────────────────────────────────────────────

/// Immutable per-edge levels captured at one instant.
///
/// Routing through a snapshot keeps one solve internally consistent while
/// telemetry continues to update the live estimator.
#[derive(Clone, Debug, Default)]
pub struct CongestionSnapshot {
    pub taken_at:  Timestamp,
    /// Measured EWMA levels, indexed by `EdgeId`.
    pub measured:  Vec<f64>,
    /// Measured plus planned-load contribution, indexed by `EdgeId`.
    pub effective: Vec<f64>,
}

impl CongestionSnapshot {
    /// A snapshot in which every edge flows freely.
    pub fn free_flow(edge_count: usize) -> Self {
        Self {
            taken_at:  Timestamp::ZERO,
            measured:  vec![0.0; edge_count],
            effective: vec![0.0; edge_count],
        }
    }

    pub fn measured_level(&self, edge: EdgeId) -> f64 {
        self.measured.get(edge.index()).copied().unwrap_or(0.0)
    }
}

impl CongestionView for CongestionSnapshot {
    #[inline]
    fn level(&self, edge: EdgeId) -> f64 {
        self.effective.get(edge.index()).copied().unwrap_or(0.0)
    }
}
