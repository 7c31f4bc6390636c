//! Edge cost model used by path search.
//!
//! ```text
//! cost(e) = length(e) × (1 + congestionPenalty(level(e)))
//!                     × (1 + inaccessibilityPenalty(rating(e), need))
//! ```
//!
//! Closed edges have no cost (impassable).  In *strict* mode edges at or above
//! the congested threshold are impassable too; routers use strict mode first
//! and relax it only when no other path exists.

use ef_core::{EdgeId, RoutingConfig};

use crate::RoadNetwork;

// ── CongestionView ────────────────────────────────────────────────────────────

/// Read-only access to per-edge congestion levels.
///
/// The congestion estimator owns the levels; the graph only reads them while
/// scoring paths.  Implementations must be cheap (one atomic load or a slice
/// index) because the router calls this once per relaxed edge.
pub trait CongestionView: Send + Sync {
    /// Current congestion level of `edge` (`observed / expected`, ≥ 0).
    fn level(&self, edge: EdgeId) -> f64;
}

/// A view in which every edge flows freely.
pub struct FreeFlow;

impl CongestionView for FreeFlow {
    #[inline]
    fn level(&self, _edge: EdgeId) -> f64 {
        0.0
    }
}

impl CongestionView for [f64] {
    #[inline]
    fn level(&self, edge: EdgeId) -> f64 {
        self.get(edge.index()).copied().unwrap_or(0.0)
    }
}

impl CongestionView for Vec<f64> {
    #[inline]
    fn level(&self, edge: EdgeId) -> f64 {
        self.as_slice().level(edge)
    }
}

// ── PathConstraints ───────────────────────────────────────────────────────────

/// Per-request constraints on path search.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PathConstraints {
    /// Minimum accessibility rating the requester needs; `None` = no need.
    pub accessibility_need: Option<f32>,
    /// Prefer paths without congested edges, falling back only if necessary.
    pub avoid_congested:    bool,
}

// ── EdgeCostModel ─────────────────────────────────────────────────────────────

/// Pure, deterministic edge cost function.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeCostModel {
    pub congestion_weight:    f64,
    pub congested_surcharge:  f64,
    pub accessibility_weight: f64,
    pub congested_threshold:  f64,
}

impl EdgeCostModel {
    pub fn new(routing: &RoutingConfig, congested_threshold: f64) -> Self {
        Self {
            congestion_weight:    routing.congestion_weight,
            congested_surcharge:  routing.congested_surcharge,
            accessibility_weight: routing.accessibility_weight,
            congested_threshold,
        }
    }

    #[inline]
    pub fn congestion_penalty(&self, level: f64) -> f64 {
        let level = level.max(0.0);
        let mut p = self.congestion_weight * level;
        if level >= self.congested_threshold {
            p += self.congested_surcharge;
        }
        p
    }

    #[inline]
    pub fn inaccessibility_penalty(&self, rating: f32, need: Option<f32>) -> f64 {
        match need {
            None => 0.0,
            Some(need) => self.accessibility_weight * (need - rating).max(0.0) as f64,
        }
    }

    #[inline]
    pub fn is_congested(&self, level: f64) -> bool {
        level >= self.congested_threshold
    }

    /// Cost of traversing `edge`, or `None` if it is impassable.
    #[inline]
    pub fn edge_cost(
        &self,
        network:     &RoadNetwork,
        edge:        EdgeId,
        level:       f64,
        constraints: &PathConstraints,
        strict:      bool,
    ) -> Option<f64> {
        if network.is_closed(edge) || (strict && self.is_congested(level)) {
            return None;
        }
        let i = edge.index();
        let length = network.edge_length_m[i] as f64;
        Some(
            length
                * (1.0 + self.congestion_penalty(level))
                * (1.0 + self.inaccessibility_penalty(
                    network.edge_accessibility[i],
                    constraints.accessibility_need,
                )),
        )
    }
}

impl Default for EdgeCostModel {
    fn default() -> Self {
        Self::new(&RoutingConfig::default(), 0.8)
    }
}
