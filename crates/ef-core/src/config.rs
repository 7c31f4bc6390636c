//! Engine configuration.
//!
//! Every tunable of the engine lives in one plain struct tree with documented
//! defaults.  Applications typically load it from JSON (with the `serde`
//! feature) and pass it to the engine builder, which calls
//! [`EngineConfig::validate`] before anything is constructed.
//!
//! Scoring weights are treated as externally supplied configuration: they may
//! be retuned between events from historical completion data, never derived
//! inside the engine.

use crate::{CoreError, CoreResult, ZoneGrid};
use crate::time::{HOUR, MINUTE};

// ── Scoring ───────────────────────────────────────────────────────────────────

/// Weights of the multi-factor destination score.  Lower score is better.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ScoringWeights {
    /// Weight of path distance normalised by the longest candidate path.
    pub distance:       f64,
    /// Weight of the length-weighted mean congestion level along the path.
    pub congestion:     f64,
    /// Weight of `max(0, count / running_mean − 1)` for the destination.
    pub load_imbalance: f64,
    /// Weight of the accessibility shortfall along the path.
    pub accessibility:  f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            distance:       1.0,
            congestion:     0.5,
            load_imbalance: 2.0,
            accessibility:  0.5,
        }
    }
}

// ── Routing ───────────────────────────────────────────────────────────────────

/// Edge cost model parameters for path search.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RoutingConfig {
    /// `congestionPenalty(level) = congestion_weight × level (+ surcharge)`.
    pub congestion_weight:   f64,
    /// Extra penalty added once an edge is at or above the congested threshold.
    pub congested_surcharge: f64,
    /// `inaccessibilityPenalty = accessibility_weight × max(0, need − rating)`.
    pub accessibility_weight: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            congestion_weight:    1.0,
            congested_surcharge:  4.0,
            accessibility_weight: 2.0,
        }
    }
}

// ── Solver ────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SolverConfig {
    /// Initial candidate search radius around the requester, metres.
    pub search_radius_m:           f32,
    /// Multiplier applied once when no candidate satisfies hard constraints.
    pub radius_widen_factor:       f32,
    /// Nearest candidates considered per unit (after hard-constraint filtering).
    pub max_candidates:            usize,
    /// Internal latency budget per request batch, milliseconds.
    pub deadline_ms:               u64,
    /// Local retries after a reservation loses a concurrent race.
    pub max_local_retries:         u32,
    /// Medical-tier requesters implicitly require the `medical` feature.
    pub medical_requires_facility: bool,
    /// Destinations above this multiple of the running mean are demoted ...
    pub balance_high_ratio:        f64,
    /// ... while any eligible candidate sits below this multiple.
    pub balance_low_ratio:         f64,
    /// Prefer paths that avoid edges at or above the congested threshold.
    pub avoid_congested:           bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            search_radius_m:           5_000.0,
            radius_widen_factor:       2.0,
            max_candidates:            8,
            deadline_ms:               3_000,
            max_local_retries:         3,
            medical_requires_facility: true,
            balance_high_ratio:        1.5,
            balance_low_ratio:         0.5,
            avoid_congested:           true,
        }
    }
}

// ── Capacity ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CapacityConfig {
    /// Utilisation at which a capacity warning is emitted.
    pub warning_utilization: f64,
    /// Predicted fill within this many seconds soft-excludes a destination.
    pub fill_horizon_secs:   u64,
    /// Trailing window for the reservation-rate estimate, seconds.
    pub rate_window_secs:    u64,
    /// Bound on compare-and-swap retries before `StaleStateConflict`.
    pub max_cas_retries:     u32,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            warning_utilization: 0.9,
            fill_horizon_secs:   15 * MINUTE,
            rate_window_secs:    5 * MINUTE,
            max_cas_retries:     64,
        }
    }
}

// ── Congestion ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CongestionConfig {
    /// EWMA smoothing factor in `(0, 1]`; 1 means "latest sample only".
    pub ewma_alpha:          f64,
    /// Level at which an edge is congested and a reroute candidate.
    pub congested_threshold: f64,
    /// Samples kept per edge for the trend slope.
    pub trend_samples:       usize,
    /// |slope| (level per second) below which the trend is `Stable`.
    pub trend_dead_band:     f64,
    /// Contribution of planned assignment load to the effective level:
    /// `factor × planned / expected_per_hour`.
    pub planned_load_factor: f64,
}

impl Default for CongestionConfig {
    fn default() -> Self {
        Self {
            ewma_alpha:          0.3,
            congested_threshold: 0.8,
            trend_samples:       8,
            trend_dead_band:     1e-5,
            planned_load_factor: 1.0,
        }
    }
}

// ── Rerouting ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RerouteConfig {
    /// Interval of the `Scheduled` trigger, seconds.
    pub scheduled_interval_secs: u64,
    /// Upper bound on triggers processed per controller cycle.
    pub max_triggers_per_cycle:  usize,
}

impl Default for RerouteConfig {
    fn default() -> Self {
        Self {
            scheduled_interval_secs: 2 * MINUTE,
            max_triggers_per_cycle:  256,
        }
    }
}

// ── Predictor ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PredictorConfig {
    /// Zones projected to finish later than this are `high_risk`.
    pub zone_high_risk_secs:    u64,
    /// Trailing window for zone throughput (arrivals per second).
    pub zone_rate_window_secs:  u64,
    /// Horizon for `predict_fill_risks`.
    pub fill_risk_horizon_secs: u64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            zone_high_risk_secs:    4 * HOUR,
            zone_rate_window_secs:  15 * MINUTE,
            fill_risk_horizon_secs: HOUR,
        }
    }
}

// ── EngineConfig ──────────────────────────────────────────────────────────────

/// Top-level engine configuration.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfig {
    pub scoring:    ScoringWeights,
    pub routing:    RoutingConfig,
    pub solver:     SolverConfig,
    pub capacity:   CapacityConfig,
    pub congestion: CongestionConfig,
    pub reroute:    RerouteConfig,
    pub predictor:  PredictorConfig,
    /// Zone partition used when a request carries no explicit zone.
    pub zone_grid:  ZoneGrid,
}

impl EngineConfig {
    /// Reject values that would make the engine misbehave silently.
    pub fn validate(&self) -> CoreResult<()> {
        let s = &self.scoring;
        for (name, w) in [
            ("scoring.distance", s.distance),
            ("scoring.congestion", s.congestion),
            ("scoring.load_imbalance", s.load_imbalance),
            ("scoring.accessibility", s.accessibility),
            ("routing.congestion_weight", self.routing.congestion_weight),
            ("routing.congested_surcharge", self.routing.congested_surcharge),
            ("routing.accessibility_weight", self.routing.accessibility_weight),
        ] {
            if !(w.is_finite() && w >= 0.0) {
                return Err(CoreError::Config(format!("{name} must be finite and >= 0, got {w}")));
            }
        }

        let a = self.congestion.ewma_alpha;
        if !(a > 0.0 && a <= 1.0) {
            return Err(CoreError::Config(format!("congestion.ewma_alpha must be in (0, 1], got {a}")));
        }
        if self.congestion.congested_threshold <= 0.0 {
            return Err(CoreError::Config("congestion.congested_threshold must be > 0".into()));
        }
        if self.congestion.trend_samples < 2 {
            return Err(CoreError::Config("congestion.trend_samples must be >= 2".into()));
        }
        if self.solver.search_radius_m <= 0.0 || self.solver.radius_widen_factor < 1.0 {
            return Err(CoreError::Config(
                "solver.search_radius_m must be > 0 and radius_widen_factor >= 1".into(),
            ));
        }
        if self.solver.max_candidates == 0 {
            return Err(CoreError::Config("solver.max_candidates must be >= 1".into()));
        }
        if self.solver.balance_low_ratio >= self.solver.balance_high_ratio {
            return Err(CoreError::Config(
                "solver.balance_low_ratio must be below balance_high_ratio".into(),
            ));
        }
        let w = self.capacity.warning_utilization;
        if !(w > 0.0 && w <= 1.0) {
            return Err(CoreError::Config(format!("capacity.warning_utilization must be in (0, 1], got {w}")));
        }
        if self.capacity.rate_window_secs == 0 || self.predictor.zone_rate_window_secs == 0 {
            return Err(CoreError::Config("rate windows must be > 0 seconds".into()));
        }
        if self.capacity.max_cas_retries == 0 {
            return Err(CoreError::Config("capacity.max_cas_retries must be >= 1".into()));
        }
        if self.zone_grid.cell_deg <= 0.0 {
            return Err(CoreError::Config("zone_grid.cell_deg must be > 0".into()));
        }
        Ok(())
    }
}
