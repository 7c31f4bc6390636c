//! Short-horizon forecasts over live engine state.
//!
//! # Bottlenecks
//!
//! An edge below the congested threshold is projected along the least-squares
//! slope of its recent level samples:
//!
//! ```text
//! projected = level + slope × window
//! eta       = (threshold − level) / slope        (slope > 0)
//! ```
//!
//! A risk is reported when `eta ≤ window`.  Edges already at or above the
//! threshold are breaches, handled by the rerouting controller, and closed
//! edges carry no traffic; neither is predicted.
//!
//! # Zone completion
//!
//! ```text
//! completion = (unassigned + in_flight) / throughput
//! ```
//!
//! where throughput is arrivals per second over the tracker's trailing
//! window.  A zone with people remaining and no throughput has no finite
//! estimate and is always high risk.

use tracing::debug;

use ef_capacity::CapacityRegistry;
use ef_congestion::CongestionEstimator;
use ef_core::{DestinationId, EdgeId, PredictorConfig, Timestamp, ZoneId};
use ef_spatial::RoadNetwork;

use crate::zones::{ZoneCounts, ZoneTracker};

// ── Results ───────────────────────────────────────────────────────────────────

/// An edge projected to reach the congested threshold within the window.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BottleneckRisk {
    pub edge:            EdgeId,
    pub current_level:   f64,
    /// Level at the end of the window if the trend holds.
    pub projected_level: f64,
    /// Seconds until the threshold is crossed.
    pub eta_secs:        u64,
    pub crossing_at:     Timestamp,
    /// Assignees whose path currently crosses the edge.
    pub planned_load:    u32,
}

/// A destination predicted to fill within the fill-risk horizon.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FillRisk {
    pub dest:         DestinationId,
    pub occupancy:    u32,
    pub max_capacity: u32,
    pub fill_secs:    u64,
    pub fills_at:     Timestamp,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ZoneCompletion {
    pub zone:            ZoneId,
    pub counts:          ZoneCounts,
    /// Arrivals per second.
    pub throughput:      f64,
    /// `None` when people remain and nobody is arriving.
    pub completion_secs: Option<u64>,
    pub high_risk:       bool,
}

// ── Predictor ─────────────────────────────────────────────────────────────────

pub struct Predictor {
    cfg:                 PredictorConfig,
    congested_threshold: f64,
    zones:               ZoneTracker,
}

impl Predictor {
    pub fn new(cfg: PredictorConfig, congested_threshold: f64) -> Self {
        let zones = ZoneTracker::new(cfg.zone_rate_window_secs);
        Self { cfg, congested_threshold, zones }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.cfg
    }

    /// Zone counters, fed by the engine on assignment and check-in.
    pub fn zones(&self) -> &ZoneTracker {
        &self.zones
    }

    /// Edges projected to cross the congested threshold within
    /// `window_secs`, ordered by eta then edge id.
    pub fn predict_bottlenecks(
        &self,
        network:     &RoadNetwork,
        congestion:  &CongestionEstimator,
        window_secs: u64,
        now:         Timestamp,
    ) -> Vec<BottleneckRisk> {
        let threshold = self.congested_threshold;
        let window = window_secs as f64;
        let mut risks: Vec<BottleneckRisk> = (0..network.edge_count())
            .map(|i| EdgeId(i as u32))
            .filter(|&e| !network.is_closed(e))
            .filter_map(|edge| {
                let level = congestion.level(edge);
                if level >= threshold {
                    return None;
                }
                let slope = congestion.slope(edge);
                if slope <= 0.0 {
                    return None;
                }
                let eta = (threshold - level) / slope;
                if eta > window {
                    return None;
                }
                let eta_secs = eta.ceil() as u64;
                Some(BottleneckRisk {
                    edge,
                    current_level: level,
                    projected_level: level + slope * window,
                    eta_secs,
                    crossing_at: now.offset(eta_secs),
                    planned_load: congestion.planned(edge),
                })
            })
            .collect();
        risks.sort_by_key(|r| (r.eta_secs, r.edge));
        if !risks.is_empty() {
            debug!(count = risks.len(), window_secs, "bottlenecks predicted");
        }
        risks
    }

    /// Open destinations with room left that are predicted to fill within
    /// the horizon, soonest first.
    pub fn predict_fill_risks(&self, registry: &CapacityRegistry, now: Timestamp) -> Vec<FillRisk> {
        let horizon = self.cfg.fill_risk_horizon_secs;
        let mut risks: Vec<FillRisk> = registry
            .snapshot(now)
            .destinations
            .into_iter()
            .filter(|d| !d.closed && d.remaining() > 0)
            .filter_map(|d| {
                let fill_secs = d.predicted_fill_secs.filter(|&s| s <= horizon)?;
                Some(FillRisk {
                    dest:         d.id,
                    occupancy:    d.occupancy,
                    max_capacity: d.max_capacity,
                    fill_secs,
                    fills_at:     now.offset(fill_secs),
                })
            })
            .collect();
        risks.sort_by_key(|r| (r.fill_secs, r.dest));
        risks
    }

    pub fn predict_zone_completion(&self, zone: ZoneId, now: Timestamp) -> ZoneCompletion {
        let counts = self.zones.counts(zone);
        let throughput = self.zones.throughput(zone, now);
        let remaining = counts.remaining();

        let completion_secs = if remaining == 0 {
            Some(0)
        } else if throughput > 0.0 {
            Some((remaining as f64 / throughput).ceil() as u64)
        } else {
            None
        };
        let high_risk = match completion_secs {
            Some(s) => s > self.cfg.zone_high_risk_secs,
            None    => true,
        };
        ZoneCompletion { zone, counts, throughput, completion_secs, high_risk }
    }

    /// Completion estimates for every tracked zone, ascending by zone.
    pub fn zone_completions(&self, now: Timestamp) -> Vec<ZoneCompletion> {
        self.zones
            .zones()
            .into_iter()
            .map(|z| self.predict_zone_completion(z, now))
            .collect()
    }
}
