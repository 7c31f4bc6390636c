//! Concurrent per-zone evacuation counters.

use std::collections::VecDeque;

use dashmap::DashMap;

use ef_core::{Timestamp, ZoneId};

/// Counts for one zone at one instant.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ZoneCounts {
    /// People registered as needing evacuation from the zone.
    pub population: u64,
    pub assigned:   u64,
    pub arrived:    u64,
}

impl ZoneCounts {
    /// Registered people without an assignment yet.
    pub fn unassigned(&self) -> u64 {
        self.population.saturating_sub(self.assigned)
    }

    /// Assigned people who have not checked in at their destination.
    pub fn in_flight(&self) -> u64 {
        self.assigned.saturating_sub(self.arrived)
    }

    pub fn remaining(&self) -> u64 {
        self.unassigned() + self.in_flight()
    }
}

#[derive(Default)]
struct ZoneState {
    counts:   ZoneCounts,
    /// `(secs, n)` arrival batches inside the trailing window.
    arrivals: VecDeque<(u64, u64)>,
}

impl ZoneState {
    fn prune(&mut self, now: Timestamp, window_secs: u64) {
        while let Some(&(t, _)) = self.arrivals.front() {
            if now.since(Timestamp(t)) < window_secs {
                break;
            }
            self.arrivals.pop_front();
        }
    }
}

/// Per-zone population, assignment and arrival counters.
///
/// Written from telemetry and assignment paths on any thread; each zone is
/// locked independently by the map shard that holds it.
pub struct ZoneTracker {
    zones:       DashMap<ZoneId, ZoneState>,
    window_secs: u64,
}

impl ZoneTracker {
    /// `window_secs` is the trailing window used for arrival throughput.
    pub fn new(window_secs: u64) -> Self {
        Self { zones: DashMap::new(), window_secs: window_secs.max(1) }
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    /// Set the number of people needing evacuation from `zone`.
    pub fn set_population(&self, zone: ZoneId, population: u64) {
        self.zones.entry(zone).or_default().counts.population = population;
    }

    pub fn record_assigned(&self, zone: ZoneId, n: u64) {
        self.zones.entry(zone).or_default().counts.assigned += n;
    }

    pub fn record_arrival(&self, zone: ZoneId, n: u64, now: Timestamp) {
        let window = self.window_secs;
        let mut z = self.zones.entry(zone).or_default();
        z.counts.arrived += n;
        z.arrivals.push_back((now.0, n));
        z.prune(now, window);
    }

    /// Current counts; all zero for a zone never seen.
    pub fn counts(&self, zone: ZoneId) -> ZoneCounts {
        self.zones.get(&zone).map(|z| z.counts).unwrap_or_default()
    }

    /// Arrivals per second over the trailing window.
    ///
    /// Early in the event the window is shortened to the elapsed time so a
    /// fresh burst of arrivals is not diluted by seconds that never happened.
    pub fn throughput(&self, zone: ZoneId, now: Timestamp) -> f64 {
        let Some(z) = self.zones.get(&zone) else { return 0.0 };
        let window = self.window_secs.min(now.0).max(1);
        let n: u64 = z
            .arrivals
            .iter()
            .filter(|&&(t, _)| t <= now.0 && now.since(Timestamp(t)) < window)
            .map(|&(_, n)| n)
            .sum();
        n as f64 / window as f64
    }

    /// Every zone with any recorded activity, ascending.
    pub fn zones(&self) -> Vec<ZoneId> {
        let mut v: Vec<ZoneId> = self.zones.iter().map(|e| *e.key()).collect();
        v.sort_unstable();
        v
    }

    pub fn clear(&self) {
        self.zones.clear();
    }
}
