//! The capacity registry: per-destination occupancy under concurrent writers.
//!
//! # Concurrency
//!
//! Every destination owns its own slot of atomics.  Occupancy changes are a
//! load → compute → `compare_exchange` loop bounded by
//! `CapacityConfig::max_cas_retries`; exhausting the bound surfaces
//! [`CapacityError::StaleStateConflict`] instead of spinning.  The reservation
//! rate window is the only non-atomic state and sits behind a per-destination
//! `parking_lot::Mutex`, so writers to different destinations never contend.
//!
//! # Invariants
//!
//! - Reservations never push occupancy above `max_capacity`; they clamp
//!   (`reserve`) or fail (`reserve_exact`).
//! - Releases never push occupancy below zero.
//! - Lowering capacity below occupancy is allowed and reported as overflow;
//!   the rerouting controller moves the excess elsewhere.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use ef_core::{CapacityConfig, DestinationId, FeatureSet, GeoPoint, Timestamp};

use crate::destination::{
    CapacityEvent, DestinationInfo, DestinationSnapshot, DestinationStatus, RegistrySnapshot,
};
use crate::{CapacityError, CapacityResult};

// ── Write results ─────────────────────────────────────────────────────────────

/// Outcome of a reservation.
#[derive(Clone, Debug, PartialEq)]
pub struct Reservation {
    /// Seats actually reserved (≤ requested).
    pub reserved:  u32,
    /// Occupancy right after the write.
    pub occupancy: u32,
    /// Threshold crossings caused by this write.
    pub events:    Vec<CapacityEvent>,
}

/// Outcome of a capacity change.
#[derive(Clone, Debug, PartialEq)]
pub struct CapacityChange {
    pub previous: u32,
    /// Occupancy in excess of the new capacity.
    pub overflow: u32,
    pub events:   Vec<CapacityEvent>,
}

// ── Rate window ───────────────────────────────────────────────────────────────

/// Net reservations `(timestamp, delta)` over a trailing window.
#[derive(Default)]
struct RateWindow {
    samples: VecDeque<(u64, i64)>,
}

impl RateWindow {
    fn record(&mut self, now: Timestamp, delta: i64, window: u64) {
        self.samples.push_back((now.0, delta));
        self.prune(now, window);
    }

    fn prune(&mut self, now: Timestamp, window: u64) {
        while let Some(&(t, _)) = self.samples.front() {
            if t.saturating_add(window) <= now.0 {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Net reservations inside the window ending at `now`.
    fn net(&mut self, now: Timestamp, window: u64) -> i64 {
        self.prune(now, window);
        self.samples.iter().map(|&(_, d)| d).sum()
    }
}

// ── Slot ──────────────────────────────────────────────────────────────────────

struct Slot {
    info:      DestinationInfo,
    occupancy: AtomicU32,
    capacity:  AtomicU32,
    closed:    AtomicBool,
    version:   AtomicU64,
    /// Warning already emitted for the current crossing.
    warned:    AtomicBool,
    /// Exclusion already emitted for the current crossing.
    excluded:  AtomicBool,
    rate:      Mutex<RateWindow>,
}

// ── CapacityRegistry ──────────────────────────────────────────────────────────

/// Live occupancy and capacity of every destination.
///
/// All methods take `&self`; share the registry across threads by reference
/// or `Arc`.
pub struct CapacityRegistry {
    slots: Vec<Slot>,
    cfg:   CapacityConfig,
}

impl CapacityRegistry {
    pub fn config(&self) -> &CapacityConfig {
        &self.cfg
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn info(&self, dest: DestinationId) -> Option<&DestinationInfo> {
        self.slots.get(dest.index()).map(|s| &s.info)
    }

    /// Static descriptions of every destination, in id order.
    pub fn destinations(&self) -> impl Iterator<Item = &DestinationInfo> {
        self.slots.iter().map(|s| &s.info)
    }

    fn slot(&self, dest: DestinationId) -> CapacityResult<&Slot> {
        self.slots
            .get(dest.index())
            .ok_or(CapacityError::UnknownDestination(dest))
    }

    // ── Writes ────────────────────────────────────────────────────────────

    /// Reserve up to `n` seats, clamped at the remaining capacity.
    ///
    /// Returns how many were actually reserved (possibly 0 when full).
    pub fn reserve(&self, dest: DestinationId, n: u32, now: Timestamp) -> CapacityResult<Reservation> {
        let slot = self.slot(dest)?;
        if slot.closed.load(Ordering::Acquire) {
            return Err(CapacityError::Closed(dest));
        }
        let (old, new) = self.cas_occupancy(dest, slot, |occ, cap| {
            Ok(occ + n.min(cap.saturating_sub(occ)))
        })?;
        Ok(self.after_reserve(dest, slot, old, new, now))
    }

    /// Reserve exactly `n` seats or nothing.  Used for family units, which
    /// must never be split across destinations.
    pub fn reserve_exact(&self, dest: DestinationId, n: u32, now: Timestamp) -> CapacityResult<Reservation> {
        let slot = self.slot(dest)?;
        if slot.closed.load(Ordering::Acquire) {
            return Err(CapacityError::Closed(dest));
        }
        let (old, new) = self.cas_occupancy(dest, slot, |occ, cap| {
            let remaining = cap.saturating_sub(occ);
            if n > remaining {
                Err(CapacityError::InsufficientCapacity { dest, requested: n, remaining })
            } else {
                Ok(occ + n)
            }
        })?;
        Ok(self.after_reserve(dest, slot, old, new, now))
    }

    /// Count people who arrived without an assignment.  Accepted even when the
    /// destination is closed; still clamped at capacity.
    pub fn check_in_walk_in(&self, dest: DestinationId, n: u32, now: Timestamp) -> CapacityResult<Reservation> {
        let slot = self.slot(dest)?;
        let (old, new) = self.cas_occupancy(dest, slot, |occ, cap| {
            Ok(occ + n.min(cap.saturating_sub(occ)))
        })?;
        if new - old < n {
            info!(%dest, arrived = n, counted = new - old, "walk-ins exceed remaining capacity");
        }
        Ok(self.after_reserve(dest, slot, old, new, now))
    }

    /// Release up to `n` seats.  Returns the number released.
    pub fn release(&self, dest: DestinationId, n: u32, now: Timestamp) -> CapacityResult<u32> {
        let slot = self.slot(dest)?;
        let (old, new) = self.cas_occupancy(dest, slot, |occ, _| Ok(occ.saturating_sub(n)))?;
        let released = old - new;
        if released > 0 {
            slot.rate.lock().record(now, -(released as i64), self.cfg.rate_window_secs);
            self.rearm(slot, new, now);
        }
        Ok(released)
    }

    /// Open or close a destination.  Returns the event if the flag changed.
    pub fn set_closed(&self, dest: DestinationId, closed: bool) -> CapacityResult<Option<CapacityEvent>> {
        let slot = self.slot(dest)?;
        if slot.closed.swap(closed, Ordering::AcqRel) == closed {
            return Ok(None);
        }
        slot.version.fetch_add(1, Ordering::AcqRel);
        info!(%dest, name = %slot.info.name, closed, "destination closure changed");
        Ok(Some(if closed {
            CapacityEvent::Closed { dest }
        } else {
            CapacityEvent::Reopened { dest }
        }))
    }

    /// Change a destination's capacity.  Lowering it below occupancy leaves
    /// occupancy untouched and reports the overflow.
    pub fn set_capacity(&self, dest: DestinationId, max_capacity: u32, now: Timestamp) -> CapacityResult<CapacityChange> {
        let slot = self.slot(dest)?;
        let previous = slot.capacity.swap(max_capacity, Ordering::AcqRel);
        slot.version.fetch_add(1, Ordering::AcqRel);

        let occ = slot.occupancy.load(Ordering::Acquire);
        let overflow = occ.saturating_sub(max_capacity);
        let mut events = Vec::new();
        if overflow > 0 {
            warn!(%dest, previous, max_capacity, overflow, "capacity lowered below occupancy");
            events.push(CapacityEvent::Overflow { dest, overflow });
        } else {
            debug!(%dest, previous, max_capacity, "capacity changed");
        }
        if max_capacity >= previous {
            self.rearm(slot, occ, now);
        }
        self.cross_thresholds(dest, slot, occ, now, &mut events);
        Ok(CapacityChange { previous, overflow, events })
    }

    // ── Reads ─────────────────────────────────────────────────────────────

    pub fn occupancy(&self, dest: DestinationId) -> CapacityResult<u32> {
        Ok(self.slot(dest)?.occupancy.load(Ordering::Acquire))
    }

    pub fn max_capacity(&self, dest: DestinationId) -> CapacityResult<u32> {
        Ok(self.slot(dest)?.capacity.load(Ordering::Acquire))
    }

    pub fn is_closed(&self, dest: DestinationId) -> CapacityResult<bool> {
        Ok(self.slot(dest)?.closed.load(Ordering::Acquire))
    }

    /// Seconds until the destination fills at the trailing reservation rate.
    ///
    /// `Some(0)` when already full; `None` when the net rate is not positive.
    pub fn predict_fill_time(&self, dest: DestinationId, now: Timestamp) -> CapacityResult<Option<u64>> {
        let slot = self.slot(dest)?;
        let occ = slot.occupancy.load(Ordering::Acquire);
        let cap = slot.capacity.load(Ordering::Acquire);
        Ok(self.fill_secs(slot, occ, cap, now))
    }

    pub fn status(&self, dest: DestinationId, now: Timestamp) -> CapacityResult<DestinationStatus> {
        Ok(self.snapshot_of(dest, now)?.status)
    }

    /// Point-in-time copy of one destination.
    pub fn snapshot_of(&self, dest: DestinationId, now: Timestamp) -> CapacityResult<DestinationSnapshot> {
        Ok(self.read_slot(self.slot(dest)?, now))
    }

    /// Point-in-time copy of every destination.
    ///
    /// Each destination is read consistently; different destinations may be
    /// read a few nanoseconds apart, which the solver tolerates by reserving
    /// against the live registry.
    pub fn snapshot(&self, now: Timestamp) -> RegistrySnapshot {
        RegistrySnapshot {
            taken_at:     now,
            destinations: self.slots.iter().map(|s| self.read_slot(s, now)).collect(),
        }
    }

    /// Sum of occupancy over all destinations.
    pub fn total_occupancy(&self) -> u64 {
        self.slots
            .iter()
            .map(|s| s.occupancy.load(Ordering::Acquire) as u64)
            .sum()
    }

    // ── Internals ─────────────────────────────────────────────────────────

    fn cas_occupancy(
        &self,
        dest: DestinationId,
        slot: &Slot,
        f:    impl Fn(u32, u32) -> CapacityResult<u32>,
    ) -> CapacityResult<(u32, u32)> {
        let attempts = self.cfg.max_cas_retries.max(1);
        for _ in 0..attempts {
            let cur = slot.occupancy.load(Ordering::Acquire);
            let cap = slot.capacity.load(Ordering::Acquire);
            let next = f(cur, cap)?;
            if next == cur {
                return Ok((cur, cur));
            }
            if slot
                .occupancy
                .compare_exchange(cur, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                slot.version.fetch_add(1, Ordering::AcqRel);
                return Ok((cur, next));
            }
        }
        warn!(%dest, attempts, "occupancy update lost every compare-and-swap");
        Err(CapacityError::StaleStateConflict { dest, attempts })
    }

    fn after_reserve(&self, dest: DestinationId, slot: &Slot, old: u32, new: u32, now: Timestamp) -> Reservation {
        let mut events = Vec::new();
        if new > old {
            slot.rate.lock().record(now, (new - old) as i64, self.cfg.rate_window_secs);
            self.cross_thresholds(dest, slot, new, now, &mut events);
        }
        Reservation { reserved: new - old, occupancy: new, events }
    }

    /// Emit warning/exclusion events for thresholds crossed at occupancy `occ`.
    fn cross_thresholds(
        &self,
        dest:   DestinationId,
        slot:   &Slot,
        occ:    u32,
        now:    Timestamp,
        events: &mut Vec<CapacityEvent>,
    ) {
        let cap = slot.capacity.load(Ordering::Acquire);
        let utilization = if cap == 0 { 1.0 } else { occ as f64 / cap as f64 };
        if utilization >= self.cfg.warning_utilization && !slot.warned.swap(true, Ordering::AcqRel) {
            info!(%dest, utilization, "destination nearing capacity");
            events.push(CapacityEvent::Warning { dest, utilization });
        }
        let fill = self.fill_secs(slot, occ, cap, now);
        if self.is_saturated(occ, cap, fill) && !slot.excluded.swap(true, Ordering::AcqRel) {
            info!(%dest, occupancy = occ, max_capacity = cap, fill_secs = ?fill, "destination excluded from new assignments");
            events.push(CapacityEvent::Excluded { dest, occupancy: occ, predicted_fill_secs: fill });
        }
    }

    /// Re-arm threshold events after occupancy falls.
    fn rearm(&self, slot: &Slot, occ: u32, now: Timestamp) {
        let cap = slot.capacity.load(Ordering::Acquire);
        let utilization = if cap == 0 { 1.0 } else { occ as f64 / cap as f64 };
        if utilization < self.cfg.warning_utilization {
            slot.warned.store(false, Ordering::Release);
        }
        if !self.is_saturated(occ, cap, self.fill_secs(slot, occ, cap, now)) {
            slot.excluded.store(false, Ordering::Release);
        }
    }

    fn is_saturated(&self, occ: u32, cap: u32, fill: Option<u64>) -> bool {
        occ >= cap || fill.is_some_and(|s| s < self.cfg.fill_horizon_secs)
    }

    fn fill_secs(&self, slot: &Slot, occ: u32, cap: u32, now: Timestamp) -> Option<u64> {
        let remaining = cap.saturating_sub(occ);
        if remaining == 0 {
            return Some(0);
        }
        // remaining / (net / window), kept in integers.
        let window = self.cfg.rate_window_secs.max(1);
        let net = slot.rate.lock().net(now, window);
        if net <= 0 {
            return None;
        }
        Some((remaining as u64 * window).div_ceil(net as u64))
    }

    fn read_slot(&self, slot: &Slot, now: Timestamp) -> DestinationSnapshot {
        // Re-read while the version moves underneath us, up to the CAS bound.
        let read = || {
            let v0 = slot.version.load(Ordering::Acquire);
            let occ = slot.occupancy.load(Ordering::Acquire);
            let cap = slot.capacity.load(Ordering::Acquire);
            let closed = slot.closed.load(Ordering::Acquire);
            (slot.version.load(Ordering::Acquire) == v0, (v0, occ, cap, closed))
        };
        let (mut stable, mut fields) = read();
        for _ in 0..self.cfg.max_cas_retries {
            if stable {
                break;
            }
            (stable, fields) = read();
        }
        let (version, occupancy, max_capacity, closed) = fields;
        let predicted_fill_secs = self.fill_secs(slot, occupancy, max_capacity, now);
        let status = if closed {
            DestinationStatus::Closed
        } else if self.is_saturated(occupancy, max_capacity, predicted_fill_secs) {
            DestinationStatus::Full
        } else {
            DestinationStatus::Active
        };
        DestinationSnapshot {
            id: slot.info.id,
            location: slot.info.location,
            features: slot.info.features,
            occupancy,
            max_capacity,
            closed,
            predicted_fill_secs,
            status,
            version,
        }
    }
}

// ── CapacityRegistryBuilder ───────────────────────────────────────────────────

/// Register destinations, then call [`build`](Self::build).
///
/// `DestinationId`s are assigned sequentially from 0 in registration order.
#[derive(Default)]
pub struct CapacityRegistryBuilder {
    entries: Vec<(DestinationInfo, u32, u32)>,
}

impl CapacityRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_destination(
        &mut self,
        name:         impl Into<String>,
        location:     GeoPoint,
        max_capacity: u32,
        features:     FeatureSet,
    ) -> DestinationId {
        let id = DestinationId(self.entries.len() as u32);
        let info = DestinationInfo { id, name: name.into(), location, features };
        self.entries.push((info, max_capacity, 0));
        id
    }

    /// Pre-existing occupancy (people already sheltered).  Clamped at capacity.
    pub fn set_initial_occupancy(&mut self, id: DestinationId, occupancy: u32) {
        if let Some(e) = self.entries.get_mut(id.index()) {
            e.2 = occupancy.min(e.1);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(id, location)` pairs for registering sites with the road network.
    pub fn sites(&self) -> impl Iterator<Item = (DestinationId, GeoPoint)> + '_ {
        self.entries.iter().map(|(info, _, _)| (info.id, info.location))
    }

    pub fn build(self, cfg: CapacityConfig) -> CapacityRegistry {
        let slots = self
            .entries
            .into_iter()
            .map(|(info, cap, occ)| Slot {
                info,
                occupancy: AtomicU32::new(occ),
                capacity:  AtomicU32::new(cap),
                closed:    AtomicBool::new(false),
                version:   AtomicU64::new(0),
                warned:    AtomicBool::new(false),
                excluded:  AtomicBool::new(false),
                rate:      Mutex::new(RateWindow::default()),
            })
            .collect();
        CapacityRegistry { slots, cfg }
    }
}
