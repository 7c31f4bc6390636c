//! Engine time model.
//!
//! # Design
//!
//! Time is a monotonically increasing [`Timestamp`] counting whole seconds
//! since the start of the evacuation event.  Every time-dependent operation
//! takes `now` explicitly instead of reading a wall clock, so replays and
//! tests are exact and deterministic.
//!
//! [`Epoch`] is a separate counter: it versions recomputation cycles and is
//! unrelated to elapsed time.

use std::fmt;

/// Seconds per minute, for readable constant definitions.
pub const MINUTE: u64 = 60;
/// Seconds per hour.
pub const HOUR: u64 = 3_600;

// ── Timestamp ─────────────────────────────────────────────────────────────────

/// Seconds since the evacuation event started.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    /// Return the timestamp `secs` seconds after `self`.
    #[inline]
    pub fn offset(self, secs: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(secs))
    }

    /// Seconds elapsed from `earlier` to `self`; zero if `earlier` is later.
    #[inline]
    pub fn since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64
    }
}

impl std::ops::Add<u64> for Timestamp {
    type Output = Timestamp;
    #[inline]
    fn add(self, rhs: u64) -> Timestamp {
        self.offset(rhs)
    }
}

impl std::ops::Sub for Timestamp {
    type Output = u64;
    #[inline]
    fn sub(self, rhs: Timestamp) -> u64 {
        self.since(rhs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = self.0 / HOUR;
        let m = (self.0 % HOUR) / MINUTE;
        let s = self.0 % MINUTE;
        write!(f, "t+{h:02}:{m:02}:{s:02}")
    }
}

// ── Epoch ─────────────────────────────────────────────────────────────────────

/// Version counter for the whole assignment batch.
///
/// Each solve or recompute cycle runs in one epoch.  Load-balancing counts are
/// merged and stale recompute results detected at epoch boundaries.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Epoch(pub u64);

impl Epoch {
    pub const ZERO: Epoch = Epoch(0);

    #[inline]
    pub fn next(self) -> Epoch {
        Epoch(self.0 + 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}
