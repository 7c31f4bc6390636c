//! Destination descriptors, derived status, and point-in-time snapshots.

use ef_core::{DestinationId, FeatureSet, GeoPoint, Timestamp};

// ── Static description ────────────────────────────────────────────────────────

/// Immutable attributes of a destination (shelter, staging area, hospital).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DestinationInfo {
    pub id:       DestinationId,
    pub name:     String,
    pub location: GeoPoint,
    pub features: FeatureSet,
}

// ── Status ────────────────────────────────────────────────────────────────────

/// Derived status of a destination.
///
/// Never stored: computed from one read of occupancy, capacity, the closure
/// flag, and the fill-time prediction, so it can never disagree with them.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DestinationStatus {
    Active,
    /// At capacity, or predicted to fill within the horizon.
    Full,
    /// Administratively closed.
    Closed,
}

impl DestinationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DestinationStatus::Active => "active",
            DestinationStatus::Full   => "full",
            DestinationStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for DestinationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Snapshot ──────────────────────────────────────────────────────────────────

/// Consistent copy of one destination's mutable state.
#[derive(Clone, Debug, PartialEq)]
pub struct DestinationSnapshot {
    pub id:                  DestinationId,
    pub location:            GeoPoint,
    pub features:            FeatureSet,
    pub occupancy:           u32,
    pub max_capacity:        u32,
    pub closed:              bool,
    /// Seconds until full at the trailing reservation rate.
    pub predicted_fill_secs: Option<u64>,
    pub status:              DestinationStatus,
    /// Per-destination write counter at the time of the read.
    pub version:             u64,
}

impl DestinationSnapshot {
    pub fn remaining(&self) -> u32 {
        self.max_capacity.saturating_sub(self.occupancy)
    }

    pub fn utilization(&self) -> f64 {
        if self.max_capacity == 0 {
            1.0
        } else {
            self.occupancy as f64 / self.max_capacity as f64
        }
    }

    /// Excluded from new assignments: closed, full, or filling imminently.
    pub fn is_excluded(&self) -> bool {
        self.status != DestinationStatus::Active
    }
}

/// Snapshot of the whole registry taken at one instant.
#[derive(Clone, Debug, Default)]
pub struct RegistrySnapshot {
    pub taken_at:     Timestamp,
    /// Indexed by `DestinationId`.
    pub destinations: Vec<DestinationSnapshot>,
}

impl RegistrySnapshot {
    pub fn get(&self, id: DestinationId) -> Option<&DestinationSnapshot> {
        self.destinations.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &DestinationSnapshot> {
        self.destinations.iter()
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Number of destinations currently accepting assignments.
    pub fn active_count(&self) -> usize {
        self.destinations.iter().filter(|d| !d.is_excluded()).count()
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

/// Threshold crossings reported by registry writes.
///
/// Each event fires once per crossing; dropping back below the threshold
/// re-arms it.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CapacityEvent {
    /// Utilisation reached the warning level (default 90 %).
    Warning { dest: DestinationId, utilization: f64 },
    /// Reached capacity, or predicted to fill within the horizon.
    Excluded { dest: DestinationId, occupancy: u32, predicted_fill_secs: Option<u64> },
    /// Capacity was lowered below current occupancy.
    Overflow { dest: DestinationId, overflow: u32 },
    Closed { dest: DestinationId },
    Reopened { dest: DestinationId },
}

impl CapacityEvent {
    pub fn destination(&self) -> DestinationId {
        match *self {
            CapacityEvent::Warning { dest, .. }
            | CapacityEvent::Excluded { dest, .. }
            | CapacityEvent::Overflow { dest, .. }
            | CapacityEvent::Closed { dest }
            | CapacityEvent::Reopened { dest } => dest,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CapacityEvent::Warning { .. }  => "warning",
            CapacityEvent::Excluded { .. } => "excluded",
            CapacityEvent::Overflow { .. } => "overflow",
            CapacityEvent::Closed { .. }   => "closed",
            CapacityEvent::Reopened { .. } => "reopened",
        }
    }
}
