//! Assignment records produced by the solver.

use std::sync::atomic::{AtomicU64, Ordering};

use ef_core::{AssignmentId, DestinationId, Epoch, PathId, PriorityTier, RequesterId, Timestamp, ZoneId};
use ef_spatial::Path;

use crate::request::EvacRequest;

// ── Status ────────────────────────────────────────────────────────────────────

/// Lifecycle of an assignment.
///
/// ```text
/// Assigned ──check-in──▶ InTransit ──check-in──▶ Arrived
///     │                      │
///     └──────trigger─────────┴──▶ Rerouted ──commit──▶ Assigned
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AssignmentStatus {
    Assigned,
    InTransit,
    Arrived,
    Rerouted,
}

impl AssignmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentStatus::Assigned  => "assigned",
            AssignmentStatus::InTransit => "in_transit",
            AssignmentStatus::Arrived   => "arrived",
            AssignmentStatus::Rerouted  => "rerouted",
        }
    }

    /// Still movable by the rerouting controller.
    pub fn is_open(self) -> bool {
        self != AssignmentStatus::Arrived
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Flags ─────────────────────────────────────────────────────────────────────

/// How an assignment was reached.  Degraded assignments are reported to the
/// coordination layer.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AssignmentFlags {
    /// Candidates were only found after widening the search radius.
    pub widened_radius: bool,
    /// Nearest destination satisfying hard constraints, ignoring load
    /// balance and radius.
    pub nearest_fit:    bool,
    /// Every fitting destination was full or filling; placed at one anyway.
    pub soft_excluded:  bool,
    /// No open road path; a straight line was substituted.
    pub straight_line:  bool,
    /// Solved on the fast path after the internal deadline.
    pub deadline:       bool,
    /// The chosen path crosses an edge at or above the congested threshold.
    pub congested_path: bool,
    /// Needs a human dispatcher to confirm.
    pub needs_manual:   bool,
}

impl AssignmentFlags {
    pub fn is_degraded(&self) -> bool {
        self.nearest_fit || self.soft_excluded || self.straight_line || self.deadline
    }

    /// Compact `a|b|c` rendering of the set flags, for logs and CSV.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        for (on, name) in [
            (self.widened_radius, "widened_radius"),
            (self.nearest_fit, "nearest_fit"),
            (self.soft_excluded, "soft_excluded"),
            (self.straight_line, "straight_line"),
            (self.deadline, "deadline"),
            (self.congested_path, "congested_path"),
            (self.needs_manual, "needs_manual"),
        ] {
            if on {
                parts.push(name);
            }
        }
        parts.join("|")
    }
}

// ── Assignment ────────────────────────────────────────────────────────────────

/// One requester's current destination and path.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Assignment {
    pub id:                AssignmentId,
    /// The request as last submitted (location updated by telemetry).
    pub request:           EvacRequest,
    pub destination:       DestinationId,
    pub path_id:           PathId,
    pub path:              Path,
    pub assigned_at:       Timestamp,
    pub epoch:             Epoch,
    pub status:            AssignmentStatus,
    pub flags:             AssignmentFlags,
    /// Tier after priority markers were applied.
    pub tier:              PriorityTier,
    pub zone:              ZoneId,
    /// Incremented on every reroute; the id stays the same.
    pub revision:          u32,
    /// One seat at `destination` is reserved for this requester.
    pub holds_reservation: bool,
}

impl Assignment {
    pub fn requester(&self) -> RequesterId {
        self.request.requester
    }

    pub fn is_degraded(&self) -> bool {
        self.flags.is_degraded()
    }
}

// ── Id allocation ─────────────────────────────────────────────────────────────

/// Monotonic source of assignment and path ids, shared by all solver threads.
#[derive(Debug, Default)]
pub struct IdSource {
    next_assignment: AtomicU64,
    next_path:       AtomicU64,
}

impl IdSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assignment(&self) -> AssignmentId {
        AssignmentId(self.next_assignment.fetch_add(1, Ordering::Relaxed))
    }

    pub fn path(&self) -> PathId {
        PathId(self.next_path.fetch_add(1, Ordering::Relaxed))
    }
}
