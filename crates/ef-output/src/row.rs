//! Plain data rows written by output backends, and their conversions from
//! engine records.

use ef_capacity::CapacityEvent;
use ef_core::{EdgeId, Timestamp};
use ef_engine::EngineWarning;
use ef_reroute::AssignmentUpdate;
use ef_solver::Assignment;
use ef_spatial::EdgeStatus;

// ── Assignments ───────────────────────────────────────────────────────────────

/// One new assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentRow {
    pub at:          u64,
    pub requester:   u32,
    pub assignment:  u64,
    pub destination: u32,
    pub path:        u64,
    pub length_m:    f32,
    pub tier:        &'static str,
    pub zone:        u32,
    pub revision:    u32,
    /// `AssignmentFlags::describe`; empty for a clean assignment.
    pub flags:       String,
}

impl From<&Assignment> for AssignmentRow {
    fn from(a: &Assignment) -> Self {
        Self {
            at:          a.assigned_at.0,
            requester:   a.requester().0,
            assignment:  a.id.0,
            destination: a.destination.0,
            path:        a.path_id.0,
            length_m:    a.path.length_m,
            tier:        a.tier.as_str(),
            zone:        a.zone.0,
            revision:    a.revision,
            flags:       a.flags.describe(),
        }
    }
}

/// One committed reroute.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRow {
    pub at:                   u64,
    pub requester:            u32,
    pub assignment:           u64,
    pub previous_destination: u32,
    pub destination:          u32,
    pub revision:             u32,
    pub trigger_version:      u64,
    pub cause:                &'static str,
    pub flags:                String,
}

impl UpdateRow {
    pub fn new(u: &AssignmentUpdate, now: Timestamp) -> Self {
        Self {
            at:                   now.0,
            requester:            u.requester.0,
            assignment:           u.assignment.0,
            previous_destination: u.previous_destination.0,
            destination:          u.destination.0,
            revision:             u.revision,
            trigger_version:      u.trigger_version,
            cause:                u.cause,
            flags:                u.flags.describe(),
        }
    }
}

// ── Status events ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeStatusRow {
    pub at:     u64,
    pub edge:   u32,
    pub status: &'static str,
}

impl EdgeStatusRow {
    pub fn new(edge: EdgeId, status: EdgeStatus, now: Timestamp) -> Self {
        Self { at: now.0, edge: edge.0, status: status.label() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DestinationEventRow {
    pub at:          u64,
    pub destination: u32,
    pub kind:        &'static str,
    /// Event-specific figures, `key=value` separated by `;`.
    pub detail:      String,
}

impl DestinationEventRow {
    pub fn new(event: &CapacityEvent, now: Timestamp) -> Self {
        let detail = match event {
            CapacityEvent::Warning { utilization, .. } => format!("utilization={utilization:.3}"),
            CapacityEvent::Excluded { occupancy, predicted_fill_secs, .. } => match predicted_fill_secs {
                Some(s) => format!("occupancy={occupancy};fill_secs={s}"),
                None => format!("occupancy={occupancy}"),
            },
            CapacityEvent::Overflow { overflow, .. } => format!("overflow={overflow}"),
            CapacityEvent::Closed { .. } | CapacityEvent::Reopened { .. } => String::new(),
        };
        Self { at: now.0, destination: event.destination().0, kind: event.kind(), detail }
    }
}

/// Warnings and degraded assignments, the rows a dispatcher has to look at.
#[derive(Debug, Clone, PartialEq)]
pub struct WarningRow {
    pub at:         u64,
    pub kind:       &'static str,
    /// Requester ids, `|`-separated.
    pub requesters: String,
    pub detail:     String,
}

impl From<&EngineWarning> for WarningRow {
    fn from(w: &EngineWarning) -> Self {
        match w {
            EngineWarning::Unplaced { requesters, reason, at } => Self {
                at:         at.0,
                kind:       "unplaced",
                requesters: join_ids(requesters.iter().map(|r| r.0)),
                detail:     reason.clone(),
            },
            EngineWarning::RerunScheduled { epoch, requesters, at } => Self {
                at:         at.0,
                kind:       "rerun_scheduled",
                requesters: String::new(),
                detail:     format!("epoch={};count={requesters}", epoch.0),
            },
        }
    }
}

impl WarningRow {
    pub fn degraded(a: &Assignment) -> Self {
        Self {
            at:         a.assigned_at.0,
            kind:       "degraded",
            requesters: a.requester().0.to_string(),
            detail:     a.flags.describe(),
        }
    }
}

fn join_ids(ids: impl Iterator<Item = u32>) -> String {
    ids.map(|id| id.to_string()).collect::<Vec<_>>().join("|")
}
