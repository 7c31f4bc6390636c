//! Recompute triggers and the version-stamped sender shared with telemetry.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::Sender;

use ef_core::{DestinationId, EdgeId, Epoch, RequesterId, Timestamp};

use crate::{RerouteError, RerouteResult};

// ── Resources ─────────────────────────────────────────────────────────────────

/// A closable resource.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResourceRef {
    Edge(EdgeId),
    Destination(DestinationId),
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRef::Edge(e)        => write!(f, "{e}"),
            ResourceRef::Destination(d) => write!(f, "{d}"),
        }
    }
}

/// A manual closure reported by the coordination layer.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResourceClosure {
    pub resource: ResourceRef,
    pub reason:   String,
}

// ── Triggers ──────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TriggerKind {
    /// Periodic scan of every current breach.
    Scheduled,
    /// An edge's measured level rose to the congested threshold.
    CongestionBreach { edge: EdgeId },
    /// A destination is full, predicted to fill within the horizon, or had
    /// its capacity lowered below occupancy.
    CapacityBreach { dest: DestinationId },
    ManualClosure { resource: ResourceRef, reason: String },
    /// Requesters placed on the solver's deadline fast path.
    Rerun { epoch: Epoch, requesters: Vec<RequesterId> },
    /// Requesters left without a seat by a discarded recompute.
    Resume { requesters: Vec<RequesterId> },
    /// A requester asked for a different destination.
    Alternative { requester: RequesterId, reason: String },
}

impl TriggerKind {
    pub fn name(&self) -> &'static str {
        match self {
            TriggerKind::Scheduled              => "scheduled",
            TriggerKind::CongestionBreach { .. } => "congestion_breach",
            TriggerKind::CapacityBreach { .. }   => "capacity_breach",
            TriggerKind::ManualClosure { .. }    => "manual_closure",
            TriggerKind::Rerun { .. }            => "rerun",
            TriggerKind::Resume { .. }           => "resume",
            TriggerKind::Alternative { .. }      => "alternative",
        }
    }

    /// The subset of assignments this trigger recomputes.  Triggers with
    /// equal keys coalesce, and the newer version wins.
    pub fn subset_key(&self) -> SubsetKey {
        match self {
            TriggerKind::Scheduled => SubsetKey::All,
            TriggerKind::CongestionBreach { edge } => SubsetKey::Edge(*edge),
            TriggerKind::CapacityBreach { dest } => SubsetKey::Destination(*dest),
            TriggerKind::ManualClosure { resource: ResourceRef::Edge(e), .. } => SubsetKey::Edge(*e),
            TriggerKind::ManualClosure { resource: ResourceRef::Destination(d), .. } => {
                SubsetKey::Destination(*d)
            }
            TriggerKind::Rerun { epoch, .. } => SubsetKey::Rerun(*epoch),
            TriggerKind::Resume { .. } => SubsetKey::Resume,
            TriggerKind::Alternative { requester, .. } => SubsetKey::Requester(*requester),
        }
    }
}

/// Identity of the subset a trigger recomputes.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum SubsetKey {
    All,
    Edge(EdgeId),
    Destination(DestinationId),
    Rerun(Epoch),
    Resume,
    Requester(RequesterId),
}

/// A recompute request with its version stamp.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Trigger {
    /// Monotonic across every trigger of one controller.
    pub version:   u64,
    pub kind:      TriggerKind,
    pub raised_at: Timestamp,
}

impl Trigger {
    pub fn key(&self) -> SubsetKey {
        self.kind.subset_key()
    }
}

// ── Sender ────────────────────────────────────────────────────────────────────

/// Cloneable handle for raising triggers from any thread.
///
/// Versions are drawn from a counter shared with the controller, so triggers
/// from different producers are totally ordered.
#[derive(Clone)]
pub struct TriggerSender {
    pub(crate) tx:       Sender<Trigger>,
    pub(crate) versions: Arc<AtomicU64>,
}

impl TriggerSender {
    /// Stamp and enqueue a trigger.  Returns its version.
    pub fn send(&self, kind: TriggerKind, now: Timestamp) -> RerouteResult<u64> {
        let version = self.versions.fetch_add(1, Ordering::AcqRel) + 1;
        self.tx
            .send(Trigger { version, kind, raised_at: now })
            .map_err(|_| RerouteError::InboxClosed)?;
        Ok(version)
    }
}
