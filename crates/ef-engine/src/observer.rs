//! Status streams for the coordination layer.

use ef_capacity::CapacityEvent;
use ef_core::{Epoch, EdgeId, RequesterId, Timestamp};
use ef_reroute::AssignmentUpdate;
use ef_solver::Assignment;
use ef_spatial::EdgeStatus;

/// Conditions the coordination layer should act on that are not errors of
/// the call that produced them.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineWarning {
    /// No destination anywhere satisfies the unit's hard constraints (or a
    /// rerouted unit could not be placed again).
    Unplaced {
        requesters: Vec<RequesterId>,
        reason:     String,
        at:         Timestamp,
    },
    /// Requesters placed on the deadline fast path; a background re-run has
    /// been queued for them.
    RerunScheduled {
        epoch:      Epoch,
        requesters: usize,
        at:         Timestamp,
    },
}

/// Callbacks invoked by [`Engine`][crate::Engine] as state changes.
///
/// All methods have default no-op implementations so implementors only need
/// to override what they care about.  Callbacks run on the thread that made
/// the change, after the change is visible.
///
/// # Example: breach logger
///
/// ```rust,ignore
/// struct Breaches(Vec<EdgeId>);
///
/// impl EngineObserver for Breaches {
///     fn on_edge_status(&mut self, edge: EdgeId, status: EdgeStatus, _now: Timestamp) {
///         if status == EdgeStatus::Congested {
///             self.0.push(edge);
///         }
///     }
/// }
/// ```
pub trait EngineObserver {
    /// An edge changed between open, congested, and closed.
    fn on_edge_status(&mut self, _edge: EdgeId, _status: EdgeStatus, _now: Timestamp) {}

    /// A destination crossed a capacity threshold, or was closed or reopened.
    fn on_destination_event(&mut self, _event: &CapacityEvent, _now: Timestamp) {}

    /// A new assignment was made.
    fn on_assignment(&mut self, _assignment: &Assignment) {}

    /// Assignments were moved by a recompute.
    fn on_updates(&mut self, _updates: &[AssignmentUpdate], _now: Timestamp) {}

    /// An assignment was made or moved with a fallback; see its flags.
    fn on_degraded(&mut self, _assignment: &Assignment) {}

    fn on_warning(&mut self, _warning: &EngineWarning) {}
}

/// An [`EngineObserver`] that does nothing.
pub struct NoopObserver;

impl EngineObserver for NoopObserver {}
