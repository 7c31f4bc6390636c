//! Solver error type.

use thiserror::Error;

use ef_capacity::CapacityError;
use ef_core::{DestinationId, RequesterId};
use ef_spatial::SpatialError;

/// Errors produced by `ef-solver`.
///
/// Most of these are resolved inside the solver (radius widening, fallbacks,
/// local retries) and only surface in [`UnitFailure`](crate::UnitFailure)
/// when every resolution has been exhausted.
#[derive(Debug, Error)]
pub enum SolverError {
    /// No destination satisfies the unit's hard constraints anywhere.
    #[error("no destination satisfies the constraints of the {size}-person unit led by {lead}")]
    ConstraintUnsatisfiable { lead: RequesterId, size: u32 },

    /// Reservations kept losing concurrent races after the local retries.
    #[error("reservation at {dest} conflicted {attempts} times")]
    StaleStateConflict { dest: DestinationId, attempts: u32 },

    /// The internal latency budget ran out before this unit was solved.
    #[error("deadline exceeded with {pending} unit(s) pending")]
    OverloadTimeout { pending: usize },

    #[error(transparent)]
    Spatial(#[from] SpatialError),

    #[error(transparent)]
    Capacity(#[from] CapacityError),
}

pub type SolverResult<T> = Result<T, SolverError>;
