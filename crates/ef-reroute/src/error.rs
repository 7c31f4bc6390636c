//! Rerouting error type.

use thiserror::Error;

use ef_capacity::CapacityError;
use ef_core::RequesterId;
use ef_solver::SolverError;
use ef_spatial::SpatialError;

#[derive(Debug, Error)]
pub enum RerouteError {
    #[error("no active assignment for {0}")]
    UnknownRequester(RequesterId),

    /// Arrived assignments are final.
    #[error("{0} has already arrived")]
    AlreadyArrived(RequesterId),

    /// The controller that owned the trigger inbox has been dropped.
    #[error("trigger inbox closed")]
    InboxClosed,

    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error(transparent)]
    Capacity(#[from] CapacityError),

    #[error(transparent)]
    Spatial(#[from] SpatialError),
}

pub type RerouteResult<T> = Result<T, RerouteError>;
