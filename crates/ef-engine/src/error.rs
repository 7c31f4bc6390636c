//! Engine error type.

use thiserror::Error;

use ef_capacity::CapacityError;
use ef_core::{CoreError, RequesterId};
use ef_reroute::RerouteError;
use ef_solver::SolverError;
use ef_spatial::SpatialError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine setup error: {0}")]
    Setup(String),

    /// Scoring weights are frozen while an evacuation event is running.
    #[error("scoring weights cannot be retuned during an active event")]
    EventActive,

    #[error("{0} received no assignment")]
    Unassigned(RequesterId),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Spatial(#[from] SpatialError),

    #[error(transparent)]
    Capacity(#[from] CapacityError),

    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error(transparent)]
    Reroute(#[from] RerouteError),
}

pub type EngineResult<T> = Result<T, EngineError>;
