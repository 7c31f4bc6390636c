//! Capacity-registry error type.

use thiserror::Error;

use ef_core::DestinationId;

/// Errors produced by `ef-capacity`.
#[derive(Debug, Error)]
pub enum CapacityError {
    #[error("destination {0} is not registered")]
    UnknownDestination(DestinationId),

    #[error("destination {0} is closed")]
    Closed(DestinationId),

    /// All-or-nothing reservation could not be satisfied in full.
    #[error("destination {dest}: requested {requested}, only {remaining} remaining")]
    InsufficientCapacity { dest: DestinationId, requested: u32, remaining: u32 },

    /// Compare-and-swap retries were exhausted under contention.  The caller
    /// should re-read state and retry.
    #[error("destination {dest}: state changed concurrently {attempts} times")]
    StaleStateConflict { dest: DestinationId, attempts: u32 },

    #[error("shelter parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CapacityResult<T> = Result<T, CapacityError>;
