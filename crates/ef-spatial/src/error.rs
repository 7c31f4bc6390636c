//! Spatial-subsystem error type.

use thiserror::Error;

use ef_core::{EdgeId, NodeId};

/// Errors produced by `ef-spatial`.
#[derive(Debug, Error)]
pub enum SpatialError {
    /// No open path connects `from` to any of the requested targets.
    #[error("no open path from {from} to any of {targets} target(s)")]
    GraphUnreachable { from: NodeId, targets: usize },

    #[error("node {0} not found in network")]
    NodeNotFound(NodeId),

    #[error("edge {0} not found in network")]
    EdgeNotFound(EdgeId),

    #[error("network parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SpatialResult<T> = Result<T, SpatialError>;
