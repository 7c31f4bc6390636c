//! `ef-core` — foundational types for the `evacflow` assignment engine.
//!
//! This crate is a dependency of every other `ef-*` crate.  It intentionally
//! has no `ef-*` dependencies and minimal external ones (only `rand` and
//! `thiserror`, plus optional `serde`).
//!
//! # What lives here
//!
//! | Module       | Contents                                                  |
//! |--------------|-----------------------------------------------------------|
//! | [`ids`]      | `NodeId`, `EdgeId`, `DestinationId`, `RequesterId`, …     |
//! | [`geo`]      | `GeoPoint`, haversine distance, `ZoneGrid`                |
//! | [`time`]     | `Timestamp`, `Epoch`                                      |
//! | [`features`] | `FeatureSet` capability tags, `PriorityTier`              |
//! | [`config`]   | `EngineConfig` and its sub-tables                         |
//! | [`rng`]      | `SimRng` for reproducible scenario generation             |
//! | [`error`]    | `CoreError`, `CoreResult`                                 |
//!
//! # Feature flags
//!
//! | Flag    | Effect                                                     |
//! |---------|------------------------------------------------------------|
//! | `serde` | Adds `Serialize`/`Deserialize` to all public types.        |

pub mod config;
pub mod error;
pub mod features;
pub mod geo;
pub mod ids;
pub mod rng;
pub mod time;


// ── Re-exports ────────────────────────────────────────────────────────────────

pub use config::{
    CapacityConfig, CongestionConfig, EngineConfig, PredictorConfig, RerouteConfig,
    RoutingConfig, ScoringWeights, SolverConfig,
};
pub use error::{CoreError, CoreResult};
pub use features::{FeatureSet, PriorityTier};
pub use geo::{GeoPoint, ZoneGrid, metres_to_degrees};
pub use ids::{
    AssignmentId, DestinationId, EdgeId, FamilyId, NodeId, PathId, RequesterId, ZoneId,
};
pub use rng::SimRng;
pub use time::{Epoch, HOUR, MINUTE, Timestamp};
