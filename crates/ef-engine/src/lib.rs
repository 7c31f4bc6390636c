//! `ef-engine` — the evacuation flow-assignment engine facade.
//!
//! # Components
//!
//! ```text
//!   telemetry ──▶ CongestionEstimator ─┐
//!   check-ins ──▶ CapacityRegistry ────┼──▶ Solver ──▶ AssignmentBook
//!   closures  ──▶ RoadNetwork ─────────┘       ▲            │
//!                                              │            ▼
//!                                   RerouteController ◀── tick(now)
//! ```
//!
//! The engine owns one of each component, serialises assignment and
//! recompute on a single state lock, and reports every change to an
//! [`EngineObserver`].
//!
//! # Cargo features
//!
//! | Feature    | Effect                                             |
//! |------------|----------------------------------------------------|
//! | `parallel` | Zone batches solve on Rayon's thread pool.         |
//! | `serde`    | Serde derives on configuration and result types.   |
//!
//! # Quick-start
//!
//! ```rust,ignore
//! use ef_core::{EngineConfig, Timestamp};
//! use ef_engine::EngineBuilder;
//!
//! let engine = EngineBuilder::new(EngineConfig::default(), roads, shelters).build()?;
//! let a = engine.assign_route(request, Timestamp(0))?;
//! engine.record_edge_flow(edge, 2_100.0, Timestamp(30))?;
//! engine.tick(Timestamp(30))?;
//! ```

pub mod builder;
pub mod engine;
pub mod error;
pub mod observer;


pub use builder::EngineBuilder;
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use observer::{EngineObserver, EngineWarning, NoopObserver};
