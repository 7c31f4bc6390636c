//! `ef-congestion` — per-edge congestion estimation.
//!
//! The estimator owns the mutable congestion state of every road edge; the
//! spatial graph owns topology and closure flags and reads levels through the
//! [`CongestionView`](ef_spatial::CongestionView) trait.
//!
//! # Crate layout
//!
//! | Module        | Contents                                                  |
//! |---------------|-----------------------------------------------------------|
//! | [`estimator`] | `CongestionEstimator`, `CongestionSnapshot`, `LevelChange` |
//! | [`trend`]     | `Trend` and the per-edge sample ring                      |
//!
//! Lookups of unknown edges return `SpatialError::EdgeNotFound`.

pub mod estimator;
pub mod trend;


pub use estimator::{CongestionEstimator, CongestionSnapshot, LevelChange};
pub use trend::Trend;
