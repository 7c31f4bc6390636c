//! `ef-predict` — forecasts for the coordination layer.
//!
//! Read-only over the congestion estimator and capacity registry; the only
//! state owned here is the per-zone [`ZoneTracker`].
//!
//! # Crate layout
//!
//! | Module        | Contents                                                 |
//! |---------------|----------------------------------------------------------|
//! | [`predictor`] | `Predictor`, `BottleneckRisk`, `FillRisk`, `ZoneCompletion` |
//! | [`zones`]     | `ZoneTracker`, `ZoneCounts`                              |

pub mod predictor;
pub mod zones;


pub use predictor::{BottleneckRisk, FillRisk, Predictor, ZoneCompletion};
pub use zones::{ZoneCounts, ZoneTracker};
