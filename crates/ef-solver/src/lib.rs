//! `ef-solver` — capacity-aware destination assignment.
//!
//! Turns evacuation requests into assignments: each requester gets one
//! destination and one road path, chosen by an explicit weighted score over
//! distance, congestion exposure, load imbalance, and accessibility.
//!
//! # Crate layout
//!
//! | Module         | Contents                                                 |
//! |----------------|----------------------------------------------------------|
//! | [`request`]    | `EvacRequest`, `PriorityMarkers`                         |
//! | [`units`]      | family grouping and priority ordering                    |
//! | [`scoring`]    | `score`, `Candidate`, balance guard, `LoadLedger`        |
//! | [`solver`]     | `Solver`, `SolveContext`, `SolveOutcome`                 |
//! | [`assignment`] | `Assignment`, `AssignmentStatus`, `AssignmentFlags`      |
//! | [`error`]      | `SolverError`, `SolverResult<T>`                         |
//!
//! # Feature flags
//!
//! | Flag       | Effect                                                   |
//! |------------|----------------------------------------------------------|
//! | `parallel` | `Solver::assign_zoned` solves zones on the Rayon pool     |
//! | `serde`    | `Serialize`/`Deserialize` on requests and assignments     |

pub mod assignment;
pub mod error;
pub mod request;
pub mod scoring;
pub mod solver;
pub mod units;

#[cfg(test)]
mod tests;

pub use assignment::{Assignment, AssignmentFlags, AssignmentStatus, IdSource};
pub use error::{SolverError, SolverResult};
pub use request::{EvacRequest, PriorityMarker, PriorityMarkers};
pub use scoring::{Candidate, LoadLedger, ScoreInputs, apply_balance_guard, rank, score};
pub use solver::{SolveContext, SolveOutcome, Solver, UnitFailure};
pub use units::{Unit, form_units};
