//! `ef-reroute` — trigger-driven recomputation of active assignments.
//!
//! Triggers (congestion and capacity breaches, manual closures, the periodic
//! schedule, deadline re-runs, alternative requests) are explicit tagged
//! events consumed by one controller loop.  Each carries a monotonic version;
//! a recompute whose subset received a newer trigger while it was in flight
//! is discarded when it completes.
//!
//! # Crate layout
//!
//! | Module         | Contents                                                  |
//! |----------------|-----------------------------------------------------------|
//! | [`trigger`]    | `Trigger`, `TriggerKind`, `SubsetKey`, `TriggerSender`    |
//! | [`book`]       | `AssignmentBook`, `AssignmentUpdate`                      |
//! | [`controller`] | `RerouteController`, `RerouteEnv`, `CycleReport`          |
//! | [`error`]      | `RerouteError`, `RerouteResult<T>`                        |

pub mod book;
pub mod controller;
pub mod error;
pub mod trigger;


pub use book::{AssignmentBook, AssignmentUpdate};
pub use controller::{Completion, ControllerStats, CycleReport, InFlight, RerouteController, RerouteEnv};
pub use error::{RerouteError, RerouteResult};
pub use trigger::{ResourceClosure, ResourceRef, SubsetKey, Trigger, TriggerKind, TriggerSender};
