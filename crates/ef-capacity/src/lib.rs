//! `ef-capacity` — destination capacity registry.
//!
//! Owns the live occupancy counter of every destination.  Other components
//! never write occupancy directly: the solver reserves, the rerouting
//! controller releases, and check-in telemetry records walk-ins, all through
//! [`CapacityRegistry`].
//!
//! # Crate layout
//!
//! | Module          | Contents                                                   |
//! |-----------------|------------------------------------------------------------|
//! | [`registry`]    | `CapacityRegistry`, `CapacityRegistryBuilder`, `Reservation` |
//! | [`destination`] | `DestinationInfo`, `DestinationStatus`, snapshots, `CapacityEvent` |
//! | [`loader`]      | CSV shelter loader                                         |
//! | [`error`]       | `CapacityError`, `CapacityResult<T>`                       |

pub mod destination;
pub mod error;
pub mod loader;
pub mod registry;

#[cfg(test)]
mod tests;

pub use destination::{
    CapacityEvent, DestinationInfo, DestinationSnapshot, DestinationStatus, RegistrySnapshot,
};
pub use error::{CapacityError, CapacityResult};
pub use loader::{load_shelters_csv, load_shelters_reader};
pub use registry::{CapacityChange, CapacityRegistry, CapacityRegistryBuilder, Reservation};
