//! `ef-spatial` — road network, destination site index, and path search.
//!
//! # Crate layout
//!
//! | Module      | Contents                                                     |
//! |-------------|--------------------------------------------------------------|
//! | [`network`] | `RoadNetwork` (CSR + R-trees), `RoadNetworkBuilder`, `EdgeStatus` |
//! | [`cost`]    | `EdgeCostModel`, `CongestionView`, `PathConstraints`         |
//! | [`router`]  | `Router` trait, `Path`, `AStarRouter`                        |
//! | [`loader`]  | CSV node/edge loader                                          |
//! | [`error`]   | `SpatialError`, `SpatialResult<T>`                           |
//!
//! # Feature flags
//!
//! | Flag    | Effect                                                       |
//! |---------|--------------------------------------------------------------|
//! | `serde` | Derives `Serialize`/`Deserialize` on public types.           |

pub mod cost;
pub mod error;
pub mod loader;
pub mod network;
pub mod router;

mod sites;


pub use cost::{CongestionView, EdgeCostModel, FreeFlow, PathConstraints};
pub use error::{SpatialError, SpatialResult};
pub use loader::{NodeIdMap, load_network_csv, load_network_reader};
pub use network::{EdgeSpec, EdgeStatus, RoadNetwork, RoadNetworkBuilder};
pub use router::{AStarRouter, Path, PathMatch, Router};
