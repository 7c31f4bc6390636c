//! `ef-output` — the CSV feed the delivery layer reads.
//!
//! [`FeedObserver`] implements `ef_engine::EngineObserver` and hands each
//! status stream to an [`OutputWriter`].  The provided backend is
//! [`CsvWriter`]:
//!
//! | File                     | One row per                                   |
//! |--------------------------|-----------------------------------------------|
//! | `assignments.csv`        | new assignment                                |
//! | `updates.csv`            | committed reroute                             |
//! | `edge_status.csv`        | edge going open / congested / closed          |
//! | `destination_events.csv` | capacity warning, exclusion, overflow, close  |
//! | `warnings.csv`           | unplaced unit, queued re-run, degraded result |
//!
//! # Usage
//!
//! ```rust,ignore
//! use ef_output::{CsvWriter, FeedObserver};
//!
//! let feed = FeedObserver::new(CsvWriter::new(Path::new("./output"))?);
//! let engine = builder.build_with_observer(feed)?;
//! // ... run the event ...
//! engine.into_observer().finish()?;
//! ```

pub mod csv;
pub mod error;
pub mod observer;
pub mod row;
pub mod writer;

#[cfg(test)]
mod tests;

pub use crate::csv::CsvWriter;
pub use error::{OutputError, OutputResult};
pub use observer::FeedObserver;
pub use row::{AssignmentRow, DestinationEventRow, EdgeStatusRow, UpdateRow, WarningRow};
pub use writer::OutputWriter;
