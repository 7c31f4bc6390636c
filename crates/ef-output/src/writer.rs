//! The `OutputWriter` trait implemented by feed backends.

use crate::{AssignmentRow, DestinationEventRow, EdgeStatusRow, OutputResult, UpdateRow, WarningRow};

/// A sink for the engine's status streams.
///
/// Errors are surfaced to [`FeedObserver`][crate::FeedObserver], which keeps
/// the first one for [`take_error`][crate::FeedObserver::take_error].
pub trait OutputWriter {
    fn write_assignment(&mut self, row: &AssignmentRow) -> OutputResult<()>;

    fn write_updates(&mut self, rows: &[UpdateRow]) -> OutputResult<()>;

    fn write_edge_status(&mut self, row: &EdgeStatusRow) -> OutputResult<()>;

    fn write_destination_event(&mut self, row: &DestinationEventRow) -> OutputResult<()>;

    fn write_warning(&mut self, row: &WarningRow) -> OutputResult<()>;

    /// Flush buffered rows to disk without closing.
    fn flush(&mut self) -> OutputResult<()>;

    /// Flush and close all underlying file handles.
    ///
    /// Idempotent; safe to call more than once.
    fn finish(&mut self) -> OutputResult<()>;
}
