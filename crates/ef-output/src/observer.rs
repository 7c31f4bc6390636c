//! `FeedObserver<W>`: bridges `EngineObserver` to an `OutputWriter`.

use tracing::warn;

use ef_capacity::CapacityEvent;
use ef_core::{EdgeId, Timestamp};
use ef_engine::{EngineObserver, EngineWarning};
use ef_reroute::AssignmentUpdate;
use ef_solver::Assignment;
use ef_spatial::EdgeStatus;

use crate::row::{AssignmentRow, DestinationEventRow, EdgeStatusRow, UpdateRow, WarningRow};
use crate::writer::OutputWriter;
use crate::{OutputError, OutputResult};

/// An [`EngineObserver`] that writes every status stream to an
/// [`OutputWriter`].
///
/// Observer callbacks cannot fail, so the first write error is kept and the
/// rest are logged.  Check [`take_error`][Self::take_error] after the run and
/// call [`finish`][Self::finish] to flush.
pub struct FeedObserver<W: OutputWriter> {
    writer:     W,
    rows:       u64,
    last_error: Option<OutputError>,
}

impl<W: OutputWriter> FeedObserver<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, rows: 0, last_error: None }
    }

    /// Rows handed to the writer so far.
    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    /// Take the stored write error, if any.
    pub fn take_error(&mut self) -> Option<OutputError> {
        self.last_error.take()
    }

    /// Flush and close the writer.  Returns the stored error first, if any.
    pub fn finish(&mut self) -> OutputResult<()> {
        let result = self.writer.finish();
        match self.last_error.take() {
            Some(e) => Err(e),
            None => result,
        }
    }

    pub fn into_writer(self) -> W {
        self.writer
    }

    fn store_err(&mut self, result: OutputResult<()>, rows: u64) {
        match result {
            Ok(()) => self.rows += rows,
            Err(e) => {
                warn!(error = %e, "feed write failed");
                if self.last_error.is_none() {
                    self.last_error = Some(e);
                }
            }
        }
    }
}

impl<W: OutputWriter> EngineObserver for FeedObserver<W> {
    fn on_edge_status(&mut self, edge: EdgeId, status: EdgeStatus, now: Timestamp) {
        let result = self.writer.write_edge_status(&EdgeStatusRow::new(edge, status, now));
        self.store_err(result, 1);
    }

    fn on_destination_event(&mut self, event: &CapacityEvent, now: Timestamp) {
        let result = self.writer.write_destination_event(&DestinationEventRow::new(event, now));
        self.store_err(result, 1);
    }

    fn on_assignment(&mut self, assignment: &Assignment) {
        let result = self.writer.write_assignment(&AssignmentRow::from(assignment));
        self.store_err(result, 1);
    }

    fn on_updates(&mut self, updates: &[AssignmentUpdate], now: Timestamp) {
        let rows: Vec<UpdateRow> = updates.iter().map(|u| UpdateRow::new(u, now)).collect();
        let result = self.writer.write_updates(&rows);
        self.store_err(result, rows.len() as u64);
    }

    fn on_degraded(&mut self, assignment: &Assignment) {
        let result = self.writer.write_warning(&WarningRow::degraded(assignment));
        self.store_err(result, 1);
    }

    fn on_warning(&mut self, warning: &EngineWarning) {
        let result = self.writer.write_warning(&WarningRow::from(warning));
        self.store_err(result, 1);
    }
}
