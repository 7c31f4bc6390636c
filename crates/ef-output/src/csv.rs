//! CSV output backend.
//!
//! Creates five files in the configured output directory:
//! - `assignments.csv`
//! - `updates.csv`
//! - `edge_status.csv`
//! - `destination_events.csv`
//! - `warnings.csv`

use std::fs::File;
use std::path::Path;

use csv::Writer;

use crate::writer::OutputWriter;
use crate::{AssignmentRow, DestinationEventRow, EdgeStatusRow, OutputResult, UpdateRow, WarningRow};

pub const ASSIGNMENTS_FILE: &str = "assignments.csv";
pub const UPDATES_FILE: &str = "updates.csv";
pub const EDGE_STATUS_FILE: &str = "edge_status.csv";
pub const DESTINATION_EVENTS_FILE: &str = "destination_events.csv";
pub const WARNINGS_FILE: &str = "warnings.csv";

/// Writes the engine feed to five CSV files.
pub struct CsvWriter {
    assignments: Writer<File>,
    updates:     Writer<File>,
    edges:       Writer<File>,
    dest_events: Writer<File>,
    warnings:    Writer<File>,
    finished:    bool,
}

impl CsvWriter {
    /// Create `dir` if needed, open the five files and write the header rows.
    pub fn new(dir: &Path) -> OutputResult<Self> {
        std::fs::create_dir_all(dir)?;

        let mut assignments = Writer::from_path(dir.join(ASSIGNMENTS_FILE))?;
        assignments.write_record([
            "at", "requester", "assignment", "destination", "path", "length_m", "tier", "zone", "revision", "flags",
        ])?;

        let mut updates = Writer::from_path(dir.join(UPDATES_FILE))?;
        updates.write_record([
            "at",
            "requester",
            "assignment",
            "previous_destination",
            "destination",
            "revision",
            "trigger_version",
            "cause",
            "flags",
        ])?;

        let mut edges = Writer::from_path(dir.join(EDGE_STATUS_FILE))?;
        edges.write_record(["at", "edge", "status"])?;

        let mut dest_events = Writer::from_path(dir.join(DESTINATION_EVENTS_FILE))?;
        dest_events.write_record(["at", "destination", "kind", "detail"])?;

        let mut warnings = Writer::from_path(dir.join(WARNINGS_FILE))?;
        warnings.write_record(["at", "kind", "requesters", "detail"])?;

        Ok(Self { assignments, updates, edges, dest_events, warnings, finished: false })
    }
}

impl OutputWriter for CsvWriter {
    fn write_assignment(&mut self, row: &AssignmentRow) -> OutputResult<()> {
        self.assignments.write_record(&[
            row.at.to_string(),
            row.requester.to_string(),
            row.assignment.to_string(),
            row.destination.to_string(),
            row.path.to_string(),
            format!("{:.1}", row.length_m),
            row.tier.to_string(),
            row.zone.to_string(),
            row.revision.to_string(),
            row.flags.clone(),
        ])?;
        Ok(())
    }

    fn write_updates(&mut self, rows: &[UpdateRow]) -> OutputResult<()> {
        for row in rows {
            self.updates.write_record(&[
                row.at.to_string(),
                row.requester.to_string(),
                row.assignment.to_string(),
                row.previous_destination.to_string(),
                row.destination.to_string(),
                row.revision.to_string(),
                row.trigger_version.to_string(),
                row.cause.to_string(),
                row.flags.clone(),
            ])?;
        }
        Ok(())
    }

    fn write_edge_status(&mut self, row: &EdgeStatusRow) -> OutputResult<()> {
        self.edges.write_record(&[row.at.to_string(), row.edge.to_string(), row.status.to_string()])?;
        Ok(())
    }

    fn write_destination_event(&mut self, row: &DestinationEventRow) -> OutputResult<()> {
        self.dest_events.write_record(&[
            row.at.to_string(),
            row.destination.to_string(),
            row.kind.to_string(),
            row.detail.clone(),
        ])?;
        Ok(())
    }

    fn write_warning(&mut self, row: &WarningRow) -> OutputResult<()> {
        self.warnings.write_record(&[
            row.at.to_string(),
            row.kind.to_string(),
            row.requesters.clone(),
            row.detail.clone(),
        ])?;
        Ok(())
    }

    fn flush(&mut self) -> OutputResult<()> {
        self.assignments.flush()?;
        self.updates.flush()?;
        self.edges.flush()?;
        self.dest_events.flush()?;
        self.warnings.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> OutputResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.flush()
    }
}
