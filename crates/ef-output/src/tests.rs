//! Unit tests for ef-output.

#[cfg(test)]
mod helpers {
    use ef_capacity::CapacityRegistryBuilder;
    use ef_core::{CapacityConfig, EngineConfig, FeatureSet, GeoPoint, Timestamp};
    use ef_engine::{Engine, EngineBuilder};
    use ef_spatial::RoadNetworkBuilder;

    use crate::{CsvWriter, FeedObserver};

    pub const T0: Timestamp = Timestamp(500);
    pub const A: GeoPoint = GeoPoint { lat: 30.0, lon: -88.00 };
    pub const B: GeoPoint = GeoPoint { lat: 30.0, lon: -87.99 };

    /// A ── B, one shelter of two seats at B.
    pub fn engine(dir: &std::path::Path) -> Engine<FeedObserver<CsvWriter>> {
        let mut nb = RoadNetworkBuilder::new();
        let a = nb.add_node(A);
        let b = nb.add_node(B);
        nb.add_straight_road(a, b, 1_200.0);

        let mut rb = CapacityRegistryBuilder::new();
        rb.add_destination("gym", B, 2, FeatureSet::NONE);

        let cfg = EngineConfig {
            capacity: CapacityConfig { fill_horizon_secs: 0, ..CapacityConfig::default() },
            ..EngineConfig::default()
        };
        let feed = FeedObserver::new(CsvWriter::new(dir).unwrap());
        EngineBuilder::new(cfg, nb, rb).start_at(T0).build_with_observer(feed).unwrap()
    }

    pub fn read(path: std::path::PathBuf) -> Vec<csv::StringRecord> {
        let mut rdr = csv::Reader::from_path(path).unwrap();
        rdr.records().map(|r| r.unwrap()).collect()
    }

    pub fn headers(path: std::path::PathBuf) -> Vec<String> {
        let mut rdr = csv::Reader::from_path(path).unwrap();
        rdr.headers().unwrap().iter().map(str::to_owned).collect()
    }
}

// ── CSV writer ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod csv_tests {
    use tempfile::TempDir;

    use crate::csv::{
        ASSIGNMENTS_FILE, CsvWriter, DESTINATION_EVENTS_FILE, EDGE_STATUS_FILE, UPDATES_FILE, WARNINGS_FILE,
    };
    use crate::row::{EdgeStatusRow, UpdateRow};
    use crate::writer::OutputWriter;
    use super::helpers::{headers, read};

    fn tmp() -> TempDir {
        tempfile::tempdir().expect("create temp dir")
    }

    fn update(requester: u32) -> UpdateRow {
        UpdateRow {
            at:                   60,
            requester,
            assignment:           requester as u64 + 100,
            previous_destination: 0,
            destination:          1,
            revision:             1,
            trigger_version:      4,
            cause:                "congestion_breach",
            flags:                String::new(),
        }
    }

    #[test]
    fn files_created_in_missing_dir() {
        let dir = tmp();
        let out = dir.path().join("feed");
        let _w = CsvWriter::new(&out).unwrap();
        for f in [ASSIGNMENTS_FILE, UPDATES_FILE, EDGE_STATUS_FILE, DESTINATION_EVENTS_FILE, WARNINGS_FILE] {
            assert!(out.join(f).exists(), "{f} missing");
        }
    }

    #[test]
    fn headers_correct() {
        let dir = tmp();
        let mut w = CsvWriter::new(dir.path()).unwrap();
        w.finish().unwrap();
        assert_eq!(
            headers(dir.path().join(UPDATES_FILE)),
            [
                "at",
                "requester",
                "assignment",
                "previous_destination",
                "destination",
                "revision",
                "trigger_version",
                "cause",
                "flags"
            ]
        );
        assert_eq!(headers(dir.path().join(EDGE_STATUS_FILE)), ["at", "edge", "status"]);
        assert_eq!(headers(dir.path().join(WARNINGS_FILE)), ["at", "kind", "requesters", "detail"]);
    }

    #[test]
    fn updates_written_in_order() {
        let dir = tmp();
        let mut w = CsvWriter::new(dir.path()).unwrap();
        w.write_updates(&[update(3), update(1), update(2)]).unwrap();
        w.finish().unwrap();

        let rows = read(dir.path().join(UPDATES_FILE));
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[0][1], "3");
        assert_eq!(&rows[1][1], "1");
        assert_eq!(&rows[0][2], "103");
        assert_eq!(&rows[0][7], "congestion_breach");
    }

    #[test]
    fn finish_is_idempotent() {
        let dir = tmp();
        let mut w = CsvWriter::new(dir.path()).unwrap();
        w.write_edge_status(&EdgeStatusRow { at: 1, edge: 7, status: "closed" }).unwrap();
        w.finish().unwrap();
        w.finish().unwrap();
        let rows = read(dir.path().join(EDGE_STATUS_FILE));
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][2], "closed");
    }
}

// ── Row conversion ────────────────────────────────────────────────────────────

#[cfg(test)]
mod rows {
    use ef_capacity::CapacityEvent;
    use ef_core::{DestinationId, Epoch, RequesterId, Timestamp};
    use ef_engine::EngineWarning;

    use crate::row::{DestinationEventRow, WarningRow};

    #[test]
    fn destination_event_detail() {
        let ev = CapacityEvent::Excluded { dest: DestinationId(2), occupancy: 95, predicted_fill_secs: Some(240) };
        let row = DestinationEventRow::new(&ev, Timestamp(10));
        assert_eq!(row.destination, 2);
        assert_eq!(row.kind, "excluded");
        assert_eq!(row.detail, "occupancy=95;fill_secs=240");

        let closed = DestinationEventRow::new(&CapacityEvent::Closed { dest: DestinationId(1) }, Timestamp(10));
        assert_eq!(closed.kind, "closed");
        assert!(closed.detail.is_empty());
    }

    #[test]
    fn warning_rows() {
        let unplaced = EngineWarning::Unplaced {
            requesters: vec![RequesterId(4), RequesterId(5)],
            reason:     "no dialysis site".into(),
            at:         Timestamp(30),
        };
        let row = WarningRow::from(&unplaced);
        assert_eq!(row.kind, "unplaced");
        assert_eq!(row.requesters, "4|5");
        assert_eq!(row.at, 30);

        let rerun = EngineWarning::RerunScheduled { epoch: Epoch(3), requesters: 12, at: Timestamp(40) };
        assert_eq!(WarningRow::from(&rerun).detail, "epoch=3;count=12");
    }
}

// ── Observer ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod observer {
    use ef_core::{RequesterId, Timestamp};
    use ef_engine::{EngineObserver, EngineWarning};
    use ef_solver::EvacRequest;

    use crate::csv::{ASSIGNMENTS_FILE, DESTINATION_EVENTS_FILE, EDGE_STATUS_FILE};
    use crate::row::*;
    use crate::{FeedObserver, OutputError, OutputResult, OutputWriter};
    use super::helpers::{A, T0, engine, read};

    #[test]
    fn engine_streams_reach_the_files() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path());
        for i in 0..2 {
            e.assign_route(EvacRequest::new(RequesterId(i), A, T0), T0).unwrap();
        }
        let ab = e.network().out_edges(ef_core::NodeId(0)).next().unwrap();
        e.record_edge_level(ab, 0.9, T0 + 30).unwrap();

        let mut feed = e.into_observer();
        feed.finish().unwrap();
        assert!(feed.rows_written() >= 3);

        let assignments = read(dir.path().join(ASSIGNMENTS_FILE));
        assert_eq!(assignments.len(), 2);
        assert_eq!(&assignments[1][1], "1");
        assert_eq!(&assignments[1][3], "0");

        let edges = read(dir.path().join(EDGE_STATUS_FILE));
        assert_eq!(edges.len(), 1);
        assert_eq!(&edges[0][0], "530");
        assert_eq!(&edges[0][2], "congested");

        let events = read(dir.path().join(DESTINATION_EVENTS_FILE));
        assert!(events.iter().any(|r| &r[2] == "excluded"));
    }

    /// Fails every warning write.
    #[derive(Default)]
    struct BrokenWarnings {
        flushed: bool,
    }

    impl OutputWriter for BrokenWarnings {
        fn write_assignment(&mut self, _: &AssignmentRow) -> OutputResult<()> { Ok(()) }
        fn write_updates(&mut self, _: &[UpdateRow]) -> OutputResult<()> { Ok(()) }
        fn write_edge_status(&mut self, _: &EdgeStatusRow) -> OutputResult<()> { Ok(()) }
        fn write_destination_event(&mut self, _: &DestinationEventRow) -> OutputResult<()> { Ok(()) }
        fn write_warning(&mut self, _: &WarningRow) -> OutputResult<()> {
            Err(std::io::Error::other("disk full").into())
        }
        fn flush(&mut self) -> OutputResult<()> { Ok(()) }
        fn finish(&mut self) -> OutputResult<()> {
            self.flushed = true;
            Ok(())
        }
    }

    #[test]
    fn first_write_error_is_kept() {
        let mut feed = FeedObserver::new(BrokenWarnings::default());
        let w = EngineWarning::RerunScheduled { epoch: ef_core::Epoch(1), requesters: 1, at: Timestamp(0) };
        feed.on_warning(&w);
        feed.on_edge_status(ef_core::EdgeId(0), ef_spatial::EdgeStatus::Closed, Timestamp(0));
        feed.on_warning(&w);
        assert_eq!(feed.rows_written(), 1);

        assert!(matches!(feed.finish(), Err(OutputError::Io(_))));
        assert!(feed.take_error().is_none());
        assert!(feed.into_writer().flushed);
    }
}
