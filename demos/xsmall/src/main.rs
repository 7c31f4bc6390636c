//! xsmall — smallest end-to-end run of the evacflow engine.
//!
//! Drives a synthetic 36-intersection city inspired by Mobile, Alabama
//! through a short evacuation: requests arrive in one-minute waves, road
//! sensors report flow, an arterial clogs, a shelter closes, people check in
//! on arrival, and the predictor is queried at the end.  Everything the
//! engine publishes lands in `output/xsmall/*.csv`.
//!
//! ```text
//! cargo run -p xsmall                    # default configuration
//! cargo run -p xsmall -- config.json     # EngineConfig overrides as JSON
//! RUST_LOG=ef_reroute=debug cargo run -p xsmall
//! ```

mod network;

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ef_core::{
    EdgeId, EngineConfig, FamilyId, FeatureSet, GeoPoint, MINUTE, PriorityTier, RequesterId, SimRng,
    Timestamp, ZoneGrid, ZoneId,
};
use ef_engine::{Engine, EngineBuilder, EngineObserver};
use ef_output::{CsvWriter, FeedObserver};
use ef_reroute::{ResourceClosure, ResourceRef};
use ef_solver::{AssignmentStatus, EvacRequest};

use network::{City, build_city};

// ── Constants ─────────────────────────────────────────────────────────────────

const SEED:          u64 = 42;
const REQUESTERS:    u32 = 520;
const WAVE_SIZE:     usize = 40;
const START:         Timestamp = Timestamp(0);
/// Waves a requester spends on the road before checking in as arrived.
const TRAVEL_WAVES:  usize = 3;
/// Wave after which the busiest road is reported at 85 % of capacity.
const INCIDENT_WAVE: usize = 4;
/// Wave after which the church hall loses power and closes.
const CLOSURE_WAVE:  usize = 7;
const OUTPUT_DIR:    &str = "output/xsmall";

// ── Configuration ─────────────────────────────────────────────────────────────

/// Defaults, overridden by the JSON file named on the command line.
fn load_config() -> Result<EngineConfig> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {path}"))?
        }
        None => EngineConfig::default(),
    };
    // City-sized zones: ~2 km cells over the demo area.
    config.zone_grid = ZoneGrid::new(GeoPoint::new(30.64, -88.12), 0.02, 8);
    Ok(config)
}

// ── Scenario ──────────────────────────────────────────────────────────────────

/// Scattered requesters: a tenth medical, some in wheelchairs, some with
/// pets, and a family of three every 25 people.
fn generate_requests(rng: &mut SimRng, city: &City) -> Vec<EvacRequest> {
    let mut out = Vec::with_capacity(REQUESTERS as usize);
    let mut family = 0u32;
    let mut id = 0u32;
    while id < REQUESTERS {
        let at = rng.point_in(city.sw, city.ne);
        let arrived = Timestamp(u64::from(id));

        if id % 25 == 0 && id + 3 <= REQUESTERS {
            for _ in 0..3 {
                out.push(EvacRequest::new(RequesterId(id), at, arrived).with_family(FamilyId(family)));
                id += 1;
            }
            family += 1;
            continue;
        }

        let mut req = EvacRequest::new(RequesterId(id), at, arrived);
        if rng.gen_bool(0.10) {
            req = req.with_tier(PriorityTier::Medical);
        } else if rng.gen_bool(0.05) {
            req = req.with_accessibility_need(0.8);
        } else if rng.gen_bool(0.08) {
            req = req.with_features(FeatureSet::PETS);
        }
        out.push(req);
        id += 1;
    }
    out
}

/// Road sensors: every edge reports the flow implied by its planned load.
fn report_flows<O: EngineObserver>(engine: &Engine<O>, now: Timestamp) -> Result<()> {
    for e in 0..engine.network().edge_count() {
        let edge = EdgeId(e as u32);
        let planned = engine.congestion().planned(edge);
        if planned > 0 {
            engine.record_edge_flow(edge, f64::from(planned) * 12.0, now)?;
        }
    }
    Ok(())
}

fn busiest_edge<O: EngineObserver>(engine: &Engine<O>) -> Option<EdgeId> {
    (0..engine.network().edge_count())
        .map(|e| EdgeId(e as u32))
        .max_by_key(|&e| engine.congestion().planned(e))
}

// ── main ──────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== xsmall — evacflow assignment engine ===");
    println!("Requesters: {REQUESTERS}  |  Wave size: {WAVE_SIZE}  |  Seed: {SEED}");
    println!();

    // 1. Configuration and city.
    let config = load_config()?;
    let grid = config.zone_grid;
    let city = build_city();
    let mut rng = SimRng::new(SEED);
    let requests = generate_requests(&mut rng, &city);
    let care_homes = city.care_homes.clone();
    let church_hall = ResourceRef::Destination(ef_core::DestinationId(3));

    // 2. Engine with the CSV feed attached.
    let feed = FeedObserver::new(CsvWriter::new(Path::new(OUTPUT_DIR))?);
    let engine = EngineBuilder::new(config, city.roads, city.shelters)
        .start_at(START)
        .build_with_observer(feed)?;
    println!(
        "Road network: {} nodes, {} edges  |  shelters: {}",
        engine.network().node_count(),
        engine.network().edge_count(),
        engine.registry().len()
    );

    for home in care_homes {
        engine.add_priority_marker(home, 400.0);
    }
    let mut population: BTreeMap<ZoneId, u64> = BTreeMap::new();
    for r in &requests {
        *population.entry(grid.zone_of(r.location)).or_default() += 1;
    }
    for (&zone, &n) in &population {
        engine.register_zone_population(zone, n);
    }

    // 3. Waves.
    let t0 = Instant::now();
    let mut on_road: VecDeque<(usize, Vec<RequesterId>)> = VecDeque::new();
    let (mut placed, mut failed, mut rerouted) = (0usize, 0usize, 0usize);
    let mut now = START;

    for (wave, chunk) in requests.chunks(WAVE_SIZE).enumerate() {
        now = START.offset(wave as u64 * MINUTE);

        let out = engine.assign_batch_zoned(chunk.to_vec(), now)?;
        placed += out.assignments.len();
        failed += out.failures.iter().map(|f| f.requesters.len()).sum::<usize>();
        let ids: Vec<RequesterId> = out.assignments.iter().map(|a| a.requester()).collect();
        for &r in &ids {
            engine.check_in(r, AssignmentStatus::InTransit, now)?;
        }
        on_road.push_back((wave, ids));

        report_flows(&engine, now)?;

        if wave == INCIDENT_WAVE {
            if let Some(edge) = busiest_edge(&engine) {
                warn!(%edge, "sensor reports heavy congestion");
                engine.record_edge_level(edge, 0.85, now)?;
            }
        }
        if wave == CLOSURE_WAVE {
            let moved = engine.resource_closure(
                ResourceClosure { resource: church_hall, reason: "generator failure".into() },
                now,
            )?;
            rerouted += moved.len();
        }

        let report = engine.tick(now)?;
        rerouted += report.updates.len();

        while on_road.front().is_some_and(|(w, _)| wave >= w + TRAVEL_WAVES) {
            if let Some((_, arrived)) = on_road.pop_front() {
                for r in arrived {
                    if let Err(e) = engine.check_in(r, AssignmentStatus::Arrived, now) {
                        warn!(requester = %r, error = %e, "check-in rejected");
                    }
                }
            }
        }
    }
    let elapsed = t0.elapsed();
    info!(placed, failed, rerouted, "waves complete");

    // 4. Predictions.
    println!();
    println!("Bottlenecks in the next 15 min:");
    for b in engine.predict_bottlenecks(15 * MINUTE, now) {
        println!("  {:<12} level {:.2} → {:.2} in {:>4} s", b.edge, b.current_level, b.projected_level, b.eta_secs);
    }
    println!("Shelters at risk of filling:");
    for f in engine.predict_fill_risks(now) {
        let name = engine.registry().info(f.dest).map_or("?", |i| i.name.as_str());
        println!("  {:<22} {:>4}/{:<4} full in {:>5} s", name, f.occupancy, f.max_capacity, f.fill_secs);
    }
    println!("{:<10} {:>7} {:>9} {:>12}", "Zone", "Left", "Per min", "Done in");
    println!("{}", "-".repeat(42));
    for z in engine.zone_completions(now) {
        let done = z.completion_secs.map_or("never".to_string(), |s| format!("{s} s"));
        let flag = if z.high_risk { "  HIGH RISK" } else { "" };
        println!(
            "{:<10} {:>7} {:>9.1} {:>12}{flag}",
            z.zone.0,
            z.counts.remaining(),
            z.throughput * 60.0,
            done
        );
    }

    // 5. Close out.
    let stats = engine.controller_stats();
    let archived = engine.end_event();
    let mut feed = engine.into_observer();
    let rows = feed.rows_written();
    feed.finish()?;

    println!();
    println!("Run complete in {:.3} s", elapsed.as_secs_f64());
    println!("  placed     : {placed}");
    println!("  unplaced   : {failed}");
    println!("  rerouted   : {rerouted} ({} triggers committed, {} discarded)", stats.committed, stats.discarded);
    println!("  archived   : {archived}");
    println!("  feed rows  : {rows} in {OUTPUT_DIR}/");

    Ok(())
}
