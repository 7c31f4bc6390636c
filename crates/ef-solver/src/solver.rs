//! The assignment solver.
//!
//! # Per-unit algorithm
//!
//! 1. **Pin**: a unit pinned to a destination goes there if it still can.
//! 2. **Filter**: destinations within the search radius that are active,
//!    not soft-excluded, offer every required feature, and have room for the
//!    whole unit; at most `max_candidates`, nearest first.
//! 3. **Widen**: with no candidate, retry once with the radius multiplied by
//!    `radius_widen_factor`.
//! 4. **Nearest fit**: if still none, the nearest active destination meeting
//!    the hard constraints at any distance, ignoring load balance.  The
//!    unit's avoid list is dropped only when nothing else fits.
//! 5. **Soft-excluded fallback**: with no active destination left, steps 1-4
//!    run again over every open destination and the result is flagged
//!    `soft_excluded`.  None at all fails the unit (`ConstraintUnsatisfiable`).
//! 6. **Route & score**: one multi-target search from the unit's nearest node
//!    to every candidate, then the weighted score plus the balance guard.
//!    Candidates with a clean path always rank ahead of congested ones.
//! 7. **Reserve**: `reserve_exact(size)` in rank order; losing every race
//!    re-reads the registry and retries up to `max_local_retries` times.
//!
//! No road path to any candidate substitutes a straight line (flagged for
//! manual review).  After the internal deadline, remaining units skip
//! routing and scoring, take the nearest eligible destination, and are listed
//! for a background re-run.  A fast-path unit that loses every race falls
//! back to full placement.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use ef_capacity::{CapacityError, CapacityEvent, CapacityRegistry, DestinationSnapshot, RegistrySnapshot};
use ef_congestion::{CongestionEstimator, CongestionSnapshot};
use ef_core::{
    DestinationId, EdgeId, EngineConfig, Epoch, FamilyId, FeatureSet, NodeId, RequesterId,
    ScoringWeights, SolverConfig, Timestamp, ZoneGrid, ZoneId,
};
use ef_spatial::{
    AStarRouter, CongestionView, EdgeCostModel, Path, PathConstraints, RoadNetwork, Router,
};

use crate::assignment::{Assignment, AssignmentFlags, AssignmentStatus, IdSource};
use crate::request::{EvacRequest, PriorityMarkers};
use crate::scoring::{Candidate, LoadLedger, ScoreInputs, apply_balance_guard, rank, score};
use crate::units::{Unit, form_units};
use crate::{SolverError, SolverResult};

// ── Context & outcome ─────────────────────────────────────────────────────────

/// Shared state the solver reads and reserves against.
#[derive(Copy, Clone)]
pub struct SolveContext<'a> {
    pub network:    &'a RoadNetwork,
    pub registry:   &'a CapacityRegistry,
    pub congestion: &'a CongestionEstimator,
}

/// A unit the solver could not place.  All members fail together.
#[derive(Debug)]
pub struct UnitFailure {
    pub requesters: Vec<RequesterId>,
    pub family:     Option<FamilyId>,
    pub error:      SolverError,
}

/// Result of one solve.
#[derive(Debug, Default)]
pub struct SolveOutcome {
    pub epoch:       Epoch,
    pub assignments: Vec<Assignment>,
    pub failures:    Vec<UnitFailure>,
    /// Requesters placed on the deadline fast path, to be re-solved.
    pub rerun:       Vec<RequesterId>,
    /// Threshold crossings caused by this solve's reservations.
    pub events:      Vec<CapacityEvent>,
}

impl SolveOutcome {
    pub fn degraded(&self) -> impl Iterator<Item = &Assignment> {
        self.assignments.iter().filter(|a| a.is_degraded())
    }

    fn absorb(&mut self, other: SolveOutcome) {
        self.assignments.extend(other.assignments);
        self.failures.extend(other.failures);
        self.rerun.extend(other.rerun);
        self.events.extend(other.events);
    }
}

// ── Solver ────────────────────────────────────────────────────────────────────

/// Assigns units to destinations.  Stateless between calls apart from the id
/// source; the caller owns the load ledger.
pub struct Solver {
    weights:             ScoringWeights,
    cfg:                 SolverConfig,
    planned_load_factor: f64,
    zone_grid:           ZoneGrid,
    router:              Box<dyn Router>,
    ids:                 IdSource,
}

impl Solver {
    pub fn new(config: &EngineConfig, router: Box<dyn Router>) -> Self {
        Self {
            weights:             config.scoring.clone(),
            cfg:                 config.solver.clone(),
            planned_load_factor: config.congestion.planned_load_factor,
            zone_grid:           config.zone_grid,
            router,
            ids:                 IdSource::new(),
        }
    }

    /// Solver with the congestion-aware A* router built from `config`.
    pub fn with_default_router(config: &EngineConfig) -> Self {
        let cost = EdgeCostModel::new(&config.routing, config.congestion.congested_threshold);
        Self::new(config, Box::new(AStarRouter::new(cost)))
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn set_weights(&mut self, weights: ScoringWeights) {
        self.weights = weights;
    }

    pub fn config(&self) -> &SolverConfig {
        &self.cfg
    }

    pub fn router(&self) -> &dyn Router {
        self.router.as_ref()
    }

    pub fn ids(&self) -> &IdSource {
        &self.ids
    }

    pub fn zone_grid(&self) -> &ZoneGrid {
        &self.zone_grid
    }

    /// Group, order, and place `requests` sequentially in one new epoch.
    pub fn assign(
        &self,
        ctx:      SolveContext<'_>,
        requests: Vec<EvacRequest>,
        markers:  &PriorityMarkers,
        ledger:   &mut LoadLedger,
        now:      Timestamp,
    ) -> SolveOutcome {
        let units = form_units(requests, markers, &self.zone_grid);
        self.assign_units(ctx, units, ledger, now)
    }

    /// Place pre-formed units (already in processing order) in one new epoch.
    pub fn assign_units(
        &self,
        ctx:    SolveContext<'_>,
        units:  Vec<Unit>,
        ledger: &mut LoadLedger,
        now:    Timestamp,
    ) -> SolveOutcome {
        let epoch = ledger.advance();
        let deadline = Instant::now() + Duration::from_millis(self.cfg.deadline_ms);
        self.run_batch(ctx, units, ledger, now, epoch, deadline)
    }

    /// Like [`assign`](Self::assign), but zones are solved independently
    /// (in parallel with the `parallel` feature).
    ///
    /// Each zone starts from a copy of the epoch-start ledger; the per-zone
    /// deltas are merged into `ledger` once every zone has finished.
    pub fn assign_zoned(
        &self,
        ctx:      SolveContext<'_>,
        requests: Vec<EvacRequest>,
        markers:  &PriorityMarkers,
        ledger:   &mut LoadLedger,
        now:      Timestamp,
    ) -> SolveOutcome {
        let mut zones: BTreeMap<ZoneId, Vec<Unit>> = BTreeMap::new();
        for unit in form_units(requests, markers, &self.zone_grid) {
            zones.entry(unit.zone).or_default().push(unit);
        }

        let epoch = ledger.advance();
        let deadline = Instant::now() + Duration::from_millis(self.cfg.deadline_ms);
        let base = ledger.clone();
        let zone_count = zones.len();

        let run = |units: Vec<Unit>| {
            let mut local = base.clone();
            let out = self.run_batch(ctx, units, &mut local, now, epoch, deadline);
            let delta = local.delta_since(&base);
            (out, delta)
        };

        #[cfg(not(feature = "parallel"))]
        let results: Vec<(SolveOutcome, Vec<i64>)> =
            zones.into_values().map(run).collect();

        #[cfg(feature = "parallel")]
        let results: Vec<(SolveOutcome, Vec<i64>)> = {
            use rayon::prelude::*;
            zones.into_values().collect::<Vec<_>>().into_par_iter().map(run).collect()
        };

        let mut outcome = SolveOutcome { epoch, ..SolveOutcome::default() };
        for (out, delta) in results {
            ledger.merge_delta(&delta);
            outcome.absorb(out);
        }
        debug!(%epoch, zones = zone_count, assigned = outcome.assignments.len(), "zoned batch merged");
        outcome
    }

    fn run_batch(
        &self,
        ctx:      SolveContext<'_>,
        units:    Vec<Unit>,
        ledger:   &mut LoadLedger,
        now:      Timestamp,
        epoch:    Epoch,
        deadline: Instant,
    ) -> SolveOutcome {
        let mut batch = Batch::new(self, ctx, now, epoch);
        let total = units.len();
        for (i, unit) in units.into_iter().enumerate() {
            if !batch.late && Instant::now() >= deadline {
                batch.late = true;
                warn!(%epoch, pending = total - i, "solver deadline exceeded; finishing on fast path");
            }
            let pending = total - i;
            batch.solve_unit(unit, ledger, pending);
        }
        batch.out
    }
}

// ── Batch view of congestion ──────────────────────────────────────────────────

/// Snapshot levels plus the planned load this batch has added since.
struct BatchView {
    snap:     CongestionSnapshot,
    extra:    Vec<f64>,
    expected: Vec<f64>,
    factor:   f64,
}

impl BatchView {
    fn add_planned(&mut self, edges: &[EdgeId], n: u32) {
        for e in edges {
            if let (Some(x), Some(&cap)) = (self.extra.get_mut(e.index()), self.expected.get(e.index())) {
                *x += self.factor * n as f64 / cap;
            }
        }
    }
}

impl CongestionView for BatchView {
    fn level(&self, edge: EdgeId) -> f64 {
        self.snap.level(edge) + self.extra.get(edge.index()).copied().unwrap_or(0.0)
    }
}

// ── Batch ─────────────────────────────────────────────────────────────────────

struct Batch<'s, 'a> {
    solver:   &'s Solver,
    ctx:      SolveContext<'a>,
    now:      Timestamp,
    epoch:    Epoch,
    late:     bool,
    snapshot: RegistrySnapshot,
    /// Seats this batch reserved since `snapshot` was taken.
    used:     Vec<u32>,
    view:     BatchView,
    out:      SolveOutcome,
}

/// Which destinations a candidate search admits.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Admit {
    /// Accepting new assignments.
    Active,
    /// Not closed, including full or filling ones.
    Open,
}

impl Admit {
    fn admits(self, s: &DestinationSnapshot) -> bool {
        match self {
            Admit::Active => !s.is_excluded(),
            Admit::Open   => !s.closed,
        }
    }
}

/// Candidates for one unit and how they were found.
struct Selection {
    cands:   Vec<DestinationId>,
    flags:   AssignmentFlags,
    /// Score the load term and apply the balance guard.
    balance: bool,
    admit:   Admit,
}

/// Outcome of one placement attempt.
enum Attempt {
    Placed(Vec<Assignment>),
    /// Live registry disagreed with the snapshot; re-read and retry.
    Stale(SolverError),
    Failed(SolverError),
}

impl<'s, 'a> Batch<'s, 'a> {
    fn new(solver: &'s Solver, ctx: SolveContext<'a>, now: Timestamp, epoch: Epoch) -> Self {
        let snapshot = ctx.registry.snapshot(now);
        let used = vec![0; snapshot.len()];
        let expected = ctx
            .network
            .edge_capacity_per_hour
            .iter()
            .map(|&c| (c as f64).max(1.0))
            .collect();
        let view = BatchView {
            snap:   ctx.congestion.snapshot(now),
            extra:  vec![0.0; ctx.network.edge_count()],
            expected,
            factor: solver.planned_load_factor,
        };
        Self {
            solver,
            ctx,
            now,
            epoch,
            late: false,
            snapshot,
            used,
            view,
            out: SolveOutcome { epoch, ..SolveOutcome::default() },
        }
    }

    fn cfg(&self) -> &SolverConfig {
        &self.solver.cfg
    }

    fn refresh(&mut self) {
        self.snapshot = self.ctx.registry.snapshot(self.now);
        self.used = vec![0; self.snapshot.len()];
    }

    /// Re-read one destination after this batch reserved at it, so its
    /// exclusion status is current for the next unit.
    fn resync(&mut self, dest: DestinationId, size: u32) {
        let fresh = self.ctx.registry.snapshot_of(dest, self.now);
        match (fresh, self.snapshot.destinations.get_mut(dest.index())) {
            (Ok(fresh), Some(slot)) => {
                *slot = fresh;
                if let Some(u) = self.used.get_mut(dest.index()) {
                    *u = 0;
                }
            }
            _ => {
                if let Some(u) = self.used.get_mut(dest.index()) {
                    *u += size;
                }
            }
        }
    }

    fn remaining(&self, dest: DestinationId) -> u32 {
        let Some(s) = self.snapshot.get(dest) else { return 0 };
        s.remaining().saturating_sub(self.used.get(dest.index()).copied().unwrap_or(0))
    }

    fn solve_unit(&mut self, unit: Unit, ledger: &mut LoadLedger, pending: usize) {
        let retries = self.cfg().max_local_retries;
        let mut attempt = 0;
        loop {
            let result = if self.late {
                self.fast_path(&unit, ledger, pending)
            } else {
                self.place(&unit, ledger)
            };
            match result {
                Attempt::Placed(assignments) => {
                    if self.late {
                        self.out.rerun.extend(unit.requesters());
                    }
                    self.out.assignments.extend(assignments);
                    return;
                }
                Attempt::Stale(_) if attempt < retries => {
                    attempt += 1;
                    debug!(lead = %unit.lead().requester, attempt, "reservation lost a race; re-reading registry");
                    self.refresh();
                }
                Attempt::Stale(error) | Attempt::Failed(error) => {
                    warn!(lead = %unit.lead().requester, size = unit.size(), %error, "unit could not be placed");
                    self.out.failures.push(UnitFailure {
                        requesters: unit.requesters(),
                        family:     unit.lead().family,
                        error,
                    });
                    return;
                }
            }
        }
    }

    // ── Candidate filtering ───────────────────────────────────────────────

    /// Destinations within `radius_m` admitted by `admit` that offer every
    /// required feature and have room, nearest first, at most `max_candidates`.
    fn eligible(
        &self,
        unit:     &Unit,
        required: FeatureSet,
        radius_m: f32,
        avoid:    &[DestinationId],
        admit:    Admit,
    ) -> Vec<DestinationId> {
        let size = unit.size();
        self.ctx
            .network
            .destinations_within(unit.location(), radius_m)
            .into_iter()
            .map(|(d, _)| d)
            .filter(|d| !avoid.contains(d))
            .filter(|&d| {
                self.snapshot
                    .get(d)
                    .is_some_and(|s| admit.admits(s) && s.features.contains_all(required))
            })
            .filter(|&d| self.remaining(d) >= size)
            .take(self.cfg().max_candidates)
            .collect()
    }

    /// Nearest admitted destination with the features and room, at any
    /// distance.  Avoided destinations lose to any other.
    fn nearest_fit(
        &self,
        unit:     &Unit,
        required: FeatureSet,
        avoid:    &[DestinationId],
        admit:    Admit,
    ) -> Option<DestinationId> {
        let size = unit.size();
        let at = unit.location();
        self.snapshot
            .iter()
            .filter(|s| admit.admits(s) && s.features.contains_all(required))
            .filter(|s| self.remaining(s.id) >= size)
            .map(|s| (avoid.contains(&s.id), at.distance_m(s.location), s.id))
            .min_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)).then(a.2.cmp(&b.2)))
            .map(|(_, _, id)| id)
    }

    fn pinnable(&self, dest: DestinationId, unit: &Unit, required: FeatureSet, admit: Admit) -> bool {
        self.snapshot.get(dest).is_some_and(|s| {
            admit.admits(s) && s.features.contains_all(required) && self.remaining(dest) >= unit.size()
        })
    }

    /// Candidate list for `unit`: active destinations first, soft-excluded
    /// ones only when no active destination fits.
    fn candidates(&self, unit: &Unit) -> SolverResult<Selection> {
        let required = unit.hard_features(self.cfg().medical_requires_facility);
        let avoid = unit.avoid.as_slice();
        let radius = self.cfg().search_radius_m;
        let widened = radius * self.cfg().radius_widen_factor;

        for admit in [Admit::Active, Admit::Open] {
            let mut flags = AssignmentFlags { soft_excluded: admit == Admit::Open, ..AssignmentFlags::default() };

            if let Some(pin) = unit.pinned.filter(|&d| self.pinnable(d, unit, required, admit)) {
                return Ok(Selection { cands: vec![pin], flags, balance: false, admit });
            }

            let mut cands = self.eligible(unit, required, radius, avoid, admit);
            if cands.is_empty() {
                cands = self.eligible(unit, required, widened, avoid, admit);
                flags.widened_radius = true;
            }
            if !cands.is_empty() {
                return Ok(Selection { cands, flags, balance: true, admit });
            }

            if let Some(d) = self.nearest_fit(unit, required, avoid, admit) {
                flags.nearest_fit = true;
                return Ok(Selection { cands: vec![d], flags, balance: false, admit });
            }
        }
        Err(SolverError::ConstraintUnsatisfiable {
            lead: unit.lead().requester,
            size: unit.size(),
        })
    }

    // ── Full placement ────────────────────────────────────────────────────

    fn place(&mut self, unit: &Unit, ledger: &mut LoadLedger) -> Attempt {
        let Selection { cands, mut flags, balance, admit } = match self.candidates(unit) {
            Ok(sel) => sel,
            Err(e) => return Attempt::Failed(e),
        };

        let constraints = PathConstraints {
            accessibility_need: unit.accessibility_need(),
            avoid_congested:    self.cfg().avoid_congested,
        };
        let network = self.ctx.network;
        let origin = network.nearest_node(unit.location());
        let targets: Vec<NodeId> = cands
            .iter()
            .map(|&d| network.destination_node(d).unwrap_or(NodeId::INVALID))
            .collect();

        let paths = match origin {
            Some(o) => match self.solver.router.paths_to_targets(network, &self.view, o, &targets, &constraints) {
                Ok(p) => p,
                Err(e) => return Attempt::Failed(e.into()),
            },
            None => vec![None; targets.len()],
        };

        let mut routed: Vec<(DestinationId, Path)> = cands
            .iter()
            .zip(paths)
            .filter_map(|(&d, p)| p.map(|p| (d, p)))
            .collect();

        if routed.is_empty() {
            flags.straight_line = true;
            flags.needs_manual = true;
            info!(lead = %unit.lead().requester, candidates = cands.len(), "no open road path; using straight line");
            let from = origin.unwrap_or(NodeId::INVALID);
            routed = cands
                .iter()
                .map(|&d| {
                    let to_pos = self.snapshot.get(d).map_or(unit.location(), |s| s.location);
                    let to = network.destination_node(d).unwrap_or(NodeId::INVALID);
                    (d, Path::straight_line(from, unit.location(), to, to_pos))
                })
                .collect();
        }

        let mut scored = self.score_candidates(routed, ledger, balance, admit, constraints.accessibility_need);
        if balance {
            let mean = self.admitted_mean(ledger, admit);
            let floor = ledger.min_over(self.admitted(admit));
            let cfg = self.cfg();
            apply_balance_guard(&mut scored, mean, floor, unit.size(), cfg.balance_low_ratio, cfg.balance_high_ratio);
        }
        rank(&mut scored);

        let mut stale: Option<SolverError> = None;
        for c in scored {
            match self.ctx.registry.reserve_exact(c.dest, unit.size(), self.now) {
                Ok(res) => {
                    self.out.events.extend(res.events);
                    let mut flags = flags;
                    flags.congested_path = c.path.uses_congested;
                    debug!(lead = %unit.lead().requester, dest = %c.dest, score = c.score, "unit placed");
                    return Attempt::Placed(self.emit(unit, c.dest, c.path, flags, ledger));
                }
                Err(CapacityError::InsufficientCapacity { .. } | CapacityError::Closed(_)) => {
                    stale.get_or_insert(SolverError::StaleStateConflict { dest: c.dest, attempts: 1 });
                }
                Err(CapacityError::StaleStateConflict { dest, attempts }) => {
                    stale = Some(SolverError::StaleStateConflict { dest, attempts });
                }
                Err(e) => return Attempt::Failed(e.into()),
            }
        }
        Attempt::Stale(stale.unwrap_or(SolverError::ConstraintUnsatisfiable {
            lead: unit.lead().requester,
            size: unit.size(),
        }))
    }

    fn admitted(&self, admit: Admit) -> impl Iterator<Item = DestinationId> + '_ {
        self.snapshot.iter().filter(move |s| admit.admits(s)).map(|s| s.id)
    }

    fn admitted_mean(&self, ledger: &LoadLedger, admit: Admit) -> f64 {
        ledger.mean_over(self.admitted(admit))
    }

    fn score_candidates(
        &self,
        routed:  Vec<(DestinationId, Path)>,
        ledger:  &LoadLedger,
        balance: bool,
        admit:   Admit,
        need:    Option<f32>,
    ) -> Vec<Candidate> {
        let longest = routed.iter().map(|(_, p)| p.length_m).fold(0.0f32, f32::max) as f64;
        let mean = self.admitted_mean(ledger, admit).max(1.0);
        let weights = &self.solver.weights;
        let network = self.ctx.network;

        routed
            .into_iter()
            .map(|(dest, path)| {
                let count = ledger.count(dest);
                let inputs = ScoreInputs {
                    distance_norm:  if longest > 0.0 { path.length_m as f64 / longest } else { 0.0 },
                    exposure:       path.congestion_exposure(network, &self.view),
                    load_ratio:     if balance { count as f64 / mean } else { 0.0 },
                    access_penalty: path.accessibility_shortfall(network, need),
                };
                Candidate { dest, score: score(weights, &inputs), path, inputs, count, demoted: false }
            })
            .collect()
    }

    // ── Deadline fast path ────────────────────────────────────────────────

    fn fast_path(&mut self, unit: &Unit, ledger: &mut LoadLedger, pending: usize) -> Attempt {
        let Selection { cands, mut flags, .. } = match self.candidates(unit) {
            Ok(sel) => sel,
            Err(e) => return Attempt::Failed(e),
        };
        flags.deadline = true;
        let from = self.ctx.network.nearest_node(unit.location()).unwrap_or(NodeId::INVALID);

        for d in cands {
            if let Ok(res) = self.ctx.registry.reserve_exact(d, unit.size(), self.now) {
                self.out.events.extend(res.events);
                let to_pos = self.snapshot.get(d).map_or(unit.location(), |s| s.location);
                let to = self.ctx.network.destination_node(d).unwrap_or(NodeId::INVALID);
                let path = Path::straight_line(from, unit.location(), to, to_pos);
                return Attempt::Placed(self.emit(unit, d, path, flags, ledger));
            }
        }
        debug!(lead = %unit.lead().requester, "fast path lost every race; trying full placement");
        match self.place(unit, ledger) {
            Attempt::Failed(_) => Attempt::Failed(SolverError::OverloadTimeout { pending }),
            other => other,
        }
    }

    // ── Emission ──────────────────────────────────────────────────────────

    fn emit(
        &mut self,
        unit:   &Unit,
        dest:   DestinationId,
        path:   Path,
        flags:  AssignmentFlags,
        ledger: &mut LoadLedger,
    ) -> Vec<Assignment> {
        let size = unit.size();
        self.resync(dest, size);
        ledger.add(dest, size);
        self.ctx.congestion.add_planned(&path.edges, size);
        self.view.add_planned(&path.edges, size);

        if flags.is_degraded() {
            info!(
                lead = %unit.lead().requester,
                %dest,
                flags = %flags.describe(),
                "degraded assignment"
            );
        }

        let ids = &self.solver.ids;
        unit.members
            .iter()
            .map(|m| Assignment {
                id:                ids.assignment(),
                request:           m.clone(),
                destination:       dest,
                path_id:           ids.path(),
                path:              path.clone(),
                assigned_at:       self.now,
                epoch:             self.epoch,
                status:            AssignmentStatus::Assigned,
                flags,
                tier:              unit.tier,
                zone:              unit.zone,
                revision:          0,
                holds_reservation: true,
            })
            .collect()
    }
}
