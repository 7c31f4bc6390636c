//! The `Engine` facade and its operations.

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use ef_capacity::{CapacityChange, CapacityEvent, CapacityRegistry, Reservation};
use ef_congestion::{CongestionEstimator, LevelChange};
use ef_core::{
    DestinationId, EdgeId, EngineConfig, GeoPoint, RequesterId, ScoringWeights, Timestamp, ZoneId,
};
use ef_predict::{BottleneckRisk, FillRisk, Predictor, ZoneCompletion};
use ef_reroute::{
    AssignmentBook, AssignmentUpdate, ControllerStats, CycleReport, RerouteController, RerouteEnv,
    RerouteError, ResourceClosure, ResourceRef, TriggerKind, TriggerSender,
};
use ef_solver::{
    Assignment, AssignmentStatus, EvacRequest, LoadLedger, PriorityMarkers, SolveContext,
    SolveOutcome, Solver,
};
use ef_spatial::{EdgeStatus, RoadNetwork};

use crate::{EngineError, EngineObserver, EngineResult, EngineWarning, NoopObserver};

// ── State ─────────────────────────────────────────────────────────────────────

/// Everything that changes per assignment, guarded by one lock.
pub(crate) struct EngineState {
    pub(crate) book:       AssignmentBook,
    pub(crate) ledger:     LoadLedger,
    pub(crate) controller: RerouteController,
    pub(crate) markers:    PriorityMarkers,
    /// Set by the first assignment, cleared by `end_event`.
    pub(crate) active:     bool,
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// The flow-assignment engine.
///
/// Telemetry (`record_edge_flow`, `check_in_walk_in`, …) goes straight to the
/// lock-free registry and estimator.  Assignment, recompute and check-in
/// serialise on the engine state; the solver is read-locked for the duration
/// of a solve so weights cannot change under it.
///
/// Lock order: solver, then state, then observer.
///
/// Create via [`EngineBuilder`][crate::EngineBuilder].
pub struct Engine<O: EngineObserver = NoopObserver> {
    pub(crate) config:     EngineConfig,
    pub(crate) network:    RoadNetwork,
    pub(crate) registry:   CapacityRegistry,
    pub(crate) congestion: CongestionEstimator,
    pub(crate) predictor:  Predictor,
    pub(crate) solver:     RwLock<Solver>,
    pub(crate) state:      Mutex<EngineState>,
    pub(crate) triggers:   TriggerSender,
    pub(crate) observer:   Mutex<O>,
}

impl<O: EngineObserver> Engine<O> {
    // ── Accessors ─────────────────────────────────────────────────────────

    /// Configuration the engine was built with.  Scoring weights may since
    /// have been retuned; see [`weights`](Self::weights).
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn network(&self) -> &RoadNetwork {
        &self.network
    }

    pub fn registry(&self) -> &CapacityRegistry {
        &self.registry
    }

    pub fn congestion(&self) -> &CongestionEstimator {
        &self.congestion
    }

    pub fn predictor(&self) -> &Predictor {
        &self.predictor
    }

    /// Handle for raising recompute triggers from other threads; they are
    /// processed on the next [`tick`](Self::tick).
    pub fn trigger_sender(&self) -> TriggerSender {
        self.triggers.clone()
    }

    pub fn observer(&self) -> MutexGuard<'_, O> {
        self.observer.lock()
    }

    pub fn into_observer(self) -> O {
        self.observer.into_inner()
    }

    pub fn weights(&self) -> ScoringWeights {
        self.solver.read().weights().clone()
    }

    pub fn assignment(&self, requester: RequesterId) -> Option<Assignment> {
        self.state.lock().book.get(requester).cloned()
    }

    pub fn assignment_count(&self) -> usize {
        self.state.lock().book.len()
    }

    /// Assignments moved out of the book by [`end_event`](Self::end_event).
    pub fn archived(&self) -> Vec<Assignment> {
        self.state.lock().book.archived().to_vec()
    }

    pub fn controller_stats(&self) -> ControllerStats {
        self.state.lock().controller.stats()
    }

    pub fn is_event_active(&self) -> bool {
        self.state.lock().active
    }

    fn ctx(&self) -> SolveContext<'_> {
        SolveContext { network: &self.network, registry: &self.registry, congestion: &self.congestion }
    }

    // ── Assignment ────────────────────────────────────────────────────────

    /// Assign one requester.  The result may be degraded; check its flags.
    pub fn assign_route(&self, request: EvacRequest, now: Timestamp) -> EngineResult<Assignment> {
        let requester = request.requester;
        let out = self.assign_batch(vec![request], now)?;
        if let Some(a) = out.assignments.into_iter().find(|a| a.requester() == requester) {
            return Ok(a);
        }
        match out.failures.into_iter().next() {
            Some(f) => Err(f.error.into()),
            None => Err(EngineError::Unassigned(requester)),
        }
    }

    /// Assign a batch in priority order within one epoch.
    pub fn assign_batch(&self, requests: Vec<EvacRequest>, now: Timestamp) -> EngineResult<SolveOutcome> {
        self.solve(requests, now, false)
    }

    /// Like [`assign_batch`](Self::assign_batch), with zones solved
    /// independently.
    pub fn assign_batch_zoned(&self, requests: Vec<EvacRequest>, now: Timestamp) -> EngineResult<SolveOutcome> {
        self.solve(requests, now, true)
    }

    fn solve(&self, requests: Vec<EvacRequest>, now: Timestamp, zoned: bool) -> EngineResult<SolveOutcome> {
        let solver = self.solver.read();
        let mut guard = self.state.lock();
        let st = &mut *guard;

        // A repeat request replaces the requester's current assignment.  The
        // old seat is freed for the solve and restored if the requester
        // cannot be placed again.
        let mut repeats: Vec<RequesterId> = requests
            .iter()
            .map(|r| r.requester)
            .filter(|&r| st.book.contains(r))
            .collect();
        repeats.sort_unstable();
        repeats.dedup();
        let mut withdrawn = Vec::with_capacity(repeats.len());
        for &r in &repeats {
            match self.withdraw(st, r, now) {
                Ok(old) => withdrawn.extend(old),
                Err(e) => {
                    for old in withdrawn {
                        self.restore(st, old, now);
                    }
                    return Err(e);
                }
            }
        }

        let out = if zoned {
            solver.assign_zoned(self.ctx(), requests, &st.markers, &mut st.ledger, now)
        } else {
            solver.assign(self.ctx(), requests, &st.markers, &mut st.ledger, now)
        };

        for a in &out.assignments {
            if repeats.binary_search(&a.requester()).is_err() {
                self.predictor.zones().record_assigned(a.zone, 1);
            }
            st.book.insert(a.clone());
        }
        for old in withdrawn {
            let r = old.requester();
            if out.failures.iter().any(|f| f.requesters.contains(&r)) {
                self.restore(st, old, now);
            }
        }
        if !st.active {
            st.active = true;
            info!(epoch = %out.epoch, "evacuation event started");
        }
        if !out.rerun.is_empty() {
            st.controller.submit(
                TriggerKind::Rerun { epoch: out.epoch, requesters: out.rerun.clone() },
                now,
            );
        }
        self.publish_outcome(&out, now);
        Ok(out)
    }

    /// Drop a requester's assignment, returning its seat and planned load.
    fn withdraw(&self, st: &mut EngineState, requester: RequesterId, now: Timestamp) -> EngineResult<Option<Assignment>> {
        let Some(old) = st.book.remove(requester) else { return Ok(None) };
        if old.holds_reservation {
            if let Err(e) = self.registry.release(old.destination, 1, now) {
                st.book.insert(old);
                return Err(e.into());
            }
            if old.status.is_open() {
                self.congestion.remove_planned(&old.path.edges, 1);
            }
            st.ledger.remove(old.destination, 1);
        }
        debug!(%requester, dest = %old.destination, "previous assignment withdrawn");
        Ok(Some(old))
    }

    /// Put a withdrawn assignment back, re-taking its seat.
    fn restore(&self, st: &mut EngineState, old: Assignment, now: Timestamp) {
        let requester = old.requester();
        if old.holds_reservation {
            if let Err(error) = self.registry.reserve_exact(old.destination, 1, now) {
                warn!(%requester, dest = %old.destination, %error, "previous seat was taken; requester left unassigned");
                return;
            }
            if old.status.is_open() {
                self.congestion.add_planned(&old.path.edges, 1);
            }
            st.ledger.add(old.destination, 1);
        }
        debug!(%requester, dest = %old.destination, "previous assignment kept");
        st.book.insert(old);
    }

    // ── Recompute ─────────────────────────────────────────────────────────

    /// Recompute the subset `trigger` selects, now.  Returns the committed
    /// changes.
    pub fn recalculate_routes(&self, trigger: TriggerKind, now: Timestamp) -> EngineResult<Vec<AssignmentUpdate>> {
        let solver = self.solver.read();
        let mut guard = self.state.lock();
        Ok(self.recompute(&solver, &mut guard, trigger, now)?.updates)
    }

    /// Move `requester` to a different destination if one fits; otherwise
    /// the nearest destination meeting their constraints, which may be the
    /// current one.
    pub fn get_alternative_routes(
        &self,
        requester: RequesterId,
        reason:    impl Into<String>,
        now:       Timestamp,
    ) -> EngineResult<Assignment> {
        let solver = self.solver.read();
        let mut guard = self.state.lock();
        let st = &mut *guard;
        match st.book.get(requester) {
            None => return Err(RerouteError::UnknownRequester(requester).into()),
            Some(a) if a.status == AssignmentStatus::Arrived => {
                return Err(RerouteError::AlreadyArrived(requester).into());
            }
            Some(_) => {}
        }

        let trigger = TriggerKind::Alternative { requester, reason: reason.into() };
        let report = self.recompute(&solver, st, trigger, now)?;
        if let Some(f) = report.failures.into_iter().find(|f| f.requesters.contains(&requester)) {
            return Err(f.error.into());
        }
        st.book.get(requester).cloned().ok_or(EngineError::Unassigned(requester))
    }

    /// Close an edge or destination and reroute everyone it affects.
    pub fn resource_closure(&self, closure: ResourceClosure, now: Timestamp) -> EngineResult<Vec<AssignmentUpdate>> {
        let solver = self.solver.read();
        let mut guard = self.state.lock();
        match closure.resource {
            ResourceRef::Edge(e) => {
                if self.network.set_edge_closed(e, true)? {
                    self.observer.lock().on_edge_status(e, EdgeStatus::Closed, now);
                }
            }
            ResourceRef::Destination(d) => {
                if let Some(ev) = self.registry.set_closed(d, true)? {
                    self.observer.lock().on_destination_event(&ev, now);
                }
            }
        }
        warn!(resource = %closure.resource, reason = %closure.reason, "resource closed");

        let trigger = TriggerKind::ManualClosure { resource: closure.resource, reason: closure.reason };
        Ok(self.recompute(&solver, &mut guard, trigger, now)?.updates)
    }

    /// Lift a closure.  Nobody is moved back automatically.
    pub fn reopen(&self, resource: ResourceRef, now: Timestamp) -> EngineResult<()> {
        match resource {
            ResourceRef::Edge(e) => {
                if self.network.set_edge_closed(e, false)? {
                    let status = self.congestion.status(&self.network, e);
                    self.observer.lock().on_edge_status(e, status, now);
                }
            }
            ResourceRef::Destination(d) => {
                if let Some(ev) = self.registry.set_closed(d, false)? {
                    self.observer.lock().on_destination_event(&ev, now);
                }
            }
        }
        info!(%resource, "resource reopened");
        Ok(())
    }

    /// Change a destination's capacity.  Lowering it below occupancy queues a
    /// capacity breach that moves the overflow on the next tick.
    pub fn set_destination_capacity(
        &self,
        dest:         DestinationId,
        max_capacity: u32,
        now:          Timestamp,
    ) -> EngineResult<CapacityChange> {
        let change = self.registry.set_capacity(dest, max_capacity, now)?;
        if change.overflow > 0 {
            self.state.lock().controller.submit(TriggerKind::CapacityBreach { dest }, now);
        }
        self.publish_events(&change.events, now);
        Ok(change)
    }

    /// One controller step: detect new breaches, raise the scheduled trigger
    /// when due, and process pending triggers.
    pub fn tick(&self, now: Timestamp) -> EngineResult<CycleReport> {
        let solver = self.solver.read();
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let raised = st.controller.poll(&self.network, &self.congestion, &self.registry, now);
        if !raised.is_empty() {
            debug!(raised = raised.len(), "triggers raised");
        }
        self.run_cycle(&solver, st, now)
    }

    /// Submit `trigger` and run cycles until it has been processed.
    fn recompute(
        &self,
        solver:  &Solver,
        st:      &mut EngineState,
        trigger: TriggerKind,
        now:     Timestamp,
    ) -> EngineResult<CycleReport> {
        let version = st.controller.submit(trigger, now);
        let mut total = CycleReport::default();
        loop {
            let r = self.run_cycle(solver, st, now)?;
            let done = r.processed == 0;
            total.processed += r.processed;
            total.updates.extend(r.updates);
            total.failures.extend(r.failures);
            total.discarded.extend(r.discarded);
            total.events.extend(r.events);
            if done || !st.controller.is_pending(version) {
                break;
            }
        }
        Ok(total)
    }

    fn run_cycle(&self, solver: &Solver, st: &mut EngineState, now: Timestamp) -> EngineResult<CycleReport> {
        let env = RerouteEnv { solver, ctx: self.ctx(), markers: &st.markers };
        let report = st.controller.run_cycle(&mut st.book, &mut st.ledger, env, now)?;
        self.publish_cycle(&st.book, &report, now);
        Ok(report)
    }

    // ── Telemetry ─────────────────────────────────────────────────────────

    pub fn record_edge_flow(&self, edge: EdgeId, observed_per_hour: f64, now: Timestamp) -> EngineResult<LevelChange> {
        let change = self.congestion.record_flow(edge, observed_per_hour, now)?;
        self.publish_level(change, now);
        Ok(change)
    }

    /// Location pings crossing `edge` during `interval_secs`.
    pub fn record_movement(
        &self,
        edge:          EdgeId,
        count:         u32,
        interval_secs: u64,
        now:           Timestamp,
    ) -> EngineResult<LevelChange> {
        let change = self.congestion.record_movement(edge, count, interval_secs, now)?;
        self.publish_level(change, now);
        Ok(change)
    }

    /// A sensor reporting the flow ratio directly.
    pub fn record_edge_level(&self, edge: EdgeId, level: f64, now: Timestamp) -> EngineResult<LevelChange> {
        let change = self.congestion.set_level(edge, level, now)?;
        self.publish_level(change, now);
        Ok(change)
    }

    /// Record a requester's progress.  Arrival is final and frees the
    /// planned load on their path.
    pub fn check_in(&self, requester: RequesterId, status: AssignmentStatus, now: Timestamp) -> EngineResult<()> {
        let mut st = self.state.lock();
        let was = st
            .book
            .get(requester)
            .map(|a| a.status)
            .ok_or(RerouteError::UnknownRequester(requester))?;
        let a = st.book.set_status(requester, status)?;
        if status == AssignmentStatus::Arrived && was != AssignmentStatus::Arrived {
            if a.holds_reservation {
                self.congestion.remove_planned(&a.path.edges, 1);
            }
            self.predictor.zones().record_arrival(a.zone, 1, now);
            debug!(%requester, dest = %a.destination, "arrived");
        }
        Ok(())
    }

    /// People arriving at `dest` without an assignment.
    pub fn check_in_walk_in(&self, dest: DestinationId, n: u32, now: Timestamp) -> EngineResult<Reservation> {
        let res = self.registry.check_in_walk_in(dest, n, now)?;
        self.publish_events(&res.events, now);
        Ok(res)
    }

    pub fn update_location(&self, requester: RequesterId, location: GeoPoint) -> EngineResult<()> {
        Ok(self.state.lock().book.update_location(requester, location)?)
    }

    pub fn register_zone_population(&self, zone: ZoneId, population: u64) {
        self.predictor.zones().set_population(zone, population);
    }

    /// Known vulnerable locations (care homes, hospitals) from pre-event
    /// mapping.  Standard requesters inside the radius are treated as
    /// vulnerable.
    pub fn add_priority_marker(&self, location: GeoPoint, radius_m: f32) {
        self.state.lock().markers.add(location, radius_m);
    }

    // ── Prediction ────────────────────────────────────────────────────────

    pub fn predict_bottlenecks(&self, window_secs: u64, now: Timestamp) -> Vec<BottleneckRisk> {
        self.predictor.predict_bottlenecks(&self.network, &self.congestion, window_secs, now)
    }

    pub fn predict_fill_risks(&self, now: Timestamp) -> Vec<FillRisk> {
        self.predictor.predict_fill_risks(&self.registry, now)
    }

    pub fn predict_zone_completion(&self, zone: ZoneId, now: Timestamp) -> ZoneCompletion {
        self.predictor.predict_zone_completion(zone, now)
    }

    pub fn zone_completions(&self, now: Timestamp) -> Vec<ZoneCompletion> {
        self.predictor.zone_completions(now)
    }

    // ── Event lifecycle ───────────────────────────────────────────────────

    /// Replace the scoring weights.  Rejected while an event is active.
    pub fn retune_weights(&self, weights: ScoringWeights) -> EngineResult<()> {
        let mut solver = self.solver.write();
        if self.state.lock().active {
            return Err(EngineError::EventActive);
        }
        let mut cfg = self.config.clone();
        cfg.scoring = weights.clone();
        cfg.validate()?;
        info!(?weights, "scoring weights retuned");
        solver.set_weights(weights);
        Ok(())
    }

    /// Archive every assignment and reset the epoch ledger and zone
    /// counters.  Occupancy is left as is.  Returns the number archived.
    pub fn end_event(&self) -> usize {
        let mut st = self.state.lock();
        for a in st.book.iter().filter(|a| a.holds_reservation && a.status.is_open()) {
            self.congestion.remove_planned(&a.path.edges, 1);
        }
        let archived = st.book.archive_all();
        st.ledger.reset();
        st.active = false;
        self.predictor.zones().clear();
        info!(archived, "evacuation event ended");
        archived
    }

    // ── Publication ───────────────────────────────────────────────────────

    fn publish_level(&self, c: LevelChange, now: Timestamp) {
        let closed = self.network.is_closed(c.edge);
        let threshold = self.config.congestion.congested_threshold;
        let before = EdgeStatus::classify(closed, c.previous, threshold);
        let after = EdgeStatus::classify(closed, c.level, threshold);
        if before != after {
            self.observer.lock().on_edge_status(c.edge, after, now);
        }
    }

    fn publish_events(&self, events: &[CapacityEvent], now: Timestamp) {
        if events.is_empty() {
            return;
        }
        let mut obs = self.observer.lock();
        for e in events {
            obs.on_destination_event(e, now);
        }
    }

    fn publish_outcome(&self, out: &SolveOutcome, now: Timestamp) {
        let mut obs = self.observer.lock();
        for e in &out.events {
            obs.on_destination_event(e, now);
        }
        for a in &out.assignments {
            obs.on_assignment(a);
            if a.is_degraded() {
                obs.on_degraded(a);
            }
        }
        for f in &out.failures {
            obs.on_warning(&EngineWarning::Unplaced {
                requesters: f.requesters.clone(),
                reason:     f.error.to_string(),
                at:         now,
            });
        }
        if !out.rerun.is_empty() {
            obs.on_warning(&EngineWarning::RerunScheduled {
                epoch:      out.epoch,
                requesters: out.rerun.len(),
                at:         now,
            });
        }
    }

    fn publish_cycle(&self, book: &AssignmentBook, report: &CycleReport, now: Timestamp) {
        let mut obs = self.observer.lock();
        for e in &report.events {
            obs.on_destination_event(e, now);
        }
        if !report.updates.is_empty() {
            obs.on_updates(&report.updates, now);
        }
        for u in report.updates.iter().filter(|u| u.flags.is_degraded()) {
            if let Some(a) = book.get(u.requester) {
                obs.on_degraded(a);
            }
        }
        for f in &report.failures {
            obs.on_warning(&EngineWarning::Unplaced {
                requesters: f.requesters.clone(),
                reason:     f.error.to_string(),
                at:         now,
            });
        }
    }
}
