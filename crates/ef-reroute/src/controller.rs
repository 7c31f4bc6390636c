//! The rerouting controller.
//!
//! # Cycle
//!
//! ```text
//! poll ──▶ inbox ──drain/coalesce──▶ pending ──take N by version──▶
//!     begin (select subset, release seats, mark Rerouted)
//!     solve (ef-solver)
//!     complete (newer version for the key? discard : commit)
//! ```
//!
//! Breach detection in [`poll`](RerouteController::poll) is edge-triggered:
//! a trigger is raised when an edge or destination enters breach, and the
//! detector re-arms when it leaves.  Scheduled triggers catch anything the
//! edge-triggered path missed.

use std::collections::{BTreeMap, BTreeSet};
use std::collections::btree_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, unbounded};
use rustc_hash::FxHashSet;
use tracing::{debug, info, warn};

use ef_capacity::{CapacityEvent, CapacityRegistry, DestinationStatus};
use ef_core::{DestinationId, EdgeId, EngineConfig, RequesterId, RerouteConfig, Timestamp};
use ef_congestion::CongestionEstimator;
use ef_solver::{
    AssignmentStatus, LoadLedger, PriorityMarkers, SolveContext, SolveOutcome, Solver, Unit,
    UnitFailure, form_units,
};
use ef_spatial::RoadNetwork;

use crate::book::{AssignmentBook, AssignmentUpdate};
use crate::trigger::{ResourceRef, SubsetKey, Trigger, TriggerKind, TriggerSender};
use crate::RerouteResult;

// ── Environment & results ─────────────────────────────────────────────────────

/// Everything a reroute cycle reads or reserves against.
#[derive(Copy, Clone)]
pub struct RerouteEnv<'a> {
    pub solver:  &'a Solver,
    pub ctx:     SolveContext<'a>,
    pub markers: &'a PriorityMarkers,
}

impl RerouteEnv<'_> {
    fn network(&self) -> &RoadNetwork {
        self.ctx.network
    }

    fn registry(&self) -> &CapacityRegistry {
        self.ctx.registry
    }

    fn congestion(&self) -> &CongestionEstimator {
        self.ctx.congestion
    }
}

/// A trigger whose subset has been released and is waiting for the solver.
#[derive(Debug)]
pub struct InFlight {
    pub trigger:  Trigger,
    /// Requesters moved to `Rerouted`, including pulled-in family members.
    pub affected: Vec<RequesterId>,
    pub units:    Vec<Unit>,
}

/// How an in-flight recompute ended.
#[derive(Debug)]
pub enum Completion {
    Committed {
        updates:  Vec<AssignmentUpdate>,
        failures: Vec<UnitFailure>,
    },
    /// A newer trigger for the same subset arrived; the result was dropped
    /// and its reservations released.
    Discarded { version: u64, superseded_by: u64 },
}

/// Summary of one [`run_cycle`](RerouteController::run_cycle).
#[derive(Debug, Default)]
pub struct CycleReport {
    pub processed: usize,
    pub updates:   Vec<AssignmentUpdate>,
    pub failures:  Vec<UnitFailure>,
    /// Versions whose results were discarded.
    pub discarded: Vec<u64>,
    /// Threshold crossings caused by the cycle's reservations.
    pub events:    Vec<CapacityEvent>,
}

/// Running counters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub received:  u64,
    pub coalesced: u64,
    pub committed: u64,
    pub discarded: u64,
    pub rerouted:  u64,
}

// ── Controller ────────────────────────────────────────────────────────────────

pub struct RerouteController {
    cfg:            RerouteConfig,
    sender:         TriggerSender,
    rx:             Receiver<Trigger>,
    /// Newest trigger per subset key.
    pending:        BTreeMap<SubsetKey, Trigger>,
    breached_edges: FxHashSet<EdgeId>,
    saturated:      FxHashSet<DestinationId>,
    last_scheduled: Timestamp,
    stats:          ControllerStats,
}

impl RerouteController {
    pub fn new(config: &EngineConfig, now: Timestamp) -> Self {
        let (tx, rx) = unbounded();
        Self {
            cfg:            config.reroute.clone(),
            sender:         TriggerSender { tx, versions: Arc::new(AtomicU64::new(0)) },
            rx,
            pending:        BTreeMap::new(),
            breached_edges: FxHashSet::default(),
            saturated:      FxHashSet::default(),
            last_scheduled: now,
            stats:          ControllerStats::default(),
        }
    }

    /// Handle for telemetry threads.
    pub fn sender(&self) -> TriggerSender {
        self.sender.clone()
    }

    pub fn stats(&self) -> ControllerStats {
        self.stats
    }

    /// Triggers waiting to be processed (after coalescing).
    pub fn pending_len(&mut self) -> usize {
        self.drain();
        self.pending.len()
    }

    /// `true` while the trigger stamped `version` waits in the queue (it has
    /// been neither processed nor coalesced into a newer one).
    pub fn is_pending(&mut self, version: u64) -> bool {
        self.drain();
        self.pending.values().any(|t| t.version == version)
    }

    /// Latest version handed out so far.
    pub fn current_version(&self) -> u64 {
        self.sender.versions.load(Ordering::Acquire)
    }

    /// Stamp and queue a trigger from the controller's own thread.
    pub fn submit(&mut self, kind: TriggerKind, now: Timestamp) -> u64 {
        let version = self.sender.versions.fetch_add(1, Ordering::AcqRel) + 1;
        self.enqueue(Trigger { version, kind, raised_at: now });
        version
    }

    fn drain(&mut self) {
        while let Ok(t) = self.rx.try_recv() {
            self.enqueue(t);
        }
    }

    fn enqueue(&mut self, t: Trigger) {
        self.stats.received += 1;
        match self.pending.entry(t.key()) {
            Entry::Vacant(v) => {
                v.insert(t);
            }
            Entry::Occupied(mut o) => {
                self.stats.coalesced += 1;
                let cur = o.get_mut();
                if t.version < cur.version {
                    return;
                }
                // Requester-list triggers of one key accumulate.
                let carried = listed_requesters(&mut cur.kind).map(std::mem::take).unwrap_or_default();
                *cur = t;
                if let Some(requesters) = listed_requesters(&mut cur.kind) {
                    requesters.extend(carried);
                    requesters.sort_unstable();
                    requesters.dedup();
                }
            }
        }
    }

    // ── Detection ─────────────────────────────────────────────────────────

    /// Raise triggers for edges and destinations that entered breach since
    /// the last poll, plus the scheduled trigger when due.  Returns the
    /// versions raised.
    pub fn poll(
        &mut self,
        network:    &RoadNetwork,
        congestion: &CongestionEstimator,
        registry:   &CapacityRegistry,
        now:        Timestamp,
    ) -> Vec<u64> {
        let mut raised = Vec::new();

        let breached: FxHashSet<EdgeId> = congestion.breached_edges().into_iter().collect();
        let mut entering: Vec<EdgeId> = breached
            .iter()
            .copied()
            .filter(|e| !self.breached_edges.contains(e) && !network.is_closed(*e))
            .collect();
        entering.sort_unstable();
        for edge in entering {
            debug!(%edge, level = congestion.level(edge), "edge entered breach");
            raised.push(self.submit(TriggerKind::CongestionBreach { edge }, now));
        }
        self.breached_edges = breached;

        let snapshot = registry.snapshot(now);
        let saturated: FxHashSet<DestinationId> = snapshot
            .iter()
            .filter(|s| s.status == DestinationStatus::Full || s.occupancy > s.max_capacity)
            .map(|s| s.id)
            .collect();
        let mut entering: Vec<DestinationId> = saturated
            .iter()
            .copied()
            .filter(|d| !self.saturated.contains(d))
            .collect();
        entering.sort_unstable();
        for dest in entering {
            debug!(%dest, "destination entered breach");
            raised.push(self.submit(TriggerKind::CapacityBreach { dest }, now));
        }
        self.saturated = saturated;

        if now.since(self.last_scheduled) >= self.cfg.scheduled_interval_secs {
            self.last_scheduled = now;
            raised.push(self.submit(TriggerKind::Scheduled, now));
        }
        raised
    }

    // ── Cycle ─────────────────────────────────────────────────────────────

    /// Process up to `max_triggers_per_cycle` pending triggers, oldest
    /// version first.
    pub fn run_cycle(
        &mut self,
        book:   &mut AssignmentBook,
        ledger: &mut LoadLedger,
        env:    RerouteEnv<'_>,
        now:    Timestamp,
    ) -> RerouteResult<CycleReport> {
        self.drain();
        let mut batch: Vec<Trigger> = self.pending.values().cloned().collect();
        batch.sort_unstable_by_key(|t| t.version);
        batch.truncate(self.cfg.max_triggers_per_cycle);
        for t in &batch {
            self.pending.remove(&t.key());
        }

        let mut report = CycleReport { processed: batch.len(), ..CycleReport::default() };
        for trigger in batch {
            let inflight = self.begin(trigger, book, ledger, env, now)?;
            if inflight.units.is_empty() {
                continue;
            }
            let mut outcome = env.solver.assign_units(env.ctx, inflight.units.clone(), ledger, now);
            report.events.append(&mut outcome.events);
            match self.complete(inflight, outcome, book, ledger, env, now)? {
                Completion::Committed { updates, failures } => {
                    report.updates.extend(updates);
                    report.failures.extend(failures);
                }
                Completion::Discarded { version, .. } => report.discarded.push(version),
            }
        }
        Ok(report)
    }

    /// Select the affected subset, release its seats and planned load, and
    /// mark it `Rerouted`.
    ///
    /// A requester whose seat cannot be released keeps its current
    /// assignment and is left out of the subset; the rest still move.
    pub fn begin(
        &mut self,
        trigger: Trigger,
        book:    &mut AssignmentBook,
        ledger:  &mut LoadLedger,
        env:     RerouteEnv<'_>,
        now:     Timestamp,
    ) -> RerouteResult<InFlight> {
        let direct = self.select(&trigger.kind, book, env);
        let candidates = pull_in_families(direct, book);

        let mut affected = Vec::with_capacity(candidates.len());
        for r in candidates {
            let Some(a) = book.get(r).filter(|a| a.status.is_open()) else { continue };
            // Seat and planned load are released together.
            if a.holds_reservation {
                if let Err(error) = env.registry().release(a.destination, 1, now) {
                    warn!(requester = %r, dest = %a.destination, %error, "seat release failed; assignment kept");
                    continue;
                }
                env.congestion().remove_planned(&a.path.edges, 1);
                ledger.remove(a.destination, 1);
            }
            book.drop_reservation(r);
            book.set_status(r, AssignmentStatus::Rerouted)?;
            affected.push(r);
        }

        let units = self.build_units(&trigger.kind, &affected, book, env);
        if !affected.is_empty() {
            info!(
                version = trigger.version,
                trigger = trigger.kind.name(),
                affected = affected.len(),
                "recompute started"
            );
        }
        Ok(InFlight { trigger, affected, units })
    }

    /// Commit a solved recompute, or discard it if a newer trigger for the
    /// same subset has arrived meanwhile.
    pub fn complete(
        &mut self,
        inflight: InFlight,
        outcome:  SolveOutcome,
        book:     &mut AssignmentBook,
        ledger:   &mut LoadLedger,
        env:      RerouteEnv<'_>,
        now:      Timestamp,
    ) -> RerouteResult<Completion> {
        self.drain();
        let version = inflight.trigger.version;
        let newer = self
            .pending
            .get(&inflight.trigger.key())
            .map(|t| t.version)
            .filter(|&v| v > version);

        if let Some(superseded_by) = newer {
            for a in &outcome.assignments {
                if let Err(e) = env.registry().release(a.destination, 1, now) {
                    warn!(%e, dest = %a.destination, "release of discarded reservation failed");
                }
                ledger.remove(a.destination, 1);
                env.congestion().remove_planned(&a.path.edges, 1);
            }
            self.stats.discarded += 1;
            info!(version, superseded_by, dropped = outcome.assignments.len(), "stale recompute discarded");
            // The newer trigger may no longer select these requesters.
            if !inflight.affected.is_empty() {
                self.submit(TriggerKind::Resume { requesters: inflight.affected }, now);
            }
            return Ok(Completion::Discarded { version, superseded_by });
        }

        let cause = inflight.trigger.kind.name();
        let mut updates = Vec::with_capacity(outcome.assignments.len());
        for a in outcome.assignments {
            updates.push(book.replace_route(a, version, cause)?);
        }
        for f in &outcome.failures {
            warn!(version, requesters = f.requesters.len(), error = %f.error, "rerouted unit left without destination");
        }
        if !outcome.rerun.is_empty() {
            self.submit(TriggerKind::Rerun { epoch: outcome.epoch, requesters: outcome.rerun }, now);
        }

        self.stats.committed += 1;
        self.stats.rerouted += updates.len() as u64;
        debug!(version, updated = updates.len(), "recompute committed");
        Ok(Completion::Committed { updates, failures: outcome.failures })
    }

    // ── Subset selection ──────────────────────────────────────────────────

    fn select(&self, kind: &TriggerKind, book: &AssignmentBook, env: RerouteEnv<'_>) -> Vec<RequesterId> {
        let network = env.network();
        let congestion = env.congestion();
        let registry = env.registry();

        match kind {
            TriggerKind::Scheduled => {
                let mut set = BTreeSet::new();
                for e in congestion.breached_edges().into_iter().chain(network.closed_edges()) {
                    set.extend(book.open_on_edge(e));
                }
                for info in registry.destinations() {
                    set.extend(destination_subset(info.id, book, registry));
                }
                set.extend(book.stranded());
                set.into_iter().collect()
            }
            TriggerKind::CongestionBreach { edge } => {
                if congestion.is_breached(*edge) || network.is_closed(*edge) {
                    book.open_on_edge(*edge)
                } else {
                    Vec::new()
                }
            }
            TriggerKind::ManualClosure { resource: ResourceRef::Edge(e), .. } => {
                if network.is_closed(*e) { book.open_on_edge(*e) } else { Vec::new() }
            }
            TriggerKind::CapacityBreach { dest }
            | TriggerKind::ManualClosure { resource: ResourceRef::Destination(dest), .. } => {
                destination_subset(*dest, book, registry)
            }
            TriggerKind::Rerun { requesters, .. } => requesters
                .iter()
                .copied()
                .filter(|r| book.get(*r).is_some_and(|a| a.status.is_open()))
                .collect(),
            TriggerKind::Resume { requesters } => requesters
                .iter()
                .copied()
                .filter(|r| book.get(*r).is_some_and(|a| a.status.is_open() && !a.holds_reservation))
                .collect(),
            TriggerKind::Alternative { requester, .. } => {
                if book.get(*requester).is_some_and(|a| a.status.is_open()) {
                    vec![*requester]
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn build_units(
        &self,
        kind:     &TriggerKind,
        affected: &[RequesterId],
        book:     &AssignmentBook,
        env:      RerouteEnv<'_>,
    ) -> Vec<Unit> {
        let requests = affected
            .iter()
            .filter_map(|r| book.get(*r))
            .map(|a| a.request.clone())
            .collect();
        let mut units = form_units(requests, env.markers, env.solver.zone_grid());

        for unit in &mut units {
            if let Some(f) = unit.lead().family {
                unit.pinned = book
                    .family_members(f)
                    .into_iter()
                    .filter_map(|r| book.get(r))
                    .find(|a| a.status == AssignmentStatus::Arrived)
                    .map(|a| a.destination);
            }
            if let TriggerKind::Alternative { requester, .. } = kind {
                if unit.members.iter().any(|m| m.requester == *requester) {
                    if let Some(a) = book.get(*requester) {
                        unit.avoid.push(a.destination);
                    }
                }
            }
        }
        units
    }
}

/// Assignments to move away from `dest`: every open one when it is closed,
/// otherwise the overflow above capacity, lowest priority and most recent
/// first.
fn destination_subset(dest: DestinationId, book: &AssignmentBook, registry: &CapacityRegistry) -> Vec<RequesterId> {
    if registry.is_closed(dest).unwrap_or(false) {
        return book.open_at_destination(dest);
    }
    let occ = registry.occupancy(dest).unwrap_or(0);
    let cap = registry.max_capacity(dest).unwrap_or(occ);
    let overflow = occ.saturating_sub(cap) as usize;
    if overflow == 0 {
        return Vec::new();
    }
    let mut holders: Vec<_> = book
        .open_at_destination(dest)
        .into_iter()
        .filter_map(|r| book.get(r))
        .filter(|a| a.holds_reservation)
        .collect();
    holders.sort_by(|a, b| {
        b.tier
            .cmp(&a.tier)
            .then(b.assigned_at.cmp(&a.assigned_at))
            .then(b.id.cmp(&a.id))
    });
    let mut out: Vec<RequesterId> = holders.into_iter().take(overflow).map(|a| a.requester()).collect();
    out.sort_unstable();
    out
}

fn listed_requesters(kind: &mut TriggerKind) -> Option<&mut Vec<RequesterId>> {
    match kind {
        TriggerKind::Rerun { requesters, .. } | TriggerKind::Resume { requesters } => Some(requesters),
        _ => None,
    }
}

/// Add every open member of each affected family.
fn pull_in_families(direct: Vec<RequesterId>, book: &AssignmentBook) -> Vec<RequesterId> {
    let mut all: BTreeSet<RequesterId> = direct.iter().copied().collect();
    for r in direct {
        if let Some(f) = book.get(r).and_then(|a| a.request.family) {
            all.extend(
                book.family_members(f)
                    .into_iter()
                    .filter(|m| book.get(*m).is_some_and(|a| a.status.is_open())),
            );
        }
    }
    all.into_iter().collect()
}
