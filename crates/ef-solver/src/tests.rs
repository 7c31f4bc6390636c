//! Unit tests for ef-solver.

#[cfg(test)]
mod helpers {
    use ef_capacity::{CapacityRegistry, CapacityRegistryBuilder};
    use ef_congestion::CongestionEstimator;
    use ef_core::{
        CapacityConfig, DestinationId, EngineConfig, FeatureSet, GeoPoint, NodeId, RequesterId,
        SimRng, Timestamp,
    };
    use ef_spatial::{RoadNetwork, RoadNetworkBuilder};

    use crate::{EvacRequest, LoadLedger, SolveContext, Solver};

    pub const SIDE: u32 = 5;
    pub const SPACING: f32 = 0.005;
    pub const NOW: Timestamp = Timestamp(1_000);

    /// Position of grid node `(row, col)`; rows go north, columns east.
    pub fn grid_pos(row: u32, col: u32) -> GeoPoint {
        GeoPoint::new(30.0 + row as f32 * SPACING, -88.0 + col as f32 * SPACING)
    }

    pub fn grid_node(row: u32, col: u32) -> NodeId {
        NodeId(row * SIDE + col)
    }

    pub struct Site {
        pub row:      u32,
        pub col:      u32,
        pub capacity: u32,
        pub features: FeatureSet,
    }

    pub fn site(row: u32, col: u32, capacity: u32) -> Site {
        Site { row, col, capacity, features: FeatureSet::NONE }
    }

    pub fn site_with(row: u32, col: u32, capacity: u32, features: FeatureSet) -> Site {
        Site { row, col, capacity, features }
    }

    pub struct Fixture {
        pub net: RoadNetwork,
        pub reg: CapacityRegistry,
        pub est: CongestionEstimator,
        pub cfg: EngineConfig,
    }

    impl Fixture {
        pub fn ctx(&self) -> SolveContext<'_> {
            SolveContext { network: &self.net, registry: &self.reg, congestion: &self.est }
        }

        pub fn solver(&self) -> Solver {
            Solver::with_default_router(&self.cfg)
        }

        pub fn ledger(&self) -> LoadLedger {
            LoadLedger::new(self.reg.len())
        }

        pub fn occupancy(&self) -> Vec<u32> {
            (0..self.reg.len() as u32)
                .map(|i| self.reg.occupancy(DestinationId(i)).unwrap())
                .collect()
        }
    }

    /// Default config with fill-time exclusion disabled.
    pub fn config() -> EngineConfig {
        EngineConfig {
            capacity: CapacityConfig { fill_horizon_secs: 0, ..CapacityConfig::default() },
            ..EngineConfig::default()
        }
    }

    /// 5×5 grid of two-way roads (~500 m blocks) with destinations on nodes.
    pub fn grid_fixture(sites: &[Site], cfg: EngineConfig) -> Fixture {
        let mut nb = RoadNetworkBuilder::new();
        for r in 0..SIDE {
            for c in 0..SIDE {
                nb.add_node(grid_pos(r, c));
            }
        }
        for r in 0..SIDE {
            for c in 0..SIDE {
                if c + 1 < SIDE {
                    nb.add_straight_road(grid_node(r, c), grid_node(r, c + 1), 1_200.0);
                }
                if r + 1 < SIDE {
                    nb.add_straight_road(grid_node(r, c), grid_node(r + 1, c), 1_200.0);
                }
            }
        }
        let mut rb = CapacityRegistryBuilder::new();
        for (i, s) in sites.iter().enumerate() {
            let pos = grid_pos(s.row, s.col);
            let id = rb.add_destination(format!("shelter-{i}"), pos, s.capacity, s.features);
            nb.add_destination_site(id, pos);
        }
        assemble(nb, rb, cfg)
    }

    pub fn assemble(nb: RoadNetworkBuilder, rb: CapacityRegistryBuilder, cfg: EngineConfig) -> Fixture {
        let net = nb.build();
        let reg = rb.build(cfg.capacity.clone());
        let est = CongestionEstimator::new(&net, cfg.congestion.clone());
        Fixture { net, reg, est, cfg }
    }

    pub fn request(id: u32, pos: GeoPoint) -> EvacRequest {
        EvacRequest::new(RequesterId(id), pos, Timestamp(id as u64))
    }

    /// `n` requests spread uniformly over the grid.
    pub fn uniform_requests(n: u32, seed: u64) -> Vec<EvacRequest> {
        let mut rng = SimRng::new(seed);
        let sw = grid_pos(0, 0);
        let ne = grid_pos(SIDE - 1, SIDE - 1);
        (0..n).map(|i| request(i, rng.point_in(sw, ne))).collect()
    }
}

// ── Scoring ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod scoring {
    use ef_core::{DestinationId, NodeId, ScoringWeights};
    use ef_spatial::Path;

    use crate::{Candidate, LoadLedger, ScoreInputs, apply_balance_guard, rank, score};

    fn cand(dest: u32, score: f64, count: u32) -> Candidate {
        Candidate {
            dest: DestinationId(dest),
            path: Path::trivial(NodeId(0)),
            inputs: ScoreInputs::default(),
            score,
            count,
            demoted: false,
        }
    }

    #[test]
    fn weighted_sum() {
        let w = ScoringWeights { distance: 1.0, congestion: 2.0, load_imbalance: 3.0, accessibility: 4.0 };
        let s = ScoreInputs { distance_norm: 0.5, exposure: 0.25, load_ratio: 1.5, access_penalty: 0.1 };
        let expected = 0.5 + 0.5 + 1.5 + 0.4;
        assert!((score(&w, &s) - expected).abs() < 1e-12);
    }

    #[test]
    fn below_mean_load_is_free() {
        let w = ScoringWeights::default();
        let under = ScoreInputs { load_ratio: 0.2, ..ScoreInputs::default() };
        let at = ScoreInputs { load_ratio: 1.0, ..ScoreInputs::default() };
        assert_eq!(score(&w, &under), 0.0);
        assert_eq!(score(&w, &at), 0.0);
    }

    #[test]
    fn ties_go_to_lower_id() {
        let mut cs = vec![cand(3, 1.0, 0), cand(1, 1.0, 0), cand(2, 0.5, 0)];
        rank(&mut cs);
        let order: Vec<u32> = cs.iter().map(|c| c.dest.0).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn guard_demotes_overloaded_while_one_is_starved() {
        // mean 10: dest 0 at 15 would exceed 15 with one more; dest 2 at 4 < 5.
        let mut cs = vec![cand(0, 0.1, 15), cand(1, 0.5, 10), cand(2, 0.9, 4)];
        apply_balance_guard(&mut cs, 10.0, 4, 1, 0.5, 1.5);
        assert!(cs[0].demoted);
        assert!(!cs[1].demoted && !cs[2].demoted);
        rank(&mut cs);
        assert_eq!(cs[0].dest, DestinationId(1));
        assert_eq!(cs[2].dest, DestinationId(0));
    }

    #[test]
    fn guard_idle_without_starvation() {
        let mut cs = vec![cand(0, 0.1, 15), cand(1, 0.5, 10), cand(2, 0.9, 6)];
        apply_balance_guard(&mut cs, 10.0, 6, 1, 0.5, 1.5);
        assert!(cs.iter().all(|c| !c.demoted));
    }

    #[test]
    fn guard_idle_below_unit_mean() {
        let mut cs = vec![cand(0, 0.1, 2), cand(1, 0.5, 0)];
        apply_balance_guard(&mut cs, 0.5, 0, 1, 0.5, 1.5);
        assert!(cs.iter().all(|c| !c.demoted));
    }

    #[test]
    fn guard_sees_starved_destination_outside_candidates() {
        // Candidates sit at 15 and 10; a destination out of reach holds 2.
        let mut cs = vec![cand(0, 0.1, 15), cand(1, 0.5, 10)];
        apply_balance_guard(&mut cs, 10.0, 2, 1, 0.5, 1.5);
        assert!(cs[0].demoted);
        assert!(!cs[1].demoted);
    }

    #[test]
    fn clean_path_outranks_better_scored_congested_path() {
        let mut jammed = cand(0, 0.1, 0);
        jammed.path.uses_congested = true;
        let mut cs = vec![jammed, cand(1, 0.9, 0), cand(2, 0.5, 0)];
        rank(&mut cs);
        let order: Vec<u32> = cs.iter().map(|c| c.dest.0).collect();
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn ledger_min_over_active() {
        let mut l = LoadLedger::new(3);
        l.add(DestinationId(0), 7);
        l.add(DestinationId(1), 3);
        assert_eq!(l.min_over([0, 1].map(DestinationId).into_iter()), 3);
        assert_eq!(l.min_over((0..3).map(DestinationId)), 0);
        assert_eq!(l.min_over(std::iter::empty()), 0);
    }

    #[test]
    fn ledger_delta_merge() {
        let mut global = LoadLedger::new(3);
        global.add(DestinationId(0), 5);
        let base = global.clone();

        let mut zone_a = base.clone();
        zone_a.add(DestinationId(1), 3);
        let mut zone_b = base.clone();
        zone_b.add(DestinationId(1), 2);
        zone_b.add(DestinationId(2), 1);
        zone_b.remove(DestinationId(0), 1);

        global.merge_delta(&zone_a.delta_since(&base));
        global.merge_delta(&zone_b.delta_since(&base));
        assert_eq!(global.count(DestinationId(0)), 4);
        assert_eq!(global.count(DestinationId(1)), 5);
        assert_eq!(global.count(DestinationId(2)), 1);
        assert_eq!(global.total(), 10);
    }

    #[test]
    fn ledger_mean_over_active() {
        let mut l = LoadLedger::new(3);
        l.add(DestinationId(0), 6);
        l.add(DestinationId(2), 9);
        let active = [DestinationId(0), DestinationId(1)];
        assert_eq!(l.mean_over(active.into_iter()), 3.0);
        assert_eq!(l.mean_over(std::iter::empty()), 0.0);
    }

    #[test]
    fn ledger_epochs_advance_and_reset() {
        let mut l = LoadLedger::new(1);
        assert_eq!(l.advance().0, 1);
        assert_eq!(l.advance().0, 2);
        l.add(DestinationId(0), 3);
        l.reset();
        assert_eq!(l.total(), 0);
        assert_eq!(l.epoch().0, 0);
    }
}

// ── Units and ordering ────────────────────────────────────────────────────────

#[cfg(test)]
mod units {
    use ef_core::{FamilyId, FeatureSet, GeoPoint, PriorityTier, RequesterId, Timestamp, ZoneGrid};

    use crate::{EvacRequest, PriorityMarkers, form_units};

    fn req(id: u32, t: u64) -> EvacRequest {
        EvacRequest::new(RequesterId(id), GeoPoint::new(30.0, -88.0), Timestamp(t))
    }

    #[test]
    fn medical_then_vulnerable_then_fifo() {
        let requests = vec![
            req(0, 0),
            req(1, 5).with_tier(PriorityTier::Vulnerable),
            req(2, 9).with_tier(PriorityTier::Medical),
            req(3, 1),
        ];
        let units = form_units(requests, &PriorityMarkers::new(), &ZoneGrid::default());
        let order: Vec<u32> = units.iter().map(|u| u.lead().requester.0).collect();
        assert_eq!(order, vec![2, 1, 0, 3]);
    }

    #[test]
    fn equal_arrival_keeps_input_order() {
        let requests = vec![req(7, 3), req(4, 3), req(9, 3)];
        let units = form_units(requests, &PriorityMarkers::new(), &ZoneGrid::default());
        let order: Vec<u32> = units.iter().map(|u| u.lead().requester.0).collect();
        assert_eq!(order, vec![7, 4, 9]);
    }

    #[test]
    fn family_takes_most_urgent_tier_and_earliest_arrival() {
        let f = FamilyId(1);
        let requests = vec![
            req(0, 2),
            req(1, 10).with_family(f),
            req(2, 4).with_family(f).with_tier(PriorityTier::Medical),
            req(3, 1),
        ];
        let units = form_units(requests, &PriorityMarkers::new(), &ZoneGrid::default());
        assert_eq!(units.len(), 3);
        let fam = &units[0];
        assert_eq!(fam.size(), 2);
        assert_eq!(fam.tier, PriorityTier::Medical);
        assert_eq!(fam.arrived_at, Timestamp(4));
        assert_eq!(fam.lead().requester, RequesterId(1));
    }

    #[test]
    fn markers_raise_standard_only() {
        let mut markers = PriorityMarkers::new();
        markers.add(GeoPoint::new(30.0, -88.0), 200.0);
        let requests = vec![
            req(0, 0),
            req(1, 0).with_tier(PriorityTier::Medical),
            EvacRequest::new(RequesterId(2), GeoPoint::new(30.1, -88.0), Timestamp(0)),
        ];
        let units = form_units(requests, &markers, &ZoneGrid::default());
        let tier_of = |id: u32| units.iter().find(|u| u.lead().requester.0 == id).unwrap().tier;
        assert_eq!(tier_of(0), PriorityTier::Vulnerable);
        assert_eq!(tier_of(1), PriorityTier::Medical);
        assert_eq!(tier_of(2), PriorityTier::Standard);
    }

    #[test]
    fn hard_features_union() {
        let f = FamilyId(3);
        let requests = vec![
            req(0, 0).with_family(f).with_accessibility_need(0.8),
            req(1, 0).with_family(f).with_features(FeatureSet::PETS),
            req(2, 0).with_family(f).with_accessibility_need(0.5),
        ];
        let units = form_units(requests, &PriorityMarkers::new(), &ZoneGrid::default());
        let u = &units[0];
        let hard = u.hard_features(true);
        assert!(hard.contains_all(FeatureSet::WHEELCHAIR | FeatureSet::PETS));
        assert!(!hard.contains_all(FeatureSet::MEDICAL));
        assert_eq!(u.accessibility_need(), Some(0.8));
    }

    #[test]
    fn medical_implies_facility_when_configured() {
        let r = req(0, 0).with_tier(PriorityTier::Medical);
        assert!(r.hard_features(true).contains_all(FeatureSet::MEDICAL));
        assert!(!r.hard_features(false).contains_all(FeatureSet::MEDICAL));
    }

    #[test]
    fn zones_from_grid_unless_explicit() {
        let grid = ZoneGrid::new(GeoPoint::new(30.0, -88.0), 0.01, 10);
        let a = EvacRequest::new(RequesterId(0), GeoPoint::new(30.015, -87.975), Timestamp(0));
        let b = a.clone().with_zone(ef_core::ZoneId(99));
        assert_eq!(a.resolve_zone(&grid), ef_core::ZoneId(12));
        assert_eq!(b.resolve_zone(&grid), ef_core::ZoneId(99));
    }
}

// ── Assignment ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod assign {
    use std::collections::HashSet;

    use ef_core::{
        CapacityConfig, DestinationId, EngineConfig, FamilyId, FeatureSet, GeoPoint, PriorityTier,
        RequesterId, SimRng, Timestamp,
    };

    use crate::{PriorityMarkers, SolverError};
    use super::helpers::{
        NOW, config, grid_fixture, grid_node, grid_pos, request, site, site_with, uniform_requests,
    };

    #[test]
    fn three_hundred_seats_two_hundred_fifty_requests() {
        let fx = grid_fixture(&[site(0, 0, 100), site(4, 2, 100), site(2, 4, 100)], config());
        let solver = fx.solver();
        let mut ledger = fx.ledger();

        let out = solver.assign(fx.ctx(), uniform_requests(250, 7), &PriorityMarkers::new(), &mut ledger, NOW);

        assert_eq!(out.assignments.len(), 250);
        assert!(out.failures.is_empty());
        for (i, &occ) in fx.occupancy().iter().enumerate() {
            assert!((25..=125).contains(&occ), "destination {i} holds {occ}");
            assert!(occ <= 100);
            assert_eq!(ledger.count(DestinationId(i as u32)), occ);
        }
    }

    #[test]
    fn uniform_demand_is_balanced() {
        let sites = [site(0, 0, 1_000), site(0, 4, 1_000), site(4, 0, 1_000), site(4, 4, 1_000)];
        let fx = grid_fixture(&sites, config());
        let mut ledger = fx.ledger();
        fx.solver().assign(fx.ctx(), uniform_requests(200, 11), &PriorityMarkers::new(), &mut ledger, NOW);

        let occ = fx.occupancy();
        let mean = 50.0;
        let max = *occ.iter().max().unwrap() as f64;
        let min = *occ.iter().min().unwrap() as f64;
        assert!(max <= 1.5 * mean, "{occ:?}");
        assert!(min >= 0.5 * mean, "{occ:?}");
    }

    #[test]
    fn clustered_demand_never_overloads_while_another_starves() {
        let sites = [site(0, 0, 1_000), site(0, 4, 1_000), site(4, 0, 1_000), site(4, 4, 1_000)];
        let fx = grid_fixture(&sites, config());
        let mut rng = SimRng::new(3);
        let sw = grid_pos(0, 0);
        let ne = GeoPoint::new(sw.lat + 0.003, sw.lon + 0.003);
        let requests = (0..200).map(|i| request(i, rng.point_in(sw, ne))).collect();

        let mut ledger = fx.ledger();
        fx.solver().assign(fx.ctx(), requests, &PriorityMarkers::new(), &mut ledger, NOW);

        let occ = fx.occupancy();
        let mean = 50.0;
        let max = *occ.iter().max().unwrap() as f64;
        let min = *occ.iter().min().unwrap() as f64;
        assert_eq!(occ.iter().sum::<u32>(), 200);
        assert!(!(max > 1.5 * mean && min < 0.5 * mean), "{occ:?}");
    }

    #[test]
    fn medical_is_assigned_first() {
        let sites = [site_with(0, 0, 100, FeatureSet::MEDICAL), site(4, 4, 100)];
        let fx = grid_fixture(&sites, config());
        let mut requests = uniform_requests(50, 5);
        requests.push(
            request(500, grid_pos(2, 2))
                .with_tier(PriorityTier::Medical),
        );

        let mut ledger = fx.ledger();
        let out = fx.solver().assign(fx.ctx(), requests, &PriorityMarkers::new(), &mut ledger, NOW);

        assert_eq!(out.assignments.len(), 51);
        let first = &out.assignments[0];
        assert_eq!(first.requester(), RequesterId(500));
        assert_eq!(first.tier, PriorityTier::Medical);
        assert_eq!(first.destination, DestinationId(0));
        assert!(out.assignments.iter().all(|a| a.id >= first.id));
    }

    #[test]
    fn family_shares_one_destination() {
        let fx = grid_fixture(&[site(0, 0, 3), site(4, 4, 10)], config());
        let f = FamilyId(9);
        let requests = (0..4).map(|i| request(i, grid_pos(0, 0)).with_family(f)).collect();

        let mut ledger = fx.ledger();
        let out = fx.solver().assign(fx.ctx(), requests, &PriorityMarkers::new(), &mut ledger, NOW);

        assert_eq!(out.assignments.len(), 4);
        assert!(out.assignments.iter().all(|a| a.destination == DestinationId(1)));
        let paths: HashSet<_> = out.assignments.iter().map(|a| a.path.edges.clone()).collect();
        assert_eq!(paths.len(), 1);
        assert_eq!(fx.occupancy(), vec![0, 4]);
    }

    #[test]
    fn family_fails_together() {
        let fx = grid_fixture(&[site(0, 0, 3), site(4, 4, 3)], config());
        let f = FamilyId(2);
        let requests = (0..4).map(|i| request(i, grid_pos(1, 1)).with_family(f)).collect();

        let mut ledger = fx.ledger();
        let out = fx.solver().assign(fx.ctx(), requests, &PriorityMarkers::new(), &mut ledger, NOW);

        assert!(out.assignments.is_empty());
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].requesters.len(), 4);
        assert_eq!(out.failures[0].family, Some(f));
        assert!(matches!(
            out.failures[0].error,
            SolverError::ConstraintUnsatisfiable { size: 4, .. }
        ));
        assert_eq!(fx.occupancy(), vec![0, 0]);
    }

    #[test]
    fn full_destination_gets_nothing() {
        let fx = grid_fixture(&[site(0, 0, 5), site(4, 4, 100)], config());
        fx.reg.reserve(DestinationId(0), 5, Timestamp::ZERO).unwrap();
        let requests = (0..10).map(|i| request(i, grid_pos(0, 0))).collect();

        let mut ledger = fx.ledger();
        let out = fx.solver().assign(fx.ctx(), requests, &PriorityMarkers::new(), &mut ledger, NOW);

        assert_eq!(out.assignments.len(), 10);
        assert!(out.assignments.iter().all(|a| a.destination == DestinationId(1)));
    }

    #[test]
    fn filling_destination_is_soft_excluded() {
        // 50 seats taken just now: predicted fill in 300 s, inside the 900 s horizon.
        let fx = grid_fixture(&[site(0, 0, 100), site(4, 4, 100)], EngineConfig::default());
        fx.reg.reserve(DestinationId(0), 50, NOW).unwrap();
        let requests = (0..10).map(|i| request(i, grid_pos(0, 0))).collect();

        let mut ledger = fx.ledger();
        let out = fx.solver().assign(fx.ctx(), requests, &PriorityMarkers::new(), &mut ledger, NOW);

        assert_eq!(out.assignments.len(), 10);
        assert!(out.assignments.iter().all(|a| a.destination == DestinationId(1)));
        assert_eq!(fx.reg.occupancy(DestinationId(0)).unwrap(), 50);
    }

    #[test]
    fn filling_destination_skipped_outside_search_radius() {
        // dest 0 is next door but filling; dest 1 is outside the widened radius.
        let mut cfg = EngineConfig::default();
        cfg.solver.search_radius_m = 200.0;
        cfg.solver.radius_widen_factor = 2.0;
        let fx = grid_fixture(&[site(0, 0, 100), site(4, 4, 100)], cfg);
        fx.reg.reserve(DestinationId(0), 50, NOW).unwrap();

        let mut ledger = fx.ledger();
        let out = fx.solver().assign(fx.ctx(), vec![request(0, grid_pos(0, 0))], &PriorityMarkers::new(), &mut ledger, NOW);

        let a = &out.assignments[0];
        assert_eq!(a.destination, DestinationId(1));
        assert!(a.flags.nearest_fit);
        assert!(!a.flags.soft_excluded);
        assert_eq!(fx.reg.occupancy(DestinationId(0)).unwrap(), 50);
    }

    #[test]
    fn every_destination_filling_is_flagged() {
        let fx = grid_fixture(&[site(0, 0, 100), site(4, 4, 100)], EngineConfig::default());
        fx.reg.reserve(DestinationId(0), 50, NOW).unwrap();
        fx.reg.reserve(DestinationId(1), 50, NOW).unwrap();

        let mut ledger = fx.ledger();
        let out = fx.solver().assign(fx.ctx(), vec![request(0, grid_pos(0, 0))], &PriorityMarkers::new(), &mut ledger, NOW);

        let a = &out.assignments[0];
        assert_eq!(a.destination, DestinationId(0));
        assert!(a.flags.soft_excluded);
        assert!(!a.flags.nearest_fit);
        assert!(a.is_degraded());
        assert!(a.flags.describe().contains("soft_excluded"));
    }

    #[test]
    fn pin_to_filling_destination_yields_to_active_one() {
        let fx = grid_fixture(&[site(0, 0, 100), site(4, 4, 100)], EngineConfig::default());
        fx.reg.reserve(DestinationId(1), 50, NOW).unwrap();
        let solver = fx.solver();
        let mut units = crate::form_units(vec![request(0, grid_pos(0, 0))], &PriorityMarkers::new(), solver.zone_grid());
        units[0].pinned = Some(DestinationId(1));

        let mut ledger = fx.ledger();
        let out = solver.assign_units(fx.ctx(), units, &mut ledger, NOW);
        assert_eq!(out.assignments[0].destination, DestinationId(0));
        assert!(!out.assignments[0].is_degraded());
    }

    #[test]
    fn filling_horizon_spreads_two_hundred_fifty_requests() {
        // Each 100-seat destination is predicted to fill within 900 s once it
        // holds 26 reservations made at NOW; the rest go out flagged.
        let fx = grid_fixture(&[site(0, 0, 100), site(4, 2, 100), site(2, 4, 100)], EngineConfig::default());
        let mut ledger = fx.ledger();

        let out = fx.solver().assign(fx.ctx(), uniform_requests(250, 7), &PriorityMarkers::new(), &mut ledger, NOW);

        assert_eq!(out.assignments.len(), 250);
        assert!(out.failures.is_empty());
        for (i, &occ) in fx.occupancy().iter().enumerate() {
            assert!((26..=100).contains(&occ), "destination {i} holds {occ}");
        }
        assert_eq!(out.degraded().count(), 250 - 3 * 26);
        assert!(out.degraded().all(|a| a.flags.soft_excluded));
        assert!(out.assignments.iter().take(78).all(|a| !a.flags.soft_excluded));
    }

    #[test]
    fn clean_destination_beats_nearer_congested_one() {
        let fx = grid_fixture(&[site(0, 1, 100), site(0, 4, 100)], EngineConfig::default());
        for from in [grid_node(0, 0), grid_node(0, 2), grid_node(1, 1)] {
            let e = fx.net.find_edge(from, grid_node(0, 1)).unwrap();
            fx.est.set_level(e, 0.95, NOW).unwrap();
        }

        let mut ledger = fx.ledger();
        let out = fx.solver().assign(fx.ctx(), vec![request(0, grid_pos(0, 0))], &PriorityMarkers::new(), &mut ledger, NOW);

        let a = &out.assignments[0];
        assert_eq!(a.destination, DestinationId(1));
        assert!(!a.flags.congested_path);
        assert!(!a.path.uses_congested);
    }

    #[test]
    fn wheelchair_need_requires_tagged_destination() {
        let sites = [site(0, 0, 10), site_with(4, 4, 10, FeatureSet::WHEELCHAIR)];
        let fx = grid_fixture(&sites, config());
        let requests = vec![request(0, grid_pos(0, 0)).with_accessibility_need(0.5)];

        let mut ledger = fx.ledger();
        let out = fx.solver().assign(fx.ctx(), requests, &PriorityMarkers::new(), &mut ledger, NOW);
        assert_eq!(out.assignments[0].destination, DestinationId(1));
    }

    #[test]
    fn unsatisfiable_feature_fails_unit() {
        let fx = grid_fixture(&[site(0, 0, 10)], config());
        let requests = vec![request(0, grid_pos(0, 0)).with_features(FeatureSet::DIALYSIS)];

        let mut ledger = fx.ledger();
        let out = fx.solver().assign(fx.ctx(), requests, &PriorityMarkers::new(), &mut ledger, NOW);
        assert!(out.assignments.is_empty());
        assert!(matches!(out.failures[0].error, SolverError::ConstraintUnsatisfiable { .. }));
    }

    #[test]
    fn radius_widens_once() {
        let mut cfg = config();
        cfg.solver.search_radius_m = 1_000.0;
        cfg.solver.radius_widen_factor = 2.0;
        let fx = grid_fixture(&[site(0, 0, 10)], cfg);

        let mut ledger = fx.ledger();
        let out = fx.solver().assign(fx.ctx(), vec![request(0, grid_pos(2, 2))], &PriorityMarkers::new(), &mut ledger, NOW);

        let a = &out.assignments[0];
        assert!(a.flags.widened_radius);
        assert!(!a.flags.nearest_fit);
        assert!(!a.is_degraded());
    }

    #[test]
    fn nearest_fit_outside_widened_radius() {
        let mut cfg = config();
        cfg.solver.search_radius_m = 200.0;
        cfg.solver.radius_widen_factor = 2.0;
        let fx = grid_fixture(&[site(0, 0, 10), site(4, 4, 10)], cfg);

        let mut ledger = fx.ledger();
        let out = fx.solver().assign(fx.ctx(), vec![request(0, grid_pos(1, 1))], &PriorityMarkers::new(), &mut ledger, NOW);

        let a = &out.assignments[0];
        assert_eq!(a.destination, DestinationId(0));
        assert!(a.flags.nearest_fit);
        assert!(a.is_degraded());
        assert!(!a.path.straight_line);
    }

    #[test]
    fn avoids_congested_edges_when_possible() {
        let fx = grid_fixture(&[site(0, 2, 10)], config());
        let direct = fx.net.find_edge(grid_node(0, 0), grid_node(0, 1)).unwrap();
        fx.est.set_level(direct, 0.95, NOW).unwrap();

        let mut ledger = fx.ledger();
        let out = fx.solver().assign(fx.ctx(), vec![request(0, grid_pos(0, 0))], &PriorityMarkers::new(), &mut ledger, NOW);

        let a = &out.assignments[0];
        assert!(!a.path.touches(direct));
        assert!(!a.flags.congested_path);
    }

    #[test]
    fn planned_load_is_recorded() {
        let fx = grid_fixture(&[site(4, 4, 10)], config());
        let mut ledger = fx.ledger();
        let out = fx.solver().assign(
            fx.ctx(),
            vec![request(0, grid_pos(0, 0)), request(1, grid_pos(0, 0))],
            &PriorityMarkers::new(),
            &mut ledger,
            NOW,
        );
        let path = &out.assignments[0].path;
        assert_eq!(path.edges.len(), 8);
        // The second requester may take a different route around the first's load.
        assert!(path.edges.iter().all(|&e| fx.est.planned(e) >= 1));
        assert!(fx.est.effective_level(path.edges[0]) > 0.0);
    }

    #[test]
    fn deadline_fast_path() {
        let mut cfg = config();
        cfg.solver.deadline_ms = 0;
        let fx = grid_fixture(&[site(0, 0, 100), site(4, 4, 100)], cfg);

        let mut ledger = fx.ledger();
        let out = fx.solver().assign(fx.ctx(), uniform_requests(20, 1), &PriorityMarkers::new(), &mut ledger, NOW);

        assert_eq!(out.assignments.len(), 20);
        assert!(out.assignments.iter().all(|a| a.flags.deadline && a.path.straight_line));
        assert_eq!(out.rerun.len(), 20);
        assert_eq!(out.degraded().count(), 20);
        assert_eq!(fx.occupancy().iter().sum::<u32>(), 20);
    }

    #[test]
    fn fast_path_race_loss_falls_back_to_full_placement() {
        use std::sync::Mutex;
        use std::sync::mpsc::{self, Receiver, Sender};
        use std::time::Duration;

        use ef_core::NodeId;
        use ef_spatial::{
            AStarRouter, CongestionView, EdgeCostModel, Path, PathConstraints, PathMatch, RoadNetwork,
            Router, SpatialResult,
        };

        use crate::Solver;

        /// Parks the first routing call until the test has moved the registry,
        /// then sleeps past the solver deadline.
        struct GatedRouter {
            inner:   AStarRouter,
            started: Mutex<Option<Sender<()>>>,
            resume:  Mutex<Receiver<()>>,
            hold:    Duration,
        }

        impl Router for GatedRouter {
            fn find_path(
                &self,
                network:     &RoadNetwork,
                congestion:  &dyn CongestionView,
                from:        NodeId,
                targets:     &[NodeId],
                constraints: &PathConstraints,
            ) -> SpatialResult<PathMatch> {
                self.inner.find_path(network, congestion, from, targets, constraints)
            }

            fn paths_to_targets(
                &self,
                network:     &RoadNetwork,
                congestion:  &dyn CongestionView,
                from:        NodeId,
                targets:     &[NodeId],
                constraints: &PathConstraints,
            ) -> SpatialResult<Vec<Option<Path>>> {
                if let Some(tx) = self.started.lock().unwrap().take() {
                    tx.send(()).unwrap();
                    self.resume.lock().unwrap().recv().unwrap();
                    std::thread::sleep(self.hold);
                }
                self.inner.paths_to_targets(network, congestion, from, targets, constraints)
            }
        }

        // dest 0 takes the first unit; dest 1 is filled behind the solver's
        // back; dest 2 lies outside the widened radius.
        let mut cfg = config();
        cfg.solver.deadline_ms = 200;
        cfg.solver.search_radius_m = 1_200.0;
        cfg.solver.radius_widen_factor = 2.0;
        let fx = grid_fixture(&[site(0, 0, 1), site(0, 2, 5), site(4, 4, 5)], cfg);

        let (started_tx, started_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel();
        let router = GatedRouter {
            inner:   AStarRouter::new(EdgeCostModel::new(&fx.cfg.routing, fx.cfg.congestion.congested_threshold)),
            started: Mutex::new(Some(started_tx)),
            resume:  Mutex::new(resume_rx),
            hold:    Duration::from_millis(400),
        };
        let solver = Solver::new(&fx.cfg, Box::new(router));

        let out = std::thread::scope(|s| {
            let (fx, solver) = (&fx, &solver);
            let h = s.spawn(move || {
                let mut ledger = fx.ledger();
                let reqs = vec![request(0, grid_pos(0, 0)), request(1, grid_pos(0, 0))];
                solver.assign(fx.ctx(), reqs, &PriorityMarkers::new(), &mut ledger, NOW)
            });
            started_rx.recv_timeout(Duration::from_secs(10)).unwrap();
            fx.reg.reserve(DestinationId(1), 5, NOW).unwrap();
            resume_tx.send(()).unwrap();
            h.join().unwrap()
        });

        assert!(out.failures.is_empty(), "{:?}", out.failures);
        assert_eq!(out.assignments.len(), 2);
        assert_eq!(out.assignments[0].destination, DestinationId(0));
        assert_eq!(out.assignments[1].destination, DestinationId(2));
        assert_eq!(out.rerun, vec![RequesterId(1)]);
        assert_eq!(fx.occupancy(), vec![1, 5, 1]);
    }

    #[test]
    fn pinned_unit_goes_to_its_pin() {
        let fx = grid_fixture(&[site(0, 0, 10), site(4, 4, 10)], config());
        let solver = fx.solver();
        let mut units = crate::form_units(vec![request(0, grid_pos(0, 0))], &PriorityMarkers::new(), solver.zone_grid());
        units[0].pinned = Some(DestinationId(1));

        let mut ledger = fx.ledger();
        let out = solver.assign_units(fx.ctx(), units, &mut ledger, NOW);
        assert_eq!(out.assignments[0].destination, DestinationId(1));
        assert!(!out.assignments[0].is_degraded());
    }

    #[test]
    fn closed_pin_falls_back_to_normal_search() {
        let fx = grid_fixture(&[site(0, 0, 10), site(4, 4, 10)], config());
        fx.reg.set_closed(DestinationId(1), true).unwrap();
        let solver = fx.solver();
        let mut units = crate::form_units(vec![request(0, grid_pos(0, 0))], &PriorityMarkers::new(), solver.zone_grid());
        units[0].pinned = Some(DestinationId(1));

        let mut ledger = fx.ledger();
        let out = solver.assign_units(fx.ctx(), units, &mut ledger, NOW);
        assert_eq!(out.assignments[0].destination, DestinationId(0));
    }

    #[test]
    fn avoided_destination_skipped_when_possible() {
        let fx = grid_fixture(&[site(0, 0, 10), site(4, 4, 10)], config());
        let solver = fx.solver();
        let mut units = crate::form_units(
            vec![request(0, grid_pos(0, 0)), request(1, grid_pos(0, 0))],
            &PriorityMarkers::new(),
            solver.zone_grid(),
        );
        units[0].avoid = vec![DestinationId(0)];
        units[1].avoid = vec![DestinationId(0), DestinationId(1)];

        let mut ledger = fx.ledger();
        let out = solver.assign_units(fx.ctx(), units, &mut ledger, NOW);
        assert_eq!(out.assignments.len(), 2);
        assert_eq!(out.assignments[0].destination, DestinationId(1));
        // Nothing else fits: the avoid list is ignored.
        assert!(out.assignments[1].flags.nearest_fit);
    }

    #[test]
    fn each_solve_is_a_new_epoch() {
        let fx = grid_fixture(&[site(0, 0, 10)], config());
        let solver = fx.solver();
        let mut ledger = fx.ledger();
        let a = solver.assign(fx.ctx(), vec![request(0, grid_pos(0, 0))], &PriorityMarkers::new(), &mut ledger, NOW);
        let b = solver.assign(fx.ctx(), vec![request(1, grid_pos(0, 0))], &PriorityMarkers::new(), &mut ledger, NOW);
        assert_eq!(b.epoch.0, a.epoch.0 + 1);
        assert_eq!(ledger.epoch(), b.epoch);
        assert_ne!(a.assignments[0].id, b.assignments[0].id);
    }

    #[test]
    fn zoned_batch_merges_ledger() {
        let mut cfg = config();
        cfg.zone_grid = ef_core::ZoneGrid::new(grid_pos(0, 0), 0.01, 4);
        let fx = grid_fixture(&[site(0, 0, 100), site(4, 2, 100), site(2, 4, 100)], cfg);
        let solver = fx.solver();
        let mut ledger = fx.ledger();

        let out = solver.assign_zoned(fx.ctx(), uniform_requests(60, 4), &PriorityMarkers::new(), &mut ledger, NOW);

        assert_eq!(out.assignments.len(), 60);
        assert_eq!(ledger.total(), 60);
        let zones: HashSet<_> = out.assignments.iter().map(|a| a.zone).collect();
        assert!(zones.len() > 1);
        let ids: HashSet<_> = out.assignments.iter().map(|a| a.id).collect();
        assert_eq!(ids.len(), 60);
        assert!(out.assignments.iter().all(|a| a.epoch == out.epoch));
        for (i, &occ) in fx.occupancy().iter().enumerate() {
            assert_eq!(ledger.count(DestinationId(i as u32)), occ);
        }
    }

    #[test]
    fn no_road_path_falls_back_to_straight_line() {
        use ef_capacity::CapacityRegistryBuilder;
        use ef_spatial::RoadNetworkBuilder;

        let mut nb = RoadNetworkBuilder::new();
        let a = nb.add_node(GeoPoint::new(30.0, -88.0));
        let b = nb.add_node(GeoPoint::new(30.0, -87.995));
        nb.add_straight_road(a, b, 600.0);
        let island = GeoPoint::new(30.004, -87.995);
        nb.add_node(island);
        let mut rb = CapacityRegistryBuilder::new();
        let d = rb.add_destination("island", island, 10, FeatureSet::NONE);
        nb.add_destination_site(d, island);
        let fx = super::helpers::assemble(nb, rb, config());

        let mut ledger = fx.ledger();
        let out = fx.solver().assign(
            fx.ctx(),
            vec![request(0, GeoPoint::new(30.0, -88.0))],
            &PriorityMarkers::new(),
            &mut ledger,
            NOW,
        );
        let asg = &out.assignments[0];
        assert_eq!(asg.destination, d);
        assert!(asg.path.straight_line);
        assert!(asg.flags.straight_line && asg.flags.needs_manual);
        assert!(asg.is_degraded());
    }

    #[test]
    fn concurrent_batches_never_overbook() {
        let cfg = EngineConfig {
            capacity: CapacityConfig { fill_horizon_secs: 0, ..CapacityConfig::default() },
            ..EngineConfig::default()
        };
        let fx = grid_fixture(&[site(0, 0, 30), site(4, 4, 30)], cfg);
        let solver = fx.solver();

        let outcomes: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..2u64)
                .map(|t| {
                    let (fx, solver) = (&fx, &solver);
                    s.spawn(move || {
                        let mut ledger = fx.ledger();
                        let reqs = uniform_requests(40, 100 + t)
                            .into_iter()
                            .map(|mut r| {
                                r.requester = RequesterId(r.requester.0 + 1_000 * t as u32);
                                r
                            })
                            .collect();
                        solver.assign(fx.ctx(), reqs, &PriorityMarkers::new(), &mut ledger, NOW)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let placed: usize = outcomes.iter().map(|o| o.assignments.len()).sum();
        let failed: usize = outcomes
            .iter()
            .flat_map(|o| &o.failures)
            .map(|f| f.requesters.len())
            .sum();
        let occ = fx.occupancy();
        assert_eq!(placed + failed, 80);
        assert_eq!(placed as u32, occ.iter().sum::<u32>());
        assert!(occ.iter().all(|&o| o <= 30));
    }
}
