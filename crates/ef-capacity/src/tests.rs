//! Unit tests for ef-capacity.

#[cfg(test)]
mod helpers {
    use ef_core::{CapacityConfig, FeatureSet, GeoPoint};
    use crate::{CapacityRegistry, CapacityRegistryBuilder};

    /// Registry with one destination per capacity, laid out west to east.
    pub fn registry(capacities: &[u32], cfg: CapacityConfig) -> CapacityRegistry {
        let mut b = CapacityRegistryBuilder::new();
        for (i, &cap) in capacities.iter().enumerate() {
            b.add_destination(
                format!("shelter-{i}"),
                GeoPoint::new(30.0, -88.0 + i as f32 * 0.01),
                cap,
                FeatureSet::NONE,
            );
        }
        b.build(cfg)
    }

    /// Fill-time exclusion disabled, so only hard capacity matters.
    pub fn no_horizon() -> CapacityConfig {
        CapacityConfig { fill_horizon_secs: 0, ..CapacityConfig::default() }
    }
}

// ── Reservation arithmetic ────────────────────────────────────────────────────

#[cfg(test)]
mod reserve {
    use ef_core::{DestinationId, Timestamp};
    use crate::CapacityError;
    use super::helpers::{no_horizon, registry};

    const D: DestinationId = DestinationId(0);
    const T0: Timestamp = Timestamp::ZERO;

    #[test]
    fn clamps_at_capacity() {
        let reg = registry(&[10], no_horizon());
        assert_eq!(reg.reserve(D, 7, T0).unwrap().reserved, 7);
        assert_eq!(reg.reserve(D, 5, T0).unwrap().reserved, 3);
        assert_eq!(reg.reserve(D, 1, T0).unwrap().reserved, 0);
        assert_eq!(reg.occupancy(D).unwrap(), 10);
    }

    #[test]
    fn exact_is_all_or_nothing() {
        let reg = registry(&[10], no_horizon());
        reg.reserve(D, 8, T0).unwrap();
        let err = reg.reserve_exact(D, 3, T0).unwrap_err();
        assert!(matches!(
            err,
            CapacityError::InsufficientCapacity { requested: 3, remaining: 2, .. }
        ));
        assert_eq!(reg.occupancy(D).unwrap(), 8);
        assert_eq!(reg.reserve_exact(D, 2, T0).unwrap().reserved, 2);
    }

    #[test]
    fn release_clamps_at_zero() {
        let reg = registry(&[10], no_horizon());
        reg.reserve(D, 4, T0).unwrap();
        assert_eq!(reg.release(D, 6, T0).unwrap(), 4);
        assert_eq!(reg.occupancy(D).unwrap(), 0);
    }

    #[test]
    fn unknown_destination() {
        let reg = registry(&[10], no_horizon());
        assert!(matches!(
            reg.reserve(DestinationId(5), 1, T0),
            Err(CapacityError::UnknownDestination(_))
        ));
    }

    #[test]
    fn version_bumps_on_write() {
        let reg = registry(&[10], no_horizon());
        let v0 = reg.snapshot_of(D, T0).unwrap().version;
        reg.reserve(D, 1, T0).unwrap();
        reg.release(D, 1, T0).unwrap();
        assert_eq!(reg.snapshot_of(D, T0).unwrap().version, v0 + 2);
    }
}

// ── Status & events ───────────────────────────────────────────────────────────

#[cfg(test)]
mod status {
    use ef_core::{CapacityConfig, DestinationId, Timestamp};
    use crate::{CapacityError, CapacityEvent, DestinationStatus};
    use super::helpers::{no_horizon, registry};

    const D: DestinationId = DestinationId(0);

    #[test]
    fn warning_fires_once_per_crossing() {
        let reg = registry(&[10], no_horizon());
        let t = Timestamp(0);
        let r = reg.reserve(D, 9, t).unwrap();
        assert!(matches!(r.events.as_slice(), [CapacityEvent::Warning { .. }]));
        // Still above 90 %: no repeat.
        assert!(reg.reserve(D, 0, t).unwrap().events.is_empty());
        reg.release(D, 1, t).unwrap();
        reg.release(D, 1, t).unwrap();
        // Back above the threshold re-fires.
        let r = reg.reserve(D, 2, t).unwrap();
        assert!(r.events.iter().any(|e| matches!(e, CapacityEvent::Warning { .. })));
    }

    #[test]
    fn full_destination_is_excluded() {
        let reg = registry(&[5], no_horizon());
        let t = Timestamp(0);
        let r = reg.reserve(D, 5, t).unwrap();
        assert!(r.events.iter().any(|e| matches!(e, CapacityEvent::Excluded { occupancy: 5, .. })));
        assert_eq!(reg.status(D, t).unwrap(), DestinationStatus::Full);
        reg.release(D, 1, t).unwrap();
        assert_eq!(reg.status(D, t).unwrap(), DestinationStatus::Active);
    }

    #[test]
    fn fill_prediction_from_trailing_rate() {
        let reg = registry(&[1_000], CapacityConfig::default());
        reg.reserve(D, 100, Timestamp(0)).unwrap();
        // 100 per 300 s, 900 remaining.
        assert_eq!(reg.predict_fill_time(D, Timestamp(0)).unwrap(), Some(2_700));
        assert_eq!(reg.status(D, Timestamp(0)).unwrap(), DestinationStatus::Active);
        // Window expired: no rate, no prediction.
        assert_eq!(reg.predict_fill_time(D, Timestamp(400)).unwrap(), None);
    }

    #[test]
    fn imminent_fill_soft_excludes() {
        let reg = registry(&[1_000], CapacityConfig::default());
        reg.reserve(D, 100, Timestamp(0)).unwrap();
        let r = reg.reserve(D, 300, Timestamp(10)).unwrap();
        // 400 per 300 s with 600 remaining → 450 s < 900 s.
        assert_eq!(reg.predict_fill_time(D, Timestamp(10)).unwrap(), Some(450));
        assert!(r.events.iter().any(|e| matches!(e, CapacityEvent::Excluded { .. })));
        let snap = reg.snapshot_of(D, Timestamp(10)).unwrap();
        assert_eq!(snap.status, DestinationStatus::Full);
        assert!(snap.is_excluded());
        assert!(!snap.closed);
    }

    #[test]
    fn closure() {
        let reg = registry(&[10], no_horizon());
        let t = Timestamp(0);
        assert_eq!(reg.set_closed(D, true).unwrap(), Some(CapacityEvent::Closed { dest: D }));
        assert_eq!(reg.set_closed(D, true).unwrap(), None);
        assert_eq!(reg.status(D, t).unwrap(), DestinationStatus::Closed);
        assert!(matches!(reg.reserve(D, 1, t), Err(CapacityError::Closed(_))));
        // Walk-ins are still counted.
        assert_eq!(reg.check_in_walk_in(D, 2, t).unwrap().reserved, 2);
        assert_eq!(reg.set_closed(D, false).unwrap(), Some(CapacityEvent::Reopened { dest: D }));
        assert_eq!(reg.status(D, t).unwrap(), DestinationStatus::Active);
    }

    #[test]
    fn lowering_capacity_reports_overflow() {
        let reg = registry(&[10], no_horizon());
        let t = Timestamp(0);
        reg.reserve(D, 8, t).unwrap();
        let change = reg.set_capacity(D, 5, t).unwrap();
        assert_eq!(change.previous, 10);
        assert_eq!(change.overflow, 3);
        assert!(change.events.contains(&CapacityEvent::Overflow { dest: D, overflow: 3 }));
        assert_eq!(reg.status(D, t).unwrap(), DestinationStatus::Full);
        // Reservations never add to an overflowing destination.
        assert_eq!(reg.reserve(D, 1, t).unwrap().reserved, 0);
        assert_eq!(reg.occupancy(D).unwrap(), 8);
    }

    #[test]
    fn snapshot_covers_all_destinations() {
        let reg = registry(&[10, 0, 10], no_horizon());
        let t = Timestamp(0);
        reg.set_closed(DestinationId(2), true).unwrap();
        let snap = reg.snapshot(t);
        assert_eq!(snap.len(), 3);
        assert_eq!(snap.active_count(), 1);
        assert_eq!(snap.get(DestinationId(1)).unwrap().status, DestinationStatus::Full);
        assert_eq!(snap.get(DestinationId(0)).unwrap().remaining(), 10);
    }
}

// ── Concurrency ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod concurrency {
    use std::sync::atomic::{AtomicI64, Ordering};

    use ef_core::{DestinationId, SimRng, Timestamp};
    use super::helpers::{no_horizon, registry};

    #[test]
    fn occupancy_equals_net_successful_reservations() {
        let reg = registry(&[1_000_000, 1_000_000], no_horizon());
        let net = [AtomicI64::new(0), AtomicI64::new(0)];

        std::thread::scope(|s| {
            for worker in 0..8u64 {
                let reg = &reg;
                let net = &net;
                s.spawn(move || {
                    let mut rng = SimRng::new(worker);
                    for i in 0..2_000u64 {
                        let d = (i % 2) as usize;
                        let dest = DestinationId(d as u32);
                        let now = Timestamp(i);
                        if rng.gen_bool(0.7) {
                            let n = rng.gen_range(1..5u32);
                            if let Ok(r) = reg.reserve(dest, n, now) {
                                net[d].fetch_add(r.reserved as i64, Ordering::Relaxed);
                            }
                        } else if let Ok(released) = reg.release(dest, 3, now) {
                            net[d].fetch_sub(released as i64, Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        for d in 0..2 {
            let occ = reg.occupancy(DestinationId(d as u32)).unwrap() as i64;
            assert_eq!(occ, net[d].load(Ordering::Relaxed));
        }
    }

    #[test]
    fn exact_reservations_never_overbook() {
        let reg = registry(&[100], no_horizon());
        std::thread::scope(|s| {
            for _ in 0..8 {
                let reg = &reg;
                s.spawn(move || {
                    for _ in 0..50 {
                        let _ = reg.reserve_exact(DestinationId(0), 3, Timestamp(0));
                    }
                });
            }
        });
        let occ = reg.occupancy(DestinationId(0)).unwrap();
        assert!(occ <= 100);
        assert_eq!(occ % 3, 0);
        assert!(occ >= 96, "got {occ}");
    }
}

// ── CSV loader ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod loader {
    use std::io::Cursor;

    use ef_core::{CapacityConfig, DestinationId, FeatureSet};
    use crate::{CapacityError, load_shelters_reader};

    #[test]
    fn loads_shelters() {
        let csv = "name,lat,lon,capacity,features,occupancy\n\
                   Central High Gym,30.694,-88.043,450,medical|wheelchair,\n\
                   Civic Center,30.689,-88.039,1200,pets,120\n";
        let b = load_shelters_reader(Cursor::new(csv)).unwrap();
        assert_eq!(b.len(), 2);
        let reg = b.build(CapacityConfig::default());
        let gym = reg.info(DestinationId(0)).unwrap();
        assert_eq!(gym.name, "Central High Gym");
        assert!(gym.features.contains_all(FeatureSet::MEDICAL | FeatureSet::WHEELCHAIR));
        assert_eq!(reg.occupancy(DestinationId(1)).unwrap(), 120);
        assert_eq!(reg.max_capacity(DestinationId(1)).unwrap(), 1_200);
    }

    #[test]
    fn unknown_feature_is_rejected() {
        let csv = "name,lat,lon,capacity,features,occupancy\nX,30.0,-88.0,10,helipad,\n";
        assert!(matches!(load_shelters_reader(Cursor::new(csv)), Err(CapacityError::Parse(_))));
    }
}
