//! Deterministic scenario RNG.
//!
//! The engine's algorithms are deterministic and never draw random numbers.
//! `SimRng` exists for scenario generation (synthetic populations in tests,
//! benchmarks, and the demo) so that generated inputs are reproducible from a
//! single seed.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::GeoPoint;

/// 64-bit fractional golden-ratio constant for seed mixing.
const MIXING_CONSTANT: u64 = 0x9e37_79b9_7f4a_7c15;

/// Seeded generator for synthetic requesters and positions.  Not `Sync`;
/// split off a [`child`](Self::child) per thread instead of sharing one.
pub struct SimRng(SmallRng);

impl SimRng {
    pub fn new(seed: u64) -> Self {
        SimRng(SmallRng::seed_from_u64(seed))
    }

    /// Independent stream keyed by `offset`.
    pub fn child(&mut self, offset: u64) -> SimRng {
        let child_seed: u64 = self.0.r#gen::<u64>() ^ offset.wrapping_mul(MIXING_CONSTANT);
        SimRng(SmallRng::seed_from_u64(child_seed))
    }

    #[inline]
    pub fn inner(&mut self) -> &mut SmallRng {
        &mut self.0
    }

    #[inline]
    pub fn random<T>(&mut self) -> T
    where
        rand::distributions::Standard: rand::distributions::Distribution<T>,
    {
        self.0.r#gen()
    }

    #[inline]
    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: rand::distributions::uniform::SampleUniform,
        R: rand::distributions::uniform::SampleRange<T>,
    {
        self.0.gen_range(range)
    }

    #[inline]
    pub fn gen_bool(&mut self, p: f64) -> bool {
        self.0.gen_bool(p.clamp(0.0, 1.0))
    }

    /// A point drawn uniformly from the lat/lon box spanned by `sw` and `ne`.
    pub fn point_in(&mut self, sw: GeoPoint, ne: GeoPoint) -> GeoPoint {
        let lat = if ne.lat > sw.lat { self.gen_range(sw.lat..ne.lat) } else { sw.lat };
        let lon = if ne.lon > sw.lon { self.gen_range(sw.lon..ne.lon) } else { sw.lon };
        GeoPoint::new(lat, lon)
    }
}
