//! Evacuation requests and pre-mapped priority markers.

use ef_core::{FamilyId, FeatureSet, GeoPoint, PriorityTier, RequesterId, Timestamp, ZoneGrid, ZoneId};

// ── EvacRequest ───────────────────────────────────────────────────────────────

/// One person asking to be told where to go.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EvacRequest {
    pub requester:          RequesterId,
    pub location:           GeoPoint,
    /// Minimum edge accessibility rating this person can use; also requires
    /// a `wheelchair`-tagged destination.
    pub accessibility_need: Option<f32>,
    /// Destination capabilities this person needs.
    pub required_features:  FeatureSet,
    pub family:             Option<FamilyId>,
    pub tier:               PriorityTier,
    pub arrived_at:         Timestamp,
    /// Explicit zone; derived from the zone grid when `None`.
    pub zone:               Option<ZoneId>,
}

impl EvacRequest {
    /// A standard-tier request with no special needs.
    pub fn new(requester: RequesterId, location: GeoPoint, arrived_at: Timestamp) -> Self {
        Self {
            requester,
            location,
            accessibility_need: None,
            required_features:  FeatureSet::NONE,
            family:             None,
            tier:               PriorityTier::Standard,
            arrived_at,
            zone:               None,
        }
    }

    pub fn with_tier(mut self, tier: PriorityTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_family(mut self, family: FamilyId) -> Self {
        self.family = Some(family);
        self
    }

    pub fn with_accessibility_need(mut self, min_rating: f32) -> Self {
        self.accessibility_need = Some(min_rating.clamp(0.0, 1.0));
        self
    }

    pub fn with_features(mut self, features: FeatureSet) -> Self {
        self.required_features = features;
        self
    }

    pub fn with_zone(mut self, zone: ZoneId) -> Self {
        self.zone = Some(zone);
        self
    }

    /// Features a destination must offer, including those implied by the
    /// accessibility need and (optionally) by the medical tier.
    pub fn hard_features(&self, medical_requires_facility: bool) -> FeatureSet {
        let mut f = self.required_features;
        if self.accessibility_need.is_some() {
            f.insert(FeatureSet::WHEELCHAIR);
        }
        if medical_requires_facility && self.tier == PriorityTier::Medical {
            f.insert(FeatureSet::MEDICAL);
        }
        f
    }

    pub fn resolve_zone(&self, grid: &ZoneGrid) -> ZoneId {
        self.zone.unwrap_or_else(|| grid.zone_of(self.location))
    }
}

// ── Priority markers ──────────────────────────────────────────────────────────

/// A known vulnerable location (care home, dialysis centre) mapped before the
/// event.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PriorityMarker {
    pub location: GeoPoint,
    pub radius_m: f32,
}

/// Set of priority markers.  Standard-tier requesters inside any marker are
/// raised to `Vulnerable`; higher tiers are never lowered.
#[derive(Clone, Debug, Default)]
pub struct PriorityMarkers {
    markers: Vec<PriorityMarker>,
}

impl PriorityMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, location: GeoPoint, radius_m: f32) {
        self.markers.push(PriorityMarker { location, radius_m: radius_m.max(0.0) });
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Effective tier of a requester at `location`.
    pub fn tier_for(&self, tier: PriorityTier, location: GeoPoint) -> PriorityTier {
        if tier != PriorityTier::Standard {
            return tier;
        }
        let marked = self
            .markers
            .iter()
            .any(|m| m.location.distance_m(location) <= m.radius_m);
        if marked { PriorityTier::Vulnerable } else { tier }
    }
}
