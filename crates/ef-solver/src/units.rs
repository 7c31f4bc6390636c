//! Grouping requests into assignment units and ordering them.
//!
//! A unit is either a single requester or every requester sharing one
//! `FamilyId`.  Units are placed atomically: all members at one destination,
//! or none.

use rustc_hash::FxHashMap;

use ef_core::{DestinationId, FeatureSet, GeoPoint, PriorityTier, RequesterId, Timestamp, ZoneGrid, ZoneId};

use crate::request::{EvacRequest, PriorityMarkers};

/// Requests placed together.
#[derive(Clone, Debug, PartialEq)]
pub struct Unit {
    /// Members in submission order; `members[0]` is the lead.
    pub members:    Vec<EvacRequest>,
    /// Most urgent member tier, after priority markers.
    pub tier:       PriorityTier,
    /// Earliest member arrival.
    pub arrived_at: Timestamp,
    pub zone:       ZoneId,
    /// Destination this unit must go to if it can (family remnants rejoining
    /// members who already arrived).
    pub pinned:     Option<DestinationId>,
    /// Destinations to skip unless nothing else fits (alternative requests).
    pub avoid:      Vec<DestinationId>,
}

impl Unit {
    pub fn size(&self) -> u32 {
        self.members.len() as u32
    }

    pub fn lead(&self) -> &EvacRequest {
        &self.members[0]
    }

    pub fn location(&self) -> GeoPoint {
        self.lead().location
    }

    pub fn requesters(&self) -> Vec<RequesterId> {
        self.members.iter().map(|m| m.requester).collect()
    }

    /// Union of every member's hard feature requirements.
    pub fn hard_features(&self, medical_requires_facility: bool) -> FeatureSet {
        self.members.iter().fold(FeatureSet::NONE, |acc, m| {
            let mut f = m.hard_features(medical_requires_facility);
            if medical_requires_facility && self.tier == PriorityTier::Medical {
                f.insert(FeatureSet::MEDICAL);
            }
            acc.union(f)
        })
    }

    /// Strictest accessibility need among members.
    pub fn accessibility_need(&self) -> Option<f32> {
        self.members
            .iter()
            .filter_map(|m| m.accessibility_need)
            .fold(None, |acc: Option<f32>, n| Some(acc.map_or(n, |a| a.max(n))))
    }
}

/// Group requests into units and sort them into processing order.
///
/// Markers raise tiers before grouping.  Order: tier (Medical first), then
/// earliest arrival, then first appearance in `requests`.
pub fn form_units(requests: Vec<EvacRequest>, markers: &PriorityMarkers, grid: &ZoneGrid) -> Vec<Unit> {
    let mut units: Vec<Unit> = Vec::new();
    let mut family_slot: FxHashMap<u32, usize> = FxHashMap::default();

    for mut req in requests {
        req.tier = markers.tier_for(req.tier, req.location);
        let slot = req.family.map(|f| f.0).and_then(|f| family_slot.get(&f).copied());
        match slot {
            Some(i) => {
                let u = &mut units[i];
                u.tier = u.tier.most_urgent(req.tier);
                if req.arrived_at < u.arrived_at {
                    u.arrived_at = req.arrived_at;
                }
                u.members.push(req);
            }
            None => {
                if let Some(f) = req.family {
                    family_slot.insert(f.0, units.len());
                }
                units.push(Unit {
                    tier:       req.tier,
                    arrived_at: req.arrived_at,
                    zone:       req.resolve_zone(grid),
                    pinned:     None,
                    avoid:      Vec::new(),
                    members:    vec![req],
                });
            }
        }
    }

    // Stable: equal keys keep first-appearance order.
    units.sort_by_key(|u| (u.tier, u.arrived_at));
    units
}
