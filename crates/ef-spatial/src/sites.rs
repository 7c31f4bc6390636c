//! Destination site index.
//!
//! Sites are addressed by `DestinationId` (dense, owned by the capacity
//! registry).  Positions and snapped road nodes are stored in id-indexed
//! vectors; an R-tree over the same points answers proximity queries.

use rstar::{PointDistance, RTree, RTreeObject, AABB};

use ef_core::{DestinationId, GeoPoint, NodeId, metres_to_degrees};

#[derive(Clone)]
struct SiteEntry {
    point: [f32; 2],
    id:    DestinationId,
}

impl RTreeObject for SiteEntry {
    type Envelope = AABB<[f32; 2]>;
    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

impl PointDistance for SiteEntry {
    fn distance_2(&self, point: &[f32; 2]) -> f32 {
        let dlat = self.point[0] - point[0];
        let dlon = self.point[1] - point[1];
        dlat * dlat + dlon * dlon
    }
}

pub(crate) struct DestinationSites {
    pos:  Vec<Option<GeoPoint>>,
    node: Vec<NodeId>,
    idx:  RTree<SiteEntry>,
}

impl DestinationSites {
    pub(crate) fn build(
        sites: Vec<(DestinationId, GeoPoint)>,
        snap: impl Fn(GeoPoint) -> NodeId,
    ) -> Self {
        let len = sites.iter().map(|(id, _)| id.index() + 1).max().unwrap_or(0);
        let mut pos = vec![None; len];
        let mut node = vec![NodeId::INVALID; len];
        for &(id, p) in &sites {
            pos[id.index()] = Some(p);
            node[id.index()] = snap(p);
        }
        let entries = sites
            .into_iter()
            .map(|(id, p)| SiteEntry { point: [p.lat, p.lon], id })
            .collect();
        Self { pos, node, idx: RTree::bulk_load(entries) }
    }

    pub(crate) fn len(&self) -> usize {
        self.idx.size()
    }

    pub(crate) fn pos(&self, id: DestinationId) -> Option<GeoPoint> {
        self.pos.get(id.index()).copied().flatten()
    }

    pub(crate) fn node(&self, id: DestinationId) -> Option<NodeId> {
        self.node.get(id.index()).copied().filter(|n| n.is_valid())
    }

    pub(crate) fn k_nearest(&self, at: GeoPoint, k: usize) -> Vec<DestinationId> {
        // Degree-space order is close to, but not exactly, great-circle order;
        // over-fetch and re-rank.
        let mut found: Vec<(f32, DestinationId)> = self
            .idx
            .nearest_neighbor_iter(&[at.lat, at.lon])
            .take(k.saturating_mul(2).max(k))
            .map(|e| (at.distance_m(GeoPoint::new(e.point[0], e.point[1])), e.id))
            .collect();
        found.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        found.truncate(k);
        found.into_iter().map(|(_, id)| id).collect()
    }

    pub(crate) fn within(&self, at: GeoPoint, radius_m: f32) -> Vec<(DestinationId, f32)> {
        let deg = metres_to_degrees(radius_m, at.lat);
        let mut found: Vec<(DestinationId, f32)> = self
            .idx
            .locate_within_distance([at.lat, at.lon], deg * deg)
            .map(|e| (e.id, at.distance_m(GeoPoint::new(e.point[0], e.point[1]))))
            .filter(|&(_, d)| d <= radius_m)
            .collect();
        found.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        found
    }
}
