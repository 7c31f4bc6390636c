//! Directed road graph, closure flags, and the builder that produces them.
//!
//! Out-edges are stored grouped by source node: edge ids `adj_offsets[n]`
//! up to `adj_offsets[n + 1]` all leave node `n`, so walking a node's
//! neighbours touches one contiguous run of each per-edge array.
//!
//! ```text
//! node n  ──►  edge_to[ adj_offsets[n] .. adj_offsets[n + 1] ]
//! ```
//!
//! Nothing about the topology changes once [`RoadNetworkBuilder::build`]
//! returns.  Closure is the exception: each edge carries an `AtomicBool`
//! that path searches read lock-free while the engine flips it.
//!
//! Two `rstar` trees sit beside the graph.  One snaps coordinates to road
//! nodes, the other holds destination sites.

use std::sync::atomic::{AtomicBool, Ordering};

use rstar::{PointDistance, RTree, RTreeObject, AABB};
use tracing::debug;

use ef_core::{DestinationId, EdgeId, GeoPoint, NodeId};

use crate::sites::DestinationSites;
use crate::{SpatialError, SpatialResult};

// ── Node snapping ─────────────────────────────────────────────────────────────

#[derive(Clone)]
struct SnapPoint {
    coords: [f32; 2],
    node:   NodeId,
}

impl SnapPoint {
    fn key(pos: GeoPoint) -> [f32; 2] {
        [pos.lat, pos.lon]
    }
}

impl RTreeObject for SnapPoint {
    type Envelope = AABB<[f32; 2]>;
    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.coords)
    }
}

impl PointDistance for SnapPoint {
    /// Planar degrees; snapping only needs the ordering to be right locally.
    fn distance_2(&self, other: &[f32; 2]) -> f32 {
        let (dy, dx) = (self.coords[0] - other[0], self.coords[1] - other[1]);
        dy * dy + dx * dx
    }
}

// ── Edge attributes ───────────────────────────────────────────────────────────

/// Static attributes of one directed edge.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EdgeSpec {
    /// Physical length in metres.
    pub length_m:          f32,
    /// Expected throughput in people (or vehicles) per hour at free flow.
    pub capacity_per_hour: f32,
    /// Accessibility rating in `[0, 1]`; 1 = fully step-free and wide.
    pub accessibility:     f32,
}

impl EdgeSpec {
    /// A fully accessible edge.
    pub fn new(length_m: f32, capacity_per_hour: f32) -> Self {
        Self { length_m, capacity_per_hour, accessibility: 1.0 }
    }

    pub fn with_accessibility(mut self, rating: f32) -> Self {
        self.accessibility = rating.clamp(0.0, 1.0);
        self
    }
}

/// Observable state of an edge.
///
/// `Open`/`Congested` are derived from the congestion level; `Closed` is the
/// administrative flag and overrides any measured level.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EdgeStatus {
    Open,
    Congested,
    Closed,
}

impl EdgeStatus {
    /// Map a congestion level onto a status, honouring closure first.
    pub fn classify(closed: bool, level: f64, congested_threshold: f64) -> EdgeStatus {
        if closed {
            EdgeStatus::Closed
        } else if level >= congested_threshold {
            EdgeStatus::Congested
        } else {
            EdgeStatus::Open
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            EdgeStatus::Open      => "open",
            EdgeStatus::Congested => "congested",
            EdgeStatus::Closed    => "closed",
        }
    }
}

impl std::fmt::Display for EdgeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ── RoadNetwork ───────────────────────────────────────────────────────────────

/// Road graph with grouped out-edges, per-edge closure flags, and the two
/// spatial trees.  Built only through [`RoadNetworkBuilder`]; the per-edge
/// vectors are public so routers can index them directly.
pub struct RoadNetwork {
    pub node_pos: Vec<GeoPoint>,

    /// `node_count + 1` offsets into the edge arrays.
    adj_offsets: Vec<u32>,

    // ── Per-edge columns, indexed by EdgeId ───────────────────────────────
    pub edge_from: Vec<NodeId>,
    pub edge_to:   Vec<NodeId>,
    /// Metres.
    pub edge_length_m: Vec<f32>,

    /// Expected hourly throughput of each edge.
    pub edge_capacity_per_hour: Vec<f32>,

    /// Accessibility rating of each edge in `[0, 1]`.
    pub edge_accessibility: Vec<f32>,

    /// Administrative closure flags.
    edge_closed: Vec<AtomicBool>,

    /// Lower bound of `edge_length / great_circle(from, to)` over all edges,
    /// clamped to `[0, 1]`.  Scales the A* heuristic so it stays admissible
    /// when recorded lengths are shorter than the straight line.
    pub(crate) heuristic_scale: f64,

    // ── Spatial ───────────────────────────────────────────────────────────
    snap:  RTree<SnapPoint>,
    sites: DestinationSites,
}

impl RoadNetwork {
    pub fn empty() -> Self {
        RoadNetworkBuilder::new().build()
    }

    // ── Size ──────────────────────────────────────────────────────────────

    pub fn node_count(&self) -> usize {
        self.node_pos.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_to.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_pos.is_empty()
    }

    #[inline]
    pub fn contains_node(&self, node: NodeId) -> bool {
        node.index() < self.node_count()
    }

    #[inline]
    pub fn contains_edge(&self, edge: EdgeId) -> bool {
        edge.index() < self.edge_count()
    }

    // ── Adjacency ─────────────────────────────────────────────────────────

    #[inline]
    fn edge_range(&self, node: NodeId) -> std::ops::Range<u32> {
        let n = node.index();
        self.adj_offsets[n]..self.adj_offsets[n + 1]
    }

    /// Edges leaving `node`, lowest id first.
    #[inline]
    pub fn out_edges(&self, node: NodeId) -> impl Iterator<Item = EdgeId> + '_ {
        self.edge_range(node).map(EdgeId)
    }

    #[inline]
    pub fn out_degree(&self, node: NodeId) -> usize {
        self.edge_range(node).len()
    }

    /// The lowest-id edge from `from` to `to`, if any.
    pub fn find_edge(&self, from: NodeId, to: NodeId) -> Option<EdgeId> {
        if !self.contains_node(from) {
            return None;
        }
        self.out_edges(from).find(|e| self.edge_to[e.index()] == to)
    }

    // ── Closure flags ─────────────────────────────────────────────────────

    /// `true` if `edge` is administratively closed.
    #[inline]
    pub fn is_closed(&self, edge: EdgeId) -> bool {
        self.edge_closed[edge.index()].load(Ordering::Acquire)
    }

    /// Open or close `edge`.  Returns `true` if the flag actually changed.
    ///
    /// Closed edges are excluded from every subsequent path search.
    pub fn set_edge_closed(&self, edge: EdgeId, closed: bool) -> SpatialResult<bool> {
        let flag = self
            .edge_closed
            .get(edge.index())
            .ok_or(SpatialError::EdgeNotFound(edge))?;
        let was = flag.swap(closed, Ordering::AcqRel);
        if was != closed {
            debug!(%edge, closed, "edge closure flag changed");
        }
        Ok(was != closed)
    }

    /// All currently closed edges in ascending id order.
    pub fn closed_edges(&self) -> Vec<EdgeId> {
        self.edge_closed
            .iter()
            .enumerate()
            .filter(|(_, f)| f.load(Ordering::Acquire))
            .map(|(i, _)| EdgeId(i as u32))
            .collect()
    }

    /// Midpoint of an edge, used for reporting.
    pub fn edge_midpoint(&self, edge: EdgeId) -> GeoPoint {
        let a = self.node_pos[self.edge_from[edge.index()].index()];
        let b = self.node_pos[self.edge_to[edge.index()].index()];
        GeoPoint::new((a.lat + b.lat) * 0.5, (a.lon + b.lon) * 0.5)
    }

    // ── Snapping ──────────────────────────────────────────────────────────

    /// Closest road node to `pos`; `None` on an empty network.
    pub fn nearest_node(&self, pos: GeoPoint) -> Option<NodeId> {
        self.snap.nearest_neighbor(&SnapPoint::key(pos)).map(|p| p.node)
    }

    /// The `k` closest road nodes, nearest first.
    pub fn k_nearest_nodes(&self, pos: GeoPoint, k: usize) -> Vec<NodeId> {
        let key = SnapPoint::key(pos);
        self.snap.nearest_neighbor_iter(&key).take(k).map(|p| p.node).collect()
    }

    // ── Destination sites ─────────────────────────────────────────────────

    /// Number of destination sites registered with the network.
    pub fn site_count(&self) -> usize {
        self.sites.len()
    }

    /// Road node a destination was snapped to at build time.
    pub fn destination_node(&self, dest: DestinationId) -> Option<NodeId> {
        self.sites.node(dest)
    }

    /// Location of a destination site.
    pub fn destination_pos(&self, dest: DestinationId) -> Option<GeoPoint> {
        self.sites.pos(dest)
    }

    /// Up to `k` destination sites nearest to `pos` by great-circle distance,
    /// ties broken by lower `DestinationId`.
    pub fn k_nearest_destinations(&self, pos: GeoPoint, k: usize) -> Vec<DestinationId> {
        self.sites.k_nearest(pos, k)
    }

    /// All destination sites within `radius_m` of `pos` as
    /// `(id, distance_m)`, ascending by distance then id.
    pub fn destinations_within(&self, pos: GeoPoint, radius_m: f32) -> Vec<(DestinationId, f32)> {
        self.sites.within(pos, radius_m)
    }
}

// ── RoadNetworkBuilder ────────────────────────────────────────────────────────

/// Collects nodes, edges and destination sites in any order.
///
/// [`build`](Self::build) groups edges by source (stable, so ids follow
/// insertion order within a node), loads the snapping tree, and attaches
/// every site to its closest node.
///
/// ```
/// use ef_core::GeoPoint;
/// use ef_spatial::{EdgeSpec, RoadNetworkBuilder};
///
/// let mut roads = RoadNetworkBuilder::new();
/// let depot  = roads.add_node(GeoPoint::new(30.69, -88.04));
/// let school = roads.add_node(GeoPoint::new(30.70, -88.03));
/// roads.add_road(depot, school, EdgeSpec::new(1_450.0, 1_200.0));
///
/// let net = roads.build();
/// assert_eq!(net.out_degree(depot), 1);
/// assert_eq!(net.find_edge(school, depot).map(|e| e.0), Some(1));
/// ```
pub struct RoadNetworkBuilder {
    nodes:     Vec<GeoPoint>,
    raw_edges: Vec<RawEdge>,
    sites:     Vec<(DestinationId, GeoPoint)>,
}

struct RawEdge {
    from: NodeId,
    to:   NodeId,
    spec: EdgeSpec,
}

impl RoadNetworkBuilder {
    pub fn new() -> Self {
        Self { nodes: Vec::new(), raw_edges: Vec::new(), sites: Vec::new() }
    }

    pub fn with_capacity(nodes: usize, edges: usize) -> Self {
        let mut b = Self::new();
        b.nodes.reserve(nodes);
        b.raw_edges.reserve(edges);
        b
    }

    /// Node ids are handed out densely from 0.
    pub fn add_node(&mut self, pos: GeoPoint) -> NodeId {
        self.nodes.push(pos);
        NodeId(self.nodes.len() as u32 - 1)
    }

    /// One-way edge.
    pub fn add_directed_edge(&mut self, from: NodeId, to: NodeId, spec: EdgeSpec) {
        self.raw_edges.push(RawEdge { from, to, spec });
    }

    /// Two-way road: `a → b` then `b → a`.
    pub fn add_road(&mut self, a: NodeId, b: NodeId, spec: EdgeSpec) {
        self.add_directed_edge(a, b, spec);
        self.add_directed_edge(b, a, spec);
    }

    /// Add a bidirectional road whose length is the great-circle distance
    /// between its end nodes.
    pub fn add_straight_road(&mut self, a: NodeId, b: NodeId, capacity_per_hour: f32) {
        let length = self.node_pos(a).distance_m(self.node_pos(b));
        self.add_road(a, b, EdgeSpec::new(length, capacity_per_hour));
    }

    /// Register a destination site; it is snapped to the nearest node at build.
    pub fn add_destination_site(&mut self, id: DestinationId, pos: GeoPoint) {
        self.sites.push((id, pos));
    }

    /// Look up the position of a node added earlier.
    pub fn node_pos(&self, id: NodeId) -> GeoPoint {
        self.nodes[id.index()]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.raw_edges.len()
    }

    pub fn build(self) -> RoadNetwork {
        let (n_nodes, n_edges) = (self.nodes.len(), self.raw_edges.len());

        // Stable sort keeps insertion order among a node's out-edges, so edge
        // ids are reproducible for identical inputs.
        let mut raw = self.raw_edges;
        raw.sort_by_key(|e| e.from.0);

        let edge_from:     Vec<NodeId> = raw.iter().map(|e| e.from).collect();
        let edge_to:       Vec<NodeId> = raw.iter().map(|e| e.to).collect();
        let edge_length_m: Vec<f32>    = raw.iter().map(|e| e.spec.length_m).collect();
        let edge_capacity_per_hour: Vec<f32> =
            raw.iter().map(|e| e.spec.capacity_per_hour).collect();
        let edge_accessibility: Vec<f32> =
            raw.iter().map(|e| e.spec.accessibility.clamp(0.0, 1.0)).collect();
        let edge_closed = (0..n_edges).map(|_| AtomicBool::new(false)).collect();

        // Count out-degrees, then prefix-sum into offsets.
        let mut adj_offsets = vec![0u32; n_nodes + 1];
        for e in &raw {
            adj_offsets[e.from.index() + 1] += 1;
        }
        let mut running = 0u32;
        for slot in adj_offsets.iter_mut() {
            running += *slot;
            *slot = running;
        }
        debug_assert_eq!(adj_offsets[n_nodes] as usize, n_edges);

        let heuristic_scale = raw
            .iter()
            .filter_map(|e| {
                let straight = self.nodes[e.from.index()].distance_m(self.nodes[e.to.index()]);
                (straight > 1.0).then(|| (e.spec.length_m / straight) as f64)
            })
            .fold(1.0f64, f64::min)
            .clamp(0.0, 1.0);

        let snap = RTree::bulk_load(
            self.nodes
                .iter()
                .zip(0u32..)
                .map(|(&pos, i)| SnapPoint { coords: SnapPoint::key(pos), node: NodeId(i) })
                .collect(),
        );
        let sites = DestinationSites::build(self.sites, |pos| {
            snap.nearest_neighbor(&SnapPoint::key(pos)).map_or(NodeId::INVALID, |p| p.node)
        });

        RoadNetwork {
            node_pos: self.nodes,
            adj_offsets,
            edge_from,
            edge_to,
            edge_length_m,
            edge_capacity_per_hour,
            edge_accessibility,
            edge_closed,
            heuristic_scale,
            snap,
            sites,
        }
    }
}

impl Default for RoadNetworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}
