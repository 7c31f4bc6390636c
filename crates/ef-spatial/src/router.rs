//! Routing trait and the default congestion-aware A* implementation.
//!
//! # Pluggability
//!
//! The solver calls routing via the [`Router`] trait, so applications can swap
//! in custom implementations (contraction hierarchies, time-dependent costs)
//! without touching the solver.
//!
//! # Determinism
//!
//! Costs are `f64`.  Ties in total cost are broken by the lower incoming
//! `EdgeId`, both when relaxing a node and when ordering the open set, so
//! identical inputs always produce identical paths.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ef_core::{EdgeId, GeoPoint, NodeId};

use crate::cost::{CongestionView, EdgeCostModel, PathConstraints};
use crate::network::RoadNetwork;
use crate::{SpatialError, SpatialResult};

// ── Path ──────────────────────────────────────────────────────────────────────

/// The result of a routing query: an ordered list of `EdgeId`s plus totals.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Path {
    /// Edges to traverse in order, from origin to target.
    pub edges:          Vec<EdgeId>,
    pub origin:         NodeId,
    pub target:         NodeId,
    /// Total weighted cost under the cost model at search time.
    pub cost:           f64,
    /// Physical length in metres.
    pub length_m:       f32,
    /// At least one edge was at or above the congested threshold.
    pub uses_congested: bool,
    /// Synthesised straight-line fallback; not a path through the graph.
    pub straight_line:  bool,
}

impl Path {
    /// Zero-length path for an origin that is already at the target.
    pub fn trivial(node: NodeId) -> Path {
        Path {
            edges:          Vec::new(),
            origin:         node,
            target:         node,
            cost:           0.0,
            length_m:       0.0,
            uses_congested: false,
            straight_line:  false,
        }
    }

    /// Fallback used when the graph offers no open path: cost and length are
    /// the great-circle distance between the two points.
    pub fn straight_line(origin: NodeId, from: GeoPoint, target: NodeId, to: GeoPoint) -> Path {
        let d = from.distance_m(to);
        Path {
            edges:          Vec::new(),
            origin,
            target,
            cost:           d as f64,
            length_m:       d,
            uses_congested: false,
            straight_line:  true,
        }
    }

    /// `true` if the origin and target are the same node.
    pub fn is_trivial(&self) -> bool {
        self.edges.is_empty() && !self.straight_line
    }

    /// `true` if the path traverses `edge`.
    pub fn touches(&self, edge: EdgeId) -> bool {
        self.edges.contains(&edge)
    }

    /// Length-weighted mean congestion level along the path.
    pub fn congestion_exposure(&self, network: &RoadNetwork, view: &dyn CongestionView) -> f64 {
        length_weighted(network, &self.edges, |e| view.level(e))
    }

    /// Length-weighted mean accessibility shortfall `max(0, need − rating)`.
    pub fn accessibility_shortfall(&self, network: &RoadNetwork, need: Option<f32>) -> f64 {
        let Some(need) = need else { return 0.0 };
        length_weighted(network, &self.edges, |e| {
            (need - network.edge_accessibility[e.index()]).max(0.0) as f64
        })
    }
}

fn length_weighted(network: &RoadNetwork, edges: &[EdgeId], f: impl Fn(EdgeId) -> f64) -> f64 {
    let (mut num, mut den) = (0.0f64, 0.0f64);
    for &e in edges {
        let len = network.edge_length_m[e.index()] as f64;
        num += len * f(e);
        den += len;
    }
    if den > 0.0 { num / den } else { 0.0 }
}

/// A path to one of several candidate targets.
#[derive(Debug, Clone, PartialEq)]
pub struct PathMatch {
    /// Index into the `targets` slice passed to the query.
    pub target_index: usize,
    pub path:         Path,
}

// ── Router trait ──────────────────────────────────────────────────────────────

/// Pluggable routing engine.
///
/// # Thread safety
///
/// Implementations must be `Send + Sync` so one router can serve all zone
/// workers of a parallel batch.
pub trait Router: Send + Sync {
    /// Cheapest path from `from` to whichever of `targets` is cheapest to
    /// reach.  Closed edges are never used.
    ///
    /// Returns [`SpatialError::GraphUnreachable`] when no open path reaches
    /// any target.
    fn find_path(
        &self,
        network:     &RoadNetwork,
        congestion:  &dyn CongestionView,
        from:        NodeId,
        targets:     &[NodeId],
        constraints: &PathConstraints,
    ) -> SpatialResult<PathMatch>;

    /// Cheapest path from `from` to **each** of `targets` (`None` where a
    /// target is unreachable), computed with one traversal.
    fn paths_to_targets(
        &self,
        network:     &RoadNetwork,
        congestion:  &dyn CongestionView,
        from:        NodeId,
        targets:     &[NodeId],
        constraints: &PathConstraints,
    ) -> SpatialResult<Vec<Option<Path>>>;
}

// ── AStarRouter ───────────────────────────────────────────────────────────────

/// Multi-target A* (for [`Router::find_path`]) and one-to-many Dijkstra (for
/// [`Router::paths_to_targets`]) over the CSR road graph.
///
/// Heuristic: great-circle distance to the nearest target, scaled by the
/// network's length/straight-line lower bound so it never overestimates.
///
/// With `avoid_congested`, the search first treats congested edges as
/// impassable and only falls back to them for targets that cannot otherwise
/// be reached.
#[derive(Clone, Debug, Default)]
pub struct AStarRouter {
    pub cost: EdgeCostModel,
}

impl AStarRouter {
    pub fn new(cost: EdgeCostModel) -> Self {
        Self { cost }
    }

    fn validate(network: &RoadNetwork, from: NodeId) -> SpatialResult<()> {
        if network.contains_node(from) {
            Ok(())
        } else {
            Err(SpatialError::NodeNotFound(from))
        }
    }
}

impl Router for AStarRouter {
    fn find_path(
        &self,
        network:     &RoadNetwork,
        congestion:  &dyn CongestionView,
        from:        NodeId,
        targets:     &[NodeId],
        constraints: &PathConstraints,
    ) -> SpatialResult<PathMatch> {
        Self::validate(network, from)?;

        if let Some(i) = targets.iter().position(|&t| t == from) {
            return Ok(PathMatch { target_index: i, path: Path::trivial(from) });
        }

        let phases: &[bool] = if constraints.avoid_congested { &[true, false] } else { &[false] };
        for &strict in phases {
            let search = Search { router: self, network, congestion, constraints, strict };
            let result = search.run(from, targets, Goal::First);
            if let Some(hit) = result.first {
                let target_index = targets
                    .iter()
                    .position(|&t| t == hit)
                    .unwrap_or_default();
                let path = search.reconstruct(&result, from, hit);
                return Ok(PathMatch { target_index, path });
            }
        }

        Err(SpatialError::GraphUnreachable { from, targets: targets.len() })
    }

    fn paths_to_targets(
        &self,
        network:     &RoadNetwork,
        congestion:  &dyn CongestionView,
        from:        NodeId,
        targets:     &[NodeId],
        constraints: &PathConstraints,
    ) -> SpatialResult<Vec<Option<Path>>> {
        Self::validate(network, from)?;

        let mut out: Vec<Option<Path>> = vec![None; targets.len()];
        let phases: &[bool] = if constraints.avoid_congested { &[true, false] } else { &[false] };

        for &strict in phases {
            let pending: Vec<NodeId> = targets
                .iter()
                .zip(&out)
                .filter(|(_, p)| p.is_none())
                .map(|(&t, _)| t)
                .collect();
            if pending.is_empty() {
                break;
            }
            let search = Search { router: self, network, congestion, constraints, strict };
            let result = search.run(from, &pending, Goal::All);
            for (slot, &t) in out.iter_mut().zip(targets) {
                if slot.is_none() && network.contains_node(t) && result.reached(t) {
                    *slot = Some(search.reconstruct(&result, from, t));
                }
            }
        }

        Ok(out)
    }
}

// ── Search internals ──────────────────────────────────────────────────────────

#[derive(Copy, Clone, PartialEq, Eq)]
enum Goal {
    /// Stop at the first target settled.
    First,
    /// Settle every reachable target.
    All,
}

/// Open-set entry.  Ordered so that `BinaryHeap` (a max-heap) pops the lowest
/// `f`, then the lowest incoming edge id, then the lowest node id.
#[derive(Copy, Clone)]
struct QueueEntry {
    f:    f64,
    g:    f64,
    via:  EdgeId,
    node: NodeId,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| other.via.cmp(&self.via))
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

struct SearchResult {
    dist:      Vec<f64>,
    prev_edge: Vec<EdgeId>,
    settled:   Vec<bool>,
    first:     Option<NodeId>,
}

impl SearchResult {
    fn reached(&self, node: NodeId) -> bool {
        self.settled[node.index()]
    }
}

struct Search<'a> {
    router:      &'a AStarRouter,
    network:     &'a RoadNetwork,
    congestion:  &'a dyn CongestionView,
    constraints: &'a PathConstraints,
    strict:      bool,
}

impl Search<'_> {
    fn run(&self, from: NodeId, targets: &[NodeId], goal: Goal) -> SearchResult {
        let n = self.network.node_count();
        let mut dist      = vec![f64::INFINITY; n];
        let mut prev_edge = vec![EdgeId::INVALID; n];
        let mut settled   = vec![false; n];
        let mut is_target = vec![false; n];

        let mut remaining = 0usize;
        let mut target_pos: Vec<GeoPoint> = Vec::new();
        for &t in targets {
            if self.network.contains_node(t) && !is_target[t.index()] {
                is_target[t.index()] = true;
                remaining += 1;
                target_pos.push(self.network.node_pos[t.index()]);
            }
        }

        let mut result = SearchResult { dist: Vec::new(), prev_edge: Vec::new(), settled: Vec::new(), first: None };
        if remaining == 0 {
            result.dist = dist;
            result.prev_edge = prev_edge;
            result.settled = settled;
            return result;
        }

        let scale = self.network.heuristic_scale;
        let h = |node: NodeId| -> f64 {
            if goal == Goal::All {
                return 0.0;
            }
            let p = self.network.node_pos[node.index()];
            target_pos
                .iter()
                .map(|&t| p.distance_m(t) as f64)
                .fold(f64::INFINITY, f64::min)
                * scale
        };

        dist[from.index()] = 0.0;
        let mut heap = BinaryHeap::new();
        heap.push(QueueEntry { f: h(from), g: 0.0, via: EdgeId::INVALID, node: from });

        while let Some(entry) = heap.pop() {
            let u = entry.node;
            if settled[u.index()] || entry.g > dist[u.index()] || entry.via != prev_edge[u.index()] {
                continue; // stale entry
            }
            settled[u.index()] = true;

            if is_target[u.index()] {
                match goal {
                    Goal::First => {
                        result.first = Some(u);
                        break;
                    }
                    Goal::All => {
                        remaining -= 1;
                        if remaining == 0 {
                            break;
                        }
                    }
                }
            }

            for edge in self.network.out_edges(u) {
                let v = self.network.edge_to[edge.index()];
                if settled[v.index()] {
                    continue;
                }
                let level = self.congestion.level(edge);
                let Some(c) = self.router.cost.edge_cost(
                    self.network,
                    edge,
                    level,
                    self.constraints,
                    self.strict,
                ) else {
                    continue;
                };
                let g = entry.g + c;
                let dv = dist[v.index()];
                if g < dv || (g == dv && edge < prev_edge[v.index()]) {
                    dist[v.index()] = g;
                    prev_edge[v.index()] = edge;
                    heap.push(QueueEntry { f: g + h(v), g, via: edge, node: v });
                }
            }
        }

        result.dist = dist;
        result.prev_edge = prev_edge;
        result.settled = settled;
        result
    }

    fn reconstruct(&self, result: &SearchResult, origin: NodeId, target: NodeId) -> Path {
        let mut edges = Vec::new();
        let mut cur = target;
        while cur != origin {
            let e = result.prev_edge[cur.index()];
            if e == EdgeId::INVALID {
                break;
            }
            edges.push(e);
            cur = self.network.edge_from[e.index()];
        }
        edges.reverse();

        let length_m = edges.iter().map(|e| self.network.edge_length_m[e.index()]).sum();
        let uses_congested = edges
            .iter()
            .any(|&e| self.router.cost.is_congested(self.congestion.level(e)));

        Path {
            edges,
            origin,
            target,
            cost: result.dist[target.index()],
            length_m,
            uses_congested,
            straight_line: false,
        }
    }
}
