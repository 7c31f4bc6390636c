//! CSV road network loader.
//!
//! # CSV format
//!
//! Two files.  Nodes carry an external id that edges refer to:
//!
//! ```csv
//! id,lat,lon
//! 1001,30.6940,-88.0430
//! 1002,30.6950,-88.0410
//! ```
//!
//! Edges are bidirectional unless `oneway` is `true`.  Blank `length_m` means
//! "great-circle distance between the end nodes"; blank `accessibility` means
//! fully accessible.
//!
//! ```csv
//! from,to,length_m,capacity_per_hour,accessibility,oneway
//! 1001,1002,,1800,1.0,false
//! 1002,1001,240,600,0.4,true
//! ```
//!
//! The loader returns the builder rather than a finished network so callers
//! can register destination sites before `build()`.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use ef_core::{GeoPoint, NodeId};

use crate::network::{EdgeSpec, RoadNetworkBuilder};
use crate::{SpatialError, SpatialResult};

// ── CSV records ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct NodeRecord {
    id:  u64,
    lat: f32,
    lon: f32,
}

#[derive(Deserialize)]
struct EdgeRecord {
    from:              u64,
    to:                u64,
    length_m:          Option<f32>,
    capacity_per_hour: f32,
    accessibility:     Option<f32>,
    #[serde(default)]
    oneway:            Option<bool>,
}

/// External node id → dense `NodeId` assigned by the loader.
pub type NodeIdMap = HashMap<u64, NodeId>;

// ── Public API ────────────────────────────────────────────────────────────────

/// Load nodes and edges from two CSV files.
pub fn load_network_csv(nodes: &Path, edges: &Path) -> SpatialResult<(RoadNetworkBuilder, NodeIdMap)> {
    let nodes = std::fs::File::open(nodes)?;
    let edges = std::fs::File::open(edges)?;
    load_network_reader(nodes, edges)
}

/// Like [`load_network_csv`] but accepts any `Read` sources.
pub fn load_network_reader<N: Read, E: Read>(
    nodes: N,
    edges: E,
) -> SpatialResult<(RoadNetworkBuilder, NodeIdMap)> {
    let mut builder = RoadNetworkBuilder::new();
    let mut ids: NodeIdMap = HashMap::new();

    // ── Nodes ─────────────────────────────────────────────────────────────
    let mut rdr = csv::Reader::from_reader(nodes);
    for result in rdr.deserialize::<NodeRecord>() {
        let row = result.map_err(|e| SpatialError::Parse(e.to_string()))?;
        if ids.contains_key(&row.id) {
            return Err(SpatialError::Parse(format!("duplicate node id {}", row.id)));
        }
        let id = builder.add_node(GeoPoint::new(row.lat, row.lon));
        ids.insert(row.id, id);
    }

    // ── Edges ─────────────────────────────────────────────────────────────
    let mut rdr = csv::Reader::from_reader(edges);
    for result in rdr.deserialize::<EdgeRecord>() {
        let row = result.map_err(|e| SpatialError::Parse(e.to_string()))?;
        let from = lookup(&ids, row.from)?;
        let to = lookup(&ids, row.to)?;
        if row.capacity_per_hour <= 0.0 {
            return Err(SpatialError::Parse(format!(
                "edge {}→{}: capacity_per_hour must be positive",
                row.from, row.to
            )));
        }
        let length = row
            .length_m
            .unwrap_or_else(|| builder.node_pos(from).distance_m(builder.node_pos(to)));
        let spec = EdgeSpec::new(length, row.capacity_per_hour)
            .with_accessibility(row.accessibility.unwrap_or(1.0));
        if row.oneway.unwrap_or(false) {
            builder.add_directed_edge(from, to, spec);
        } else {
            builder.add_road(from, to, spec);
        }
    }

    Ok((builder, ids))
}

fn lookup(ids: &NodeIdMap, external: u64) -> SpatialResult<NodeId> {
    ids.get(&external)
        .copied()
        .ok_or_else(|| SpatialError::Parse(format!("edge references unknown node {external}")))
}
