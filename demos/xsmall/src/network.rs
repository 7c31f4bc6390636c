//! Synthetic Mobile, AL city used by the demo.
//!
//! A 6 × 6 street grid (~1 km blocks) with two arterials, a few
//! poorly accessible streets, four shelters and two care homes.

use ef_capacity::CapacityRegistryBuilder;
use ef_core::{FeatureSet, GeoPoint, NodeId};
use ef_spatial::{EdgeSpec, RoadNetworkBuilder};

pub const ROWS: usize = 6;
pub const COLS: usize = 6;
const ORIGIN: GeoPoint = GeoPoint { lat: 30.660, lon: -88.100 };
const BLOCK_DEG: f32 = 0.01;

const STREET_CAP:   f32 = 900.0;
const ARTERIAL_CAP: f32 = 2_400.0;
const ARTERIAL_ROW: usize = 2;
const ARTERIAL_COL: usize = 3;

pub struct City {
    pub roads:      RoadNetworkBuilder,
    pub shelters:   CapacityRegistryBuilder,
    pub care_homes: Vec<GeoPoint>,
    /// South-west and north-east corners of the populated area.
    pub sw:         GeoPoint,
    pub ne:         GeoPoint,
}

fn corner(row: usize, col: usize) -> GeoPoint {
    GeoPoint::new(ORIGIN.lat + row as f32 * BLOCK_DEG, ORIGIN.lon + col as f32 * BLOCK_DEG)
}

pub fn build_city() -> City {
    let mut b = RoadNetworkBuilder::with_capacity(ROWS * COLS, ROWS * COLS * 4);
    let mut ids = [[NodeId::INVALID; COLS]; ROWS];
    for (r, row) in ids.iter_mut().enumerate() {
        for (c, id) in row.iter_mut().enumerate() {
            *id = b.add_node(corner(r, c));
        }
    }

    for r in 0..ROWS {
        for c in 0..COLS {
            if c + 1 < COLS {
                let cap = if r == ARTERIAL_ROW { ARTERIAL_CAP } else { STREET_CAP };
                b.add_straight_road(ids[r][c], ids[r][c + 1], cap);
            }
            if r + 1 < ROWS {
                let a = ids[r][c];
                let z = ids[r + 1][c];
                if c == ARTERIAL_COL {
                    b.add_straight_road(a, z, ARTERIAL_CAP);
                } else if c == 0 {
                    // Old riverside streets: narrow, broken kerbs.
                    let len = corner(r, c).distance_m(corner(r + 1, c));
                    b.add_road(a, z, EdgeSpec::new(len, STREET_CAP / 2.0).with_accessibility(0.4));
                } else {
                    b.add_straight_road(a, z, STREET_CAP);
                }
            }
        }
    }

    let mut s = CapacityRegistryBuilder::new();
    s.add_destination(
        "Murphy High Gym",
        corner(4, 4),
        160,
        FeatureSet::MEDICAL.union(FeatureSet::WHEELCHAIR).union(FeatureSet::GENERATOR),
    );
    s.add_destination("Civic Center", corner(1, 2), 260, FeatureSet::WHEELCHAIR.union(FeatureSet::PETS));
    s.add_destination("Bishop State Annex", corner(5, 1), 90, FeatureSet::NONE);
    let church = s.add_destination("Westlawn Church Hall", corner(0, 5), 70, FeatureSet::PETS);
    s.set_initial_occupancy(church, 12);

    City {
        roads:      b,
        shelters:   s,
        care_homes: vec![corner(3, 1), corner(2, 4)],
        sw:         corner(0, 0),
        ne:         corner(ROWS - 1, COLS - 1),
    }
}
