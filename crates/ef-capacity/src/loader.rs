//! CSV shelter loader.
//!
//! # CSV format
//!
//! One row per destination.  `features` is a `|`-separated tag list (see
//! [`FeatureSet`]); `occupancy` is optional and defaults to 0.
//!
//! ```csv
//! name,lat,lon,capacity,features,occupancy
//! Central High Gym,30.6940,-88.0430,450,medical|wheelchair|generator,
//! Civic Center,30.6890,-88.0390,1200,wheelchair|pets,120
//! ```
//!
//! Rows are assigned `DestinationId`s in file order.

use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use ef_core::{FeatureSet, GeoPoint};

use crate::registry::CapacityRegistryBuilder;
use crate::{CapacityError, CapacityResult};

#[derive(Deserialize)]
struct ShelterRecord {
    name:      String,
    lat:       f32,
    lon:       f32,
    capacity:  u32,
    #[serde(default)]
    features:  String,
    #[serde(default)]
    occupancy: Option<u32>,
}

/// Load destinations from a CSV file.
pub fn load_shelters_csv(path: &Path) -> CapacityResult<CapacityRegistryBuilder> {
    let file = std::fs::File::open(path)?;
    load_shelters_reader(file)
}

/// Like [`load_shelters_csv`] but accepts any `Read` source.
pub fn load_shelters_reader<R: Read>(reader: R) -> CapacityResult<CapacityRegistryBuilder> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut builder = CapacityRegistryBuilder::new();

    for (line, result) in rdr.deserialize::<ShelterRecord>().enumerate() {
        let row = result.map_err(|e| CapacityError::Parse(e.to_string()))?;
        let features: FeatureSet = row
            .features
            .parse()
            .map_err(|e| CapacityError::Parse(format!("row {}: {e}", line + 1)))?;
        let id = builder.add_destination(row.name, GeoPoint::new(row.lat, row.lon), row.capacity, features);
        if let Some(occ) = row.occupancy {
            builder.set_initial_occupancy(id, occ);
        }
    }

    Ok(builder)
}
