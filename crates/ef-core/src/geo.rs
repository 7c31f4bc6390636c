//! Geographic coordinate type and spatial utilities.
//!
//! `GeoPoint` uses `f32` (single-precision) latitude/longitude.  At the
//! equator this gives ~1 m precision, enough for city-scale routing at
//! half the memory of `f64`.

use crate::ZoneId;

/// Metres per degree of latitude (mean).
pub const METRES_PER_DEGREE: f32 = 111_320.0;

/// A WGS-84 geographic coordinate stored as single-precision floats.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeoPoint {
    pub lat: f32,
    pub lon: f32,
}

impl GeoPoint {
    #[inline]
    pub fn new(lat: f32, lon: f32) -> Self {
        Self { lat, lon }
    }

    /// Haversine great-circle distance in metres.
    ///
    /// Accuracy: ±0.5 % (f32 rounding); suitable for routing heuristics and
    /// search-radius checks at city scale.
    pub fn distance_m(self, other: GeoPoint) -> f32 {
        const R: f32 = 6_371_000.0; // mean Earth radius, metres

        let d_lat = (other.lat - self.lat).to_radians();
        let d_lon = (other.lon - self.lon).to_radians();

        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();

        let a = (d_lat * 0.5).sin().powi(2)
            + lat1.cos() * lat2.cos() * (d_lon * 0.5).sin().powi(2);

        let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
        R * c
    }

    /// Approximate bounding-box check for quick rejection before `distance_m`.
    #[inline]
    pub fn within_bbox(self, center: GeoPoint, half_deg: f32) -> bool {
        (self.lat - center.lat).abs() <= half_deg
            && (self.lon - center.lon).abs() <= half_deg
    }

    /// Arithmetic mean of a set of points.  `None` for an empty slice.
    pub fn centroid(points: &[GeoPoint]) -> Option<GeoPoint> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f32;
        let (lat, lon) = points
            .iter()
            .fold((0.0f32, 0.0f32), |(la, lo), p| (la + p.lat, lo + p.lon));
        Some(GeoPoint::new(lat / n, lon / n))
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

/// Convert a ground distance to an (over-)approximate span in degrees.
///
/// Longitude degrees shrink with latitude, so the result is widened by
/// `1 / cos(lat)` to keep R-tree range queries conservative.
#[inline]
pub fn metres_to_degrees(metres: f32, at_lat: f32) -> f32 {
    let cos = at_lat.to_radians().cos().abs().max(0.01);
    metres / METRES_PER_DEGREE / cos
}

// ── ZoneGrid ──────────────────────────────────────────────────────────────────

/// Maps locations onto a regular lat/lon grid of zones.
///
/// Used when a request does not carry an explicit zone: the zone is the grid
/// cell containing the requester.  Zone ids are stable for a given origin and
/// cell size; rows wrap at `columns`.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ZoneGrid {
    pub origin:   GeoPoint,
    pub cell_deg: f32,
    pub columns:  u32,
}

impl ZoneGrid {
    pub fn new(origin: GeoPoint, cell_deg: f32, columns: u32) -> Self {
        Self { origin, cell_deg, columns: columns.max(1) }
    }

    /// The zone containing `point`.  Points south/west of the origin clamp to
    /// the first row/column.
    pub fn zone_of(&self, point: GeoPoint) -> ZoneId {
        let row = ((point.lat - self.origin.lat) / self.cell_deg).floor().max(0.0) as u32;
        let col = ((point.lon - self.origin.lon) / self.cell_deg).floor().max(0.0) as u32;
        ZoneId(row.saturating_mul(self.columns).saturating_add(col.min(self.columns - 1)))
    }
}

impl Default for ZoneGrid {
    /// One global zone-grid with ~5.5 km cells anchored at (-90, -180).
    fn default() -> Self {
        Self::new(GeoPoint::new(-90.0, -180.0), 0.05, 7_200)
    }
}
