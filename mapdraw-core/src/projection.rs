//! Coordinate reference systems used for measuring and exporting.

use serde::{Deserialize, Serialize};

use crate::geometry::{Coordinate, Geometry};

/// Mean earth radius in meters (spherical model).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Web Mercator sphere radius in meters.
const MERCATOR_RADIUS_M: f64 = 6_378_137.0;

/// A coordinate reference system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Projection {
    /// A metric plane; distances are Euclidean.
    Planar,
    /// Longitude/latitude in degrees (EPSG:4326).
    Wgs84,
    /// Spherical Web Mercator in meters (EPSG:3857).
    #[default]
    WebMercator,
}

impl Projection {
    /// Whether measurements in this projection need geodesic math.
    #[must_use]
    pub const fn is_geographic(self) -> bool {
        !matches!(self, Self::Planar)
    }

    /// Convert a coordinate from this projection to `target`.
    ///
    /// `Planar` has no datum and is passed through unchanged.
    #[must_use]
    pub fn transform(self, coordinate: Coordinate, target: Self) -> Coordinate {
        match (self, target) {
            (Self::WebMercator, Self::Wgs84) => mercator_to_lon_lat(coordinate),
            (Self::Wgs84, Self::WebMercator) => lon_lat_to_mercator(coordinate),
            _ => coordinate,
        }
    }

    /// Convert every coordinate of a geometry to `target`.
    #[must_use]
    pub fn transform_geometry(self, geometry: &Geometry, target: Self) -> Geometry {
        if self == target {
            return geometry.clone();
        }
        geometry.map_coordinates(|c| self.transform(c, target))
    }
}

fn mercator_to_lon_lat(c: Coordinate) -> Coordinate {
    let lon = (c.x / MERCATOR_RADIUS_M).to_degrees();
    let lat = (2.0 * (c.y / MERCATOR_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    Coordinate::new(lon, lat)
}

fn lon_lat_to_mercator(c: Coordinate) -> Coordinate {
    let x = MERCATOR_RADIUS_M * c.x.to_radians();
    let y = MERCATOR_RADIUS_M * (std::f64::consts::FRAC_PI_4 + c.y.to_radians() / 2.0).tan().ln();
    Coordinate::new(x, y)
}

/// Great-circle distance in meters between two lon/lat coordinates.
#[must_use]
pub fn haversine_distance(a: Coordinate, b: Coordinate) -> f64 {
    let (lat1, lat2) = (a.y.to_radians(), b.y.to_radians());
    let d_lat = lat2 - lat1;
    let d_lon = (b.x - a.x).to_radians();
    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Area in square meters of a closed lon/lat ring on the sphere.
#[must_use]
pub fn spherical_ring_area(ring: &[Coordinate]) -> f64 {
    let mut total = 0.0;
    for edge in ring.windows(2) {
        let (a, b) = (edge[0], edge[1]);
        total += (b.x - a.x).to_radians() * (2.0 + a.y.to_radians().sin() + b.y.to_radians().sin());
    }
    (total * EARTH_RADIUS_M * EARTH_RADIUS_M / 2.0).abs()
}
