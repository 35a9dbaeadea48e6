//! Length/area statistics and sketch rectification.
//!
//! While drawing, a polygon sketch always carries a synthetic edge from the
//! floating vertex back to the first one. Until the user actually closes the
//! ring on its first point, that sketch is measured and stored as an open line.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::geometry::{Coordinate, Geometry};
use crate::projection::{haversine_distance, spherical_ring_area, Projection};

/// Length and area of one or more geometries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeometryStats {
    /// Length in meters (ring perimeter for polygons).
    pub length: f64,
    /// Area in square meters; only present for genuinely closed rings.
    pub area: Option<f64>,
}

impl GeometryStats {
    /// Component-wise sum; the area stays absent only if both are absent.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        let area = match (self.area, other.area) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };
        Self {
            length: self.length + other.length,
            area,
        }
    }
}

/// Computes statistics in a given measurement projection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeometryStatsEngine {
    projection: Projection,
}

impl GeometryStatsEngine {
    /// Create an engine for geometries stored in `projection`.
    #[must_use]
    pub const fn new(projection: Projection) -> Self {
        Self { projection }
    }

    /// The projection geometries are expected in.
    #[must_use]
    pub const fn projection(&self) -> Projection {
        self.projection
    }

    /// Length and area of a single geometry.
    #[must_use]
    pub fn stats(&self, geometry: &Geometry) -> GeometryStats {
        match geometry {
            Geometry::Point(_) => GeometryStats::default(),
            Geometry::LineString(coords) => GeometryStats {
                length: self.path_length(coords),
                area: None,
            },
            Geometry::Polygon(ring) => GeometryStats {
                length: self.path_length(ring),
                area: (ring.len() >= 4).then(|| self.ring_area(ring)),
            },
        }
    }

    /// Statistics of the geometry as it would be displayed and stored.
    #[must_use]
    pub fn effective_stats(&self, geometry: &Geometry, is_drawing: bool, closed_on_first: bool) -> GeometryStats {
        self.stats(&rectify(geometry, is_drawing, closed_on_first))
    }

    /// Sum of the rectified statistics over a selection.
    #[must_use]
    pub fn aggregate<'a, I>(&self, geometries: I) -> GeometryStats
    where
        I: IntoIterator<Item = &'a Geometry>,
    {
        geometries
            .into_iter()
            .map(|g| self.effective_stats(g, false, true))
            .fold(GeometryStats::default(), GeometryStats::combine)
    }

    fn path_length(&self, coords: &[Coordinate]) -> f64 {
        let segments = coords.windows(2).map(|w| (w[0], w[1]));
        if self.projection.is_geographic() {
            segments
                .map(|(a, b)| haversine_distance(self.to_lon_lat(a), self.to_lon_lat(b)))
                .sum()
        } else {
            segments.map(|(a, b)| a.distance(b)).sum()
        }
    }

    fn ring_area(&self, ring: &[Coordinate]) -> f64 {
        if self.projection.is_geographic() {
            let lon_lat: Vec<_> = ring.iter().map(|c| self.to_lon_lat(*c)).collect();
            spherical_ring_area(&lon_lat)
        } else {
            planar_ring_area(ring)
        }
    }

    fn to_lon_lat(&self, c: Coordinate) -> Coordinate {
        self.projection.transform(c, Projection::Wgs84)
    }
}

/// Shoelace area of a closed ring.
#[must_use]
pub fn planar_ring_area(ring: &[Coordinate]) -> f64 {
    let twice: f64 = ring.windows(2).map(|w| w[0].x * w[1].y - w[1].x * w[0].y).sum();
    (twice / 2.0).abs()
}

/// The geometry that should be measured and persisted.
///
/// An in-progress polygon that has not been closed on its first point becomes
/// a line without the synthetic closing vertex. Everything else is returned
/// unchanged.
#[must_use]
pub fn rectify(geometry: &Geometry, is_drawing: bool, closed_on_first: bool) -> Cow<'_, Geometry> {
    match geometry {
        Geometry::Polygon(_) if is_drawing && !closed_on_first => {
            Cow::Owned(Geometry::LineString(geometry.line_view().to_vec()))
        }
        _ => Cow::Borrowed(geometry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_square() -> Geometry {
        Geometry::polygon_from_vertices(&[
            Coordinate::new(0.0, 0.0),
            Coordinate::new(10.0, 0.0),
            Coordinate::new(10.0, 10.0),
            Coordinate::new(0.0, 10.0),
        ])
    }

    #[test]
    fn test_unclosed_ring_measures_as_open_line() {
        let engine = GeometryStatsEngine::new(Projection::Planar);
        let stats = engine.effective_stats(&open_square(), true, false);
        assert!(stats.area.is_none());
        assert!((stats.length - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_closed_ring_reports_area() {
        let engine = GeometryStatsEngine::new(Projection::Planar);
        let stats = engine.effective_stats(&open_square(), true, true);
        assert_eq!(stats.area, Some(100.0));
        assert!((stats.length - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_rectify_leaves_finished_polygons_alone() {
        let square = open_square();
        assert!(matches!(rectify(&square, false, false), Cow::Borrowed(_)));
        let line = rectify(&square, true, false);
        assert_eq!(line.line_view().len(), 4);
        assert_eq!(line.kind(), crate::geometry::GeometryKind::LineString);
    }

    #[test]
    fn test_aggregate_sums_selection() {
        let engine = GeometryStatsEngine::new(Projection::Planar);
        let line = Geometry::LineString(vec![Coordinate::new(0.0, 0.0), Coordinate::new(3.0, 4.0)]);
        let square = open_square();
        let stats = engine.aggregate([&line, &square]);
        assert!((stats.length - 45.0).abs() < 1e-9);
        assert_eq!(stats.area, Some(100.0));

        let none = engine.aggregate(std::iter::empty());
        assert_eq!(none, GeometryStats::default());
    }

    #[test]
    fn test_geodesic_length_in_web_mercator() {
        let engine = GeometryStatsEngine::new(Projection::WebMercator);
        let a = Projection::Wgs84.transform(Coordinate::new(0.0, 0.0), Projection::WebMercator);
        let b = Projection::Wgs84.transform(Coordinate::new(0.0, 1.0), Projection::WebMercator);
        let stats = engine.stats(&Geometry::LineString(vec![a, b]));
        assert!((stats.length - 111_195.0).abs() < 10.0, "got {}", stats.length);
    }
}
