//! Snap classification of the pointer against the drawing layer.
//!
//! The modify tooling keeps a synthesized "vertex feature" under the pointer
//! whenever the pointer is close enough to a feature outline. That feature sits
//! either exactly on an existing vertex or somewhere along an edge, so comparing
//! it against the owning feature's vertex list tells the two apart.

use serde::{Deserialize, Serialize};

use crate::event::PointerKind;
use crate::geometry::{
    closest_on_segment, pixel_distance_sq, ring_contains, Coordinate, Feature, FeatureId, Geometry,
    Pixel, Viewport,
};

/// Hit tolerance for mouse and pen input, in pixels.
pub const MOUSE_TOLERANCE_PX: f32 = 4.0;

/// Hit tolerance for touch input, in pixels.
pub const TOUCH_TOLERANCE_PX: f32 = 12.0;

/// What the pointer is snapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapType {
    /// The sketch's floating vertex sits on its first vertex.
    FirstPoint,
    /// The sketch's floating vertex sits on its previous vertex.
    LastPoint,
    /// An existing vertex of a feature.
    Vertex,
    /// A point along an edge of a feature.
    Edge,
    /// The interior (or body) of a feature.
    Face,
}

/// Hit tolerance for the given input device.
#[must_use]
pub const fn tolerance_for(kind: PointerKind) -> f32 {
    match kind {
        PointerKind::Touch => TOUCH_TOLERANCE_PX,
        PointerKind::Mouse | PointerKind::Pen => MOUSE_TOLERANCE_PX,
    }
}

/// A vertex feature synthesized by the modify overlay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexHit {
    /// Position of the synthesized vertex feature.
    pub coordinate: Coordinate,
    /// The feature whose outline it lies on.
    pub owner: FeatureId,
}

/// Hit testing against the interaction layer and the modify overlay.
pub trait HitTest {
    /// Vertex features of the modify overlay within `tolerance` of `pixel`.
    fn vertex_hits(&self, pixel: Pixel, tolerance: f32) -> Vec<VertexHit>;

    /// Features of the interaction layer within `tolerance` of `pixel`.
    fn feature_hits(&self, pixel: Pixel, tolerance: f32) -> Vec<&Feature>;

    /// Look up a feature of the interaction layer by ID.
    fn feature(&self, id: FeatureId) -> Option<&Feature>;
}

/// Classify the pointer position.
///
/// Vertex beats edge beats face; the first match wins. Never fails: no
/// candidates simply means no snap.
#[must_use]
pub fn classify<H: HitTest + ?Sized>(pixel: Pixel, kind: PointerKind, candidates: &H) -> Option<SnapType> {
    classify_with_tolerance(pixel, tolerance_for(kind), candidates)
}

/// Classify the pointer position with an explicit tolerance.
#[must_use]
pub fn classify_with_tolerance<H: HitTest + ?Sized>(
    pixel: Pixel,
    tolerance: f32,
    candidates: &H,
) -> Option<SnapType> {
    let vertex_hits = candidates.vertex_hits(pixel, tolerance);

    let on_vertex = vertex_hits.iter().any(|hit| {
        candidates
            .feature(hit.owner)
            .is_some_and(|owner| owner.geometry.has_vertex(hit.coordinate))
    });
    if on_vertex {
        return Some(SnapType::Vertex);
    }
    if !vertex_hits.is_empty() {
        return Some(SnapType::Edge);
    }
    if !candidates.feature_hits(pixel, tolerance).is_empty() {
        return Some(SnapType::Face);
    }
    None
}

/// Screen-space hit tester over a slice of features.
///
/// Emulates the modify overlay: the synthesized vertex snaps onto an existing
/// vertex when one is within tolerance and otherwise lies at the closest point
/// of the nearest edge.
#[derive(Debug, Clone, Copy)]
pub struct LayerHitTester<'a> {
    features: &'a [Feature],
    viewport: &'a Viewport,
}

impl<'a> LayerHitTester<'a> {
    /// Create a hit tester for the given features and viewport.
    #[must_use]
    pub const fn new(features: &'a [Feature], viewport: &'a Viewport) -> Self {
        Self { features, viewport }
    }

    fn vertex_hit(&self, feature: &Feature, pixel: Pixel, tolerance_sq: f32) -> Option<VertexHit> {
        if let Geometry::Point(c) = feature.geometry {
            let near = pixel_distance_sq(pixel, self.viewport.to_pixel(c)) <= tolerance_sq;
            return near.then_some(VertexHit {
                coordinate: c,
                owner: feature.id,
            });
        }
        let mut best: Option<(f32, Pixel, Coordinate, Coordinate)> = None;
        for (a, b) in feature.geometry.segments() {
            let closest = closest_on_segment(pixel, self.viewport.to_pixel(a), self.viewport.to_pixel(b));
            let d = pixel_distance_sq(pixel, closest);
            if d <= tolerance_sq && best.is_none_or(|(bd, ..)| d < bd) {
                best = Some((d, closest, a, b));
            }
        }
        let (_, closest, a, b) = best?;

        let da = pixel_distance_sq(pixel, self.viewport.to_pixel(a));
        let db = pixel_distance_sq(pixel, self.viewport.to_pixel(b));
        let coordinate = if da <= tolerance_sq && da <= db {
            a
        } else if db <= tolerance_sq {
            b
        } else {
            self.viewport.to_coordinate(closest)
        };
        Some(VertexHit {
            coordinate,
            owner: feature.id,
        })
    }

    fn touches(&self, feature: &Feature, pixel: Pixel, tolerance_sq: f32) -> bool {
        match &feature.geometry {
            Geometry::Point(c) => pixel_distance_sq(pixel, self.viewport.to_pixel(*c)) <= tolerance_sq,
            Geometry::LineString(_) => self.vertex_hit(feature, pixel, tolerance_sq).is_some(),
            Geometry::Polygon(ring) => {
                ring_contains(ring, self.viewport.to_coordinate(pixel))
                    || self.vertex_hit(feature, pixel, tolerance_sq).is_some()
            }
        }
    }
}

impl HitTest for LayerHitTester<'_> {
    fn vertex_hits(&self, pixel: Pixel, tolerance: f32) -> Vec<VertexHit> {
        let tolerance_sq = tolerance * tolerance;
        self.features
            .iter()
            .filter_map(|f| self.vertex_hit(f, pixel, tolerance_sq))
            .collect()
    }

    fn feature_hits(&self, pixel: Pixel, tolerance: f32) -> Vec<&Feature> {
        let tolerance_sq = tolerance * tolerance;
        self.features
            .iter()
            .filter(|f| self.touches(f, pixel, tolerance_sq))
            .collect()
    }

    fn feature(&self, id: FeatureId) -> Option<&Feature> {
        self.features.iter().find(|f| f.id == id)
    }
}
