//! Geometries, features and the screen/map transform.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A position in map units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Easting / longitude.
    pub x: f64,
    /// Northing / latitude.
    pub y: f64,
}

impl Coordinate {
    /// Create a new coordinate.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another coordinate.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// A position in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pixel {
    /// Pixels from the left edge.
    pub x: f32,
    /// Pixels from the top edge.
    pub y: f32,
}

impl Pixel {
    /// Create a new pixel position.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Unique identifier for a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureId(Uuid);

impl FeatureId {
    /// Create a new unique feature ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for FeatureId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FeatureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of a geometry, without its coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryKind {
    /// A single position.
    Point,
    /// An open sequence of positions.
    LineString,
    /// A single closed exterior ring.
    Polygon,
}

/// A simple-features geometry.
///
/// Polygons carry one exterior ring whose last coordinate repeats the first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    /// A single position.
    Point(Coordinate),
    /// An open line.
    LineString(Vec<Coordinate>),
    /// A closed ring.
    Polygon(Vec<Coordinate>),
}

impl Geometry {
    /// Build a polygon from open ring vertices, appending the closing vertex.
    #[must_use]
    pub fn polygon_from_vertices(vertices: &[Coordinate]) -> Self {
        let mut ring = vertices.to_vec();
        if let Some(&first) = vertices.first() {
            ring.push(first);
        }
        Self::Polygon(ring)
    }

    /// The kind of this geometry.
    #[must_use]
    pub const fn kind(&self) -> GeometryKind {
        match self {
            Self::Point(_) => GeometryKind::Point,
            Self::LineString(_) => GeometryKind::LineString,
            Self::Polygon(_) => GeometryKind::Polygon,
        }
    }

    /// All stored coordinates, including a ring's closing vertex.
    #[must_use]
    pub fn coordinates(&self) -> &[Coordinate] {
        match self {
            Self::Point(c) => std::slice::from_ref(c),
            Self::LineString(coords) | Self::Polygon(coords) => coords,
        }
    }

    /// The vertices as a line: a ring without its closing duplicate, a line as-is.
    #[must_use]
    pub fn line_view(&self) -> &[Coordinate] {
        match self {
            Self::Polygon(ring) if !ring.is_empty() => &ring[..ring.len() - 1],
            other => other.coordinates(),
        }
    }

    /// Apply `f` to every coordinate.
    #[must_use]
    pub fn map_coordinates(&self, mut f: impl FnMut(Coordinate) -> Coordinate) -> Self {
        match self {
            Self::Point(c) => Self::Point(f(*c)),
            Self::LineString(coords) => Self::LineString(coords.iter().map(|c| f(*c)).collect()),
            Self::Polygon(ring) => Self::Polygon(ring.iter().map(|c| f(*c)).collect()),
        }
    }

    /// Whether the given coordinate is exactly one of the geometry's vertices.
    #[must_use]
    pub fn has_vertex(&self, coordinate: Coordinate) -> bool {
        self.line_view().contains(&coordinate)
    }

    /// Consecutive vertex pairs, including a ring's closing edge.
    pub fn segments(&self) -> impl Iterator<Item = (Coordinate, Coordinate)> + '_ {
        self.coordinates().windows(2).map(|w| (w[0], w[1]))
    }

    /// Move vertex `index` of the line view. A ring's closing vertex follows the first.
    ///
    /// Returns `false` if there is no such vertex.
    pub fn move_vertex(&mut self, index: usize, to: Coordinate) -> bool {
        match self {
            Self::Point(c) if index == 0 => *c = to,
            Self::LineString(coords) if index < coords.len() => coords[index] = to,
            Self::Polygon(ring) if index + 1 < ring.len() => {
                ring[index] = to;
                if index == 0 {
                    let last = ring.len() - 1;
                    ring[last] = to;
                }
            }
            _ => return false,
        }
        true
    }

    /// Insert a vertex so it becomes vertex `index` of the line view.
    ///
    /// Returns `false` for points and out-of-range indices.
    pub fn insert_vertex(&mut self, index: usize, at: Coordinate) -> bool {
        match self {
            Self::LineString(coords) if index <= coords.len() => coords.insert(index, at),
            // index 0 would displace the closing vertex's partner
            Self::Polygon(ring) if index >= 1 && index < ring.len() => ring.insert(index, at),
            _ => return false,
        }
        true
    }
}

/// A geometry with identity and free-form properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Unique feature ID.
    pub id: FeatureId,
    /// The feature's geometry.
    pub geometry: Geometry,
    /// Free-form properties carried into persisted documents.
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl Feature {
    /// Create a feature with a fresh ID and no properties.
    #[must_use]
    pub fn new(geometry: Geometry) -> Self {
        Self {
            id: FeatureId::new(),
            geometry,
            properties: serde_json::Map::new(),
        }
    }

    /// Set the feature ID.
    #[must_use]
    pub fn with_id(mut self, id: FeatureId) -> Self {
        self.id = id;
        self
    }
}

/// The visible map extent, used to convert between pixels and map coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Map coordinate shown at the viewport center.
    pub center: Coordinate,
    /// Map units per pixel.
    pub resolution: f64,
    /// Viewport width in pixels.
    pub width: f32,
    /// Viewport height in pixels.
    pub height: f32,
}

impl Viewport {
    /// Create a viewport.
    #[must_use]
    pub const fn new(center: Coordinate, resolution: f64, width: f32, height: f32) -> Self {
        Self {
            center,
            resolution,
            width,
            height,
        }
    }

    /// Screen position of a map coordinate.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_pixel(&self, coordinate: Coordinate) -> Pixel {
        let x = f64::from(self.width) / 2.0 + (coordinate.x - self.center.x) / self.resolution;
        let y = f64::from(self.height) / 2.0 - (coordinate.y - self.center.y) / self.resolution;
        Pixel::new(x as f32, y as f32)
    }

    /// Map coordinate under a screen position.
    #[must_use]
    pub fn to_coordinate(&self, pixel: Pixel) -> Coordinate {
        let x = self.center.x + (f64::from(pixel.x) - f64::from(self.width) / 2.0) * self.resolution;
        let y = self.center.y - (f64::from(pixel.y) - f64::from(self.height) / 2.0) * self.resolution;
        Coordinate::new(x, y)
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(Coordinate::new(0.0, 0.0), 1.0, 800.0, 600.0)
    }
}

/// Squared pixel distance between two screen positions.
#[must_use]
pub fn pixel_distance_sq(a: Pixel, b: Pixel) -> f32 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}

/// Closest point to `p` on the segment `a`-`b`, in screen space.
#[must_use]
pub fn closest_on_segment(p: Pixel, a: Pixel, b: Pixel) -> Pixel {
    let abx = b.x - a.x;
    let aby = b.y - a.y;
    let l2 = abx * abx + aby * aby;
    if l2 == 0.0 {
        // degenerate segment
        return a;
    }
    let t = (((p.x - a.x) * abx + (p.y - a.y) * aby) / l2).clamp(0.0, 1.0);
    Pixel::new(a.x + t * abx, a.y + t * aby)
}

/// Whether a point lies inside a closed ring (even-odd rule).
#[must_use]
pub fn ring_contains(ring: &[Coordinate], point: Coordinate) -> bool {
    let mut inside = false;
    for edge in ring.windows(2) {
        let (a, b) = (edge[0], edge[1]);
        if (a.y > point.y) != (b.y > point.y) {
            let x_cross = a.x + (point.y - a.y) / (b.y - a.y) * (b.x - a.x);
            if point.x < x_cross {
                inside = !inside;
            }
        }
    }
    inside
}
