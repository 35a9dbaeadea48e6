//! Portable vector documents.
//!
//! Sketches are persisted as GeoJSON feature collections. Other document
//! types can be declared by stored resources but have no decoder here.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{MapError, MapResult};
use crate::geometry::{Coordinate, Feature, FeatureId, Geometry};
use crate::projection::Projection;
use crate::vector::VectorLayer;

/// Declared type of a stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    /// GeoJSON feature collection.
    GeoJson,
    /// Keyhole Markup Language.
    Kml,
    /// GPS Exchange Format.
    Gpx,
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::GeoJson => "geojson",
            Self::Kml => "kml",
            Self::Gpx => "gpx",
        })
    }
}

/// Turns a vector layer into a document.
pub trait DocumentSerializer: Send + Sync {
    /// The type of document produced.
    fn document_type(&self) -> DocumentType;

    /// Serialize `layer`, reprojecting from `source` to `target`.
    ///
    /// Returns `None` when there is nothing to export.
    fn serialize(&self, layer: &VectorLayer, source: Projection, target: Projection) -> Option<String>;
}

/// GeoJSON encoder/decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoJsonSerializer;

impl DocumentSerializer for GeoJsonSerializer {
    fn document_type(&self) -> DocumentType {
        DocumentType::GeoJson
    }

    fn serialize(&self, layer: &VectorLayer, source: Projection, target: Projection) -> Option<String> {
        if layer.is_empty() {
            return None;
        }
        let features: Vec<Value> = layer
            .features()
            .iter()
            .map(|f| {
                let geometry = source.transform_geometry(&f.geometry, target);
                json!({
                    "type": "Feature",
                    "id": f.id,
                    "geometry": geometry_to_json(&geometry),
                    "properties": f.properties,
                })
            })
            .collect();
        let document = json!({
            "type": "FeatureCollection",
            "name": layer.id,
            "features": features,
        });
        match serde_json::to_string(&document) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!("Failed to serialize layer {}: {e}", layer.id);
                None
            }
        }
    }
}

fn geometry_to_json(geometry: &Geometry) -> Value {
    let pair = |c: &Coordinate| json!([c.x, c.y]);
    match geometry {
        Geometry::Point(c) => json!({ "type": "Point", "coordinates": pair(c) }),
        Geometry::LineString(coords) => json!({
            "type": "LineString",
            "coordinates": coords.iter().map(pair).collect::<Vec<_>>(),
        }),
        Geometry::Polygon(ring) => json!({
            "type": "Polygon",
            "coordinates": [ring.iter().map(pair).collect::<Vec<_>>()],
        }),
    }
}

#[derive(Deserialize)]
struct RawCollection {
    #[serde(default)]
    name: Option<String>,
    features: Vec<RawFeature>,
}

#[derive(Deserialize)]
struct RawFeature {
    #[serde(default)]
    id: Option<Value>,
    geometry: RawGeometry,
    #[serde(default)]
    properties: Option<serde_json::Map<String, Value>>,
}

#[derive(Deserialize)]
#[serde(tag = "type", content = "coordinates")]
enum RawGeometry {
    Point([f64; 2]),
    LineString(Vec<[f64; 2]>),
    Polygon(Vec<Vec<[f64; 2]>>),
}

impl RawGeometry {
    fn into_geometry(self) -> MapResult<Geometry> {
        let coord = |[x, y]: [f64; 2]| Coordinate::new(x, y);
        Ok(match self {
            Self::Point(p) => Geometry::Point(coord(p)),
            Self::LineString(coords) => Geometry::LineString(coords.into_iter().map(coord).collect()),
            Self::Polygon(rings) => {
                let exterior = rings
                    .into_iter()
                    .next()
                    .ok_or_else(|| MapError::InvalidDocument("polygon without exterior ring".into()))?;
                Geometry::Polygon(exterior.into_iter().map(coord).collect())
            }
        })
    }
}

/// Sketch ids are UUIDs. Foreign documents may use numbers or arbitrary
/// strings, and those features get a fresh id.
fn feature_id(raw: Option<&Value>) -> FeatureId {
    match raw.and_then(Value::as_str).map(Uuid::parse_str) {
        Some(Ok(uuid)) => FeatureId::from_uuid(uuid),
        _ => {
            if let Some(raw) = raw {
                tracing::debug!(%raw, "replacing non-UUID feature id");
            }
            FeatureId::new()
        }
    }
}

/// Decode a stored document into a vector layer.
///
/// `id` names the resource the document belongs to and is carried in errors.
/// Coordinates are reprojected from `source` (the document's) to `target`.
///
/// # Errors
///
/// Returns [`MapError::UnsupportedFormat`] for document types without a
/// decoder, and a serialization or [`MapError::InvalidDocument`] error for
/// malformed GeoJSON.
pub fn decode(
    id: &str,
    document_type: DocumentType,
    data: &str,
    source: Projection,
    target: Projection,
) -> MapResult<VectorLayer> {
    if document_type != DocumentType::GeoJson {
        return Err(MapError::UnsupportedFormat {
            id: id.to_string(),
            document_type,
        });
    }
    let raw: RawCollection = serde_json::from_str(data)?;
    let features = raw
        .features
        .into_iter()
        .map(|f| {
            let geometry = source.transform_geometry(&f.geometry.into_geometry()?, target);
            Ok(Feature {
                id: feature_id(f.id.as_ref()),
                geometry,
                properties: f.properties.unwrap_or_default(),
            })
        })
        .collect::<MapResult<Vec<_>>>()?;
    Ok(VectorLayer::with_features(raw.name.unwrap_or_else(|| id.to_string()), features))
}
