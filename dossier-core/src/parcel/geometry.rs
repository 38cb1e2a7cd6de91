//! Parcel polygons and point containment.

use serde::{Deserialize, Serialize};

/// A WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// `[lon, lat]`, GeoJSON order.
pub type Position = [f64; 2];
/// A closed or open ring of positions.
pub type Ring = Vec<Position>;

/// Parcel geometry as returned by a GIS parcel layer (GeoJSON subset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    /// Outer ring first, holes after.
    Polygon { coordinates: Vec<Ring> },
    MultiPolygon { coordinates: Vec<Vec<Ring>> },
}

/// Axis-aligned bounds used to skip the ray cast for distant points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    fn of_positions<'a>(positions: impl IntoIterator<Item = &'a Position>) -> Option<Self> {
        positions.into_iter().fold(None, |acc, [lon, lat]| {
            Some(match acc {
                None => Self {
                    min_lon: *lon,
                    min_lat: *lat,
                    max_lon: *lon,
                    max_lat: *lat,
                },
                Some(b) => Self {
                    min_lon: b.min_lon.min(*lon),
                    min_lat: b.min_lat.min(*lat),
                    max_lon: b.max_lon.max(*lon),
                    max_lat: b.max_lat.max(*lat),
                },
            })
        })
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        point.lon >= self.min_lon
            && point.lon <= self.max_lon
            && point.lat >= self.min_lat
            && point.lat <= self.max_lat
    }
}

impl Geometry {
    /// Bounds of every outer ring.
    pub fn bbox(&self) -> Option<BoundingBox> {
        match self {
            Geometry::Polygon { coordinates } => {
                BoundingBox::of_positions(coordinates.first().into_iter().flatten())
            }
            Geometry::MultiPolygon { coordinates } => BoundingBox::of_positions(
                coordinates
                    .iter()
                    .filter_map(|polygon| polygon.first())
                    .flatten(),
            ),
        }
    }

    /// Whether the point lies inside the geometry. A point inside a hole is
    /// outside the polygon.
    pub fn contains(&self, point: GeoPoint) -> bool {
        if !self.bbox().is_some_and(|b| b.contains(point)) {
            return false;
        }
        match self {
            Geometry::Polygon { coordinates } => polygon_contains(coordinates, point),
            Geometry::MultiPolygon { coordinates } => coordinates
                .iter()
                .any(|polygon| polygon_contains(polygon, point)),
        }
    }
}

fn polygon_contains(rings: &[Ring], point: GeoPoint) -> bool {
    let Some((outer, holes)) = rings.split_first() else {
        return false;
    };
    ring_contains(outer, point) && !holes.iter().any(|hole| ring_contains(hole, point))
}

/// Even-odd ray cast.
fn ring_contains(ring: &[Position], point: GeoPoint) -> bool {
    if ring.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let [xi, yi] = ring[i];
        let [xj, yj] = ring[j];
        if (yi > point.lat) != (yj > point.lat)
            && point.lon < (xj - xi) * (point.lat - yi) / (yj - yi + f64::EPSILON) + xi
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(min: f64, max: f64) -> Ring {
        vec![[min, min], [max, min], [max, max], [min, max], [min, min]]
    }

    #[test]
    fn test_point_in_simple_polygon() {
        let geometry = Geometry::Polygon {
            coordinates: vec![square(0.0, 10.0)],
        };
        assert!(geometry.contains(GeoPoint::new(5.0, 5.0)));
        assert!(!geometry.contains(GeoPoint::new(15.0, 5.0)));
    }

    #[test]
    fn test_point_in_hole_is_excluded() {
        let donut = Geometry::Polygon {
            coordinates: vec![square(0.0, 10.0), square(4.0, 6.0)],
        };
        assert!(!donut.contains(GeoPoint::new(5.0, 5.0)));
        assert!(donut.contains(GeoPoint::new(2.0, 2.0)));
    }

    #[test]
    fn test_multipolygon_any_member() {
        let geometry = Geometry::MultiPolygon {
            coordinates: vec![vec![square(0.0, 1.0)], vec![square(5.0, 6.0)]],
        };
        assert!(geometry.contains(GeoPoint::new(5.5, 5.5)));
        assert!(!geometry.contains(GeoPoint::new(3.0, 3.0)));
    }

    #[test]
    fn test_degenerate_rings() {
        let empty = Geometry::Polygon {
            coordinates: vec![],
        };
        assert!(!empty.contains(GeoPoint::new(0.0, 0.0)));
        let line = Geometry::Polygon {
            coordinates: vec![vec![[0.0, 0.0], [1.0, 1.0]]],
        };
        assert!(!line.contains(GeoPoint::new(0.5, 0.5)));
    }

    #[test]
    fn test_geojson_deserialization() {
        let json = r#"{"type":"Polygon","coordinates":[[[-96.8,32.7],[-96.7,32.7],[-96.7,32.8],[-96.8,32.8],[-96.8,32.7]]]}"#;
        let geometry: Geometry = serde_json::from_str(json).unwrap();
        assert!(geometry.contains(GeoPoint::new(32.75, -96.75)));
    }
}
