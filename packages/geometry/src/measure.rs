//! Planar measurements in layer units.

use geo::{Area, Euclidean, Geometry, Length};

/// Unsigned planar area. Zero for points and lines.
#[must_use]
pub fn planar_area(geometry: &Geometry<f64>) -> f64 {
    geometry.unsigned_area()
}

/// Planar length of linear geometries. Zero for points and polygons.
#[must_use]
pub fn planar_length(geometry: &Geometry<f64>) -> f64 {
    match geometry {
        Geometry::Line(line) => Euclidean.length(line),
        Geometry::LineString(line) => Euclidean.length(line),
        Geometry::MultiLineString(lines) => Euclidean.length(lines),
        Geometry::GeometryCollection(collection) => collection.iter().map(planar_length).sum(),
        _ => 0.0,
    }
}
