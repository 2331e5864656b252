//! Geometry operations consumed by the overlay pipeline.
//!
//! [`GeometryEngine`] is the seam the pipeline clips, repairs, reprojects
//! and merges through. [`GeoEngine`] implements it on top of the `geo`
//! boolean operations and `proj4rs`.

use geo::{
    BooleanOps, BoundingRect, Geometry, Intersects, LineString, MapCoords, MultiLineString,
    MultiPoint, MultiPolygon, Point, Polygon, RemoveRepeatedPoints, Validation,
};

use crate::GeometryError;
use crate::crs::{Crs, Transformer};
use crate::kind::geometry_type_name;
use crate::layer::{Feature, Layer};

/// Spatial operations on layers.
pub trait GeometryEngine: Send + Sync {
    /// Intersects every feature of `layer` with `overlay`, keeping the
    /// attributes of features that overlap it.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::InvalidGeometry`] if a polygonal feature is
    /// not valid, or [`GeometryError::UnsupportedGeometry`] for geometry
    /// collections.
    fn clip(&self, layer: &Layer, overlay: &MultiPolygon<f64>) -> Result<Layer, GeometryError>;

    /// Returns a copy of `layer` with repaired geometries. Features whose
    /// geometry collapses entirely keep their attributes with no geometry.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError`] if the layer cannot be repaired.
    fn repair(&self, layer: &Layer) -> Result<Layer, GeometryError>;

    /// Transforms every geometry of `layer` into `target`.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::UnsupportedCrs`] or
    /// [`GeometryError::Reprojection`] if the transform is not possible.
    fn reproject(&self, layer: &Layer, target: Crs) -> Result<Layer, GeometryError>;

    /// Transforms a polygon set between two CRSs.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::UnsupportedCrs`] or
    /// [`GeometryError::Reprojection`] if the transform is not possible.
    fn reproject_polygons(
        &self,
        polygons: &MultiPolygon<f64>,
        from: Crs,
        to: Crs,
    ) -> Result<MultiPolygon<f64>, GeometryError>;

    /// Concatenates layers that share a CRS into a single layer named
    /// `name`, unioning their field schemas.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::EmptyMerge`] for an empty input and
    /// [`GeometryError::CrsMismatch`] if the inputs disagree on CRS.
    fn merge(&self, layers: &[Layer], name: &str) -> Result<Layer, GeometryError>;
}

/// [`GeometryEngine`] backed by `geo` and `proj4rs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeoEngine;

impl GeometryEngine for GeoEngine {
    fn clip(&self, layer: &Layer, overlay: &MultiPolygon<f64>) -> Result<Layer, GeometryError> {
        let Some(overlay_rect) = overlay.bounding_rect() else {
            return Ok(layer.with_features(Vec::new()));
        };

        let mut features = Vec::new();
        for (index, feature) in layer.features.iter().enumerate() {
            let Some(geometry) = &feature.geometry else {
                continue;
            };

            let overlaps_rect = geometry
                .bounding_rect()
                .is_some_and(|rect| rect.intersects(&overlay_rect));
            if !overlaps_rect {
                continue;
            }

            if let Some(clipped) = clip_geometry(index, geometry, overlay)? {
                features.push(Feature {
                    geometry: Some(clipped),
                    attributes: feature.attributes.clone(),
                });
            }
        }

        Ok(layer.with_features(features))
    }

    fn repair(&self, layer: &Layer) -> Result<Layer, GeometryError> {
        let features = layer
            .features
            .iter()
            .map(|feature| Feature {
                geometry: feature.geometry.as_ref().and_then(repair_geometry),
                attributes: feature.attributes.clone(),
            })
            .collect();

        Ok(layer.with_features(features))
    }

    fn reproject(&self, layer: &Layer, target: Crs) -> Result<Layer, GeometryError> {
        if layer.crs == target {
            return Ok(layer.clone());
        }

        let transformer = Transformer::new(layer.crs, target)?;
        let features = layer
            .features
            .iter()
            .map(|feature| {
                let geometry = feature
                    .geometry
                    .as_ref()
                    .map(|g| g.try_map_coords(|c| transformer.transform(c)))
                    .transpose()?;
                Ok(Feature {
                    geometry,
                    attributes: feature.attributes.clone(),
                })
            })
            .collect::<Result<Vec<_>, GeometryError>>()?;

        let mut projected = layer.with_features(features);
        projected.crs = target;
        Ok(projected)
    }

    fn reproject_polygons(
        &self,
        polygons: &MultiPolygon<f64>,
        from: Crs,
        to: Crs,
    ) -> Result<MultiPolygon<f64>, GeometryError> {
        if from == to {
            return Ok(polygons.clone());
        }
        let transformer = Transformer::new(from, to)?;
        polygons.try_map_coords(|c| transformer.transform(c))
    }

    fn merge(&self, layers: &[Layer], name: &str) -> Result<Layer, GeometryError> {
        let Some(first) = layers.first() else {
            return Err(GeometryError::EmptyMerge);
        };

        let mut merged = Layer::new(name, first.crs);
        for layer in layers {
            if layer.crs != first.crs {
                return Err(GeometryError::CrsMismatch {
                    expected: first.crs,
                    found: layer.crs,
                });
            }
            merged.extend_from(layer);
        }

        Ok(merged)
    }
}

fn clip_geometry(
    index: usize,
    geometry: &Geometry<f64>,
    overlay: &MultiPolygon<f64>,
) -> Result<Option<Geometry<f64>>, GeometryError> {
    let clipped = match geometry {
        Geometry::Point(point) => overlay.intersects(point).then_some(Geometry::Point(*point)),
        Geometry::MultiPoint(points) => {
            let inside: Vec<Point<f64>> = points
                .iter()
                .filter(|p| overlay.intersects(*p))
                .copied()
                .collect();
            match inside.len() {
                0 => None,
                1 => Some(Geometry::Point(inside[0])),
                _ => Some(Geometry::MultiPoint(MultiPoint::new(inside))),
            }
        }
        Geometry::Line(line) => clip_lines(overlay, vec![LineString::from(*line)]),
        Geometry::LineString(line) => clip_lines(overlay, vec![line.clone()]),
        Geometry::MultiLineString(lines) => clip_lines(overlay, lines.0.clone()),
        Geometry::Polygon(polygon) => {
            ensure_valid(index, polygon)?;
            clip_polygons(overlay, &MultiPolygon::new(vec![polygon.clone()]))
        }
        Geometry::MultiPolygon(polygons) => {
            ensure_valid(index, polygons)?;
            clip_polygons(overlay, polygons)
        }
        Geometry::Rect(rect) => clip_polygons(overlay, &MultiPolygon::new(vec![rect.to_polygon()])),
        Geometry::Triangle(triangle) => {
            clip_polygons(overlay, &MultiPolygon::new(vec![triangle.to_polygon()]))
        }
        Geometry::GeometryCollection(_) => {
            return Err(GeometryError::UnsupportedGeometry {
                geometry_type: geometry_type_name(geometry).to_string(),
            });
        }
    };

    Ok(clipped)
}

fn ensure_valid<G: Validation>(index: usize, geometry: &G) -> Result<(), GeometryError> {
    if geometry.is_valid() {
        Ok(())
    } else {
        Err(GeometryError::InvalidGeometry {
            index,
            message: "polygon fails validity checks (self-intersection or bad ring)".to_string(),
        })
    }
}

fn clip_lines(overlay: &MultiPolygon<f64>, lines: Vec<LineString<f64>>) -> Option<Geometry<f64>> {
    let clipped = overlay.clip(&MultiLineString::new(lines), false);
    let mut parts: Vec<LineString<f64>> = clipped
        .into_iter()
        .filter(|line| line.0.len() >= 2)
        .collect();

    match parts.len() {
        0 => None,
        1 => parts.pop().map(Geometry::LineString),
        _ => Some(Geometry::MultiLineString(MultiLineString::new(parts))),
    }
}

fn clip_polygons(
    overlay: &MultiPolygon<f64>,
    polygons: &MultiPolygon<f64>,
) -> Option<Geometry<f64>> {
    let mut clipped = polygons.intersection(overlay);
    clipped.0.retain(|p| p.exterior().0.len() >= 4);

    match clipped.0.len() {
        0 => None,
        1 => clipped.0.pop().map(Geometry::Polygon),
        _ => Some(Geometry::MultiPolygon(clipped)),
    }
}

fn repair_geometry(geometry: &Geometry<f64>) -> Option<Geometry<f64>> {
    match geometry {
        Geometry::Point(point) => finite_point(*point).then_some(Geometry::Point(*point)),
        Geometry::MultiPoint(points) => {
            let kept: Vec<Point<f64>> = points
                .iter()
                .copied()
                .filter(|p| finite_point(*p))
                .collect();
            (!kept.is_empty()).then(|| Geometry::MultiPoint(MultiPoint::new(kept)))
        }
        Geometry::Line(line) => repair_lines(vec![LineString::from(*line)]),
        Geometry::LineString(line) => repair_lines(vec![line.clone()]),
        Geometry::MultiLineString(lines) => repair_lines(lines.0.clone()),
        Geometry::Polygon(polygon) => repair_polygons(std::slice::from_ref(polygon)),
        Geometry::MultiPolygon(polygons) => repair_polygons(&polygons.0),
        Geometry::Triangle(triangle) => repair_polygons(&[triangle.to_polygon()]),
        Geometry::Rect(_) | Geometry::GeometryCollection(_) => Some(geometry.clone()),
    }
}

fn finite_point(point: Point<f64>) -> bool {
    point.x().is_finite() && point.y().is_finite()
}

fn repair_lines(lines: Vec<LineString<f64>>) -> Option<Geometry<f64>> {
    let mut kept: Vec<LineString<f64>> = lines
        .into_iter()
        .map(|line| line.remove_repeated_points())
        .filter(|line| line.0.len() >= 2)
        .collect();

    match kept.len() {
        0 => None,
        1 => kept.pop().map(Geometry::LineString),
        _ => Some(Geometry::MultiLineString(MultiLineString::new(kept))),
    }
}

/// Rebuilds polygons by closing rings, dropping degenerate rings and
/// re-noding everything through a union, which resolves self-intersections
/// and overlapping parts.
fn repair_polygons(polygons: &[Polygon<f64>]) -> Option<Geometry<f64>> {
    let cleaned: Vec<Polygon<f64>> = polygons
        .iter()
        .filter_map(|polygon| {
            let exterior = clean_ring(polygon.exterior())?;
            let interiors = polygon.interiors().iter().filter_map(clean_ring).collect();
            Some(Polygon::new(exterior, interiors))
        })
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    let mut unioned = geo::unary_union(&cleaned);
    unioned.0.retain(|p| p.exterior().0.len() >= 4);

    match unioned.0.len() {
        0 => None,
        1 => unioned.0.pop().map(Geometry::Polygon),
        _ => Some(Geometry::MultiPolygon(unioned)),
    }
}

fn clean_ring(ring: &LineString<f64>) -> Option<LineString<f64>> {
    if ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return None;
    }
    let mut cleaned = ring.remove_repeated_points();
    cleaned.close();
    (cleaned.0.len() >= 4).then_some(cleaned)
}
