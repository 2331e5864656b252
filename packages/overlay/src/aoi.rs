//! The area of interest, normalised once per run.

use std::path::Path;

use geo::{Geometry, MultiPolygon, Polygon};
use overlay_report_geometry::kind::geometry_type_name;
use overlay_report_geometry::{Crs, GeometryEngine, Layer};

use crate::RunError;

/// One AOI polygon set, handed by value to each clip.
#[derive(Debug, Clone, PartialEq)]
pub struct AoiFeature {
    /// Position of the feature in the AOI layer.
    pub index: usize,
    pub geometry: MultiPolygon<f64>,
    pub crs: Crs,
}

/// The AOI in the working CRS.
#[derive(Debug, Clone)]
pub struct AreaOfInterest {
    pub name: String,
    pub crs: Crs,
    pub features: Vec<AoiFeature>,
}

impl AreaOfInterest {
    /// Validates that every geometry in `layer` is polygonal and transforms
    /// it into `working_crs`. Features without geometry are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::NonPolygonalAoi`] for any non-polygonal feature,
    /// [`RunError::EmptyAoi`] if no polygons remain, or
    /// [`RunError::Geometry`] if the reprojection fails.
    pub fn from_layer(
        layer: &Layer,
        source: &Path,
        working_crs: Crs,
        engine: &dyn GeometryEngine,
    ) -> Result<Self, RunError> {
        let mut features = Vec::new();

        for (index, feature) in layer.features.iter().enumerate() {
            let Some(geometry) = &feature.geometry else {
                continue;
            };
            let polygons = match geometry {
                Geometry::Polygon(polygon) => MultiPolygon::new(vec![polygon.clone()]),
                Geometry::MultiPolygon(polygons) => polygons.clone(),
                Geometry::Rect(rect) => MultiPolygon::new(vec![rect.to_polygon()]),
                Geometry::Triangle(triangle) => MultiPolygon::new(vec![triangle.to_polygon()]),
                other => {
                    return Err(RunError::NonPolygonalAoi {
                        index,
                        geometry_type: geometry_type_name(other).to_string(),
                    });
                }
            };
            if polygons.0.is_empty() {
                continue;
            }

            features.push(AoiFeature {
                index,
                geometry: engine.reproject_polygons(&polygons, layer.crs, working_crs)?,
                crs: working_crs,
            });
        }

        if features.is_empty() {
            return Err(RunError::EmptyAoi {
                path: source.to_path_buf(),
            });
        }

        log::info!(
            "AOI {}: {} polygon feature(s), normalised from {} to {working_crs}",
            layer.name,
            features.len(),
            layer.crs
        );

        Ok(Self {
            name: layer.name.clone(),
            crs: working_crs,
            features,
        })
    }

    /// Every AOI polygon as one set.
    #[must_use]
    pub fn combined(&self) -> MultiPolygon<f64> {
        let polygons: Vec<Polygon<f64>> = self
            .features
            .iter()
            .flat_map(|feature| feature.geometry.0.iter().cloned())
            .collect();
        MultiPolygon::new(polygons)
    }
}
