//! Exact clipping of one source against one AOI feature.

use geo::{BoundingRect as _, MultiPolygon};
use overlay_report_geometry::{Crs, GeometryEngine, Layer};
use overlay_report_source::{RemoteError, SourceError, SpatialSourceAdapter};

use crate::aoi::AoiFeature;
use crate::failure::FailureReason;

/// The part of a source that overlaps one AOI feature, in the working CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct ClippedFragment {
    pub aoi_index: usize,
    pub layer: Layer,
}

/// Source features whose bounding boxes meet one AOI feature, together
/// with that feature reprojected into the source CRS. Owned, so the clip
/// itself can run on a blocking thread.
#[derive(Debug, Clone)]
pub struct Candidates {
    pub aoi_index: usize,
    pub overlay: MultiPolygon<f64>,
    pub layer: Layer,
}

/// Clips sources against AOI features, repairing and retrying once when
/// the first clip fails.
pub struct OverlayClipper<'a> {
    engine: &'a dyn GeometryEngine,
    working_crs: Crs,
}

impl<'a> OverlayClipper<'a> {
    #[must_use]
    pub const fn new(engine: &'a dyn GeometryEngine, working_crs: Crs) -> Self {
        Self {
            engine,
            working_crs,
        }
    }

    /// Reprojects the AOI feature into the source CRS and runs the bounding
    /// box query. Pass the result to [`Self::clip_candidates`].
    ///
    /// # Errors
    ///
    /// Returns [`FailureReason::Reprojection`] if the AOI cannot be
    /// transformed, or the mapped query error.
    pub async fn candidates(
        &self,
        adapter: &dyn SpatialSourceAdapter,
        aoi: &AoiFeature,
        filter: Option<&str>,
    ) -> Result<Candidates, FailureReason> {
        let source_crs = adapter.crs();
        let overlay = self
            .engine
            .reproject_polygons(&aoi.geometry, aoi.crs, source_crs)
            .map_err(|e| FailureReason::Reprojection {
                detail: e.to_string(),
            })?;

        let mut layer = match overlay.bounding_rect() {
            Some(bbox) => adapter
                .query_bbox(bbox, filter)
                .await
                .map_err(|e| query_failure(&e))?,
            None => Layer::new(adapter.name(), source_crs),
        };
        layer.name = adapter.name().to_string();

        Ok(Candidates {
            aoi_index: aoi.index,
            overlay,
            layer,
        })
    }

    /// Clips queried candidates, repairing and retrying once, and returns
    /// the result in the working CRS under the candidates' layer name.
    ///
    /// # Errors
    ///
    /// Returns [`FailureReason::GeometryRepairExhausted`] if the clip fails
    /// both before and after repair, or [`FailureReason::Reprojection`] if
    /// the result cannot be transformed.
    pub fn clip_candidates(&self, candidates: Candidates) -> Result<ClippedFragment, FailureReason> {
        let Candidates {
            aoi_index,
            overlay,
            layer: candidates,
        } = candidates;
        let name = candidates.name.clone();

        if candidates.is_empty() {
            log::debug!("{name}: no candidates in AOI feature {aoi_index}");
            return Ok(ClippedFragment {
                aoi_index,
                layer: Layer::new(name, self.working_crs),
            });
        }

        let clipped = match self.engine.clip(&candidates, &overlay) {
            Ok(clipped) => clipped,
            Err(first) => {
                log::warn!("{name}: clip failed ({first}), repairing geometry and retrying");
                let repaired = self.engine.repair(&candidates).map_err(|e| {
                    FailureReason::GeometryRepairExhausted {
                        detail: e.to_string(),
                    }
                })?;
                self.engine.clip(&repaired, &overlay).map_err(|e| {
                    FailureReason::GeometryRepairExhausted {
                        detail: e.to_string(),
                    }
                })?
            }
        };

        let mut layer = if clipped.crs == self.working_crs {
            clipped
        } else {
            self.engine
                .reproject(&clipped, self.working_crs)
                .map_err(|e| FailureReason::Reprojection {
                    detail: e.to_string(),
                })?
        };
        layer.name = name;

        log::debug!(
            "{}: {} of {} candidate(s) overlap AOI feature {aoi_index}",
            layer.name,
            layer.feature_count(),
            candidates.feature_count(),
        );

        Ok(ClippedFragment { aoi_index, layer })
    }
}

/// A failed bbox query on a table that passed the existence checks is most
/// likely a bad subset filter.
fn query_failure(error: &SourceError) -> FailureReason {
    match error {
        SourceError::Remote(RemoteError::Query { message }) => FailureReason::InvalidInput {
            detail: message.clone(),
        },
        other => FailureReason::from_source(other, false),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use geo::{Geometry, MultiPolygon, polygon};
    use overlay_report_geometry::measure::planar_area;
    use overlay_report_geometry::{Feature, GeoEngine, GeometryError};
    use overlay_report_source::file::FileAdapter;

    use super::*;

    /// Delegates to [`GeoEngine`] except that every clip fails.
    #[derive(Default)]
    pub struct FailingClipEngine {
        pub clips: AtomicUsize,
        pub repairs: AtomicUsize,
    }

    impl GeometryEngine for FailingClipEngine {
        fn clip(&self, _layer: &Layer, _overlay: &MultiPolygon<f64>) -> Result<Layer, GeometryError> {
            self.clips.fetch_add(1, Ordering::SeqCst);
            Err(GeometryError::InvalidGeometry {
                index: 0,
                message: "self-intersection".to_string(),
            })
        }

        fn repair(&self, layer: &Layer) -> Result<Layer, GeometryError> {
            self.repairs.fetch_add(1, Ordering::SeqCst);
            Ok(layer.clone())
        }

        fn reproject(&self, layer: &Layer, target: Crs) -> Result<Layer, GeometryError> {
            GeoEngine.reproject(layer, target)
        }

        fn reproject_polygons(
            &self,
            polygons: &MultiPolygon<f64>,
            from: Crs,
            to: Crs,
        ) -> Result<MultiPolygon<f64>, GeometryError> {
            GeoEngine.reproject_polygons(polygons, from, to)
        }

        fn merge(&self, layers: &[Layer], name: &str) -> Result<Layer, GeometryError> {
            GeoEngine.merge(layers, name)
        }
    }

    pub fn aoi_square(x: f64, y: f64, size: f64) -> AoiFeature {
        AoiFeature {
            index: 0,
            geometry: MultiPolygon::new(vec![polygon![
                (x: x, y: y),
                (x: x + size, y: y),
                (x: x + size, y: y + size),
                (x: x, y: y + size),
                (x: x, y: y),
            ]]),
            crs: Crs::BC_ALBERS,
        }
    }

    async fn clip(
        clipper: &OverlayClipper<'_>,
        adapter: &dyn SpatialSourceAdapter,
        aoi: &AoiFeature,
    ) -> Result<ClippedFragment, FailureReason> {
        let candidates = clipper.candidates(adapter, aoi, None).await?;
        clipper.clip_candidates(candidates)
    }

    fn parcels() -> FileAdapter {
        FileAdapter::new(Layer::from_features(
            "Parcels",
            Crs::BC_ALBERS,
            vec![Feature::new(Some(Geometry::Polygon(polygon![
                (x: 0.0, y: 0.0),
                (x: 200.0, y: 0.0),
                (x: 200.0, y: 200.0),
                (x: 0.0, y: 200.0),
                (x: 0.0, y: 0.0),
            ])))],
        ))
    }

    #[tokio::test]
    async fn clips_to_the_aoi_feature() {
        let clipper = OverlayClipper::new(&GeoEngine, Crs::BC_ALBERS);
        let fragment = clip(&clipper, &parcels(), &aoi_square(100.0, 100.0, 200.0))
            .await
            .unwrap();

        assert_eq!(fragment.layer.name, "Parcels");
        assert_eq!(fragment.layer.feature_count(), 1);
        let area = planar_area(fragment.layer.features[0].geometry.as_ref().unwrap());
        assert!((area - 10_000.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn no_candidates_is_an_empty_fragment() {
        let clipper = OverlayClipper::new(&GeoEngine, Crs::BC_ALBERS);
        let fragment = clip(&clipper, &parcels(), &aoi_square(5_000.0, 5_000.0, 10.0))
            .await
            .unwrap();

        assert!(fragment.layer.is_empty());
        assert_eq!(fragment.layer.crs, Crs::BC_ALBERS);
    }

    #[tokio::test]
    async fn repeated_clip_failure_exhausts_repair() {
        let engine = FailingClipEngine::default();
        let clipper = OverlayClipper::new(&engine, Crs::BC_ALBERS);

        let result = clip(&clipper, &parcels(), &aoi_square(100.0, 100.0, 200.0))
            .await;

        let reason = result.unwrap_err();
        assert_eq!(reason.comment(), "data/geometry issue");
        assert_eq!(engine.clips.load(Ordering::SeqCst), 2);
        assert_eq!(engine.repairs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn geographic_sources_come_back_in_the_working_crs() {
        let source = FileAdapter::new(Layer::from_features(
            "Lakes",
            Crs::WGS84,
            vec![Feature::new(Some(Geometry::Polygon(polygon![
                (x: -126.01, y: 44.99),
                (x: -125.99, y: 44.99),
                (x: -125.99, y: 45.01),
                (x: -126.01, y: 45.01),
                (x: -126.01, y: 44.99),
            ])))],
        ));
        let clipper = OverlayClipper::new(&GeoEngine, Crs::BC_ALBERS);

        let fragment = clip(&clipper, &source, &aoi_square(1_000_000.0, 0.0, 100.0))
            .await
            .unwrap();

        assert_eq!(fragment.layer.crs, Crs::BC_ALBERS);
        let area = planar_area(fragment.layer.features[0].geometry.as_ref().unwrap());
        assert!((area - 10_000.0).abs() < 100.0);
    }
}
