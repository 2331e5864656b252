//! In-memory adapter over a layer loaded from disk.

use async_trait::async_trait;
use geo::{BoundingRect, Rect};
use overlay_report_geometry::{Crs, FilterExpression, GeometryKind, Layer};
use rstar::{AABB, RTree, RTreeObject};

use crate::SourceError;
use crate::adapter::SpatialSourceAdapter;

/// Envelope of one feature, keyed by its position in the layer.
struct IndexedEnvelope {
    position: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Serves bounding-box queries over a fully loaded layer using an R-tree of
/// feature envelopes.
pub struct FileAdapter {
    layer: Layer,
    index: RTree<IndexedEnvelope>,
}

impl FileAdapter {
    #[must_use]
    pub fn new(layer: Layer) -> Self {
        let entries = layer
            .features
            .iter()
            .enumerate()
            .filter_map(|(position, feature)| {
                let rect = feature.geometry.as_ref()?.bounding_rect()?;
                Some(IndexedEnvelope {
                    position,
                    envelope: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                })
            })
            .collect();

        Self {
            index: RTree::bulk_load(entries),
            layer,
        }
    }

    /// Parses `filter` and checks that it only references fields the layer
    /// has.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Filter`] if the filter is malformed or names
    /// an unknown field.
    pub fn validate_filter(&self, filter: &str) -> Result<Option<FilterExpression>, SourceError> {
        let expression = FilterExpression::parse(filter)?;
        if let Some(expression) = &expression {
            expression.validate_for(&self.layer)?;
        }
        Ok(expression)
    }
}

#[async_trait]
impl SpatialSourceAdapter for FileAdapter {
    fn name(&self) -> &str {
        &self.layer.name
    }

    fn crs(&self) -> Crs {
        self.layer.crs
    }

    async fn exists(&self) -> Result<bool, SourceError> {
        Ok(true)
    }

    async fn has_spatial_rows(&self) -> Result<bool, SourceError> {
        Ok(self.index.size() > 0)
    }

    async fn geometry_kind(&self) -> Result<Option<GeometryKind>, SourceError> {
        let mut kind = None;
        for geometry in self.layer.features.iter().filter_map(|f| f.geometry.as_ref()) {
            let Some(found) = GeometryKind::of(geometry) else {
                return Err(SourceError::UnexpectedGeometryType {
                    source_name: self.layer.name.clone(),
                    geometry_type: overlay_report_geometry::kind::geometry_type_name(geometry)
                        .to_string(),
                });
            };
            kind = kind.max(Some(found));
        }
        Ok(kind)
    }

    async fn query_bbox(
        &self,
        bbox: Rect<f64>,
        filter: Option<&str>,
    ) -> Result<Layer, SourceError> {
        let expression = match filter {
            Some(text) => self.validate_filter(text)?,
            None => None,
        };

        let query = AABB::from_corners([bbox.min().x, bbox.min().y], [bbox.max().x, bbox.max().y]);
        let mut positions: Vec<usize> = self
            .index
            .locate_in_envelope_intersecting(&query)
            .map(|entry| entry.position)
            .collect();
        positions.sort_unstable();

        let features = positions
            .into_iter()
            .map(|position| &self.layer.features[position])
            .filter(|feature| expression.as_ref().is_none_or(|e| e.matches(feature)))
            .cloned()
            .collect();

        Ok(self.layer.with_features(features))
    }
}
