//! The uniform interface the overlay pipeline uses to read a dataset.

use async_trait::async_trait;
use geo::Rect;
use overlay_report_geometry::{Crs, GeometryKind, Layer};

use crate::SourceError;

/// A dataset that can be queried by bounding box.
///
/// Implemented by [`crate::file::FileAdapter`] for layers loaded from disk
/// and by [`crate::remote::RemoteTableAdapter`] for `PostGIS` tables.
#[async_trait]
pub trait SpatialSourceAdapter: Send + Sync {
    /// Display name of the dataset (layer title or `schema.table`).
    fn name(&self) -> &str;

    /// CRS of the layers returned by [`Self::query_bbox`].
    fn crs(&self) -> Crs;

    /// Whether the underlying dataset exists and is visible to us.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if existence cannot be determined.
    async fn exists(&self) -> Result<bool, SourceError>;

    /// Whether the dataset holds at least one feature with a geometry.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the dataset cannot be inspected.
    async fn has_spatial_rows(&self) -> Result<bool, SourceError>;

    /// The most complex geometry type present, or `None` for a dataset
    /// without geometries.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::UnexpectedGeometryType`] if the dataset holds
    /// a type outside points, lines and polygons.
    async fn geometry_kind(&self) -> Result<Option<GeometryKind>, SourceError>;

    /// Returns every feature whose geometry envelope intersects `bbox`
    /// (given in [`Self::crs`] coordinates) and, when present, satisfies
    /// `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the filter is invalid or the query fails.
    async fn query_bbox(&self, bbox: Rect<f64>, filter: Option<&str>)
    -> Result<Layer, SourceError>;
}
