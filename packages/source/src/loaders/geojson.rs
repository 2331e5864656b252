//! Native `GeoJSON` loading.

use overlay_report_geometry::geojson_io::read_layer;

use super::{LoadRequest, LoadedSource, LocationShape, SourceLoader};
use crate::ResolutionError;

/// Reads `.geojson` / `.json` files.
pub struct GeoJsonLoader;

impl SourceLoader for GeoJsonLoader {
    fn name(&self) -> &'static str {
        "geojson"
    }

    fn accepts(&self, shape: &LocationShape) -> bool {
        !shape.is_dir && shape.has_extension(&["geojson", "json"])
    }

    fn load(
        &self,
        shape: &LocationShape,
        request: &LoadRequest,
    ) -> Result<LoadedSource, ResolutionError> {
        let text = std::fs::read_to_string(&shape.path).map_err(|e| {
            ResolutionError::InvalidHandle {
                message: format!("Failed to read {}: {e}", shape.path.display()),
            }
        })?;

        let layer = read_layer(&text, &request.title).map_err(|e| {
            ResolutionError::InvalidHandle {
                message: e.to_string(),
            }
        })?;

        Ok(LoadedSource::Vector(layer))
    }
}
