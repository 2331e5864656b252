//! Raster files are recognised so they are not reported as unknown inputs,
//! but they are never evaluated.

use super::{LoadRequest, LoadedSource, LocationShape, SourceLoader};
use crate::ResolutionError;

pub struct RasterLoader;

impl SourceLoader for RasterLoader {
    fn name(&self) -> &'static str {
        "raster"
    }

    fn accepts(&self, shape: &LocationShape) -> bool {
        !shape.is_dir && shape.has_extension(&["tif", "tiff"])
    }

    fn load(
        &self,
        shape: &LocationShape,
        request: &LoadRequest,
    ) -> Result<LoadedSource, ResolutionError> {
        log::info!(
            "{}: raster input {} is not evaluated, skipping",
            request.title,
            shape.path.display()
        );
        Ok(LoadedSource::Raster {
            path: shape.path.clone(),
        })
    }
}
