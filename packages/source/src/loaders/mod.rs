//! File loader registry.
//!
//! A location is inspected once into a [`LocationShape`]; the first
//! registered [`SourceLoader`] that accepts the shape loads it. Adding a
//! format means adding a loader, not editing a branch chain.

pub mod coverage;
pub mod geojson;
pub mod ogr;
pub mod raster;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use geo::CoordsIter as _;
use overlay_report_geometry::{Crs, Layer};

use crate::ResolutionError;

pub use coverage::CoverageLoader;
pub use geojson::GeoJsonLoader;
pub use ogr::{OgrLoader, OgrReader};
pub use raster::RasterLoader;

/// What a location looks like on disk.
#[derive(Debug, Clone)]
pub struct LocationShape {
    pub path: PathBuf,
    /// Lowercased extension without the dot.
    pub extension: Option<String>,
    pub is_dir: bool,
    /// Lowercased file names of a directory's entries.
    pub entries: Vec<String>,
}

impl LocationShape {
    /// Inspects `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::PathNotFound`] if nothing exists at `path`.
    pub fn inspect(path: &Path) -> Result<Self, ResolutionError> {
        if !path.exists() {
            return Err(ResolutionError::PathNotFound {
                path: path.to_path_buf(),
            });
        }

        let is_dir = path.is_dir();
        let mut entries = Vec::new();
        if is_dir && let Ok(read) = std::fs::read_dir(path) {
            entries = read
                .filter_map(Result::ok)
                .map(|entry| entry.file_name().to_string_lossy().to_ascii_lowercase())
                .collect();
            entries.sort();
        }

        Ok(Self {
            path: path.to_path_buf(),
            extension: path
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase()),
            is_dir,
            entries,
        })
    }

    #[must_use]
    pub fn has_extension(&self, candidates: &[&str]) -> bool {
        self.extension
            .as_deref()
            .is_some_and(|ext| candidates.contains(&ext))
    }

    #[must_use]
    pub fn has_entry(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e == name)
    }
}

/// Per-dataset parameters for a load.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    /// Layer name given to the loaded data (the dataset title).
    pub title: String,
    /// Layer inside a multi-layer container (`.gpkg`, `.gdb`).
    pub layer_name: Option<String>,
    /// CRS assumed when the source does not declare one.
    pub fallback_crs: Crs,
}

/// Result of a successful load.
#[derive(Debug)]
pub enum LoadedSource {
    Vector(Layer),
    /// Raster data is recognised but not evaluated.
    Raster { path: PathBuf },
}

/// Loads one family of file formats.
pub trait SourceLoader: Send + Sync {
    /// Short name used in log messages.
    fn name(&self) -> &'static str;

    fn accepts(&self, shape: &LocationShape) -> bool;

    /// # Errors
    ///
    /// Returns [`ResolutionError`] if the location cannot be read.
    fn load(
        &self,
        shape: &LocationShape,
        request: &LoadRequest,
    ) -> Result<LoadedSource, ResolutionError>;

    /// Checks a loaded layer before it is handed to the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::InvalidHandle`] if any coordinate is not
    /// finite.
    fn validate(&self, layer: &Layer) -> Result<(), ResolutionError> {
        for (index, feature) in layer.features.iter().enumerate() {
            if let Some(geometry) = &feature.geometry
                && geometry
                    .coords_iter()
                    .any(|c| !c.x.is_finite() || !c.y.is_finite())
            {
                return Err(ResolutionError::InvalidHandle {
                    message: format!("feature {index} of {} has non-finite coordinates", layer.name),
                });
            }
        }
        Ok(())
    }
}

/// The loaders shipped with the crate, in dispatch order.
#[must_use]
pub fn default_loaders() -> Vec<Box<dyn SourceLoader>> {
    let ogr = Arc::new(OgrReader::new());
    vec![
        Box::new(CoverageLoader::new(ogr.clone())),
        Box::new(GeoJsonLoader),
        Box::new(OgrLoader::new(ogr)),
        Box::new(RasterLoader),
    ]
}

#[cfg(test)]
mod tests {
    use geo::{Geometry, point};
    use overlay_report_geometry::Feature;

    use super::*;

    #[test]
    fn inspect_reports_missing_paths() {
        let result = LocationShape::inspect(Path::new("/definitely/not/here.shp"));
        assert!(matches!(result, Err(ResolutionError::PathNotFound { .. })));
    }

    #[test]
    fn inspect_lists_directory_entries_lowercased() {
        let dir = std::env::temp_dir().join(format!("overlay_shape_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("PAL.ADF"), b"").unwrap();
        std::fs::write(dir.join("arc.adf"), b"").unwrap();

        let shape = LocationShape::inspect(&dir).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert!(shape.is_dir);
        assert!(shape.has_entry("pal.adf"));
        assert!(shape.has_entry("arc.adf"));
    }

    #[test]
    fn validation_rejects_non_finite_coordinates() {
        let layer = Layer::from_features(
            "bad",
            Crs::WGS84,
            vec![Feature::new(Some(Geometry::Point(point!(x: f64::NAN, y: 1.0))))],
        );
        assert!(matches!(
            GeoJsonLoader.validate(&layer),
            Err(ResolutionError::InvalidHandle { .. })
        ));
    }
}
