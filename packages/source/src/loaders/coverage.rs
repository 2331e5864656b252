//! Legacy ArcInfo coverage directories.

use std::sync::Arc;

use super::{LoadRequest, LoadedSource, LocationShape, OgrReader, SourceLoader};
use crate::ResolutionError;

/// Vector members in order of preference.
const VECTOR_MEMBERS: &[&str] = &["pal.adf", "arc.adf", "lab.adf", "cnt.adf"];

/// Raster grid header.
const RASTER_MEMBER: &str = "hdr.adf";

/// Reads the vector part of a coverage directory through the OGR reader.
pub struct CoverageLoader {
    reader: Arc<OgrReader>,
}

impl CoverageLoader {
    #[must_use]
    pub const fn new(reader: Arc<OgrReader>) -> Self {
        Self { reader }
    }
}

impl SourceLoader for CoverageLoader {
    fn name(&self) -> &'static str {
        "coverage"
    }

    fn accepts(&self, shape: &LocationShape) -> bool {
        shape.is_dir
            && VECTOR_MEMBERS
                .iter()
                .chain(std::iter::once(&RASTER_MEMBER))
                .any(|member| shape.has_entry(member))
    }

    fn load(
        &self,
        shape: &LocationShape,
        request: &LoadRequest,
    ) -> Result<LoadedSource, ResolutionError> {
        let raster = shape.has_entry(RASTER_MEMBER);
        let vector = VECTOR_MEMBERS.iter().find(|member| shape.has_entry(member));

        let Some(member) = vector else {
            log::info!(
                "{}: coverage {} is raster-only, skipping",
                request.title,
                shape.path.display()
            );
            return Ok(LoadedSource::Raster {
                path: shape.path.clone(),
            });
        };

        if raster {
            log::info!(
                "{}: coverage {} also holds a raster grid, which is not evaluated",
                request.title,
                shape.path.display()
            );
        }

        // The coverage driver exposes each member as a layer named after it.
        let layer = member.trim_end_matches(".adf").to_ascii_uppercase();
        log::debug!("{}: reading coverage layer {layer}", request.title);

        let loaded = self.reader.read(
            &shape.path,
            Some(layer.as_str()),
            &request.title,
            request.fallback_crs,
            "Arc/Info Binary Coverage",
        )?;

        Ok(LoadedSource::Vector(loaded))
    }
}

#[cfg(test)]
mod tests {
    use overlay_report_geometry::Crs;

    use super::*;

    fn coverage_dir(suffix: &str, members: &[&str]) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "overlay_coverage_{suffix}_{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        for member in members {
            std::fs::write(dir.join(member), b"").unwrap();
        }
        dir
    }

    #[test]
    fn accepts_directories_with_coverage_members() {
        let loader = CoverageLoader::new(Arc::new(OgrReader::new()));

        let dir = coverage_dir("accepts", &["arc.adf", "lab.adf"]);
        let shape = LocationShape::inspect(&dir).unwrap();
        std::fs::remove_dir_all(&dir).ok();
        assert!(loader.accepts(&shape));

        let dir = coverage_dir("plain", &["readme.txt"]);
        let shape = LocationShape::inspect(&dir).unwrap();
        std::fs::remove_dir_all(&dir).ok();
        assert!(!loader.accepts(&shape));
    }

    #[test]
    fn raster_only_coverage_is_skipped() {
        let loader = CoverageLoader::new(Arc::new(OgrReader::new()));
        let dir = coverage_dir("raster", &["hdr.adf", "w001001.adf"]);
        let shape = LocationShape::inspect(&dir).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        let request = LoadRequest {
            title: "Elevation".to_string(),
            layer_name: None,
            fallback_crs: Crs::BC_ALBERS,
        };
        assert!(matches!(
            loader.load(&shape, &request),
            Ok(LoadedSource::Raster { .. })
        ));
    }
}
