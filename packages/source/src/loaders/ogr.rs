//! Vector formats read through `DuckDB`'s spatial extension (GDAL/OGR
//! drivers): shapefiles, KML/KMZ, `GeoPackage` and file geodatabases.

use std::path::Path;
use std::sync::{Arc, Mutex};

use overlay_report_geometry::geojson_io::layer_from_rows;
use overlay_report_geometry::{Crs, Layer};

use super::{LoadRequest, LoadedSource, LocationShape, SourceLoader};
use crate::ResolutionError;

/// Column the pipeline reads geometry from; dropped from the attributes.
const GEOMETRY_COLUMN: &str = "geom";

enum ReaderState {
    Unopened,
    Ready(duckdb::Connection),
    Unavailable(String),
}

/// Shared in-memory `DuckDB` connection with the `spatial` extension,
/// opened on first use.
pub struct OgrReader {
    state: Mutex<ReaderState>,
}

impl Default for OgrReader {
    fn default() -> Self {
        Self::new()
    }
}

impl OgrReader {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(ReaderState::Unopened),
        }
    }

    /// Reads every feature of `path` (or of `layer` inside it).
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::NoDriver`] if the spatial extension is not
    /// available and [`ResolutionError::InvalidHandle`] if the file cannot
    /// be read.
    pub fn read(
        &self,
        path: &Path,
        layer: Option<&str>,
        title: &str,
        fallback_crs: Crs,
        format: &str,
    ) -> Result<Layer, ResolutionError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ResolutionError::NoDriver {
                format: format.to_string(),
                message: "spatial reader is poisoned".to_string(),
            })?;

        if matches!(*state, ReaderState::Unopened) {
            *state = match open_spatial() {
                Ok(conn) => ReaderState::Ready(conn),
                Err(e) => {
                    log::warn!("DuckDB spatial extension unavailable: {e}");
                    ReaderState::Unavailable(e.to_string())
                }
            };
        }

        let conn = match &*state {
            ReaderState::Ready(conn) => conn,
            ReaderState::Unavailable(message) => {
                return Err(ResolutionError::NoDriver {
                    format: format.to_string(),
                    message: message.clone(),
                });
            }
            ReaderState::Unopened => {
                return Err(ResolutionError::NoDriver {
                    format: format.to_string(),
                    message: "spatial reader not opened".to_string(),
                });
            }
        };

        let invalid = |e: duckdb::Error| ResolutionError::InvalidHandle {
            message: format!("Failed to read {}: {e}", path.display()),
        };

        let crs = read_crs(conn, path, layer).map_err(invalid)?.unwrap_or_else(|| {
            log::warn!(
                "{title}: no CRS declared by {}, assuming {fallback_crs}",
                path.display()
            );
            fallback_crs
        });

        let mut stmt = conn.prepare(&read_query(path, layer)).map_err(invalid)?;
        let mut rows = stmt.query([]).map_err(invalid)?;

        let mut collected = Vec::new();
        while let Some(row) = rows.next().map_err(invalid)? {
            let geometry: Option<String> = row.get(0).map_err(invalid)?;
            let properties: Option<String> = row.get(1).map_err(invalid)?;
            collected.push((geometry, properties));
        }

        let mut loaded = layer_from_rows(title, crs, collected).map_err(|e| {
            ResolutionError::InvalidHandle {
                message: e.to_string(),
            }
        })?;
        loaded.remove_field(GEOMETRY_COLUMN);

        log::debug!(
            "{title}: read {} features from {}",
            loaded.feature_count(),
            path.display()
        );

        Ok(loaded)
    }
}

fn open_spatial() -> Result<duckdb::Connection, duckdb::Error> {
    let conn = duckdb::Connection::open_in_memory()?;
    conn.execute_batch("INSTALL spatial; LOAD spatial;")?;
    Ok(conn)
}

fn sql_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn read_query(path: &Path, layer: Option<&str>) -> String {
    let mut source = sql_literal(&path.to_string_lossy());
    if let Some(layer) = layer {
        source.push_str(", layer = ");
        source.push_str(&sql_literal(layer));
    }
    format!(
        "SELECT ST_AsGeoJSON(t.{GEOMETRY_COLUMN})::VARCHAR AS geometry, to_json(t)::VARCHAR AS properties \
         FROM ST_Read({source}) AS t"
    )
}

/// Authority code of the first geometry field of the requested layer (or
/// the first layer).
fn read_crs(
    conn: &duckdb::Connection,
    path: &Path,
    layer: Option<&str>,
) -> Result<Option<Crs>, duckdb::Error> {
    let sql = format!(
        "SELECT l.name::VARCHAR, l.geometry_fields[1].crs.auth_code::VARCHAR \
         FROM (SELECT unnest(layers) AS l FROM ST_Read_Meta({}))",
        sql_literal(&path.to_string_lossy())
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let name: Option<String> = row.get(0)?;
        let code: Option<String> = row.get(1)?;
        let wanted = layer.is_none_or(|layer| name.as_deref() == Some(layer));
        if wanted {
            return Ok(code.and_then(|c| c.trim().parse::<u32>().ok()).map(Crs::from_epsg));
        }
    }

    Ok(None)
}

/// Loads shapefiles, KML/KMZ and layers of `.gpkg`/`.gdb` containers.
pub struct OgrLoader {
    reader: Arc<OgrReader>,
}

impl OgrLoader {
    #[must_use]
    pub const fn new(reader: Arc<OgrReader>) -> Self {
        Self { reader }
    }
}

const SINGLE_LAYER: &[&str] = &["shp", "kml", "kmz"];
const MULTI_LAYER: &[&str] = &["gpkg", "gdb"];

fn format_name(extension: &str) -> &'static str {
    match extension {
        "shp" => "ESRI Shapefile",
        "kml" => "KML",
        "kmz" => "KMZ",
        "gpkg" => "GeoPackage",
        "gdb" => "FileGDB",
        _ => "unknown",
    }
}

impl SourceLoader for OgrLoader {
    fn name(&self) -> &'static str {
        "ogr"
    }

    fn accepts(&self, shape: &LocationShape) -> bool {
        // File geodatabases are directories named *.gdb.
        (shape.has_extension(SINGLE_LAYER) && !shape.is_dir) || shape.has_extension(MULTI_LAYER)
    }

    fn load(
        &self,
        shape: &LocationShape,
        request: &LoadRequest,
    ) -> Result<LoadedSource, ResolutionError> {
        let extension = shape.extension.as_deref().unwrap_or_default();
        let layer = if MULTI_LAYER.contains(&extension) {
            let Some(layer) = request.layer_name.as_deref().filter(|l| !l.trim().is_empty())
            else {
                return Err(ResolutionError::InvalidHandle {
                    message: format!(
                        "{} is a multi-layer container but no layer name was given",
                        shape.path.display()
                    ),
                });
            };
            Some(layer.trim())
        } else {
            None
        };

        let loaded = self.reader.read(
            &shape.path,
            layer,
            &request.title,
            request.fallback_crs,
            format_name(extension),
        )?;

        Ok(LoadedSource::Vector(loaded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(name: &str, is_dir: bool) -> LocationShape {
        LocationShape {
            path: std::path::PathBuf::from(name),
            extension: Path::new(name)
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase()),
            is_dir,
            entries: Vec::new(),
        }
    }

    #[test]
    fn accepts_vector_containers() {
        let loader = OgrLoader::new(Arc::new(OgrReader::new()));
        assert!(loader.accepts(&shape("/data/roads.SHP", false)));
        assert!(loader.accepts(&shape("/data/sites.kmz", false)));
        assert!(loader.accepts(&shape("/data/base.gdb", true)));
        assert!(loader.accepts(&shape("/data/base.gpkg", false)));
        assert!(!loader.accepts(&shape("/data/dem.tif", false)));
        assert!(!loader.accepts(&shape("/data/notes.txt", false)));
    }

    #[test]
    fn containers_require_a_layer_name() {
        let loader = OgrLoader::new(Arc::new(OgrReader::new()));
        let request = LoadRequest {
            title: "Roads".to_string(),
            layer_name: Some("  ".to_string()),
            fallback_crs: Crs::BC_ALBERS,
        };
        assert!(matches!(
            loader.load(&shape("/data/base.gpkg", false), &request),
            Err(ResolutionError::InvalidHandle { .. })
        ));
    }

    #[test]
    fn read_query_escapes_paths_and_layers() {
        let sql = read_query(Path::new("/data/o'neil.gpkg"), Some("roads"));
        assert!(sql.contains("ST_Read('/data/o''neil.gpkg', layer = 'roads')"));
        assert!(sql.contains("ST_AsGeoJSON(t.geom)"));
    }
}
