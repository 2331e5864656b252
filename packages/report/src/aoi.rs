//! Area-of-interest summary for the report header.

use geo::{Area as _, BoundingRect as _, Geometry, MapCoords as _, MultiPolygon};
use overlay_report_geometry::crs::Transformer;
use overlay_report_geometry::geojson_io::to_feature_collection;
use overlay_report_geometry::{Crs, Feature, GeometryError, Layer};
use overlay_report_report_models::AoiSummary;

/// Summarises the AOI: area measured in `crs` (projected, metres), bounds
/// and center in WGS 84.
///
/// # Errors
///
/// Returns [`GeometryError`] if the AOI cannot be transformed to WGS 84.
pub fn summarize_aoi(
    name: &str,
    geometry: &MultiPolygon<f64>,
    crs: Crs,
) -> Result<AoiSummary, GeometryError> {
    let area_m2 = geometry.unsigned_area();

    let transformer = Transformer::new(crs, Crs::WGS84)?;
    let geographic = geometry.try_map_coords(|c| transformer.transform(c))?;
    let bbox = geographic
        .bounding_rect()
        .map_or([0.0; 4], |r| [r.min().x, r.min().y, r.max().x, r.max().y]);
    let center_lat_long = format!(
        "{:.6}, {:.6}",
        f64::midpoint(bbox[1], bbox[3]),
        f64::midpoint(bbox[0], bbox[2])
    );

    let layer = Layer::from_features(
        name,
        crs,
        vec![Feature::new(Some(Geometry::MultiPolygon(geometry.clone())))],
    );
    let geojson = to_feature_collection(&layer, Crs::WGS84)?;

    Ok(AoiSummary {
        name: name.to_string(),
        crs: crs.to_string(),
        area_m2,
        area_ha: area_m2 / 10_000.0,
        bbox,
        center_lat_long,
        geojson,
    })
}

#[cfg(test)]
mod tests {
    use geo::polygon;

    use super::*;

    #[test]
    fn summarises_area_and_wgs84_position() {
        // 1 km square at the BC Albers origin (126W, 45N).
        let square = MultiPolygon::new(vec![polygon![
            (x: 1_000_000.0, y: 0.0),
            (x: 1_001_000.0, y: 0.0),
            (x: 1_001_000.0, y: 1_000.0),
            (x: 1_000_000.0, y: 1_000.0),
            (x: 1_000_000.0, y: 0.0),
        ]]);

        let summary = summarize_aoi("Site", &square, Crs::BC_ALBERS).unwrap();

        assert!((summary.area_m2 - 1_000_000.0).abs() < 1e-6);
        assert!((summary.area_ha - 100.0).abs() < 1e-9);
        assert_eq!(summary.crs, "EPSG:3005");
        assert!((summary.bbox[0] + 126.0).abs() < 0.01);
        assert!((summary.bbox[1] - 45.0).abs() < 0.01);
        assert!(summary.center_lat_long.starts_with("45.00"));
        assert!(summary.geojson.contains("MultiPolygon"));
    }
}
