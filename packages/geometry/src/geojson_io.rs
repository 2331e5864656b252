//! `GeoJSON` import and export for [`Layer`]s.

use geojson::{FeatureCollection, GeoJson, JsonObject};

use crate::GeometryError;
use crate::crs::{Crs, Transformer};
use crate::layer::{AttributeValue, Feature, Layer};

/// Parses `GeoJSON` text (a feature collection, a single feature or a bare
/// geometry) into a layer.
///
/// The CRS comes from the legacy `crs` member when present, otherwise the
/// `GeoJSON` default of WGS 84.
///
/// # Errors
///
/// Returns [`GeometryError::GeoJson`] if the text is not valid `GeoJSON`.
pub fn read_layer(text: &str, name: &str) -> Result<Layer, GeometryError> {
    let geojson: GeoJson = text.parse()?;

    let (features, crs) = match geojson {
        GeoJson::FeatureCollection(collection) => {
            let crs = declared_crs(collection.foreign_members.as_ref());
            let features = collection
                .features
                .into_iter()
                .map(convert_feature)
                .collect::<Result<Vec<_>, _>>()?;
            (features, crs)
        }
        GeoJson::Feature(feature) => {
            let crs = declared_crs(feature.foreign_members.as_ref());
            (vec![convert_feature(feature)?], crs)
        }
        GeoJson::Geometry(geometry) => {
            let geometry: geo::Geometry<f64> = geometry.try_into()?;
            (vec![Feature::new(Some(geometry))], None)
        }
    };

    Ok(Layer::from_features(
        name,
        crs.unwrap_or(Crs::WGS84),
        features,
    ))
}

/// Builds a layer from source rows holding `GeoJSON` geometry text and a
/// JSON object of attributes, as returned by the remote database and the
/// OGR reader.
///
/// # Errors
///
/// Returns [`GeometryError`] if a geometry or attribute payload is not
/// valid JSON.
pub fn layer_from_rows(
    name: &str,
    crs: Crs,
    rows: impl IntoIterator<Item = (Option<String>, Option<String>)>,
) -> Result<Layer, GeometryError> {
    let mut features = Vec::new();

    for (geometry_text, properties_text) in rows {
        let geometry = match geometry_text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() && text != "null" => match text.parse::<GeoJson>()? {
                GeoJson::Geometry(geometry) => Some(geometry.try_into()?),
                GeoJson::Feature(feature) => feature
                    .geometry
                    .map(geo::Geometry::<f64>::try_from)
                    .transpose()?,
                GeoJson::FeatureCollection(_) => None,
            },
            _ => None,
        };

        let mut feature = Feature::new(geometry);
        if let Some(text) = properties_text.as_deref() {
            let properties: JsonObject = serde_json::from_str(text)?;
            feature.attributes = convert_properties(&properties);
        }
        features.push(feature);
    }

    Ok(Layer::from_features(name, crs, features))
}

fn convert_feature(feature: geojson::Feature) -> Result<Feature, GeometryError> {
    let geometry = feature
        .geometry
        .map(geo::Geometry::<f64>::try_from)
        .transpose()?;

    let mut converted = Feature::new(geometry);
    if let Some(properties) = &feature.properties {
        converted.attributes = convert_properties(properties);
    }
    Ok(converted)
}

fn convert_properties(
    properties: &JsonObject,
) -> std::collections::BTreeMap<String, AttributeValue> {
    properties
        .iter()
        .map(|(key, value)| (key.clone(), AttributeValue::from_json(value)))
        .collect()
}

/// Reads `{"crs": {"type": "name", "properties": {"name": "EPSG:3005"}}}`.
fn declared_crs(foreign_members: Option<&JsonObject>) -> Option<Crs> {
    let name = foreign_members?
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()?;

    let crs = Crs::parse(name);
    if crs.is_none() {
        log::warn!("Unrecognized GeoJSON crs member '{name}', assuming EPSG:4326");
    }
    crs
}

/// Serialises `layer` as a `GeoJSON` feature collection in `target`
/// coordinates.
///
/// # Errors
///
/// Returns [`GeometryError`] if the layer cannot be transformed into
/// `target`.
pub fn to_feature_collection(layer: &Layer, target: Crs) -> Result<String, GeometryError> {
    use geo::MapCoords as _;

    let transformer = Transformer::new(layer.crs, target)?;

    let features = layer
        .features
        .iter()
        .map(|feature| {
            let geometry = feature
                .geometry
                .as_ref()
                .map(|g| g.try_map_coords(|c| transformer.transform(c)))
                .transpose()?
                .map(|g| geojson::Geometry::new(geojson::Value::from(&g)));

            let properties: JsonObject = feature
                .attributes
                .iter()
                .map(|(key, value)| (key.clone(), value.to_json()))
                .collect();

            Ok(geojson::Feature {
                bbox: None,
                geometry,
                id: None,
                properties: Some(properties),
                foreign_members: None,
            })
        })
        .collect::<Result<Vec<_>, GeometryError>>()?;

    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };

    Ok(GeoJson::from(collection).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARKS: &str = r#"{
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::3005" } },
        "features": [
            {
                "type": "Feature",
                "properties": { "PARK_NAME": "Goldstream", "EST_DATE": "1958-01-01", "CLASS": 1 },
                "geometry": { "type": "Polygon", "coordinates": [[[1000000,0],[1000100,0],[1000100,100],[1000000,100],[1000000,0]]] }
            },
            {
                "type": "Feature",
                "properties": { "PARK_NAME": null, "EST_DATE": null, "CLASS": 2 },
                "geometry": null
            }
        ]
    }"#;

    #[test]
    fn reads_collection_with_crs_member() {
        let layer = read_layer(PARKS, "Parks").unwrap();

        assert_eq!(layer.name, "Parks");
        assert_eq!(layer.crs, Crs::BC_ALBERS);
        assert_eq!(layer.feature_count(), 2);
        assert!(layer.features[1].geometry.is_none());
        assert_eq!(
            layer.field("EST_DATE").map(|f| f.field_type),
            Some(crate::layer::FieldType::Date)
        );
    }

    #[test]
    fn bare_geometry_defaults_to_wgs84() {
        let layer = read_layer(r#"{"type":"Point","coordinates":[-123.0,49.0]}"#, "pt").unwrap();
        assert_eq!(layer.crs, Crs::WGS84);
        assert_eq!(layer.feature_count(), 1);
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(read_layer("{ not json", "bad").is_err());
    }

    #[test]
    fn builds_layers_from_text_rows() {
        let rows = vec![
            (
                Some(r#"{"type":"Point","coordinates":[1.0,2.0]}"#.to_string()),
                Some(r#"{"OBJECTID": 7, "NAME": "Well"}"#.to_string()),
            ),
            (None, Some(r#"{"OBJECTID": 8, "NAME": null}"#.to_string())),
        ];

        let layer = layer_from_rows("wells", Crs::BC_ALBERS, rows).unwrap();

        assert_eq!(layer.feature_count(), 2);
        assert!(layer.features[0].geometry.is_some());
        assert_eq!(
            layer.features[0].attribute("OBJECTID"),
            Some(&AttributeValue::Integer(7))
        );
    }

    #[test]
    fn exports_wgs84_feature_collection() {
        let layer = read_layer(PARKS, "Parks").unwrap();
        let exported = to_feature_collection(&layer, Crs::WGS84).unwrap();

        let parsed: GeoJson = exported.parse().unwrap();
        let GeoJson::FeatureCollection(collection) = parsed else {
            panic!("expected a feature collection");
        };
        assert_eq!(collection.features.len(), 2);

        let reread = read_layer(&exported, "again").unwrap();
        let rect = reread.bounding_rect().unwrap();
        assert!(rect.min().x < -125.0 && rect.min().x > -127.0);
        assert!(rect.min().y > 44.0 && rect.min().y < 46.0);
    }
}
