//! Per-dataset statistics.
//!
//! Every feature adds to a count; polygons add area and lines add length.
//! The headline value is hectares if any area overlapped, otherwise metres
//! if any length did, otherwise the feature count.

use std::collections::BTreeMap;

use geo::Geometry;
use overlay_report_geometry::geojson_io::to_feature_collection;
use overlay_report_geometry::kind::geometry_type_name;
use overlay_report_geometry::measure::{planar_area, planar_length};
use overlay_report_geometry::{Crs, GeometryError, GeometryFamily, Layer};
use overlay_report_report_models::{Interest, MeasureUnit, SummaryEntry};
use thiserror::Error;

/// Separator between summary field values (and names).
pub const SUMMARY_DELIMITER: &str = " | ";

const SQUARE_METRES_PER_HECTARE: f64 = 10_000.0;

/// Errors summarising a layer. These indicate a catalog or data model
/// problem rather than bad geometry, so they are never retried.
#[derive(Debug, Error)]
pub enum SummaryError {
    /// A configured summary field is not in the layer's schema.
    #[error("summary field '{field}' not found in {layer}")]
    MissingField {
        /// The configured field name.
        field: String,
        /// Layer name.
        layer: String,
    },

    /// A feature's geometry is not a point, line or polygon.
    #[error("unexpected geometry type {geometry_type} in {layer}")]
    UnexpectedGeometry {
        /// Layer name.
        layer: String,
        /// Type of the offending geometry.
        geometry_type: String,
    },

    /// The overlapping features could not be exported.
    #[error("Failed to export geometry: {0}")]
    Export(#[from] GeometryError),
}

/// Descriptor fields that shape an [`Interest`].
#[derive(Debug, Clone, Copy)]
pub struct SummaryRequest<'a> {
    pub group: &'a str,
    pub subgroup: Option<&'a str>,
    pub summary_fields: &'a [String],
    /// Suppress geometry export.
    pub secure: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    count: u64,
    area: f64,
    length: f64,
}

impl Totals {
    fn add(&mut self, family: GeometryFamily, geometry: &Geometry<f64>) {
        self.count += 1;
        match family {
            GeometryFamily::Polygon => self.area += planar_area(geometry),
            GeometryFamily::Line => self.length += planar_length(geometry),
            GeometryFamily::Point => {}
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn value(self) -> (f64, Option<MeasureUnit>) {
        if self.area > 0.0 {
            (self.area / SQUARE_METRES_PER_HECTARE, Some(MeasureUnit::Hectares))
        } else if self.length > 0.0 {
            (self.length, Some(MeasureUnit::Metres))
        } else {
            (self.count as f64, None)
        }
    }
}

/// Builds [`Interest`]s from aggregated layers in the working CRS.
#[derive(Debug, Clone, Copy)]
pub struct InterestSummarizer {
    export_crs: Crs,
}

impl Default for InterestSummarizer {
    fn default() -> Self {
        Self::new(Crs::WGS84)
    }
}

impl InterestSummarizer {
    #[must_use]
    pub const fn new(export_crs: Crs) -> Self {
        Self { export_crs }
    }

    /// Summarises `layer` (in a projected CRS measured in metres).
    ///
    /// # Errors
    ///
    /// Returns [`SummaryError`] if a summary field is missing, a geometry
    /// is not a point, line or polygon, or the export fails.
    pub fn summarize(
        &self,
        layer: &Layer,
        request: &SummaryRequest<'_>,
    ) -> Result<Interest, SummaryError> {
        let field_names_summary = (!request.summary_fields.is_empty())
            .then(|| request.summary_fields.join(SUMMARY_DELIMITER));

        let mut interest = Interest {
            name: layer.name.clone(),
            group: request.group.to_string(),
            subgroup: request.subgroup.map(str::to_string),
            geometry_type: None,
            count: 0,
            feature_count: layer.feature_count() as u64,
            area_ha: None,
            length_m: None,
            value: None,
            unit: None,
            summary: Vec::new(),
            field_names_summary,
            geojson: None,
            secure: request.secure,
        };

        if layer.is_empty() {
            return Ok(interest);
        }

        // Resolve configured names to the layer's own spelling.
        let fields = request
            .summary_fields
            .iter()
            .map(|name| {
                layer
                    .field(name)
                    .map(|f| f.name.clone())
                    .ok_or_else(|| SummaryError::MissingField {
                        field: name.clone(),
                        layer: layer.name.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut totals = Totals::default();
        let mut groups: BTreeMap<String, Totals> = BTreeMap::new();
        let mut dominant: Option<GeometryFamily> = None;

        for feature in &layer.features {
            let Some(geometry) = &feature.geometry else {
                continue;
            };
            let Some(family) = GeometryFamily::of(geometry) else {
                return Err(SummaryError::UnexpectedGeometry {
                    layer: layer.name.clone(),
                    geometry_type: geometry_type_name(geometry).to_string(),
                });
            };

            dominant = Some(dominant.map_or(family, |d| rank_max(d, family)));
            totals.add(family, geometry);

            if !fields.is_empty() {
                let key = fields
                    .iter()
                    .map(|name| {
                        feature
                            .attribute(name)
                            .map_or_else(|| "NULL".to_string(), ToString::to_string)
                    })
                    .collect::<Vec<_>>()
                    .join(SUMMARY_DELIMITER);
                groups.entry(key).or_default().add(family, geometry);
            }
        }

        if totals.count > 0 {
            let (value, unit) = totals.value();
            interest.value = Some(value);
            interest.unit = unit;
            interest.area_ha = (totals.area > 0.0).then_some(value);
            interest.length_m =
                (totals.area <= 0.0 && totals.length > 0.0).then_some(value);
        }
        interest.count = totals.count;
        interest.geometry_type = dominant.map(|family| family_name(family).to_string());
        interest.summary = groups
            .into_iter()
            .rev()
            .map(|(key, group)| {
                let (value, unit) = group.value();
                SummaryEntry {
                    key,
                    count: group.count,
                    value,
                    unit,
                }
            })
            .collect();

        if !request.secure {
            interest.geojson = Some(to_feature_collection(layer, self.export_crs)?);
        }

        log::debug!(
            "{}: {} features, value {:?} {:?}",
            layer.name,
            interest.count,
            interest.value,
            interest.unit
        );

        Ok(interest)
    }
}

const fn rank(family: GeometryFamily) -> u8 {
    match family {
        GeometryFamily::Point => 0,
        GeometryFamily::Line => 1,
        GeometryFamily::Polygon => 2,
    }
}

const fn rank_max(a: GeometryFamily, b: GeometryFamily) -> GeometryFamily {
    if rank(b) > rank(a) { b } else { a }
}

const fn family_name(family: GeometryFamily) -> &'static str {
    match family {
        GeometryFamily::Point => "Point",
        GeometryFamily::Line => "Line",
        GeometryFamily::Polygon => "Polygon",
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use geo::{GeometryCollection, line_string, point, polygon};
    use overlay_report_geometry::{AttributeValue, Feature};

    use super::*;

    fn rectangle(width: f64, height: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: 1_000_000.0, y: 500_000.0),
            (x: 1_000_000.0 + width, y: 500_000.0),
            (x: 1_000_000.0 + width, y: 500_000.0 + height),
            (x: 1_000_000.0, y: 500_000.0 + height),
            (x: 1_000_000.0, y: 500_000.0),
        ])
    }

    fn request(fields: &[String], secure: bool) -> SummaryRequest<'_> {
        SummaryRequest {
            group: "Land",
            subgroup: Some("Parks"),
            summary_fields: fields,
            secure,
        }
    }

    fn layer(features: Vec<Feature>) -> Layer {
        Layer::from_features("Parks", Crs::BC_ALBERS, features)
    }

    #[test]
    fn polygon_area_is_reported_in_hectares() {
        let layer = layer(vec![
            Feature::new(Some(rectangle(100.0, 300.0))),
            Feature::new(Some(rectangle(100.0, 200.0))),
        ]);

        let interest = InterestSummarizer::default()
            .summarize(&layer, &request(&[], false))
            .unwrap();

        assert!((interest.value.unwrap() - 5.0).abs() < 1e-9);
        assert_eq!(interest.unit, Some(MeasureUnit::Hectares));
        assert_eq!(interest.area_ha, interest.value);
        assert_eq!(interest.length_m, None);
        assert_eq!(interest.count, 2);
        assert_eq!(interest.geometry_type.as_deref(), Some("Polygon"));
    }

    #[test]
    fn line_length_is_reported_in_metres() {
        let layer = layer(vec![
            Feature::new(Some(Geometry::LineString(line_string![
                (x: 0.0, y: 0.0),
                (x: 100.0, y: 0.0),
            ]))),
            Feature::new(Some(Geometry::LineString(line_string![
                (x: 0.0, y: 0.0),
                (x: 0.0, y: 20.5),
            ]))),
        ]);

        let interest = InterestSummarizer::default()
            .summarize(&layer, &request(&[], true))
            .unwrap();

        assert!((interest.value.unwrap() - 120.5).abs() < 1e-9);
        assert_eq!(interest.unit, Some(MeasureUnit::Metres));
        assert_eq!(interest.length_m, interest.value);
    }

    #[test]
    fn point_data_is_valued_by_count() {
        let features = (0..7)
            .map(|i| Feature::new(Some(Geometry::Point(point!(x: f64::from(i), y: 0.0)))))
            .collect();
        let interest = InterestSummarizer::default()
            .summarize(&layer(features), &request(&[], true))
            .unwrap();

        assert_eq!(interest.value, Some(7.0));
        assert_eq!(interest.unit, None);
        assert_eq!(interest.geometry_type.as_deref(), Some("Point"));
    }

    #[test]
    fn secure_interests_never_carry_geometry() {
        let layers = vec![
            layer(vec![Feature::new(Some(rectangle(10.0, 10.0)))]),
            layer(vec![Feature::new(Some(Geometry::Point(point!(x: 1.0, y: 1.0))))]),
        ];

        for layer in &layers {
            let secure = InterestSummarizer::default()
                .summarize(layer, &request(&[], true))
                .unwrap();
            assert!(secure.geojson.is_none());
            assert!(secure.secure);
        }
    }

    #[test]
    fn open_interests_export_geojson() {
        let layer = layer(vec![Feature::new(Some(rectangle(10.0, 10.0)))]);
        let interest = InterestSummarizer::default()
            .summarize(&layer, &request(&[], false))
            .unwrap();
        assert!(interest.geojson.unwrap().contains("FeatureCollection"));
    }

    #[test]
    fn empty_layers_have_no_value() {
        let interest = InterestSummarizer::default()
            .summarize(&layer(vec![]), &request(&["MISSING".to_string()], false))
            .unwrap();

        assert_eq!(interest.value, None);
        assert_eq!(interest.unit, None);
        assert!(interest.summary.is_empty());
        assert!(interest.geojson.is_none());
        assert_eq!(interest.field_names_summary.as_deref(), Some("MISSING"));
    }

    #[test]
    fn summary_groups_by_joined_field_values() {
        let date = NaiveDate::from_ymd_opt(1958, 1, 1).unwrap();
        let features = vec![
            Feature::new(Some(rectangle(100.0, 100.0)))
                .with_attribute("CLASS", AttributeValue::Text("A".to_string()))
                .with_attribute("EST", AttributeValue::Date(date)),
            Feature::new(Some(rectangle(100.0, 200.0)))
                .with_attribute("CLASS", AttributeValue::Text("A".to_string()))
                .with_attribute("EST", AttributeValue::Date(date)),
            Feature::new(Some(rectangle(100.0, 100.0)))
                .with_attribute("CLASS", AttributeValue::Text("B".to_string()))
                .with_attribute("EST", AttributeValue::Null),
        ];
        let fields = vec!["class".to_string(), "EST".to_string()];

        let interest = InterestSummarizer::default()
            .summarize(&layer(features), &request(&fields, true))
            .unwrap();

        assert_eq!(interest.field_names_summary.as_deref(), Some("class | EST"));
        let keys: Vec<&str> = interest.summary.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["B | NULL", "A | 1958-01-01"]);
        let a = &interest.summary[1];
        assert_eq!(a.count, 2);
        assert!((a.value - 3.0).abs() < 1e-9);
        assert_eq!(a.unit, Some(MeasureUnit::Hectares));
        assert_eq!(interest.summary[0].count, 1);
    }

    #[test]
    fn missing_summary_fields_are_errors() {
        let layer = layer(vec![
            Feature::new(Some(rectangle(10.0, 10.0)))
                .with_attribute("CLASS", AttributeValue::Text("A".to_string())),
        ]);
        let fields = vec!["OWNER".to_string()];

        assert!(matches!(
            InterestSummarizer::default().summarize(&layer, &request(&fields, true)),
            Err(SummaryError::MissingField { .. })
        ));
    }

    #[test]
    fn geometry_collections_are_errors() {
        let layer = layer(vec![Feature::new(Some(Geometry::GeometryCollection(
            GeometryCollection::from(vec![Geometry::Point(point!(x: 1.0, y: 1.0))]),
        )))]);

        assert!(matches!(
            InterestSummarizer::default().summarize(&layer, &request(&[], true)),
            Err(SummaryError::UnexpectedGeometry { .. })
        ));
    }
}
