#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Overlay report types.
//!
//! A [`Report`] is the serialisable result of one overlay run: a summary
//! of the area of interest, one [`Interest`] per dataset that was
//! evaluated, and one [`FailedInterest`] per dataset that could not be.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unit of an interest's headline value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasureUnit {
    /// Hectares, for polygon data.
    #[serde(rename = "ha")]
    Hectares,
    /// Metres, for line data.
    #[serde(rename = "m")]
    Metres,
}

impl fmt::Display for MeasureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hectares => write!(f, "ha"),
            Self::Metres => write!(f, "m"),
        }
    }
}

/// Totals for one combination of summary field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryEntry {
    /// The `" | "`-joined field values.
    pub key: String,
    /// Features with this combination.
    pub count: u64,
    /// Area in hectares, length in metres, or the count for point data.
    pub value: f64,
    /// `None` for point data.
    pub unit: Option<MeasureUnit>,
}

/// Result for one dataset that was evaluated against the AOI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interest {
    /// Dataset title.
    pub name: String,
    /// Catalog tab.
    pub group: String,
    /// Heading within the tab.
    pub subgroup: Option<String>,
    /// Dominant geometry family (`Point`, `Line`, `Polygon`); `None` when
    /// nothing overlapped.
    pub geometry_type: Option<String>,
    /// Features that contributed to the metrics.
    pub count: u64,
    /// Features in the aggregated layer, including any without geometry.
    pub feature_count: u64,
    /// Total overlapping area; set for polygon data.
    pub area_ha: Option<f64>,
    /// Total overlapping length; set for line data.
    pub length_m: Option<f64>,
    /// Headline value used for ordering; `None` when nothing overlapped.
    pub value: Option<f64>,
    /// Unit of [`Self::value`]; `None` for point counts.
    pub unit: Option<MeasureUnit>,
    /// Totals per combination of summary field values, by key descending.
    pub summary: Vec<SummaryEntry>,
    /// The summary field names joined with `" | "`.
    pub field_names_summary: Option<String>,
    /// Overlapping features as a WGS 84 `GeoJSON` feature collection;
    /// always `None` for secure datasets.
    pub geojson: Option<String>,
    /// Whether geometry export was suppressed for access control.
    pub secure: bool,
}

impl Interest {
    /// Whether the interest has a value to rank by.
    #[must_use]
    pub const fn has_value(&self) -> bool {
        self.value.is_some()
    }
}

/// A dataset that could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedInterest {
    /// Dataset title.
    pub name: String,
    /// Catalog tab.
    pub group: String,
    /// Heading within the tab.
    pub subgroup: Option<String>,
    /// Human-readable reason.
    pub comment: String,
}

/// Summary of the area of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AoiSummary {
    /// AOI name (usually the input file stem).
    pub name: String,
    /// Working CRS the measurements were taken in, e.g. `EPSG:3005`.
    pub crs: String,
    /// Area in square metres.
    pub area_m2: f64,
    /// Area in hectares.
    pub area_ha: f64,
    /// WGS 84 bounds as `[min_lon, min_lat, max_lon, max_lat]`.
    pub bbox: [f64; 4],
    /// WGS 84 bounding-box center as `"lat, long"`.
    pub center_lat_long: String,
    /// AOI geometry as a WGS 84 `GeoJSON` feature collection.
    pub geojson: String,
}

/// The outcome of an overlay run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// Unique id for this report.
    pub report_id: String,
    pub aoi: AoiSummary,
    /// Valued interests descending by value, then the rest.
    pub interests: Vec<Interest>,
    /// Datasets that failed, in processing order.
    pub failed_lyrs: Vec<FailedInterest>,
    /// Generation time, `"%B %d %Y - %H:%M:%S UTC"`.
    pub report_date: String,
    /// Whether the run was cancelled before every dataset was evaluated.
    pub cancelled: bool,
}
