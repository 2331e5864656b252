#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Interest catalog types.
//!
//! A catalog is a list of tabs, each holding the dataset rows an overlay
//! run evaluates. Rows are deserialized from TOML or CSV as
//! [`CatalogRecord`]s and normalized into [`DatasetDescriptor`]s.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Source-location values that mean "a table in the remote spatial
/// database" rather than a file path. Compared case-insensitively.
pub const REMOTE_MARKERS: &[&str] = &["REMOTE", "BCGW"];

/// Where a dataset's features come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A `schema.table` in the remote spatial database.
    RemoteTable,
    /// A file or directory on disk.
    FilePath,
}

/// A raw catalog row as written in the catalog file.
///
/// CSV headers use the spreadsheet column titles (`Layer Name`, ...);
/// TOML uses the snake-case keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogRecord {
    /// Display title; blank rows are spacers.
    #[serde(default, alias = "Layer Name")]
    pub layer_name: Option<String>,
    /// Sub-heading within the tab.
    #[serde(default, alias = "Layer Group Heading")]
    pub layer_group_heading: Option<String>,
    /// Remote `schema.table`, or layer name inside a container file.
    #[serde(default, alias = "Feature Class Name")]
    pub feature_class_name: Option<String>,
    /// A remote marker or a file path.
    #[serde(default, alias = "Layer Source")]
    pub layer_source: Option<String>,
    /// Optional subset filter.
    #[serde(default, alias = "Display Query")]
    pub display_query: Option<String>,
    /// Comma-separated summary field names.
    #[serde(default, alias = "Attribute ID")]
    pub attribute_id: Option<String>,
}

/// One dataset to evaluate against the AOI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    /// Display title.
    pub title: String,
    /// Top-level grouping (the catalog tab).
    pub group: String,
    /// Optional second-level grouping.
    pub subgroup: Option<String>,
    /// Remote table or file.
    pub source_kind: SourceKind,
    /// File path for [`SourceKind::FilePath`] datasets.
    pub location: Option<String>,
    /// Remote `schema.table`, or layer name within a container file.
    pub table: Option<String>,
    /// Subset filter, `None` when blank.
    pub filter: Option<String>,
    /// Summary field names (ordered).
    pub summary_fields: Vec<String>,
}

impl DatasetDescriptor {
    /// Normalizes a catalog row. Returns `None` for spacer rows (blank
    /// layer name).
    #[must_use]
    pub fn from_record(group: &str, record: &CatalogRecord) -> Option<Self> {
        let title = non_blank(record.layer_name.as_deref())?;
        let source = non_blank(record.layer_source.as_deref());

        let source_kind = match source.as_deref() {
            Some(value) if is_remote_marker(value) => SourceKind::RemoteTable,
            _ => SourceKind::FilePath,
        };

        let location = match source_kind {
            SourceKind::RemoteTable => None,
            SourceKind::FilePath => source,
        };

        let summary_fields = record
            .attribute_id
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect();

        Some(Self {
            title,
            group: group.trim().to_string(),
            subgroup: non_blank(record.layer_group_heading.as_deref()),
            source_kind,
            location,
            table: non_blank(record.feature_class_name.as_deref()),
            filter: non_blank(record.display_query.as_deref()),
            summary_fields,
        })
    }

    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.source_kind == SourceKind::RemoteTable
    }
}

/// Whether a `Layer Source` value designates the remote database.
#[must_use]
pub fn is_remote_marker(value: &str) -> bool {
    let value = value.trim();
    REMOTE_MARKERS
        .iter()
        .any(|marker| marker.eq_ignore_ascii_case(value))
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// A named group of datasets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogTab {
    pub name: String,
    pub datasets: Vec<DatasetDescriptor>,
}

/// The full interest catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub tabs: Vec<CatalogTab>,
}

impl Catalog {
    /// Every dataset in tab order.
    pub fn datasets(&self) -> impl Iterator<Item = &DatasetDescriptor> {
        self.tabs.iter().flat_map(|tab| tab.datasets.iter())
    }

    /// Total number of datasets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tabs.iter().map(|tab| tab.datasets.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any dataset reads from the remote database.
    #[must_use]
    pub fn has_remote(&self) -> bool {
        self.datasets().any(DatasetDescriptor::is_remote)
    }
}

/// Remote tables whose contents must never be exported.
///
/// Stored upper-cased; lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedTables {
    tables: BTreeSet<String>,
}

impl ProtectedTables {
    #[must_use]
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tables: tables
                .into_iter()
                .map(|t| t.as_ref().trim().to_ascii_uppercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains(&table.trim().to_ascii_uppercase())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, source: &str) -> CatalogRecord {
        CatalogRecord {
            layer_name: Some(name.to_string()),
            layer_source: Some(source.to_string()),
            ..CatalogRecord::default()
        }
    }

    #[test]
    fn spacer_rows_are_skipped() {
        assert!(DatasetDescriptor::from_record("Tab", &record("   ", "BCGW")).is_none());
        assert!(DatasetDescriptor::from_record("Tab", &CatalogRecord::default()).is_none());
    }

    #[test]
    fn remote_markers_are_case_insensitive() {
        let descriptor = DatasetDescriptor::from_record("Tab", &record("Parks", " bcgw ")).unwrap();
        assert_eq!(descriptor.source_kind, SourceKind::RemoteTable);
        assert!(descriptor.location.is_none());

        let remote = DatasetDescriptor::from_record("Tab", &record("Parks", "Remote")).unwrap();
        assert!(remote.is_remote());
    }

    #[test]
    fn file_rows_keep_their_path_and_fields() {
        let mut row = record(" Wells ", "/data/wells.geojson");
        row.attribute_id = Some("WELL_TAG, , AQUIFER ".to_string());
        row.display_query = Some("   ".to_string());
        row.layer_group_heading = Some("Water".to_string());

        let descriptor = DatasetDescriptor::from_record(" Hydrology ", &row).unwrap();

        assert_eq!(descriptor.title, "Wells");
        assert_eq!(descriptor.group, "Hydrology");
        assert_eq!(descriptor.subgroup.as_deref(), Some("Water"));
        assert_eq!(descriptor.source_kind, SourceKind::FilePath);
        assert_eq!(descriptor.location.as_deref(), Some("/data/wells.geojson"));
        assert_eq!(descriptor.summary_fields, vec!["WELL_TAG", "AQUIFER"]);
        assert!(descriptor.filter.is_none());
    }

    #[test]
    fn protected_tables_ignore_case() {
        let protected = ProtectedTables::new(["WHSE_X.SECRET_SITES", ""]);
        assert_eq!(protected.len(), 1);
        assert!(protected.contains("whse_x.secret_sites"));
        assert!(!protected.contains("WHSE_X.PUBLIC"));
    }
}
