#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Loads the interest catalog and the protected-table list.
//!
//! A catalog is either a single TOML file with `[[tab]]` tables holding
//! `[[tab.layer]]` rows, a directory of CSV files (one tab per file, named
//! by file stem), or a single CSV file treated as one tab.

use std::path::{Path, PathBuf};

use overlay_report_catalog_models::{
    Catalog, CatalogRecord, CatalogTab, DatasetDescriptor, ProtectedTables,
};
use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur while loading catalog files.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A catalog file could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        /// The path being read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// CSV parse error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The path is neither a TOML file, a CSV file nor a directory.
    #[error("Unsupported catalog format: {}", path.display())]
    UnsupportedFormat {
        /// The offending path.
        path: PathBuf,
    },

    /// The catalog parsed but holds no datasets.
    #[error("Catalog {} contains no datasets", path.display())]
    Empty {
        /// The catalog path.
        path: PathBuf,
    },
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "tab")]
    tabs: Vec<TabFile>,
}

#[derive(Debug, Deserialize)]
struct TabFile {
    name: String,
    #[serde(default, rename = "layer")]
    layers: Vec<CatalogRecord>,
}

#[derive(Debug, Deserialize)]
struct ProtectedFile {
    #[serde(default)]
    protected_data: ProtectedSection,
}

#[derive(Debug, Default, Deserialize)]
struct ProtectedSection {
    #[serde(default)]
    tables: Vec<String>,
}

/// Loads a catalog from a TOML file, a CSV file, or a directory of CSV
/// files.
///
/// # Errors
///
/// Returns [`CatalogError`] if the catalog cannot be read or parsed, or
/// holds no datasets.
pub fn load_catalog(path: &Path) -> Result<Catalog, CatalogError> {
    let catalog = if path.is_dir() {
        load_csv_directory(path)?
    } else {
        match extension(path).as_deref() {
            Some("toml") => parse_toml_catalog(&read_to_string(path)?)?,
            Some("csv") => {
                let name = path
                    .file_stem()
                    .map_or_else(String::new, |s| s.to_string_lossy().to_string());
                Catalog {
                    tabs: vec![read_csv_tab(path, &name)?],
                }
            }
            _ => {
                return Err(CatalogError::UnsupportedFormat {
                    path: path.to_path_buf(),
                });
            }
        }
    };

    if catalog.is_empty() {
        return Err(CatalogError::Empty {
            path: path.to_path_buf(),
        });
    }

    log::info!(
        "Loaded catalog {} ({} tabs, {} datasets)",
        path.display(),
        catalog.tabs.len(),
        catalog.len()
    );

    Ok(catalog)
}

/// Parses a TOML catalog.
///
/// # Errors
///
/// Returns [`CatalogError::Toml`] if the text is not a valid catalog.
pub fn parse_toml_catalog(text: &str) -> Result<Catalog, CatalogError> {
    let file: CatalogFile = toml::from_str(text)?;

    let tabs = file
        .tabs
        .into_iter()
        .map(|tab| CatalogTab {
            datasets: tab
                .layers
                .iter()
                .filter_map(|record| DatasetDescriptor::from_record(&tab.name, record))
                .collect(),
            name: tab.name,
        })
        .collect();

    Ok(Catalog { tabs })
}

fn load_csv_directory(dir: &Path) -> Result<Catalog, CatalogError> {
    let entries = std::fs::read_dir(dir).map_err(|source| CatalogError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && extension(path).as_deref() == Some("csv"))
        .collect();
    files.sort();

    let tabs = files
        .iter()
        .map(|file| {
            let name = file
                .file_stem()
                .map_or_else(String::new, |s| s.to_string_lossy().to_string());
            read_csv_tab(file, &name)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Catalog { tabs })
}

fn read_csv_tab(path: &Path, name: &str) -> Result<CatalogTab, CatalogError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)?;

    let mut datasets = Vec::new();
    for record in reader.deserialize::<CatalogRecord>() {
        if let Some(descriptor) = DatasetDescriptor::from_record(name, &record?) {
            datasets.push(descriptor);
        }
    }

    Ok(CatalogTab {
        name: name.to_string(),
        datasets,
    })
}

/// Loads the protected-table list from a TOML file holding
/// `[protected_data] tables = [...]`.
///
/// # Errors
///
/// Returns [`CatalogError`] if the file cannot be read or parsed.
pub fn load_protected_tables(path: &Path) -> Result<ProtectedTables, CatalogError> {
    let protected = parse_protected_tables(&read_to_string(path)?)?;
    log::info!(
        "Loaded {} protected tables from {}",
        protected.len(),
        path.display()
    );
    Ok(protected)
}

/// Parses the protected-table list.
///
/// # Errors
///
/// Returns [`CatalogError::Toml`] if the text is not valid TOML.
pub fn parse_protected_tables(text: &str) -> Result<ProtectedTables, CatalogError> {
    let file: ProtectedFile = toml::from_str(text)?;
    Ok(ProtectedTables::new(file.protected_data.tables))
}

fn read_to_string(path: &Path) -> Result<String, CatalogError> {
    std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use overlay_report_catalog_models::SourceKind;

    use super::*;

    const CATALOG: &str = r#"
[[tab]]
name = "Land Use"

[[tab.layer]]
layer_name = "Parks and Protected Areas"
layer_group_heading = "Conservation"
feature_class_name = "WHSE_TANTALIS.TA_PARK_ECORES_PA_SVW"
layer_source = "BCGW"
attribute_id = "PROTECTED_LANDS_NAME, PROTECTED_LANDS_DESIGNATION"

[[tab.layer]]
layer_name = ""

[[tab.layer]]
layer_name = "Local Wells"
layer_source = "/data/wells.geojson"
display_query = "WELL_DEPTH > 10"

[[tab]]
name = "Empty Tab"
"#;

    #[test]
    fn parses_toml_tabs_and_skips_spacers() {
        let catalog = parse_toml_catalog(CATALOG).unwrap();

        assert_eq!(catalog.tabs.len(), 2);
        assert_eq!(catalog.len(), 2);
        assert!(catalog.has_remote());

        let parks = &catalog.tabs[0].datasets[0];
        assert_eq!(parks.group, "Land Use");
        assert_eq!(parks.source_kind, SourceKind::RemoteTable);
        assert_eq!(
            parks.table.as_deref(),
            Some("WHSE_TANTALIS.TA_PARK_ECORES_PA_SVW")
        );
        assert_eq!(parks.summary_fields.len(), 2);

        let wells = &catalog.tabs[0].datasets[1];
        assert_eq!(wells.filter.as_deref(), Some("WELL_DEPTH > 10"));
    }

    #[test]
    fn loads_csv_directory_in_file_order() {
        let dir = std::env::temp_dir().join(format!("overlay_catalog_csv_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("b_water.csv"),
            "Layer Name,Layer Group Heading,Feature Class Name,Layer Source,Display Query,Attribute ID\n\
             Streams,,WHSE_BASEMAPPING.FWA_STREAM_NETWORKS_SP,bcgw,,STREAM_ORDER\n\
             ,,,,,\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("a_land.csv"),
            "Layer Name,Layer Source\nZoning,/data/zoning.shp\n",
        )
        .unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let catalog = load_catalog(&dir).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        let names: Vec<&str> = catalog.tabs.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a_land", "b_water"]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.tabs[1].datasets[0].source_kind, SourceKind::RemoteTable);
        assert_eq!(
            catalog.tabs[0].datasets[0].location.as_deref(),
            Some("/data/zoning.shp")
        );
    }

    #[test]
    fn empty_catalog_is_an_error() {
        let path = std::env::temp_dir().join(format!("overlay_empty_{}.toml", std::process::id()));
        std::fs::write(&path, "[[tab]]\nname = \"Nothing\"\n").unwrap();

        let result = load_catalog(&path);
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(CatalogError::Empty { .. })));
    }

    #[test]
    fn unknown_catalog_format_is_rejected() {
        assert!(matches!(
            load_catalog(Path::new("/tmp/catalog.xlsx")),
            Err(CatalogError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn parses_protected_tables() {
        let protected = parse_protected_tables(
            "[protected_data]\ntables = [\"WHSE_FISH.SENSITIVE_SITES\", \"whse_wildlife.nests\"]\n",
        )
        .unwrap();

        assert_eq!(protected.len(), 2);
        assert!(protected.contains("WHSE_WILDLIFE.NESTS"));
        assert!(parse_protected_tables("").unwrap().is_empty());
    }
}
