//! One complete report run: load inputs, evaluate the catalog, write the
//! report.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use overlay_report_catalog::{load_catalog, load_protected_tables};
use overlay_report_catalog_models::ProtectedTables;
use overlay_report_geometry::{Crs, GeoEngine, GeometryEngine};
use overlay_report_report::aoi::summarize_aoi;
use overlay_report_report::writer::{default_report_path, write_report};
use overlay_report_report::{JsonRenderer, ReportError, ReportRenderer};
use overlay_report_report_models::FailedInterest;
use overlay_report_source::DataSourceResolver;
use overlay_report_source::progress::ProgressCallback;
use overlay_report_source::remote::{ConnectionManager, PostgisConnector};

use crate::RunError;
use crate::aoi::AreaOfInterest;
use crate::context::{CancellationSignal, RunContext};
use crate::driver::OverlayPipelineDriver;

/// Inputs of a run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub aoi_path: PathBuf,
    /// Layer inside a multi-layer AOI container.
    pub aoi_layer: Option<String>,
    pub catalog_path: PathBuf,
    /// A `.json` file, or a directory that receives a timestamped report.
    pub output: PathBuf,
    pub protected_path: Option<PathBuf>,
    /// `PostGIS` URL, required when the catalog references remote tables.
    pub database_url: Option<String>,
    pub concurrency: usize,
    pub working_crs: Crs,
}

impl RunConfig {
    #[must_use]
    pub fn new(
        aoi_path: impl Into<PathBuf>,
        catalog_path: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            aoi_path: aoi_path.into(),
            aoi_layer: None,
            catalog_path: catalog_path.into(),
            output: output.into(),
            protected_path: None,
            database_url: None,
            concurrency: 1,
            working_crs: Crs::default(),
        }
    }

    /// Where the report will be written, given the generation time.
    #[must_use]
    pub fn report_path(&self, renderer: &dyn ReportRenderer) -> PathBuf {
        let is_file = self
            .output
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(renderer.extension()));
        if is_file {
            self.output.clone()
        } else {
            default_report_path(&self.output, Utc::now(), renderer)
        }
    }
}

/// What a run wrote.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub report_path: PathBuf,
    pub interests: usize,
    pub failed: Vec<FailedInterest>,
    pub cancelled: bool,
}

/// Runs a full overlay report.
///
/// Per-dataset problems end up in the report's failed list; only the
/// conditions described by [`RunError`] abort the run.
///
/// # Errors
///
/// Returns [`RunError`] if the working CRS is not a supported projected
/// CRS, the catalog, protected list or AOI cannot be used, remote tables are referenced without a database URL, or the
/// report cannot be written.
pub async fn run_report(
    config: &RunConfig,
    progress: Arc<dyn ProgressCallback>,
    cancellation: Arc<dyn CancellationSignal>,
) -> Result<RunSummary, RunError> {
    let started = Instant::now();
    if config.working_crs.is_geographic() || config.working_crs.proj_definition().is_none() {
        return Err(RunError::UnsupportedWorkingCrs {
            crs: config.working_crs,
        });
    }

    let renderer = JsonRenderer;
    let destination = config.report_path(&renderer);
    ensure_parent_dir(&destination)?;

    let catalog = load_catalog(&config.catalog_path)?;
    let protected = match &config.protected_path {
        Some(path) => load_protected_tables(path)?,
        None => ProtectedTables::default(),
    };

    let connections = match (&config.database_url, catalog.has_remote()) {
        (Some(url), true) => Some(Arc::new(ConnectionManager::new(Box::new(
            PostgisConnector::new(url.clone()),
        )))),
        (None, true) => return Err(RunError::RemoteNotConfigured),
        (_, false) => None,
    };

    let resolver = DataSourceResolver::new(connections.clone(), config.working_crs);
    let engine: Arc<dyn GeometryEngine> = Arc::new(GeoEngine);

    let aoi_name = config
        .aoi_path
        .file_stem()
        .map_or_else(|| "AOI".to_string(), |s| s.to_string_lossy().to_string());
    let aoi_layer = resolver
        .load_vector(&config.aoi_path, config.aoi_layer.as_deref(), &aoi_name)
        .map_err(|source| RunError::AoiLoad {
            path: config.aoi_path.clone(),
            source,
        })?;
    let aoi = AreaOfInterest::from_layer(
        &aoi_layer,
        &config.aoi_path,
        config.working_crs,
        engine.as_ref(),
    )?;
    let aoi_summary = summarize_aoi(&aoi.name, &aoi.combined(), aoi.crs)?;
    log::info!(
        "AOI {}: {:.2} ha centred at {}",
        aoi_summary.name,
        aoi_summary.area_ha,
        aoi_summary.center_lat_long
    );

    let context = RunContext::new(config.working_crs)
        .with_progress(progress)
        .with_cancellation(cancellation)
        .with_protected(protected)
        .with_concurrency(config.concurrency);
    let driver = OverlayPipelineDriver::new(resolver, engine, context);

    let datasets: Vec<_> = catalog.datasets().cloned().collect();
    let outcome = driver.run(&aoi, &datasets).await;

    if let Some(connections) = &connections {
        connections.close().await;
    }

    let report = outcome.accumulator.finalize(aoi_summary, outcome.cancelled);
    let report_path = write_report(&report, &destination, &renderer)?;

    if !report.failed_lyrs.is_empty() {
        log::warn!("{} dataset(s) failed:", report.failed_lyrs.len());
        for failed in &report.failed_lyrs {
            log::warn!("  {} ({}): {}", failed.name, failed.group, failed.comment);
        }
    }
    log::info!(
        "Report finished in {:.1}s: {} interests, {} failed{}",
        started.elapsed().as_secs_f64(),
        report.interests.len(),
        report.failed_lyrs.len(),
        if outcome.cancelled { " (cancelled)" } else { "" }
    );

    Ok(RunSummary {
        report_path,
        interests: report.interests.len(),
        failed: report.failed_lyrs,
        cancelled: outcome.cancelled,
    })
}

fn ensure_parent_dir(destination: &Path) -> Result<(), ReportError> {
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|source| ReportError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use overlay_report_report_models::Report;
    use overlay_report_source::progress::null_progress;

    use super::*;
    use crate::context::CancelFlag;

    fn fixture_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("overlay_run_{tag}_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_albers(path: &Path, geometry: &str) {
        std::fs::write(
            path,
            format!(
                r#"{{"type":"FeatureCollection",
                "crs":{{"type":"name","properties":{{"name":"EPSG:3005"}}}},
                "features":[{{"type":"Feature","properties":{{"OWNER":"crown"}},"geometry":{geometry}}}]}}"#
            ),
        )
        .unwrap();
    }

    const SQUARE_1KM: &str =
        r#"{"type":"Polygon","coordinates":[[[1000000,0],[1001000,0],[1001000,1000],[1000000,1000],[1000000,0]]]}"#;

    const PARCEL: &str =
        r#"{"type":"Polygon","coordinates":[[[1000500,500],[1001500,500],[1001500,1500],[1000500,1500],[1000500,500]]]}"#;

    fn write_catalog(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("catalog.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    async fn run(config: &RunConfig) -> Result<RunSummary, RunError> {
        run_report(config, null_progress(), Arc::new(CancelFlag::new())).await
    }

    #[tokio::test]
    async fn writes_a_report_with_interests_and_failures() {
        let dir = fixture_dir("e2e");
        let aoi = dir.join("site.geojson");
        write_albers(&aoi, SQUARE_1KM);
        let parcels = dir.join("parcels.geojson");
        write_albers(&parcels, PARCEL);
        let catalog = write_catalog(
            &dir,
            &format!(
                r#"
[[tab]]
name = "Land"

[[tab.layer]]
layer_name = "Parcels"
layer_source = "{}"
attribute_id = "OWNER"

[[tab.layer]]
layer_name = "Leases"
layer_source = "{}"
"#,
                parcels.display(),
                dir.join("leases.geojson").display()
            ),
        );

        let config = RunConfig::new(&aoi, &catalog, dir.join("out"));
        let summary = run(&config).await.unwrap();

        let text = std::fs::read_to_string(&summary.report_path).unwrap();
        std::fs::remove_dir_all(&dir).ok();
        let report: Report = serde_json::from_str(&text).unwrap();

        assert!(!summary.cancelled);
        assert_eq!(summary.interests, 1);
        assert_eq!(report.aoi.name, "site");
        assert!((report.aoi.area_ha - 100.0).abs() < 1e-6);

        let parcels = &report.interests[0];
        assert_eq!(parcels.name, "Parcels");
        assert!((parcels.value.unwrap() - 25.0).abs() < 1e-6);
        assert!(parcels.summary.iter().any(|entry| entry.key == "crown"));

        assert_eq!(report.failed_lyrs.len(), 1);
        assert_eq!(report.failed_lyrs[0].name, "Leases");
        assert_eq!(report.failed_lyrs[0].comment, "Not a valid file path");
    }

    #[tokio::test]
    async fn remote_rows_need_a_database_url() {
        let dir = fixture_dir("remote");
        let aoi = dir.join("site.geojson");
        write_albers(&aoi, SQUARE_1KM);
        let catalog = write_catalog(
            &dir,
            r#"
[[tab]]
name = "Wildlife"

[[tab.layer]]
layer_name = "Habitat"
layer_source = "REMOTE"
feature_class_name = "WHSE_WILDLIFE.HABITAT"
"#,
        );

        let result = run(&RunConfig::new(&aoi, &catalog, dir.join("out"))).await;
        std::fs::remove_dir_all(&dir).ok();

        assert!(matches!(result, Err(RunError::RemoteNotConfigured)));
    }

    #[tokio::test]
    async fn line_aois_abort_the_run() {
        let dir = fixture_dir("line_aoi");
        let aoi = dir.join("road.geojson");
        write_albers(
            &aoi,
            r#"{"type":"LineString","coordinates":[[1000000,0],[1001000,0]]}"#,
        );
        let parcels = dir.join("parcels.geojson");
        write_albers(&parcels, PARCEL);
        let catalog = write_catalog(
            &dir,
            &format!(
                "[[tab]]\nname = \"Land\"\n\n[[tab.layer]]\nlayer_name = \"Parcels\"\nlayer_source = \"{}\"\n",
                parcels.display()
            ),
        );

        let result = run(&RunConfig::new(&aoi, &catalog, dir.join("out"))).await;
        std::fs::remove_dir_all(&dir).ok();

        assert!(matches!(result, Err(RunError::NonPolygonalAoi { index: 0, .. })));
    }

    #[tokio::test]
    async fn geographic_working_crs_is_rejected() {
        let mut config = RunConfig::new("aoi.geojson", "catalog.toml", "out");
        config.working_crs = Crs::WGS84;

        let result = run(&config).await;
        assert!(matches!(result, Err(RunError::UnsupportedWorkingCrs { .. })));
    }

    #[test]
    fn json_outputs_are_used_as_is() {
        let config = RunConfig::new("aoi.geojson", "catalog.toml", "/reports/site.json");
        assert_eq!(config.report_path(&JsonRenderer), PathBuf::from("/reports/site.json"));

        let config = RunConfig::new("aoi.geojson", "catalog.toml", "/reports");
        let path = config.report_path(&JsonRenderer);
        assert_eq!(path.parent(), Some(Path::new("/reports")));
        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("overlay_report_")
        );
    }
}
