#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for overlay reports.
//!
//! `overlay_report run` evaluates a catalog against an AOI and writes the
//! JSON report; `overlay_report check-catalog` lists what a catalog
//! contains. Without a subcommand the tool prompts for everything.
//!
//! Uses `indicatif-log-bridge` (via [`overlay_report_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and the progress bar never fight for the terminal.

mod interactive;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use overlay_report_cli_utils::MultiProgress;
use overlay_report_geometry::Crs;
use overlay_report_overlay::{CancelFlag, RunConfig, RunSummary, run_report};

#[derive(Parser)]
#[command(name = "overlay_report", about = "Area-of-interest overlay reporting")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every catalog dataset against an AOI and write the report
    Run {
        /// AOI polygon file (`GeoJSON`, shapefile, `GeoPackage`, ...)
        #[arg(long)]
        aoi: PathBuf,
        /// Layer to read from a multi-layer AOI container
        #[arg(long)]
        aoi_layer: Option<String>,
        /// Catalog TOML file, CSV file, or directory of CSV tabs
        #[arg(long, env = "OVERLAY_CATALOG")]
        catalog: PathBuf,
        /// Report file (`.json`) or directory for a timestamped report
        #[arg(long, env = "OVERLAY_OUTPUT_DIR", default_value = ".")]
        output: PathBuf,
        /// TOML list of protected remote tables
        #[arg(long, env = "OVERLAY_PROTECTED")]
        protected: Option<PathBuf>,
        /// `PostGIS` connection URL for remote catalog rows
        #[arg(long, env = "OVERLAY_DATABASE_URL", hide_env_values = true)]
        database_url: Option<String>,
        /// Number of datasets evaluated at once
        #[arg(long, default_value = "1")]
        concurrency: usize,
        /// EPSG code of the projected working CRS
        #[arg(long, default_value = "3005")]
        working_epsg: u32,
    },
    /// Parse a catalog and list its tabs and datasets
    CheckCatalog {
        /// Catalog TOML file, CSV file, or directory of CSV tabs
        #[arg(long, env = "OVERLAY_CATALOG")]
        catalog: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = overlay_report_cli_utils::init_logger();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        return interactive::run(&multi).await;
    };

    match command {
        Commands::Run {
            aoi,
            aoi_layer,
            catalog,
            output,
            protected,
            database_url,
            concurrency,
            working_epsg,
        } => {
            let config = RunConfig {
                aoi_path: aoi,
                aoi_layer,
                catalog_path: catalog,
                output,
                protected_path: protected,
                database_url,
                concurrency,
                working_crs: Crs::from_epsg(working_epsg),
            };
            execute(&multi, &config).await?;
        }
        Commands::CheckCatalog { catalog } => check_catalog(&catalog)?,
    }

    Ok(())
}

/// Runs a report with a progress bar, cancelling cleanly on Ctrl-C.
///
/// # Errors
///
/// Returns an error if the run aborts.
pub async fn execute(
    multi: &MultiProgress,
    config: &RunConfig,
) -> Result<RunSummary, Box<dyn std::error::Error>> {
    let progress = overlay_report_cli_utils::run_progress(multi, "Loading catalog and AOI...");

    let flag = CancelFlag::new();
    let watcher = {
        let flag = flag.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Cancelling: finishing in-flight datasets, then writing a partial report");
                flag.cancel();
            }
        })
    };

    let result = run_report(config, progress, Arc::new(flag)).await;
    watcher.abort();
    let summary = result?;

    println!();
    println!("Report: {}", summary.report_path.display());
    println!(
        "{} interests, {} failed{}",
        summary.interests,
        summary.failed.len(),
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    if !summary.failed.is_empty() {
        println!();
        println!("{:<40} COMMENT", "FAILED DATASET");
        println!("{}", "-".repeat(80));
        for failed in &summary.failed {
            println!("{:<40} {}", failed.name, failed.comment);
        }
    }

    Ok(summary)
}

/// Prints the datasets in a catalog.
///
/// # Errors
///
/// Returns an error if the catalog cannot be loaded.
pub fn check_catalog(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = overlay_report_catalog::load_catalog(path)?;

    for tab in &catalog.tabs {
        println!("{} ({} datasets)", tab.name, tab.datasets.len());
        for dataset in &tab.datasets {
            let source = if dataset.is_remote() {
                format!("remote {}", dataset.table.as_deref().unwrap_or("<no table>"))
            } else {
                dataset.location.clone().unwrap_or_default()
            };
            println!("  {:<40} {source}", dataset.title);
            if let Some(filter) = &dataset.filter {
                println!("  {:<40} where {filter}", "");
            }
        }
    }

    println!();
    println!(
        "{} datasets in {} tabs{}",
        catalog.len(),
        catalog.tabs.len(),
        if catalog.has_remote() {
            " (remote database required)"
        } else {
            ""
        }
    );

    Ok(())
}
