#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! The overlay pipeline.
//!
//! For every catalog dataset: resolve the source, clip it against each AOI
//! feature (repairing and retrying once on failure), aggregate the
//! fragments in the working CRS, and summarise the result. A dataset that
//! fails at any step becomes a failed entry in the report; it never stops
//! the run. Only configuration problems (a bad AOI or catalog, an
//! unwritable output) abort a run, via [`RunError`].

pub mod aggregator;
pub mod aoi;
pub mod clipper;
pub mod context;
pub mod driver;
pub mod failure;
pub mod run;

use std::path::PathBuf;

use overlay_report_catalog::CatalogError;
use overlay_report_geometry::{Crs, GeometryError};
use overlay_report_report::ReportError;
use overlay_report_source::ResolutionError;
use thiserror::Error;

pub use aoi::{AoiFeature, AreaOfInterest};
pub use context::{CancelFlag, CancellationSignal, RunContext};
pub use driver::OverlayPipelineDriver;
pub use failure::FailureReason;
pub use run::{RunConfig, RunSummary, run_report};

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum RunError {
    /// An AOI feature is not a polygon.
    #[error("AOI must be polygonal, found {geometry_type} in feature {index}")]
    NonPolygonalAoi {
        /// Position of the feature in the AOI layer.
        index: usize,
        /// Type of the offending geometry.
        geometry_type: String,
    },

    /// The AOI has no polygon features.
    #[error("AOI {} contains no polygons", path.display())]
    EmptyAoi {
        /// The AOI path.
        path: PathBuf,
    },

    /// The AOI could not be loaded.
    #[error("Failed to load AOI {}: {source}", path.display())]
    AoiLoad {
        /// The AOI path.
        path: PathBuf,
        /// Why loading failed.
        source: ResolutionError,
    },

    /// The working CRS is geographic or has no built-in definition.
    #[error("Working CRS {crs} must be a supported projected CRS")]
    UnsupportedWorkingCrs {
        /// The requested CRS.
        crs: Crs,
    },

    /// The catalog or protected-table list could not be loaded.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// The catalog references remote tables but no database URL was given.
    #[error("Catalog references remote tables but no database URL is configured")]
    RemoteNotConfigured,

    /// The report could not be built or written.
    #[error(transparent)]
    Report(#[from] ReportError),

    /// The AOI could not be transformed into the working CRS.
    #[error("AOI geometry error: {0}")]
    Geometry(#[from] GeometryError),
}
