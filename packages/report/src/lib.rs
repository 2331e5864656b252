#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Turns aggregated layers into report entries and writes the finished
//! report.

pub mod accumulator;
pub mod aoi;
pub mod summarizer;
pub mod writer;

use std::path::PathBuf;

use overlay_report_geometry::GeometryError;
use thiserror::Error;

pub use accumulator::ReportAccumulator;
pub use summarizer::{InterestSummarizer, SummaryError, SummaryRequest};
pub use writer::{JsonRenderer, ReportRenderer};

/// Errors building or writing a report.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The destination could not be created or written.
    #[error("Failed to write {}: {source}", path.display())]
    Io {
        /// File or directory being written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Serialisation error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// AOI geometry could not be summarised.
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}
