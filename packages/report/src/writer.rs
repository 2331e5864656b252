//! Report rendering and file output.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use overlay_report_report_models::Report;

use crate::ReportError;

/// Turns a [`Report`] into document text.
pub trait ReportRenderer: Send + Sync {
    /// File extension of rendered documents, without the dot.
    fn extension(&self) -> &'static str;

    /// # Errors
    ///
    /// Returns [`ReportError`] if the report cannot be rendered.
    fn render(&self, report: &Report) -> Result<String, ReportError>;
}

/// Pretty-printed JSON.
pub struct JsonRenderer;

impl ReportRenderer for JsonRenderer {
    fn extension(&self) -> &'static str {
        "json"
    }

    fn render(&self, report: &Report) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(report)?)
    }
}

/// Default file name for a report generated at `now`:
/// `overlay_report_<DDMMYYYY-HH-MM-SS>.<ext>`.
#[must_use]
pub fn default_report_path(dir: &Path, now: DateTime<Utc>, renderer: &dyn ReportRenderer) -> PathBuf {
    dir.join(format!(
        "overlay_report_{}.{}",
        now.format("%d%m%Y-%H-%M-%S"),
        renderer.extension()
    ))
}

/// Renders `report` and writes it to `destination`, creating the parent
/// directory if needed.
///
/// # Errors
///
/// Returns [`ReportError`] if rendering fails or the file cannot be written.
pub fn write_report(
    report: &Report,
    destination: &Path,
    renderer: &dyn ReportRenderer,
) -> Result<PathBuf, ReportError> {
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|source| ReportError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let text = renderer.render(report)?;
    std::fs::write(destination, text).map_err(|source| ReportError::Io {
        path: destination.to_path_buf(),
        source,
    })?;

    log::info!("Wrote report to {}", destination.display());

    Ok(destination.to_path_buf())
}
