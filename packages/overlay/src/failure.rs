//! Why a dataset failed, and the comment shown for it in the report.

use std::fmt;

use overlay_report_report::SummaryError;
use overlay_report_source::{RemoteError, ResolutionError, SourceError};

/// A per-dataset failure. Never aborts the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The location does not exist.
    PathNotFound,
    /// No loader handles the location.
    NoLoader,
    /// The source loaded but is unusable (bad filter, malformed data,
    /// missing container layer).
    InvalidInput { detail: String },
    /// The container format needs a driver that is not available.
    NoDriver { format: String },
    /// The remote table is missing or not readable by us.
    TableInaccessible { protected: bool },
    /// The remote table has no spatial rows.
    NoSpatialData,
    /// The remote database could not be reached.
    Connection { detail: String },
    /// Clipping failed before and after geometry repair.
    GeometryRepairExhausted { detail: String },
    /// A fragment could not be brought into the working CRS.
    Reprojection { detail: String },
    /// Fragments could not be merged.
    MergeFailure { detail: String },
    /// The data contradicts the catalog or the data model.
    SchemaViolation { detail: String },
}

impl FailureReason {
    /// The comment stored on the failed report entry.
    #[must_use]
    pub fn comment(&self) -> String {
        match self {
            Self::PathNotFound => "Not a valid file path".to_string(),
            Self::NoLoader => "Not a valid file path or input type".to_string(),
            Self::InvalidInput { .. } => "Not a valid input".to_string(),
            Self::NoDriver { format } => format!("No driver available for {format}"),
            Self::TableInaccessible { protected: false } => {
                "Could not access remote table - invalid schema/table or insufficient access"
                    .to_string()
            }
            Self::TableInaccessible { protected: true } => {
                "🔒 Could not access remote table (protected table, likely insufficient access)"
                    .to_string()
            }
            Self::NoSpatialData => "No data in table: remote".to_string(),
            Self::Connection { detail } => format!("Could not connect to remote database: {detail}"),
            Self::GeometryRepairExhausted { .. } => "data/geometry issue".to_string(),
            Self::Reprojection { .. } => {
                "Could not reproject result to working CRS (try reprojecting input)".to_string()
            }
            Self::MergeFailure { .. } => "could not merge".to_string(),
            Self::SchemaViolation { detail } => format!("Schema violation: {detail}"),
        }
    }

    #[must_use]
    pub fn from_resolution(error: &ResolutionError) -> Self {
        match error {
            ResolutionError::PathNotFound { .. } => Self::PathNotFound,
            ResolutionError::NoLoader { .. } => Self::NoLoader,
            ResolutionError::InvalidHandle { message } => Self::InvalidInput {
                detail: message.clone(),
            },
            ResolutionError::NoDriver { format, .. } => Self::NoDriver {
                format: format.clone(),
            },
            ResolutionError::RemoteNotConfigured => Self::Connection {
                detail: error.to_string(),
            },
        }
    }

    #[must_use]
    pub fn from_source(error: &SourceError, protected: bool) -> Self {
        match error {
            SourceError::Remote(RemoteError::Connection { message }) => Self::Connection {
                detail: message.clone(),
            },
            SourceError::Remote(RemoteError::Query { .. }) => {
                Self::TableInaccessible { protected }
            }
            SourceError::Remote(RemoteError::NoGeometryColumn { .. }) => Self::NoSpatialData,
            SourceError::Remote(RemoteError::InvalidTableName { .. })
            | SourceError::Filter(_)
            | SourceError::Geometry(_) => Self::InvalidInput {
                detail: error.to_string(),
            },
            SourceError::UnexpectedGeometryType { .. } => Self::SchemaViolation {
                detail: error.to_string(),
            },
        }
    }

    #[must_use]
    pub fn from_summary(error: &SummaryError) -> Self {
        match error {
            SummaryError::MissingField { .. } | SummaryError::UnexpectedGeometry { .. } => {
                Self::SchemaViolation {
                    detail: error.to_string(),
                }
            }
            SummaryError::Export(e) => Self::Reprojection {
                detail: e.to_string(),
            },
        }
    }

    /// Whether the remaining AOI features of the dataset are still worth
    /// clipping after this failure.
    #[must_use]
    pub const fn continues_dataset(&self) -> bool {
        matches!(self, Self::GeometryRepairExhausted { .. })
    }
}

/// Comment plus detail, for logs.
impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput { detail }
            | Self::GeometryRepairExhausted { detail }
            | Self::Reprojection { detail }
            | Self::MergeFailure { detail } => write!(f, "{} ({detail})", self.comment()),
            _ => write!(f, "{}", self.comment()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn resolution_errors_map_to_path_comments() {
        let missing = ResolutionError::PathNotFound {
            path: PathBuf::from("/x"),
        };
        assert_eq!(
            FailureReason::from_resolution(&missing).comment(),
            "Not a valid file path"
        );

        let unknown = ResolutionError::NoLoader {
            path: PathBuf::from("/x.xyz"),
        };
        assert_eq!(
            FailureReason::from_resolution(&unknown).comment(),
            "Not a valid file path or input type"
        );

        let no_driver = ResolutionError::NoDriver {
            format: "GeoPackage".to_string(),
            message: "extension missing".to_string(),
        };
        assert_eq!(
            FailureReason::from_resolution(&no_driver).comment(),
            "No driver available for GeoPackage"
        );
    }

    #[test]
    fn protected_tables_get_a_distinct_comment() {
        let error = SourceError::Remote(RemoteError::Query {
            message: "permission denied".to_string(),
        });
        assert!(
            FailureReason::from_source(&error, true)
                .comment()
                .starts_with("🔒")
        );
        assert!(
            FailureReason::from_source(&error, false)
                .comment()
                .starts_with("Could not access remote table")
        );
    }

    #[test]
    fn connection_failures_carry_the_driver_message() {
        let error = SourceError::Remote(RemoteError::Connection {
            message: "connection refused".to_string(),
        });
        assert_eq!(
            FailureReason::from_source(&error, false).comment(),
            "Could not connect to remote database: connection refused"
        );
    }

    #[test]
    fn schema_violations_are_prefixed() {
        let error = SummaryError::MissingField {
            field: "OWNER".to_string(),
            layer: "Parks".to_string(),
        };
        let comment = FailureReason::from_summary(&error).comment();
        assert!(comment.starts_with("Schema violation: "));
        assert!(comment.contains("OWNER"));
    }

    #[test]
    fn only_geometry_failures_continue_the_dataset() {
        assert!(
            FailureReason::GeometryRepairExhausted {
                detail: String::new()
            }
            .continues_dataset()
        );
        assert!(
            !FailureReason::Connection {
                detail: String::new()
            }
            .continues_dataset()
        );
    }
}
