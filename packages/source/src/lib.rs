#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Data source resolution for overlay runs.
//!
//! [`resolver::DataSourceResolver`] turns a catalog row into a
//! [`resolver::SourceHandle`]: either a file layer loaded through the
//! [`loaders`] registry or a table in the remote `PostGIS` database. Both
//! are consumed through the [`adapter::SpatialSourceAdapter`] trait, so the
//! clipping pipeline never branches on where features come from.

pub mod adapter;
pub mod file;
pub mod loaders;
pub mod progress;
pub mod remote;
pub mod resolver;

use std::path::PathBuf;

use overlay_report_geometry::{FilterError, GeometryError};
use thiserror::Error;

pub use adapter::SpatialSourceAdapter;
pub use resolver::{DataSourceResolver, SourceHandle};

/// Why a dataset could not be turned into a usable source.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// The location does not exist on disk.
    #[error("Path does not exist: {}", path.display())]
    PathNotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// No loader accepts the location's extension or layout.
    #[error("No loader for {}", path.display())]
    NoLoader {
        /// The unrecognized path.
        path: PathBuf,
    },

    /// A loader produced something unusable.
    #[error("Invalid source: {message}")]
    InvalidHandle {
        /// Description of the problem.
        message: String,
    },

    /// The container format needs a driver that is not available.
    #[error("No driver available for {format}: {message}")]
    NoDriver {
        /// Human-readable format name.
        format: String,
        /// Why the driver could not be used.
        message: String,
    },

    /// A remote dataset was requested but no remote database is configured.
    #[error("Remote database is not configured")]
    RemoteNotConfigured,
}

/// Errors talking to the remote spatial database.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The connection could not be opened or was lost.
    #[error("Could not connect to remote database: {message}")]
    Connection {
        /// Driver error text.
        message: String,
    },

    /// A query failed for a reason other than the connection.
    #[error("Remote query failed: {message}")]
    Query {
        /// Driver error text.
        message: String,
    },

    /// A catalog table identifier is not `schema.table`.
    #[error("Invalid remote table name '{name}' (expected schema.table)")]
    InvalidTableName {
        /// The identifier as written in the catalog.
        name: String,
    },

    /// The table has no registered geometry column.
    #[error("Remote table {table} has no geometry column")]
    NoGeometryColumn {
        /// `schema.table`.
        table: String,
    },
}

impl RemoteError {
    /// Whether the error means the connection itself is unusable.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Errors from a [`SpatialSourceAdapter`] operation.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Remote database error.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The subset filter could not be parsed or bound.
    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    /// Geometry decoding or transformation error.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// The source declares a geometry type the pipeline cannot handle.
    #[error("Unexpected geometry type {geometry_type} in {source_name}")]
    UnexpectedGeometryType {
        /// Dataset or table name.
        source_name: String,
        /// The type as reported by the source.
        geometry_type: String,
    },
}
