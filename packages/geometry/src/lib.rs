#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Vector layer model and geometry operations for overlay reporting.
//!
//! Layers are held fully in memory as `geo` geometries with typed
//! attributes. The [`engine::GeometryEngine`] trait is the single seam
//! through which the overlay pipeline clips, repairs, reprojects and merges
//! layers; [`engine::GeoEngine`] is the pure-Rust implementation.

pub mod crs;
pub mod engine;
pub mod filter;
pub mod geojson_io;
pub mod kind;
pub mod layer;
pub mod measure;

pub use crs::Crs;
pub use engine::{GeoEngine, GeometryEngine};
pub use filter::{FilterError, FilterExpression};
pub use kind::{GeometryFamily, GeometryKind};
pub use layer::{AttributeValue, Feature, Field, FieldType, Layer};

use thiserror::Error;

/// Errors from geometry, CRS and `GeoJSON` operations.
#[derive(Debug, Error)]
pub enum GeometryError {
    /// The CRS has no built-in projection definition.
    #[error("Unsupported CRS: {crs}")]
    UnsupportedCrs {
        /// The CRS that was requested.
        crs: Crs,
    },

    /// A CRS string could not be interpreted.
    #[error("Unrecognized CRS: {text}")]
    UnrecognizedCrs {
        /// The text that failed to parse.
        text: String,
    },

    /// Coordinate transformation failed.
    #[error("Reprojection from {from} to {to} failed: {message}")]
    Reprojection {
        /// Source CRS.
        from: Crs,
        /// Target CRS.
        to: Crs,
        /// Description of what went wrong.
        message: String,
    },

    /// A feature's geometry is not valid input for an overlay operation.
    #[error("Invalid geometry in feature {index}: {message}")]
    InvalidGeometry {
        /// Index of the feature within its layer.
        index: usize,
        /// Description of the problem.
        message: String,
    },

    /// The geometry type cannot take part in the operation.
    #[error("Unsupported geometry type: {geometry_type}")]
    UnsupportedGeometry {
        /// Display name of the geometry type.
        geometry_type: String,
    },

    /// Layers to merge are in different CRSs.
    #[error("Cannot merge layers in {found} into {expected}")]
    CrsMismatch {
        /// CRS of the first layer.
        expected: Crs,
        /// CRS of the offending layer.
        found: Crs,
    },

    /// Merge was called with no layers.
    #[error("Nothing to merge")]
    EmptyMerge,

    /// `GeoJSON` parse or conversion error.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// JSON attribute payload error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
