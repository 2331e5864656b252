//! Geometry type classification.

use std::fmt;

use geo::Geometry;
use serde::{Deserialize, Serialize};

/// The dimension family a geometry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryFamily {
    Point,
    Line,
    Polygon,
}

impl GeometryFamily {
    /// Classifies a geometry. Collections have no single family.
    #[must_use]
    pub const fn of(geometry: &Geometry<f64>) -> Option<Self> {
        match geometry {
            Geometry::Point(_) | Geometry::MultiPoint(_) => Some(Self::Point),
            Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
                Some(Self::Line)
            }
            Geometry::Polygon(_)
            | Geometry::MultiPolygon(_)
            | Geometry::Rect(_)
            | Geometry::Triangle(_) => Some(Self::Polygon),
            Geometry::GeometryCollection(_) => None,
        }
    }
}

/// Display name for a geometry's concrete type.
#[must_use]
pub const fn geometry_type_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::Line(_) | Geometry::LineString(_) => "LineString",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => "Polygon",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
    }
}

/// A source's declared geometry type, ordered by its WKB type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GeometryKind {
    Point = 1,
    LineString = 2,
    Polygon = 3,
    MultiPoint = 4,
    MultiLineString = 5,
    MultiPolygon = 6,
}

impl GeometryKind {
    /// Maps a WKB type code (2D) to a kind.
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Point),
            2 => Some(Self::LineString),
            3 => Some(Self::Polygon),
            4 => Some(Self::MultiPoint),
            5 => Some(Self::MultiLineString),
            6 => Some(Self::MultiPolygon),
            _ => None,
        }
    }

    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Maps a database type name (`MULTIPOLYGON`, `POINTM`, `LineStringZ`,
    /// ...) to a kind. Dimension suffixes are ignored.
    #[must_use]
    pub fn from_type_name(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        let base = ["ZM", "Z", "M"]
            .iter()
            .find_map(|suffix| {
                upper
                    .strip_suffix(suffix)
                    .filter(|rest| Self::from_base_name(rest).is_some())
            })
            .unwrap_or(upper.as_str());

        Self::from_base_name(base)
    }

    fn from_base_name(name: &str) -> Option<Self> {
        match name {
            "POINT" => Some(Self::Point),
            "LINESTRING" => Some(Self::LineString),
            "POLYGON" => Some(Self::Polygon),
            "MULTIPOINT" => Some(Self::MultiPoint),
            "MULTILINESTRING" => Some(Self::MultiLineString),
            "MULTIPOLYGON" => Some(Self::MultiPolygon),
            _ => None,
        }
    }

    /// Kind of an in-memory geometry.
    #[must_use]
    pub const fn of(geometry: &Geometry<f64>) -> Option<Self> {
        match geometry {
            Geometry::Point(_) => Some(Self::Point),
            Geometry::Line(_) | Geometry::LineString(_) => Some(Self::LineString),
            Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => {
                Some(Self::Polygon)
            }
            Geometry::MultiPoint(_) => Some(Self::MultiPoint),
            Geometry::MultiLineString(_) => Some(Self::MultiLineString),
            Geometry::MultiPolygon(_) => Some(Self::MultiPolygon),
            Geometry::GeometryCollection(_) => None,
        }
    }

    #[must_use]
    pub const fn family(self) -> GeometryFamily {
        match self {
            Self::Point | Self::MultiPoint => GeometryFamily::Point,
            Self::LineString | Self::MultiLineString => GeometryFamily::Line,
            Self::Polygon | Self::MultiPolygon => GeometryFamily::Polygon,
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Point => "Point",
            Self::LineString => "LineString",
            Self::Polygon => "Polygon",
            Self::MultiPoint => "MultiPoint",
            Self::MultiLineString => "MultiLineString",
            Self::MultiPolygon => "MultiPolygon",
        };
        f.write_str(name)
    }
}
