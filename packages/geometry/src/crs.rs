//! Coordinate reference systems and coordinate transformation.
//!
//! A [`Crs`] is identified by its EPSG code. Only codes with a built-in
//! proj definition can take part in reprojection; everything else is
//! carried through as metadata and rejected with
//! [`GeometryError::UnsupportedCrs`] the moment a transform is requested.

use std::fmt;
use std::str::FromStr;

use geo::Coord;
use proj4rs::proj::Proj;
use serde::{Deserialize, Serialize};

use crate::GeometryError;

/// A coordinate reference system identified by EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Crs {
    epsg: u32,
}

impl Crs {
    /// WGS 84 geographic coordinates.
    pub const WGS84: Self = Self::from_epsg(4326);

    /// NAD83 / BC Albers, the equal-area default working CRS.
    pub const BC_ALBERS: Self = Self::from_epsg(3005);

    #[must_use]
    pub const fn from_epsg(epsg: u32) -> Self {
        Self { epsg }
    }

    #[must_use]
    pub const fn epsg(self) -> u32 {
        self.epsg
    }

    /// Whether coordinates in this CRS are longitude/latitude degrees.
    #[must_use]
    pub const fn is_geographic(self) -> bool {
        matches!(self.epsg, 4326 | 4269)
    }

    /// The proj string for this CRS, if it is one of the built-in codes.
    #[must_use]
    pub fn proj_definition(self) -> Option<String> {
        let definition = match self.epsg {
            4326 => "+proj=longlat +datum=WGS84 +no_defs".to_string(),
            4269 => "+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs".to_string(),
            3005 => "+proj=aea +lat_0=45 +lon_0=-126 +lat_1=50 +lat_2=58.5 +x_0=1000000 +y_0=0 \
                     +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs"
                .to_string(),
            zone_code @ 26907..=26911 => format!(
                "+proj=utm +zone={} +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
                zone_code - 26900
            ),
            zone_code @ 32607..=32611 => format!(
                "+proj=utm +zone={} +datum=WGS84 +units=m +no_defs",
                zone_code - 32600
            ),
            _ => return None,
        };
        Some(definition)
    }

    /// Parses an authority string such as `EPSG:3005`,
    /// `urn:ogc:def:crs:EPSG::3005`, `urn:ogc:def:crs:OGC:1.3:CRS84` or a
    /// bare code.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.to_ascii_uppercase().ends_with("CRS84") {
            return Some(Self::WGS84);
        }

        let digits: String = trimmed
            .chars()
            .rev()
            .take_while(char::is_ascii_digit)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        if digits.is_empty() {
            return None;
        }

        let prefix = &trimmed[..trimmed.len() - digits.len()];
        let prefix_ok = prefix.is_empty()
            || prefix.to_ascii_uppercase().contains("EPSG")
            || prefix.ends_with(':');

        if !prefix_ok {
            return None;
        }

        digits.parse().ok().map(Self::from_epsg)
    }
}

impl Default for Crs {
    fn default() -> Self {
        Self::BC_ALBERS
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

impl FromStr for Crs {
    type Err = GeometryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| GeometryError::UnrecognizedCrs {
            text: s.to_string(),
        })
    }
}

/// Transforms coordinates between two built-in CRSs.
pub struct Transformer {
    from: Crs,
    to: Crs,
    source: Proj,
    target: Proj,
}

impl Transformer {
    /// Builds a transformer from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::UnsupportedCrs`] if either CRS has no
    /// built-in definition, or [`GeometryError::Reprojection`] if the proj
    /// definition cannot be parsed.
    pub fn new(from: Crs, to: Crs) -> Result<Self, GeometryError> {
        Ok(Self {
            from,
            to,
            source: build_proj(from, to)?,
            target: build_proj(to, from)?,
        })
    }

    /// Transforms a single coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::Reprojection`] if the transform fails or
    /// produces a non-finite coordinate.
    pub fn transform(&self, coord: Coord<f64>) -> Result<Coord<f64>, GeometryError> {
        if self.from == self.to {
            return Ok(coord);
        }

        let mut point = if self.from.is_geographic() {
            (coord.x.to_radians(), coord.y.to_radians(), 0.0)
        } else {
            (coord.x, coord.y, 0.0)
        };

        proj4rs::transform::transform(&self.source, &self.target, &mut point).map_err(|e| {
            GeometryError::Reprojection {
                from: self.from,
                to: self.to,
                message: e.to_string(),
            }
        })?;

        let (x, y) = if self.to.is_geographic() {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };

        if !x.is_finite() || !y.is_finite() {
            return Err(GeometryError::Reprojection {
                from: self.from,
                to: self.to,
                message: format!("non-finite result for ({}, {})", coord.x, coord.y),
            });
        }

        Ok(Coord { x, y })
    }
}

fn build_proj(crs: Crs, other: Crs) -> Result<Proj, GeometryError> {
    let definition = crs
        .proj_definition()
        .ok_or(GeometryError::UnsupportedCrs { crs })?;

    Proj::from_proj_string(&definition).map_err(|e| GeometryError::Reprojection {
        from: crs,
        to: other,
        message: e.to_string(),
    })
}
