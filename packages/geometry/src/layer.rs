//! In-memory vector layers.
//!
//! A [`Layer`] is a named collection of [`Feature`]s that share a CRS and a
//! field schema. Everything the overlay pipeline produces (candidates,
//! clipped fragments, merged results) is a layer.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use geo::{BoundingRect, Geometry, Rect};
use serde::{Deserialize, Serialize};

use crate::crs::Crs;

/// The storage type of a layer field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Integer,
    Real,
    Boolean,
    Date,
    DateTime,
}

/// A named, typed attribute column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
}

impl Field {
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// A single attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

impl AttributeValue {
    /// Converts a JSON value as returned by a source into an attribute.
    ///
    /// Strings that look like ISO dates or timestamps become
    /// [`AttributeValue::Date`] / [`AttributeValue::DateTime`], since both
    /// the remote database and the OGR reader serialise temporal columns as
    /// text.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Boolean(*b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Real))
                .unwrap_or(Self::Null),
            serde_json::Value::String(s) => Self::from_text(s),
            other => Self::Text(other.to_string()),
        }
    }

    fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.len() >= 10 && trimmed.as_bytes().get(4) == Some(&b'-') {
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
                return Self::DateTime(dt.naive_local());
            }
            for format in DATETIME_FORMATS {
                if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
                    return Self::DateTime(dt);
                }
            }
            if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                return Self::Date(date);
            }
        }
        Self::Text(text.to_string())
    }

    /// The JSON representation used in exported `GeoJSON` properties.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::Real(f) => serde_json::Value::from(*f),
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::Date(_) | Self::DateTime(_) => serde_json::Value::String(self.to_string()),
        }
    }

    /// The field type a value of this kind would be stored under.
    #[must_use]
    pub const fn field_type(&self) -> Option<FieldType> {
        match self {
            Self::Null => None,
            Self::Text(_) => Some(FieldType::Text),
            Self::Integer(_) => Some(FieldType::Integer),
            Self::Real(_) => Some(FieldType::Real),
            Self::Boolean(_) => Some(FieldType::Boolean),
            Self::Date(_) => Some(FieldType::Date),
            Self::DateTime(_) => Some(FieldType::DateTime),
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of the value, if it has one.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Real(f) => Some(*f),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Dates and timestamps render as ISO dates (`YYYY-MM-DD`).
impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::DateTime(dt) => write!(f, "{}", dt.date().format("%Y-%m-%d")),
        }
    }
}

/// A geometry plus its attributes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Feature {
    pub geometry: Option<Geometry<f64>>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Feature {
    #[must_use]
    pub fn new(geometry: Option<Geometry<f64>>) -> Self {
        Self {
            geometry,
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Looks up an attribute by name, falling back to a case-insensitive
    /// match.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name).or_else(|| {
            self.attributes
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
    }
}

/// A named feature collection in a single CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub name: String,
    pub crs: Crs,
    pub fields: Vec<Field>,
    pub features: Vec<Feature>,
}

impl Layer {
    #[must_use]
    pub fn new(name: impl Into<String>, crs: Crs) -> Self {
        Self {
            name: name.into(),
            crs,
            fields: Vec::new(),
            features: Vec::new(),
        }
    }

    /// Builds a layer from features, inferring the field schema from the
    /// first non-null value of each attribute.
    #[must_use]
    pub fn from_features(name: impl Into<String>, crs: Crs, features: Vec<Feature>) -> Self {
        let mut layer = Self::new(name, crs);
        // Fields seen only as nulls so far, typed as text until a value shows up.
        let mut untyped: Vec<String> = Vec::new();

        for feature in &features {
            for (key, value) in &feature.attributes {
                let position = layer.fields.iter().position(|f| f.name == *key);
                match (position, value.field_type()) {
                    (None, Some(field_type)) => layer.fields.push(Field::new(key, field_type)),
                    (None, None) => {
                        layer.fields.push(Field::new(key, FieldType::Text));
                        untyped.push(key.clone());
                    }
                    (Some(index), Some(field_type)) if untyped.contains(key) => {
                        layer.fields[index].field_type = field_type;
                        untyped.retain(|k| k != key);
                    }
                    _ => {}
                }
            }
        }

        layer.features = features;
        layer
    }

    #[must_use]
    pub const fn feature_count(&self) -> usize {
        self.features.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Case-insensitive field lookup.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name)))
    }

    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Removes a field from the schema and from every feature.
    ///
    /// Returns `true` if the field was present.
    pub fn remove_field(&mut self, name: &str) -> bool {
        let before = self.fields.len();
        self.fields.retain(|f| f.name != name);
        for feature in &mut self.features {
            feature.attributes.remove(name);
        }
        before != self.fields.len()
    }

    /// Appends another layer's fields (if new) and features.
    pub fn extend_from(&mut self, other: &Self) {
        for field in &other.fields {
            if !self.fields.iter().any(|f| f.name == field.name) {
                self.fields.push(field.clone());
            }
        }
        self.features.extend(other.features.iter().cloned());
    }

    /// Bounding rectangle over every feature geometry.
    #[must_use]
    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.features
            .iter()
            .filter_map(|f| f.geometry.as_ref())
            .filter_map(BoundingRect::bounding_rect)
            .reduce(|a, b| {
                Rect::new(
                    geo::Coord {
                        x: a.min().x.min(b.min().x),
                        y: a.min().y.min(b.min().y),
                    },
                    geo::Coord {
                        x: a.max().x.max(b.max().x),
                        y: a.max().y.max(b.max().y),
                    },
                )
            })
    }

    /// Returns a copy of this layer holding only the given features.
    #[must_use]
    pub fn with_features(&self, features: Vec<Feature>) -> Self {
        Self {
            name: self.name.clone(),
            crs: self.crs,
            fields: self.fields.clone(),
            features,
        }
    }
}
