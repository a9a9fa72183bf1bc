//! Record values and per-encoding null sentinels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single record value, independent of the column's physical width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// No value: the slot holds the encoding's null sentinel.
    #[default]
    Null,
    /// Integer value for byte/short/int/long columns.
    Int(i64),
    /// Floating point value for float/double columns.
    Float(f64),
    /// UTF-8 text for alphanumeric columns.
    Text(String),
}

impl Value {
    /// Returns true for `Value::Null`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer payload, if any.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float payload, if any.
    #[must_use]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Text payload, if any.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Short name of the operand type, used in type-mismatch errors.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "'{v}'"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Stored values that mean "no value", one per encoding.
///
/// Dimension columns share a single sentinel. Alphanumeric columns always use
/// a zero length prefix and have no entry here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NullSentinels {
    /// Sentinel for every dimension column.
    pub dimension: i64,
    /// Fact byte column.
    pub byte: i8,
    /// Fact short column.
    pub short: i16,
    /// Fact int column.
    pub int: i32,
    /// Fact long column.
    pub long: i64,
    /// Fact float column. Defaults to the smallest positive subnormal.
    pub float: f32,
    /// Fact double column.
    pub double: f64,
}

impl Default for NullSentinels {
    fn default() -> Self {
        Self {
            dimension: 0,
            byte: i8::MIN,
            short: i16::MIN,
            int: i32::MIN,
            long: i64::MIN,
            float: f32::from_bits(1),
            double: f64::MIN,
        }
    }
}
