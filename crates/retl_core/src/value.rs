//! Operator configuration values.
//!
//! Every operator takes a single configuration value. It is a tagged union
//! of scalars, arrays and objects, plus the already-parsed range literal
//! used in field addresses (`{"$range": [5, 9]}` in the JSON interchange).

use crate::error::{RetlError, RetlResult};
use crate::record::Scalar;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Inclusive range literal `start..end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeLiteral {
    /// `[start, end]`
    #[serde(rename = "$range")]
    pub bounds: [u64; 2],
}

impl RangeLiteral {
    /// Create a range literal
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Self {
        Self {
            bounds: [start, end],
        }
    }

    /// Range start
    #[must_use]
    pub const fn start(&self) -> u64 {
        self.bounds[0]
    }

    /// Range end (inclusive)
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.bounds[1]
    }
}

/// A configuration value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Integer(i64),
    /// Float
    Float(f64),
    /// String, may hold `{variable}` placeholders until resolved
    String(String),
    /// Range literal
    Range(RangeLiteral),
    /// Array
    Array(Vec<Value>),
    /// Object with keys in written order
    Object(IndexMap<String, Value>),
}

impl Value {
    /// Build an object value from key/value pairs
    pub fn object<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build a range value
    #[must_use]
    pub const fn range(start: u64, end: u64) -> Self {
        Self::Range(RangeLiteral::new(start, end))
    }

    /// Short name of the variant, for error messages
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Range(_) => "range",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    /// Check for null
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Look up a key in an object value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Look up a required key
    ///
    /// # Errors
    ///
    /// Returns `InvalidDefinition` naming `owner` if the key is missing
    pub fn require(&self, key: &str, owner: &str) -> RetlResult<&Value> {
        self.get(key)
            .ok_or_else(|| RetlError::definition(owner, format!("missing required key `{}`", key)))
    }

    /// Borrow as a string
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as a signed integer
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as a non-negative integer
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().and_then(|i| u64::try_from(i).ok())
    }

    /// Get as a boolean
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Borrow as an array
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow as an object
    #[must_use]
    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Null => Self::Null,
            Scalar::Bool(b) => Self::Bool(b),
            Scalar::Int(i) => Self::Integer(i),
            Scalar::Float(x) => Self::Float(x),
            Scalar::Text(s) => Self::String(s),
            Scalar::Bytes(b) => Self::String(String::from_utf8_lossy(&b).into_owned()),
        }
    }
}
