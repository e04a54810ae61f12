//! Records flowing through the pipeline.
//!
//! A record is an ordered, positional sequence of scalars. There are no
//! named fields at this level; names only appear when a sink applies an
//! `indexMap`.

use crate::error::{RetlError, RetlResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// A single record field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Absent value
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Bytes(Bytes),
}

impl Scalar {
    /// Borrow as text if this is a text field
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render as text, decoding bytes lossily
    #[must_use]
    pub fn to_text_lossy(&self) -> Cow<'_, str> {
        match self {
            Self::Text(s) => Cow::Borrowed(s),
            Self::Bytes(b) => String::from_utf8_lossy(b),
            other => Cow::Owned(other.to_string()),
        }
    }

    /// Check for null
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Convert to a JSON value for document sinks
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Bytes(b) => serde_json::Value::String(String::from_utf8_lossy(b).into_owned()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Text(s) => write!(f, "{}", s),
            Self::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Scalar {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Bytes> for Scalar {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}

/// An ordered sequence of scalars
///
/// Operators never mutate a record they receive. Every transformation
/// returns a new record, so length and order stay fixed once emitted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    values: Vec<Scalar>,
}

impl Record {
    /// Create a record from its values
    #[must_use]
    pub fn new(values: Vec<Scalar>) -> Self {
        Self { values }
    }

    /// Create a record of text fields
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        texts.into_iter().map(|s| Scalar::Text(s.into())).collect()
    }

    /// Number of fields
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the record has no fields
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a field, if present
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Scalar> {
        self.values.get(index)
    }

    /// Get a field or fail with `FieldOutOfBounds`
    ///
    /// # Errors
    ///
    /// Returns error if `index` is past the end of the record
    pub fn field(&self, index: usize) -> RetlResult<&Scalar> {
        self.values.get(index).ok_or(RetlError::FieldOutOfBounds {
            index,
            len: self.values.len(),
        })
    }

    /// All fields in order
    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    /// Consume into the field vector
    #[must_use]
    pub fn into_values(self) -> Vec<Scalar> {
        self.values
    }

    /// Iterate over fields
    pub fn iter(&self) -> std::slice::Iter<'_, Scalar> {
        self.values.iter()
    }

    /// Build a new record from the given positions, in the given order
    ///
    /// Duplicated and reordered positions are kept as written.
    ///
    /// # Errors
    ///
    /// Returns `FieldOutOfBounds` for the first index past the end
    pub fn project(&self, indices: &[usize]) -> RetlResult<Record> {
        indices
            .iter()
            .map(|&i| self.field(i).cloned())
            .collect::<RetlResult<Vec<_>>>()
            .map(Record::new)
    }

    /// New record with `value` at index 0 and every original field shifted right
    #[must_use]
    pub fn with_head(&self, value: Scalar) -> Record {
        let mut values = Vec::with_capacity(self.values.len() + 1);
        values.push(value);
        values.extend(self.values.iter().cloned());
        Record::new(values)
    }

    /// New record with `value` appended
    #[must_use]
    pub fn with_tail(&self, value: Scalar) -> Record {
        let mut values = self.values.clone();
        values.push(value);
        Record::new(values)
    }
}

impl From<Vec<Scalar>> for Record {
    fn from(values: Vec<Scalar>) -> Self {
        Self::new(values)
    }
}

impl FromIterator<Scalar> for Record {
    fn from_iter<T: IntoIterator<Item = Scalar>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = &'a Scalar;
    type IntoIter = std::slice::Iter<'a, Scalar>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, "]")
    }
}
