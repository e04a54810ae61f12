//! Field addressing.
//!
//! A field address is a comma list of terms, each a single index or an
//! inclusive ascending range. Resolution keeps the written order and any
//! duplicates: `0,5..9` resolves to `[0, 5, 6, 7, 8, 9]`.

use crate::error::{RetlError, RetlResult};
use crate::record::Record;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One comma-separated term of a field address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawFieldTerm")]
pub enum FieldTerm {
    /// Single index `i`
    Index(usize),
    /// Inclusive range `start..end`
    Range {
        /// First index
        start: usize,
        /// Last index, inclusive
        end: usize,
    },
}

impl FieldTerm {
    /// Build a range term
    ///
    /// # Errors
    ///
    /// Returns `InvalidRange` if `start > end`
    pub fn range(start: usize, end: usize) -> RetlResult<Self> {
        if start > end {
            return Err(RetlError::InvalidRange {
                start: start as u64,
                end: end as u64,
            });
        }
        Ok(Self::Range { start, end })
    }

    fn push_indices(&self, out: &mut Vec<usize>) {
        match *self {
            Self::Index(i) => out.push(i),
            Self::Range { start, end } => out.extend(start..=end),
        }
    }

    fn len(&self) -> usize {
        match *self {
            Self::Index(_) => 1,
            Self::Range { start, end } => end.saturating_sub(start).saturating_add(1),
        }
    }

    /// First index of this term that is `>= len`
    fn first_out_of_bounds(&self, len: usize) -> Option<usize> {
        match *self {
            Self::Index(i) => (i >= len).then_some(i),
            Self::Range { start, end } => (end >= len).then_some(start.max(len)),
        }
    }
}

/// Unvalidated wire form of [`FieldTerm`]
#[derive(Deserialize)]
enum RawFieldTerm {
    Index(usize),
    Range { start: usize, end: usize },
}

impl TryFrom<RawFieldTerm> for FieldTerm {
    type Error = RetlError;

    fn try_from(raw: RawFieldTerm) -> RetlResult<Self> {
        match raw {
            RawFieldTerm::Index(i) => Ok(Self::Index(i)),
            RawFieldTerm::Range { start, end } => Self::range(start, end),
        }
    }
}

impl fmt::Display for FieldTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{}", i),
            Self::Range { start, end } => write!(f, "{}..{}", start, end),
        }
    }
}

/// A parsed field address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldAddress {
    terms: Vec<FieldTerm>,
}

impl FieldAddress {
    /// Address of a single field
    #[must_use]
    pub fn single(index: usize) -> Self {
        Self {
            terms: vec![FieldTerm::Index(index)],
        }
    }

    /// Address of an inclusive range
    ///
    /// # Errors
    ///
    /// Returns `InvalidRange` if `start > end`
    pub fn range(start: usize, end: usize) -> RetlResult<Self> {
        Ok(Self {
            terms: vec![FieldTerm::range(start, end)?],
        })
    }

    /// Address made of several terms
    ///
    /// # Errors
    ///
    /// Returns `InvalidRange` if any range term is descending
    pub fn from_terms(terms: Vec<FieldTerm>) -> RetlResult<Self> {
        for term in &terms {
            if let FieldTerm::Range { start, end } = *term {
                FieldTerm::range(start, end)?;
            }
        }
        Ok(Self { terms })
    }

    /// Convert a configuration value into an address
    ///
    /// Accepts an integer, a range literal, or an array of those (nested
    /// arrays are flattened in order).
    ///
    /// # Errors
    ///
    /// Returns `InvalidRange` for a descending range and `InvalidDefinition`
    /// for anything that is not an index or range
    pub fn from_value(value: &Value) -> RetlResult<Self> {
        let mut terms = Vec::new();
        let mut stack = vec![value];

        while let Some(current) = stack.pop() {
            match current {
                Value::Integer(i) => terms.push(FieldTerm::Index(to_index(i128::from(*i))?)),
                Value::Range(r) => {
                    let start = to_index(i128::from(r.start()))?;
                    let end = to_index(i128::from(r.end()))?;
                    if r.start() > r.end() {
                        return Err(RetlError::InvalidRange {
                            start: r.start(),
                            end: r.end(),
                        });
                    }
                    terms.push(FieldTerm::Range { start, end });
                }
                Value::Array(items) => stack.extend(items.iter().rev()),
                other => {
                    return Err(RetlError::definition(
                        "fields",
                        format!("expected index or range, found {}", other.type_name()),
                    ));
                }
            }
        }

        Ok(Self { terms })
    }

    /// Terms as written
    #[must_use]
    pub fn terms(&self) -> &[FieldTerm] {
        &self.terms
    }

    /// Number of indices the address resolves to
    #[must_use]
    pub fn width(&self) -> usize {
        self.terms
            .iter()
            .fold(0usize, |total, term| total.saturating_add(term.len()))
    }

    /// Concrete indices in written order, without a bounds check
    ///
    /// Prefer [`FieldAddress::resolve`] for addresses that come from a
    /// definition; an unchecked range may be arbitrarily wide.
    #[must_use]
    pub fn indices(&self) -> Vec<usize> {
        let mut out = Vec::new();
        for term in &self.terms {
            term.push_indices(&mut out);
        }
        out
    }

    /// Resolve against a record length
    ///
    /// # Errors
    ///
    /// Returns `FieldOutOfBounds` for the first index `>= len`
    pub fn resolve(&self, len: usize) -> RetlResult<Vec<usize>> {
        if let Some(index) = self.terms.iter().find_map(|t| t.first_out_of_bounds(len)) {
            return Err(RetlError::FieldOutOfBounds { index, len });
        }
        Ok(self.indices())
    }

    /// Project a record down to the addressed fields
    ///
    /// # Errors
    ///
    /// Returns `FieldOutOfBounds` if the record is too short
    pub fn project(&self, record: &Record) -> RetlResult<Record> {
        let indices = self.resolve(record.len())?;
        record.project(&indices)
    }
}

impl fmt::Display for FieldAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", term)?;
        }
        Ok(())
    }
}

fn to_index(raw: i128) -> RetlResult<usize> {
    usize::try_from(raw)
        .map_err(|_| RetlError::definition("fields", format!("invalid field index {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_index() {
        assert_eq!(FieldAddress::single(3).indices(), vec![3]);
    }

    #[test]
    fn test_comma_list_keeps_written_order() {
        let address = FieldAddress::from_terms(vec![
            FieldTerm::Index(0),
            FieldTerm::range(5, 9).unwrap(),
        ])
        .unwrap();
        assert_eq!(address.indices(), vec![0, 5, 6, 7, 8, 9]);
        assert_eq!(address.to_string(), "0,5..9");
        assert_eq!(address.width(), 6);
    }

    #[test]
    fn test_unsorted_and_duplicates() {
        let address = FieldAddress::from_terms(vec![
            FieldTerm::Index(4),
            FieldTerm::range(1, 2).unwrap(),
            FieldTerm::Index(4),
        ])
        .unwrap();
        assert_eq!(address.indices(), vec![4, 1, 2, 4]);
    }

    #[test]
    fn test_descending_range_fails() {
        assert_eq!(
            FieldAddress::range(9, 5),
            Err(RetlError::InvalidRange { start: 9, end: 5 })
        );
        assert!(FieldAddress::from_terms(vec![FieldTerm::Range { start: 3, end: 1 }]).is_err());
    }

    #[test]
    fn test_from_value() {
        let value = Value::Array(vec![Value::Integer(0), Value::range(5, 9)]);
        let address = FieldAddress::from_value(&value).unwrap();
        assert_eq!(address.indices(), vec![0, 5, 6, 7, 8, 9]);

        let nested = Value::Array(vec![Value::Array(vec![Value::range(0, 1)]), Value::Integer(7)]);
        assert_eq!(FieldAddress::from_value(&nested).unwrap().indices(), vec![0, 1, 7]);
    }

    #[test]
    fn test_from_value_rejects_bad_terms() {
        assert_eq!(
            FieldAddress::from_value(&Value::range(9, 5)),
            Err(RetlError::InvalidRange { start: 9, end: 5 })
        );
        assert!(matches!(
            FieldAddress::from_value(&Value::Integer(-1)),
            Err(RetlError::InvalidDefinition { .. })
        ));
        assert!(matches!(
            FieldAddress::from_value(&Value::from("0..4")),
            Err(RetlError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn test_resolve_bounds_checked_late() {
        let address = FieldAddress::range(0, 4).unwrap();
        assert_eq!(address.resolve(5).unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(
            address.resolve(3),
            Err(RetlError::FieldOutOfBounds { index: 3, len: 3 })
        );
    }

    #[test]
    fn test_project_record() {
        let record = Record::from_texts(["id", "first", "last"]);
        let address = FieldAddress::from_terms(vec![FieldTerm::Index(0), FieldTerm::Index(2)]).unwrap();
        assert_eq!(address.project(&record).unwrap(), Record::from_texts(["id", "last"]));
    }

    #[test]
    fn test_huge_range_is_out_of_bounds() {
        let record = Record::from_texts(["a", "b"]);

        let widest = FieldAddress::from_value(&Value::range(0, u64::MAX)).unwrap();
        assert_eq!(widest.width(), usize::MAX);
        assert_eq!(
            widest.project(&record),
            Err(RetlError::FieldOutOfBounds { index: 2, len: 2 })
        );

        let wide = FieldAddress::from_value(&Value::range(0, 1 << 40)).unwrap();
        assert_eq!(
            wide.project(&record),
            Err(RetlError::FieldOutOfBounds { index: 2, len: 2 })
        );

        let past_end = FieldAddress::range(7, 1 << 40).unwrap();
        assert_eq!(
            past_end.resolve(2),
            Err(RetlError::FieldOutOfBounds { index: 7, len: 2 })
        );
    }

    #[test]
    fn test_deserialize_validates_ranges() {
        let ok: FieldAddress =
            serde_json::from_str(r#"{"terms": [{"Index": 0}, {"Range": {"start": 5, "end": 9}}]}"#).unwrap();
        assert_eq!(ok.indices(), vec![0, 5, 6, 7, 8, 9]);

        let descending =
            serde_json::from_str::<FieldAddress>(r#"{"terms": [{"Range": {"start": 9, "end": 5}}]}"#);
        assert!(descending.is_err());
    }

    proptest! {
        #[test]
        fn prop_ascending_range_resolves_inclusive(a in 0usize..500, span in 0usize..200) {
            let b = a + span;
            let indices = FieldAddress::range(a, b).unwrap().indices();
            prop_assert_eq!(indices, (a..=b).collect::<Vec<_>>());
        }

        #[test]
        fn prop_descending_range_always_fails(a in 1usize..500, gap in 1usize..100) {
            let b = a.saturating_sub(gap);
            prop_assume!(a > b);
            let is_invalid_range = matches!(
                FieldAddress::range(a, b),
                Err(RetlError::InvalidRange { .. })
            );
            prop_assert!(is_invalid_range);
        }
    }
}
