//! Template variable substitution.
//!
//! `{identifier}` placeholders inside configuration strings are replaced
//! from an explicit variable mapping. Substitution is a single pass: text
//! produced by a substitution is never rescanned.

use crate::error::{RetlError, RetlResult};
use crate::record::Scalar;
use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid"));

/// Variable mapping supplied by the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables {
    values: IndexMap<String, Scalar>,
}

impl Variables {
    /// Create an empty mapping
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a variable, replacing any earlier binding
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Scalar>) {
        self.values.insert(name.into(), value.into());
    }

    /// Builder-style bind
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.insert(name, value);
        self
    }

    /// Look up a binding
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.values.get(name)
    }

    /// Bound names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Number of bindings
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if there are no bindings
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Merge another mapping over this one
    pub fn extend(&mut self, other: Variables) {
        self.values.extend(other.values);
    }
}

/// Resolves placeholders across many configuration values and records
/// which variables were referenced.
pub struct Substitution<'a> {
    variables: &'a Variables,
    used: IndexSet<String>,
}

impl<'a> Substitution<'a> {
    /// Create a substitution over `variables`
    #[must_use]
    pub fn new(variables: &'a Variables) -> Self {
        Self {
            variables,
            used: IndexSet::new(),
        }
    }

    /// Return a copy of `value` with every placeholder replaced
    ///
    /// A string that is exactly one placeholder takes the variable's own
    /// type; placeholders embedded in longer text are rendered as text.
    ///
    /// # Errors
    ///
    /// Returns `UnresolvedVariable` for the first unbound name
    pub fn resolve(&mut self, value: &Value) -> RetlResult<Value> {
        match value {
            Value::String(s) => self.resolve_str(s),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(item))
                .collect::<RetlResult<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.resolve(v)?)))
                .collect::<RetlResult<IndexMap<_, _>>>()
                .map(Value::Object),
            other => Ok(other.clone()),
        }
    }

    fn resolve_str(&mut self, s: &str) -> RetlResult<Value> {
        // Whole-string placeholder keeps the variable's type
        if let Some(caps) = PLACEHOLDER.captures(s) {
            if caps.get(0).map(|m| m.as_str().len()) == Some(s.len()) {
                let scalar = self.lookup(&caps[1])?;
                return Ok(Value::from(scalar));
            }
        }

        let mut out = String::with_capacity(s.len());
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(s) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&s[last..whole.start()]);
            out.push_str(&self.lookup(&caps[1])?.to_text_lossy());
            last = whole.end();
        }
        out.push_str(&s[last..]);
        Ok(Value::String(out))
    }

    fn lookup(&mut self, name: &str) -> RetlResult<Scalar> {
        let scalar = self
            .variables
            .get(name)
            .cloned()
            .ok_or_else(|| RetlError::UnresolvedVariable {
                name: name.to_string(),
            })?;
        self.used.insert(name.to_string());
        Ok(scalar)
    }

    /// Names referenced so far
    #[must_use]
    pub fn used(&self) -> &IndexSet<String> {
        &self.used
    }

    /// Bound names never referenced
    #[must_use]
    pub fn unused(&self) -> Vec<String> {
        self.variables
            .names()
            .filter(|n| !self.used.contains(*n))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> Variables {
        Variables::new()
            .with("mongoURL", "mongodb://localhost:27017")
            .with("batch", 500i64)
            .with("brace", "{batch}")
    }

    #[test]
    fn test_embedded_placeholder() {
        let variables = vars();
        let mut sub = Substitution::new(&variables);
        let out = sub.resolve(&Value::from("url={mongoURL}/db")).unwrap();
        assert_eq!(out, Value::from("url=mongodb://localhost:27017/db"));
    }

    #[test]
    fn test_whole_placeholder_keeps_type() {
        let variables = vars();
        let mut sub = Substitution::new(&variables);
        assert_eq!(sub.resolve(&Value::from("{batch}")).unwrap(), Value::Integer(500));
    }

    #[test]
    fn test_nested_values() {
        let variables = vars();
        let mut sub = Substitution::new(&variables);
        let config = Value::object([
            ("url", Value::from("{mongoURL}")),
            ("limits", Value::Array(vec![Value::from("{batch}"), Value::Integer(1)])),
        ]);
        let out = sub.resolve(&config).unwrap();
        assert_eq!(out.get("limits").unwrap().as_array().unwrap()[0], Value::Integer(500));
        assert_eq!(sub.used().len(), 2);
        assert_eq!(sub.unused(), vec!["brace".to_string()]);
    }

    #[test]
    fn test_unresolved_variable() {
        let variables = vars();
        let mut sub = Substitution::new(&variables);
        let result = sub.resolve(&Value::object([("path", Value::from("/data/{missing}.csv"))]));
        assert_eq!(
            result,
            Err(RetlError::UnresolvedVariable {
                name: "missing".to_string()
            })
        );
    }

    #[test]
    fn test_substitution_is_single_pass() {
        let variables = vars();
        let mut sub = Substitution::new(&variables);
        assert_eq!(sub.resolve(&Value::from("x{brace}")).unwrap(), Value::from("x{batch}"));
        assert!(!sub.used().contains("batch"));
    }

    #[test]
    fn test_non_identifier_braces_untouched() {
        let variables = vars();
        let mut sub = Substitution::new(&variables);
        let text = Value::from("{ \"a\": 1 } and {}");
        assert_eq!(sub.resolve(&text).unwrap(), text);
    }

    #[test]
    fn test_variables_from_json() {
        let variables: Variables = serde_json::from_str(r#"{"a": "x", "n": 3}"#).unwrap();
        assert_eq!(variables.get("n"), Some(&Scalar::Int(3)));
        assert_eq!(variables.len(), 2);
    }
}
