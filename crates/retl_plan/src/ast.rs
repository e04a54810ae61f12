//! Parsed pipeline definitions.
//!
//! The definition text is parsed elsewhere; this is the tree the compiler
//! consumes. It round-trips through JSON so a definition can be handed
//! over as a file.

use indexmap::IndexMap;
use retl_core::{RetlError, RetlResult, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A whole pipeline definition
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Definition {
    /// Named resource handles from the `define` section
    #[serde(default)]
    pub define: IndexMap<String, ResourceDecl>,
    /// Streams in written order; names may repeat until validated
    #[serde(default)]
    pub streams: Vec<StreamDecl>,
}

impl Definition {
    /// Create an empty definition
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the JSON interchange form
    ///
    /// # Errors
    ///
    /// Returns `InvalidDefinition` if the JSON does not describe a definition
    pub fn from_json(text: &str) -> RetlResult<Self> {
        serde_json::from_str(text).map_err(|e| RetlError::definition("definition", e.to_string()))
    }

    /// Add a resource declaration
    #[must_use]
    pub fn resource(mut self, name: impl Into<String>, kind: impl Into<String>, config: Value) -> Self {
        self.define.insert(
            name.into(),
            ResourceDecl {
                kind: kind.into(),
                config,
            },
        );
        self
    }

    /// Add a stream
    #[must_use]
    pub fn stream(mut self, name: impl Into<String>, operators: Vec<OperatorCall>) -> Self {
        self.streams.push(StreamDecl {
            name: name.into(),
            operators,
        });
        self
    }
}

/// `name: Kind({config})` in the `define` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDecl {
    /// Resource kind as registered
    pub kind: String,
    /// Raw configuration, placeholders unresolved
    #[serde(default)]
    pub config: Value,
}

/// A named stream and its operator calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDecl {
    /// Stream name
    pub name: String,
    /// Operator calls in chain order
    #[serde(default)]
    pub operators: Vec<OperatorCall>,
}

/// One operator invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperatorCall {
    /// `handle.method({config})`
    Method {
        /// Resource handle name from `define`
        resource: String,
        /// Method on the handle
        method: String,
        /// Raw configuration
        #[serde(default)]
        config: Value,
    },
    /// `Name({config})`
    Builtin {
        /// Operator name
        op: String,
        /// Raw configuration
        #[serde(default)]
        config: Value,
    },
}

impl OperatorCall {
    /// `Name(config)`
    #[must_use]
    pub fn builtin(op: impl Into<String>, config: Value) -> Self {
        Self::Builtin {
            op: op.into(),
            config,
        }
    }

    /// `handle.method(config)`
    #[must_use]
    pub fn method(resource: impl Into<String>, method: impl Into<String>, config: Value) -> Self {
        Self::Method {
            resource: resource.into(),
            method: method.into(),
            config,
        }
    }

    /// Raw configuration
    #[must_use]
    pub fn config(&self) -> &Value {
        match self {
            Self::Method { config, .. } | Self::Builtin { config, .. } => config,
        }
    }
}

impl fmt::Display for OperatorCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Method {
                resource, method, ..
            } => write!(f, "{}.{}", resource, method),
            Self::Builtin { op, .. } => write!(f, "{}", op),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "define": {
            "nameTable": {"kind": "Collection", "config": {"url": "{mongoURL}", "collection": "name"}},
            "addressTable": {"kind": "Collection", "config": {"url": "{mongoURL}", "collection": "address"}}
        },
        "streams": [
            {"name": "start", "operators": [
                {"op": "TextToLines"},
                {"op": "DelimitedRecordToArray", "config": {"delimiter": ",", "canBeEnclosedBy": "\""}},
                {"op": "GenerateUUID", "config": {"head": true}},
                {"op": "SendFieldsToBranch", "config": {"targets": [
                    {"dest": "nameMongo", "fields": [{"$range": [0, 4]}]},
                    {"dest": "addressMongo", "fields": [0, {"$range": [5, 9]}]}
                ]}}
            ]},
            {"name": "addressMongo", "operators": [
                {"resource": "addressTable", "method": "save", "config": {"indexMap": {"recordID": 0}}}
            ]}
        ]
    }"#;

    #[test]
    fn test_parse_sample_definition() {
        let def = Definition::from_json(SAMPLE).unwrap();
        assert_eq!(def.define.len(), 2);
        assert_eq!(def.define["nameTable"].kind, "Collection");
        assert_eq!(def.streams.len(), 2);
        assert_eq!(def.streams[0].operators.len(), 4);
        assert_eq!(def.streams[0].operators[0].config(), &Value::Null);

        let save = &def.streams[1].operators[0];
        assert!(matches!(save, OperatorCall::Method { .. }));
        assert_eq!(save.to_string(), "addressTable.save");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            Definition::from_json("[1, 2]"),
            Err(RetlError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn test_builder() {
        let def = Definition::new()
            .resource("t", "Collection", Value::Null)
            .stream("start", vec![OperatorCall::builtin("TextToLines", Value::Null)])
            .stream("start", Vec::new());
        assert_eq!(def.streams.len(), 2);
        assert_eq!(def.streams[0].operators[0].to_string(), "TextToLines");
    }

    #[test]
    fn test_round_trip_call() {
        let call = OperatorCall::method("addressTable", "save", Value::Null);
        let json = serde_json::to_string(&call).unwrap();
        let back: OperatorCall = serde_json::from_str(&json).unwrap();
        assert_eq!(call, back);
    }
}
