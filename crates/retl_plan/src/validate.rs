//! Strict structural checks on a compiled graph.
//!
//! Compilation accepts every runnable graph. The validator lets a caller
//! reject graphs that run but are probably not what was meant.

use super::graph::PipelineGraph;
use retl_operator::OperatorRole;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Routing cycle when cycles are denied
    Cycle {
        /// Member streams
        streams: Vec<String>,
    },
    /// Streams no entry point reaches
    Unreachable {
        /// Stream names
        streams: Vec<String>,
    },
    /// Graph has no entry point
    NoEntryPoint,
    /// No stream writes anywhere
    MissingSink,
    /// Stream without operators
    EmptyStream {
        /// Stream name
        name: String,
    },
    /// Stream count over the limit
    TooManyStreams {
        /// Actual count
        count: usize,
        /// Allowed maximum
        max: usize,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cycle { streams } => write!(f, "Cycle detected involving streams: {:?}", streams),
            Self::Unreachable { streams } => write!(f, "Unreachable streams: {:?}", streams),
            Self::NoEntryPoint => write!(f, "No entry point"),
            Self::MissingSink => write!(f, "No stream ends in a sink"),
            Self::EmptyStream { name } => write!(f, "Stream `{}` has no operators", name),
            Self::TooManyStreams { count, max } => {
                write!(f, "Stream count {} exceeds max {}", count, max)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validator for graph properties
#[derive(Debug, Clone)]
pub struct Validator {
    /// Reject routing cycles
    pub deny_cycles: bool,
    /// Reject unreachable streams
    pub deny_unreachable: bool,
    /// Require at least one sink
    pub require_sink: bool,
    /// Maximum allowed streams (0 = no limit)
    pub max_streams: usize,
}

impl Validator {
    /// Create a validator that only rejects graphs with nothing to run
    #[must_use]
    pub fn new() -> Self {
        Self {
            deny_cycles: false,
            deny_unreachable: false,
            require_sink: false,
            max_streams: 0,
        }
    }

    /// Create a validator with every check enabled
    #[must_use]
    pub fn strict() -> Self {
        Self {
            deny_cycles: true,
            deny_unreachable: true,
            require_sink: true,
            max_streams: 0,
        }
    }

    /// Validate a graph
    ///
    /// # Errors
    ///
    /// Returns every violated property
    pub fn validate(&self, graph: &PipelineGraph) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if graph.stream_count() > 0 && graph.entry_points().is_empty() {
            errors.push(ValidationError::NoEntryPoint);
        }

        for stream in graph.streams() {
            if stream.is_empty() {
                errors.push(ValidationError::EmptyStream {
                    name: stream.name.clone(),
                });
            }
        }

        if self.deny_cycles {
            for cycle in graph.cycles() {
                errors.push(ValidationError::Cycle {
                    streams: cycle.members.clone(),
                });
            }
        }

        if self.deny_unreachable {
            let unreachable = graph.unreachable();
            if !unreachable.is_empty() {
                errors.push(ValidationError::Unreachable {
                    streams: unreachable,
                });
            }
        }

        if self.require_sink && !self.has_sink(graph) {
            errors.push(ValidationError::MissingSink);
        }

        if self.max_streams > 0 && graph.stream_count() > self.max_streams {
            errors.push(ValidationError::TooManyStreams {
                count: graph.stream_count(),
                max: self.max_streams,
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn has_sink(&self, graph: &PipelineGraph) -> bool {
        graph
            .streams()
            .flat_map(|s| s.operators.iter())
            .any(|node| node.role() == OperatorRole::Sink)
    }

    /// Set whether cycles are rejected
    #[must_use]
    pub fn with_deny_cycles(mut self, deny: bool) -> Self {
        self.deny_cycles = deny;
        self
    }

    /// Set whether a sink is required
    #[must_use]
    pub fn with_require_sink(mut self, require: bool) -> Self {
        self.require_sink = require;
        self
    }

    /// Set maximum stream count
    #[must_use]
    pub fn with_max_streams(mut self, max: usize) -> Self {
        self.max_streams = max;
        self
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, OperatorNode, Stream};
    use indexmap::IndexMap;
    use retl_core::{FieldAddress, Value};
    use retl_operator::OperatorRegistry;

    fn graph(edges: &[(&str, &str)]) -> PipelineGraph {
        let registry = OperatorRegistry::with_builtins();
        let op = registry.build("TextToLines", &Value::Null).unwrap();
        let streams: IndexMap<String, Stream> = ["start", "a", "b"]
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    Stream::new(*name, vec![OperatorNode::new("TextToLines", op.clone())]),
                )
            })
            .collect();
        let edges = edges
            .iter()
            .map(|(from, to)| Edge {
                from: from.to_string(),
                to: to.to_string(),
                operator_index: 0,
                fields: FieldAddress::single(0),
            })
            .collect();
        PipelineGraph::new(streams, edges)
    }

    #[test]
    fn test_validator_new() {
        let validator = Validator::new();
        assert!(!validator.deny_cycles);
        assert!(!validator.require_sink);
        assert_eq!(validator.max_streams, 0);
    }

    #[test]
    fn test_default_accepts_cycles() {
        let g = graph(&[("start", "a"), ("a", "b"), ("b", "a")]);
        assert!(Validator::new().validate(&g).is_ok());
    }

    #[test]
    fn test_strict_rejects() {
        let g = graph(&[("start", "a"), ("a", "b"), ("b", "a")]);
        let errors = Validator::strict().validate(&g).unwrap_err();
        assert!(errors.contains(&ValidationError::Cycle {
            streams: vec!["a".to_string(), "b".to_string()]
        }));
        assert!(errors.contains(&ValidationError::MissingSink));
    }

    #[test]
    fn test_max_streams() {
        let g = graph(&[]);
        let errors = Validator::new().with_max_streams(2).validate(&g).unwrap_err();
        assert_eq!(errors, vec![ValidationError::TooManyStreams { count: 3, max: 2 }]);
    }
}
