//! Compiler from definition AST to pipeline graph.
//!
//! Compilation resolves variables, instantiates every operator and
//! resource through the registry, and checks every branch route. Any
//! error here is fatal: no stream ever runs for a definition that fails
//! to compile.

use super::ast::{Definition, OperatorCall, StreamDecl};
use super::graph::{Edge, OperatorNode, PipelineGraph, Stream};
use indexmap::{IndexMap, IndexSet};
use retl_core::{RetlError, RetlResult, Substitution, Variables};
use retl_operator::{OperatorRegistry, OperatorRole, Resource};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Output from compiling a definition
#[derive(Debug, Clone)]
pub struct CompilerOutput {
    /// The compiled graph
    pub graph: PipelineGraph,
    /// Compilation warnings
    pub warnings: Vec<CompilerWarning>,
}

/// Compilation warning
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompilerWarning {
    /// Variable bound but never referenced
    UnusedVariable {
        /// Variable name
        name: String,
    },
    /// Resource defined but never called
    UnusedResource {
        /// Handle name
        name: String,
    },
    /// Stream no entry point reaches
    UnreachableStream {
        /// Stream name
        name: String,
    },
    /// Operators follow a sink, which emits nothing
    OperatorsAfterSink {
        /// Stream name
        stream: String,
        /// Index of the sink
        index: usize,
    },
    /// Streams that route records back to themselves
    RoutingCycle {
        /// Member streams
        streams: Vec<String>,
    },
}

impl fmt::Display for CompilerWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnusedVariable { name } => write!(f, "Variable `{}` is never used", name),
            Self::UnusedResource { name } => write!(f, "Resource `{}` is never used", name),
            Self::UnreachableStream { name } => {
                write!(f, "Stream `{}` is not reachable from any entry point", name)
            }
            Self::OperatorsAfterSink { stream, index } => write!(
                f,
                "Stream `{}` has operators after the sink at position {}",
                stream, index
            ),
            Self::RoutingCycle { streams } => {
                write!(f, "Routing cycle through {}", streams.join(" -> "))
            }
        }
    }
}

/// Compiler for turning a definition into a runnable graph
pub struct Compiler<'a> {
    registry: &'a OperatorRegistry,
    variables: &'a Variables,
}

impl<'a> Compiler<'a> {
    /// Create a compiler over a registry and variable bindings
    #[must_use]
    pub fn new(registry: &'a OperatorRegistry, variables: &'a Variables) -> Self {
        Self {
            registry,
            variables,
        }
    }

    /// Compile a definition
    ///
    /// # Errors
    ///
    /// Returns `DuplicateStreamName`, `UnresolvedVariable`, `InvalidRange`,
    /// `UnknownOperator`, `UnknownStreamReference` or `InvalidDefinition`
    pub fn compile(&self, definition: &Definition) -> RetlResult<CompilerOutput> {
        check_unique_names(&definition.streams)?;

        let mut substitution = Substitution::new(self.variables);
        let mut resources = IndexMap::new();
        for (handle, decl) in &definition.define {
            let config = substitution.resolve(&decl.config)?;
            let resource = self.registry.create_resource(&decl.kind, &config)?;
            debug!(resource = %handle, kind = %decl.kind, "Resource created");
            resources.insert(handle.clone(), resource);
        }

        let mut used_resources = IndexSet::new();
        let mut streams = IndexMap::new();
        for decl in &definition.streams {
            let stream = self.compile_stream(
                decl,
                &mut substitution,
                &resources,
                &mut used_resources,
            )?;
            streams.insert(decl.name.clone(), stream);
        }

        let edges = collect_edges(&streams)?;
        let graph = PipelineGraph::new(streams, edges);

        let mut warnings = Vec::new();
        for name in substitution.unused() {
            warnings.push(CompilerWarning::UnusedVariable { name });
        }
        for handle in resources.keys() {
            if !used_resources.contains(handle) {
                warnings.push(CompilerWarning::UnusedResource {
                    name: handle.clone(),
                });
            }
        }
        for name in graph.unreachable() {
            warnings.push(CompilerWarning::UnreachableStream { name });
        }
        for stream in graph.streams() {
            if let Some(index) = stream
                .operators
                .iter()
                .position(|node| node.role() == OperatorRole::Sink)
            {
                if index + 1 < stream.len() {
                    warnings.push(CompilerWarning::OperatorsAfterSink {
                        stream: stream.name.clone(),
                        index,
                    });
                }
            }
        }
        for cycle in graph.cycles() {
            warnings.push(CompilerWarning::RoutingCycle {
                streams: cycle.members.clone(),
            });
        }

        for warning in &warnings {
            warn!(%warning, "Compiler warning");
        }
        debug!(
            streams = graph.stream_count(),
            edges = graph.edge_count(),
            entry_points = graph.entry_points().len(),
            "Definition compiled"
        );

        Ok(CompilerOutput { graph, warnings })
    }

    /// Instantiate one stream's operator chain
    fn compile_stream(
        &self,
        decl: &StreamDecl,
        substitution: &mut Substitution<'_>,
        resources: &IndexMap<String, Arc<dyn Resource>>,
        used_resources: &mut IndexSet<String>,
    ) -> RetlResult<Stream> {
        let mut operators = Vec::with_capacity(decl.operators.len());

        for (index, call) in decl.operators.iter().enumerate() {
            let config = substitution.resolve(call.config())?;
            let operator = match call {
                OperatorCall::Builtin { op, .. } => self.registry.build(op, &config)?,
                OperatorCall::Method {
                    resource, method, ..
                } => {
                    let handle = resources.get(resource).ok_or_else(|| {
                        RetlError::definition(
                            format!("{}[{}]", decl.name, index),
                            format!("`{}` is not defined", resource),
                        )
                    })?;
                    used_resources.insert(resource.clone());
                    handle.method(resource, method, &config)?
                }
            };

            if operator.role() == OperatorRole::Source && index > 0 {
                return Err(RetlError::definition(
                    format!("{}[{}]", decl.name, index),
                    format!("source `{}` must be the first operator", call),
                ));
            }

            operators.push(OperatorNode::new(call.to_string(), operator));
        }

        Ok(Stream::new(decl.name.clone(), operators))
    }
}

fn check_unique_names(streams: &[StreamDecl]) -> RetlResult<()> {
    let mut seen = IndexSet::new();
    for decl in streams {
        if !seen.insert(decl.name.as_str()) {
            return Err(RetlError::DuplicateStreamName {
                name: decl.name.clone(),
            });
        }
    }
    Ok(())
}

/// Gather branch routes and check that every destination exists and is
/// not fed by a source
fn collect_edges(streams: &IndexMap<String, Stream>) -> RetlResult<Vec<Edge>> {
    let mut edges = Vec::new();

    for stream in streams.values() {
        for (index, node) in stream.operators.iter().enumerate() {
            for target in node.operator.branch_targets() {
                let Some(dest) = streams.get(&target.dest) else {
                    return Err(RetlError::UnknownStreamReference {
                        stream: stream.name.clone(),
                        dest: target.dest.clone(),
                    });
                };
                if dest.is_source() {
                    return Err(RetlError::definition(
                        format!("{}[{}]", stream.name, index),
                        format!("`{}` starts with a source and cannot be routed to", dest.name),
                    ));
                }
                edges.push(Edge {
                    from: stream.name.clone(),
                    to: dest.name.clone(),
                    operator_index: index,
                    fields: target.fields.clone(),
                });
            }
        }
    }

    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use retl_core::Value;
    use retl_operator::{CollectionFactory, MemoryStore};

    fn registry() -> OperatorRegistry {
        let mut registry = OperatorRegistry::with_builtins();
        registry
            .register_resource("Collection", CollectionFactory::new(Arc::new(MemoryStore::new())))
            .unwrap();
        registry
    }

    fn branch(targets: &[(&str, &str)]) -> OperatorCall {
        let targets = targets
            .iter()
            .map(|(dest, fields)| {
                format!(r#"{{"dest": "{}", "fields": {}}}"#, dest, fields)
            })
            .collect::<Vec<_>>()
            .join(",");
        let config: Value = serde_json::from_str(&format!(r#"{{"targets": [{}]}}"#, targets)).unwrap();
        OperatorCall::builtin("SendFieldsToBranch", config)
    }

    fn save(handle: &str) -> OperatorCall {
        OperatorCall::method(
            handle,
            "save",
            serde_json::from_str(r#"{"indexMap": {"id": 0}}"#).unwrap(),
        )
    }

    fn collection(name: &str) -> Value {
        Value::object([("url", Value::from("{url}")), ("collection", Value::from(name))])
    }

    fn sample() -> Definition {
        Definition::new()
            .resource("nameTable", "Collection", collection("name"))
            .resource("addressTable", "Collection", collection("address"))
            .stream(
                "start",
                vec![
                    OperatorCall::builtin("TextToLines", Value::Null),
                    OperatorCall::builtin("DelimitedRecordToArray", Value::Null),
                    OperatorCall::builtin("GenerateUUID", Value::object([("head", Value::Bool(true))])),
                    branch(&[
                        ("nameMongo", r#"[{"$range": [0, 4]}]"#),
                        ("addressMongo", r#"[0, {"$range": [5, 9]}]"#),
                    ]),
                ],
            )
            .stream("nameMongo", vec![save("nameTable")])
            .stream("addressMongo", vec![save("addressTable")])
    }

    #[test]
    fn test_compile_sample() {
        let registry = registry();
        let variables = Variables::new().with("url", "mongodb://localhost");
        let output = Compiler::new(&registry, &variables).compile(&sample()).unwrap();

        let graph = &output.graph;
        assert_eq!(graph.stream_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.entry_points().len(), 1);
        assert_eq!(graph.edges()[1].fields.indices(), vec![0, 5, 6, 7, 8, 9]);
        assert_eq!(graph.edges()[1].operator_index, 3);
        assert_eq!(graph.stream("addressMongo").unwrap().operators[0].call, "addressTable.save");
        assert!(output.warnings.is_empty());
    }

    #[test]
    fn test_unknown_stream_reference() {
        let registry = registry();
        let variables = Variables::new().with("url", "x");
        let def = Definition::new()
            .resource("addressTable", "Collection", collection("address"))
            .stream("start", vec![branch(&[("nameMongo", "[0]"), ("addressMongo", "[0]")])])
            .stream("addressMongo", vec![save("addressTable")]);

        let err = Compiler::new(&registry, &variables).compile(&def).unwrap_err();
        assert_eq!(
            err,
            RetlError::UnknownStreamReference {
                stream: "start".to_string(),
                dest: "nameMongo".to_string(),
            }
        );
    }

    #[test]
    fn test_unresolved_variable() {
        let registry = registry();
        let variables = Variables::new();
        let err = Compiler::new(&registry, &variables).compile(&sample()).unwrap_err();
        assert!(matches!(err, RetlError::UnresolvedVariable { name } if name == "url"));
    }

    #[test]
    fn test_duplicate_stream_name() {
        let registry = registry();
        let variables = Variables::new();
        let def = Definition::new()
            .stream("start", vec![OperatorCall::builtin("TextToLines", Value::Null)])
            .stream("start", vec![OperatorCall::builtin("TextToLines", Value::Null)]);
        assert!(matches!(
            Compiler::new(&registry, &variables).compile(&def),
            Err(RetlError::DuplicateStreamName { name }) if name == "start"
        ));
    }

    #[test]
    fn test_unknown_operator_and_method() {
        let registry = registry();
        let variables = Variables::new().with("url", "x");

        let def = Definition::new().stream("start", vec![OperatorCall::builtin("GetUrl", Value::Null)]);
        assert!(matches!(
            Compiler::new(&registry, &variables).compile(&def),
            Err(RetlError::UnknownOperator { name }) if name == "GetUrl"
        ));

        let def = Definition::new()
            .resource("t", "Collection", collection("c"))
            .stream("start", vec![OperatorCall::method("t", "drop", Value::Null)]);
        assert!(matches!(
            Compiler::new(&registry, &variables).compile(&def),
            Err(RetlError::UnknownOperator { name }) if name == "t.drop"
        ));

        let def = Definition::new().stream("start", vec![save("missing")]);
        assert!(matches!(
            Compiler::new(&registry, &variables).compile(&def),
            Err(RetlError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn test_descending_range_is_fatal() {
        let registry = registry();
        let variables = Variables::new();
        let def = Definition::new()
            .stream("start", vec![branch(&[("a", r#"[{"$range": [9, 5]}]"#)])])
            .stream("a", Vec::new());
        assert_eq!(
            Compiler::new(&registry, &variables).compile(&def).unwrap_err(),
            RetlError::InvalidRange { start: 9, end: 5 }
        );
    }

    #[test]
    fn test_source_placement() {
        let registry = registry();
        let variables = Variables::new();
        let path = Value::object([("path", Value::from("input.csv"))]);

        let def = Definition::new().stream(
            "start",
            vec![
                OperatorCall::builtin("TextToLines", Value::Null),
                OperatorCall::builtin("ReadFile", path.clone()),
            ],
        );
        assert!(matches!(
            Compiler::new(&registry, &variables).compile(&def),
            Err(RetlError::InvalidDefinition { .. })
        ));

        let def = Definition::new()
            .stream("start", vec![branch(&[("file", "[0]")])])
            .stream("file", vec![OperatorCall::builtin("ReadFile", path)]);
        assert!(matches!(
            Compiler::new(&registry, &variables).compile(&def),
            Err(RetlError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn test_warnings() {
        let registry = registry();
        let variables = Variables::new().with("url", "x").with("spare", "y");
        let def = Definition::new()
            .resource("t", "Collection", collection("c"))
            .resource("unused", "Collection", Value::object([("collection", Value::from("u"))]))
            .stream(
                "start",
                vec![save("t"), OperatorCall::builtin("TextToLines", Value::Null)],
            )
            .stream("loopA", vec![branch(&[("loopB", "[0]")])])
            .stream("loopB", vec![branch(&[("loopA", "[0]")])]);

        let output = Compiler::new(&registry, &variables).compile(&def).unwrap();
        let warnings = &output.warnings;

        assert!(warnings.contains(&CompilerWarning::UnusedVariable {
            name: "spare".to_string()
        }));
        assert!(warnings.contains(&CompilerWarning::UnusedResource {
            name: "unused".to_string()
        }));
        assert!(warnings.contains(&CompilerWarning::OperatorsAfterSink {
            stream: "start".to_string(),
            index: 0
        }));
        assert!(warnings.contains(&CompilerWarning::UnreachableStream {
            name: "loopA".to_string()
        }));
        assert!(warnings.contains(&CompilerWarning::RoutingCycle {
            streams: vec!["loopA".to_string(), "loopB".to_string()]
        }));
    }

    #[test]
    fn test_warning_display() {
        let warning = CompilerWarning::RoutingCycle {
            streams: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(warning.to_string(), "Routing cycle through a -> b");
    }
}
