//! Pipeline graph.
//!
//! The graph is the result of compiling a definition. Nodes are streams,
//! each holding its instantiated operator chain; edges are branch routes
//! taken from router operators. Cycles are legal, so the graph carries its
//! strongly connected components instead of a topological order.

use indexmap::{IndexMap, IndexSet};
use retl_core::FieldAddress;
use retl_operator::{Operator, OperatorRole};
use std::fmt;
use std::sync::Arc;

/// Name of the stream every definition is seeded through
pub const START_STREAM: &str = "start";

/// An instantiated operator and the call that produced it
#[derive(Clone)]
pub struct OperatorNode {
    /// Call as written, e.g. `addressTable.save`
    pub call: String,
    /// Operator instance
    pub operator: Arc<dyn Operator>,
}

impl OperatorNode {
    /// Create a node
    #[must_use]
    pub fn new(call: impl Into<String>, operator: Arc<dyn Operator>) -> Self {
        Self {
            call: call.into(),
            operator,
        }
    }

    /// Operator role
    #[must_use]
    pub fn role(&self) -> OperatorRole {
        self.operator.role()
    }
}

impl fmt::Debug for OperatorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorNode")
            .field("call", &self.call)
            .field("role", &self.operator.role())
            .finish()
    }
}

/// A named stream and its operator chain
#[derive(Debug, Clone)]
pub struct Stream {
    /// Stream name
    pub name: String,
    /// Operators in chain order
    pub operators: Vec<OperatorNode>,
}

impl Stream {
    /// Create a stream
    #[must_use]
    pub fn new(name: impl Into<String>, operators: Vec<OperatorNode>) -> Self {
        Self {
            name: name.into(),
            operators,
        }
    }

    /// Whether the chain starts with a source operator
    #[must_use]
    pub fn is_source(&self) -> bool {
        self.operators
            .first()
            .is_some_and(|node| node.role() == OperatorRole::Source)
    }

    /// Number of operators in the chain
    #[must_use]
    pub fn len(&self) -> usize {
        self.operators.len()
    }

    /// Check if the chain is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

/// A branch route from one stream to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// Routing stream
    pub from: String,
    /// Destination stream
    pub to: String,
    /// Index of the routing operator in `from`
    pub operator_index: usize,
    /// Fields forwarded along this route
    pub fields: FieldAddress,
}

/// A strongly connected component of streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    /// Member streams, in definition order
    pub members: Vec<String>,
    /// Whether records can return to a member
    pub cyclic: bool,
}

/// Compiled pipeline
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    streams: IndexMap<String, Stream>,
    edges: Vec<Edge>,
    entry_points: IndexSet<String>,
    components: Vec<Component>,
    component_of: IndexMap<String, usize>,
}

impl PipelineGraph {
    /// Build a graph from streams and routes
    ///
    /// Every edge endpoint must name a stream in `streams`; the compiler
    /// checks this before calling.
    #[must_use]
    pub fn new(streams: IndexMap<String, Stream>, edges: Vec<Edge>) -> Self {
        let targeted: IndexSet<&str> = edges.iter().map(|e| e.to.as_str()).collect();
        let entry_points = streams
            .keys()
            .filter(|name| name.as_str() == START_STREAM || !targeted.contains(name.as_str()))
            .cloned()
            .collect();

        let mut graph = Self {
            streams,
            edges,
            entry_points,
            components: Vec::new(),
            component_of: IndexMap::new(),
        };
        graph.components = graph.strongly_connected();
        for (id, component) in graph.components.iter().enumerate() {
            for member in &component.members {
                graph.component_of.insert(member.clone(), id);
            }
        }
        graph
    }

    /// Get a stream by name
    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&Stream> {
        self.streams.get(name)
    }

    /// All streams in definition order
    pub fn streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }

    /// All branch routes
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Streams fed from outside the graph: `start` plus every stream that
    /// no router targets
    #[must_use]
    pub fn entry_points(&self) -> &IndexSet<String> {
        &self.entry_points
    }

    /// Check if a stream is an entry point
    #[must_use]
    pub fn is_entry(&self, name: &str) -> bool {
        self.entry_points.contains(name)
    }

    /// Distinct streams `name` routes to
    #[must_use]
    pub fn successors(&self, name: &str) -> IndexSet<&str> {
        self.edges
            .iter()
            .filter(|e| e.from == name)
            .map(|e| e.to.as_str())
            .collect()
    }

    /// Distinct streams that route to `name`
    #[must_use]
    pub fn predecessors(&self, name: &str) -> IndexSet<&str> {
        self.edges
            .iter()
            .filter(|e| e.to == name)
            .map(|e| e.from.as_str())
            .collect()
    }

    /// Every stream `name` can reach, `name` included
    #[must_use]
    pub fn downstream(&self, name: &str) -> IndexSet<String> {
        self.closure([name])
    }

    /// Streams reachable from any entry point
    #[must_use]
    pub fn reachable(&self) -> IndexSet<String> {
        self.closure(self.entry_points.iter().map(String::as_str))
    }

    /// Streams that no entry point reaches
    #[must_use]
    pub fn unreachable(&self) -> Vec<String> {
        let reachable = self.reachable();
        self.streams
            .keys()
            .filter(|name| !reachable.contains(*name))
            .cloned()
            .collect()
    }

    /// Strongly connected components, upstream components first
    #[must_use]
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Component containing `name`
    #[must_use]
    pub fn component_of(&self, name: &str) -> Option<usize> {
        self.component_of.get(name).copied()
    }

    /// Check if `name` sits on a routing cycle
    #[must_use]
    pub fn is_cyclic(&self, name: &str) -> bool {
        self.component_of(name)
            .is_some_and(|id| self.components[id].cyclic)
    }

    /// Components that contain a routing cycle
    pub fn cycles(&self) -> impl Iterator<Item = &Component> {
        self.components.iter().filter(|c| c.cyclic)
    }

    /// Number of streams
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Number of branch routes
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    fn closure<'a>(&self, roots: impl IntoIterator<Item = &'a str>) -> IndexSet<String> {
        let mut seen = IndexSet::new();
        let mut stack: Vec<&str> = roots.into_iter().collect();

        while let Some(current) = stack.pop() {
            if !self.streams.contains_key(current) || !seen.insert(current.to_string()) {
                continue;
            }
            for edge in &self.edges {
                if edge.from == current && !seen.contains(edge.to.as_str()) {
                    stack.push(edge.to.as_str());
                }
            }
        }

        seen
    }

    /// Kosaraju's algorithm with explicit stacks
    fn strongly_connected(&self) -> Vec<Component> {
        let n = self.streams.len();
        let mut succ = vec![Vec::new(); n];
        let mut pred = vec![Vec::new(); n];
        for edge in &self.edges {
            if let (Some(from), Some(to)) = (
                self.streams.get_index_of(&edge.from),
                self.streams.get_index_of(&edge.to),
            ) {
                succ[from].push(to);
                pred[to].push(from);
            }
        }

        let mut visited = vec![false; n];
        let mut order = Vec::with_capacity(n);
        for root in 0..n {
            if visited[root] {
                continue;
            }
            visited[root] = true;
            let mut stack = vec![(root, 0usize)];
            while let Some(top) = stack.last_mut() {
                let (node, cursor) = *top;
                if cursor < succ[node].len() {
                    top.1 += 1;
                    let child = succ[node][cursor];
                    if !visited[child] {
                        visited[child] = true;
                        stack.push((child, 0));
                    }
                } else {
                    order.push(node);
                    stack.pop();
                }
            }
        }

        let mut assigned = vec![false; n];
        let mut components = Vec::new();
        for &root in order.iter().rev() {
            if assigned[root] {
                continue;
            }
            assigned[root] = true;
            let mut members = Vec::new();
            let mut stack = vec![root];
            while let Some(node) = stack.pop() {
                members.push(node);
                for &p in &pred[node] {
                    if !assigned[p] {
                        assigned[p] = true;
                        stack.push(p);
                    }
                }
            }

            let cyclic = members.len() > 1 || succ[root].contains(&root);
            members.sort_unstable();
            components.push(Component {
                members: members
                    .into_iter()
                    .filter_map(|i| self.streams.get_index(i).map(|(name, _)| name.clone()))
                    .collect(),
                cyclic,
            });
        }

        components
    }
}
