//! Operator trait and the values it exchanges with the engine.

use crate::branch::BranchTarget;
use async_trait::async_trait;
use retl_core::{Record, RetlError, RetlResult, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

/// What part an operator plays in a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorRole {
    /// Produces records from an external feed; only legal at the head of a stream
    Source,
    /// Turns each record into zero or more records
    Transform,
    /// Forwards projections of each record to other streams
    Router,
    /// Terminal side effect, emits nothing
    Sink,
}

/// A record sent to another stream
#[derive(Debug, Clone, PartialEq)]
pub struct Routed {
    /// Destination stream name
    pub dest: String,
    /// Derived record
    pub record: Record,
}

/// Output of one operator invocation
///
/// `records` continue down the local chain; `routed` leave the stream and
/// never re-enter its remaining operators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Emission {
    /// Records for the next operator, in emission order
    pub records: Vec<Record>,
    /// Records for other streams, in emission order
    pub routed: Vec<Routed>,
}

impl Emission {
    /// Emit nothing
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Emit one record
    #[must_use]
    pub fn one(record: Record) -> Self {
        Self {
            records: vec![record],
            routed: Vec::new(),
        }
    }

    /// Emit several records
    #[must_use]
    pub fn many(records: Vec<Record>) -> Self {
        Self {
            records,
            routed: Vec::new(),
        }
    }

    /// Add a routed record
    pub fn route(&mut self, dest: impl Into<String>, record: Record) {
        self.routed.push(Routed {
            dest: dest.into(),
            record,
        });
    }

    /// Check if nothing was emitted on either channel
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.routed.is_empty()
    }
}

/// Channel a source operator pushes its records into
#[derive(Debug, Clone)]
pub struct RecordFeed {
    tx: mpsc::Sender<Record>,
}

impl RecordFeed {
    /// Wrap a bounded sender
    #[must_use]
    pub fn new(tx: mpsc::Sender<Record>) -> Self {
        Self { tx }
    }

    /// Push a record, waiting while the stream is busy
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` once the consuming stream has gone away
    pub async fn send(&self, record: Record) -> RetlResult<()> {
        self.tx.send(record).await.map_err(|_| RetlError::Cancelled)
    }

    /// Whether the consuming stream has gone away
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A configured unit of work over records
///
/// Configuration is fixed when the operator is built; `process` must not
/// depend on anything but the record and that configuration, apart from
/// the side effects of sinks.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Name the operator was registered under
    fn name(&self) -> &str;

    /// Role in the stream
    fn role(&self) -> OperatorRole {
        OperatorRole::Transform
    }

    /// Streams this operator may route to
    fn branch_targets(&self) -> &[BranchTarget] {
        &[]
    }

    /// Acquire resources for one worker lifetime
    async fn open(&self) -> RetlResult<()> {
        Ok(())
    }

    /// Process one record
    async fn process(&self, record: &Record) -> RetlResult<Emission>;

    /// Push records from an external feed (sources only)
    async fn produce(&self, _feed: RecordFeed) -> RetlResult<()> {
        Err(RetlError::operator(self.name(), "operator is not a source"))
    }

    /// Release resources acquired in `open`
    async fn close(&self) -> RetlResult<()> {
        Ok(())
    }
}

/// Builds an operator from its configuration value
pub trait OperatorFactory: Send + Sync {
    /// Build a configured operator
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    fn build(&self, config: &Value) -> RetlResult<Arc<dyn Operator>>;
}

impl<F> OperatorFactory for F
where
    F: Fn(&Value) -> RetlResult<Arc<dyn Operator>> + Send + Sync,
{
    fn build(&self, config: &Value) -> RetlResult<Arc<dyn Operator>> {
        self(config)
    }
}

/// A named external resource declared in the `define` section
pub trait Resource: Send + Sync {
    /// Resource kind, e.g. `Collection`
    fn kind(&self) -> &str;

    /// Build the operator for `handle.method(config)`
    ///
    /// # Errors
    ///
    /// Returns `UnknownOperator` for an unsupported method
    fn method(&self, handle: &str, method: &str, config: &Value) -> RetlResult<Arc<dyn Operator>>;
}

/// Creates resource handles from their configuration
pub trait ResourceFactory: Send + Sync {
    /// Create a resource handle
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    fn create(&self, config: &Value) -> RetlResult<Arc<dyn Resource>>;
}

impl<F> ResourceFactory for F
where
    F: Fn(&Value) -> RetlResult<Arc<dyn Resource>> + Send + Sync,
{
    fn create(&self, config: &Value) -> RetlResult<Arc<dyn Resource>> {
        self(config)
    }
}
