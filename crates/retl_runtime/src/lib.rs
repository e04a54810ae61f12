//! RETL Runtime
//!
//! Concurrent execution of compiled pipeline graphs: one worker per
//! stream, bounded queues between them, per-record failure handling and
//! a routing-depth guard for cyclic graphs.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
mod dispatch;
pub mod engine;
pub mod monitor;
mod queue;
mod worker;

pub use config::{EngineConfig, FailurePolicy};
pub use engine::{ExecutionEngine, RunInput};
pub use monitor::{RecordFailure, RunReport, StreamMetrics, StreamReport, StreamStatus};
pub use queue::Envelope;
