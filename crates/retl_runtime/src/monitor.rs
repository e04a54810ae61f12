//! Run metrics and reports.
//!
//! Each stream worker keeps its own counters and hands them back when it
//! exits; the engine folds them into a [`RunReport`].

use indexmap::IndexMap;
use retl_core::{Record, RetlError, RunId};
use std::fmt;
use std::time::Duration;

/// Per-stream counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamMetrics {
    /// Records taken from the queue or a source
    pub records_in: u64,
    /// Records that left the end of the chain
    pub records_out: u64,
    /// Records routed to other streams
    pub records_routed: u64,
    /// Records dropped after a failure
    pub records_skipped: u64,
    /// Operator failures
    pub failures: u64,
}

impl StreamMetrics {
    /// Create new metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an inbound record
    pub fn record_in(&mut self) {
        self.records_in += 1;
    }

    /// Record a record leaving the chain
    pub fn record_out(&mut self) {
        self.records_out += 1;
    }

    /// Record a routed record
    pub fn record_routed(&mut self) {
        self.records_routed += 1;
    }

    /// Record a skipped record
    pub fn record_skip(&mut self) {
        self.records_skipped += 1;
    }

    /// Record an operator failure
    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// Fraction of inbound records processed without failure (0.0 - 1.0)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.records_in == 0 {
            return 1.0;
        }
        1.0 - (self.failures.min(self.records_in) as f64 / self.records_in as f64)
    }

    /// Add another stream's counters
    pub fn merge(&mut self, other: &Self) {
        self.records_in += other.records_in;
        self.records_out += other.records_out;
        self.records_routed += other.records_routed;
        self.records_skipped += other.records_skipped;
        self.failures += other.failures;
    }
}

/// How a stream worker ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    /// Queue closed and drained
    Completed,
    /// Stopped by its own failure
    Failed {
        /// Failure that stopped the stream
        error: RetlError,
    },
    /// Stopped by an upstream failure or a run abort
    Cancelled,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed { error } => write!(f, "failed: {}", error),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A record an operator failed on
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFailure {
    /// Stream the record was in
    pub stream: String,
    /// Position of the failing operator in the chain
    pub operator_index: usize,
    /// Failing operator call
    pub operator: String,
    /// Record as the operator received it
    pub record: Record,
    /// The failure
    pub error: RetlError,
}

impl fmt::Display for RecordFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}] {} failed on {}: {}",
            self.stream, self.operator_index, self.operator, self.record, self.error
        )
    }
}

/// Final state of one stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamReport {
    /// Stream name
    pub name: String,
    /// Exit status
    pub status: StreamStatus,
    /// Counters
    pub metrics: StreamMetrics,
    /// Records that failed in this stream
    pub failures: Vec<RecordFailure>,
}

impl StreamReport {
    /// Create an empty report for a stream
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StreamStatus::Completed,
            metrics: StreamMetrics::new(),
            failures: Vec::new(),
        }
    }
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Run identifier
    pub run_id: RunId,
    /// Stream reports in definition order
    pub streams: IndexMap<String, StreamReport>,
    /// Wall-clock duration
    pub elapsed: Duration,
}

impl RunReport {
    /// Report for a stream
    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&StreamReport> {
        self.streams.get(name)
    }

    /// Every record failure across streams
    pub fn failures(&self) -> impl Iterator<Item = &RecordFailure> {
        self.streams.values().flat_map(|s| s.failures.iter())
    }

    /// Counters summed over all streams
    #[must_use]
    pub fn totals(&self) -> StreamMetrics {
        let mut totals = StreamMetrics::new();
        for report in self.streams.values() {
            totals.merge(&report.metrics);
        }
        totals
    }

    /// Check if every stream completed without a failure
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.streams
            .values()
            .all(|s| s.status == StreamStatus::Completed && s.failures.is_empty())
    }
}
