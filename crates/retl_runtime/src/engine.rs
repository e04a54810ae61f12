//! Execution engine for pipeline graphs.
//!
//! Spawns one worker per reachable stream, feeds the entry streams and
//! waits for every worker to drain.

use crate::config::EngineConfig;
use crate::dispatch::Dispatcher;
use crate::monitor::RunReport;
use crate::worker::StreamWorker;
use futures::future::join_all;
use indexmap::IndexMap;
use retl_core::{Record, RetlError, RetlResult, RunId, Scalar};
use retl_plan::{PipelineGraph, START_STREAM};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

/// Records handed to entry streams at the start of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunInput {
    seeds: IndexMap<String, Vec<Record>>,
}

impl RunInput {
    /// Create empty input
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `start` with one record holding `text`
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::new().seed(START_STREAM, vec![Record::new(vec![Scalar::Text(text.into())])])
    }

    /// Append records for a stream
    #[must_use]
    pub fn seed(mut self, stream: impl Into<String>, records: Vec<Record>) -> Self {
        self.seeds.entry(stream.into()).or_default().extend(records);
        self
    }

    /// Append one record for a stream
    pub fn push(&mut self, stream: impl Into<String>, record: Record) {
        self.seeds.entry(stream.into()).or_default().push(record);
    }

    /// Seeded stream names
    pub fn streams(&self) -> impl Iterator<Item = &str> {
        self.seeds.keys().map(String::as_str)
    }

    /// Check if nothing is seeded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seeds.values().all(Vec::is_empty)
    }
}

/// Execution engine for running pipeline graphs
pub struct ExecutionEngine {
    config: EngineConfig,
}

impl ExecutionEngine {
    /// Create a new execution engine
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a graph to completion
    ///
    /// Per-record failures are reported in the returned [`RunReport`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidDefinition` for a bad configuration or input, and
    /// the aborting error if the run was aborted (`RoutingDepthExceeded`,
    /// or any failure under `AbortPipeline`)
    pub async fn run(&self, graph: &PipelineGraph, input: RunInput) -> RetlResult<RunReport> {
        self.config.validate()?;
        check_input(graph, &input)?;

        let run_id = RunId::new();
        let started = Instant::now();
        let reachable = graph.reachable();
        info!(
            %run_id,
            streams = reachable.len(),
            entry_points = graph.entry_points().len(),
            policy = %self.config.failure_policy,
            "Run started"
        );

        let (dispatcher, mut receivers) = Dispatcher::build(
            graph,
            &reachable,
            self.config.queue_capacity,
            self.config.max_routing_depth,
            CancellationToken::new(),
        );
        let dispatcher = Arc::new(dispatcher);

        let mut handles = Vec::with_capacity(reachable.len());
        for stream in graph.streams().filter(|s| reachable.contains(&s.name)) {
            let worker = StreamWorker::new(
                stream.clone(),
                receivers.shift_remove(&stream.name),
                Arc::clone(&dispatcher),
                self.config.failure_policy,
                self.config.queue_capacity,
            );
            let span = info_span!("stream", %run_id, stream = %stream.name);
            handles.push(tokio::spawn(worker.run().instrument(span)));
        }

        let mut seeds = input.seeds;
        let feeders = graph
            .entry_points()
            .iter()
            .filter(|name| graph.stream(name).is_some_and(|s| !s.is_source()))
            .map(|name| {
                let records = seeds.shift_remove(name).unwrap_or_default();
                let dispatcher = Arc::clone(&dispatcher);
                async move {
                    for record in records {
                        if !dispatcher.seed(name, record).await {
                            break;
                        }
                    }
                    dispatcher.seed_done(name);
                }
            })
            .collect::<Vec<_>>();
        join_all(feeders).await;

        let mut streams = IndexMap::new();
        let mut panicked = None;
        for result in join_all(handles).await {
            match result {
                Ok(report) => {
                    streams.insert(report.name.clone(), report);
                }
                Err(err) => {
                    panicked.get_or_insert(err.to_string());
                }
            }
        }

        if let Some(message) = panicked {
            error!(%run_id, %message, "Stream worker panicked");
            return Err(RetlError::Internal { message });
        }
        if let Some(err) = dispatcher.take_abort() {
            error!(%run_id, error = %err, "Run aborted");
            return Err(err);
        }

        let report = RunReport {
            run_id,
            streams,
            elapsed: started.elapsed(),
        };
        let totals = report.totals();
        info!(
            %run_id,
            records_in = totals.records_in,
            records_routed = totals.records_routed,
            failures = totals.failures,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Run finished"
        );
        Ok(report)
    }
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Seeds may only go to entry streams that are not source-headed
fn check_input(graph: &PipelineGraph, input: &RunInput) -> RetlResult<()> {
    for name in input.streams() {
        let Some(stream) = graph.stream(name) else {
            return Err(RetlError::definition(
                "input",
                format!("no stream named `{}`", name),
            ));
        };
        if !graph.is_entry(name) {
            return Err(RetlError::definition(
                "input",
                format!("`{}` is fed by a router and cannot be seeded", name),
            ));
        }
        if stream.is_source() {
            return Err(RetlError::definition(
                "input",
                format!("`{}` starts with a source and cannot be seeded", name),
            ));
        }
    }
    Ok(())
}
