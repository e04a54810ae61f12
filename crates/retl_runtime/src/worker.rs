//! Stream worker.
//!
//! One worker runs each reachable stream. It takes records from its queue
//! (or from its source operator) and pushes each one through the operator
//! chain before taking the next, so a stream is strictly FIFO.

use crate::config::FailurePolicy;
use crate::dispatch::Dispatcher;
use crate::monitor::{RecordFailure, StreamReport, StreamStatus};
use crate::queue::{Envelope, QueueReceiver};
use retl_core::{Record, RetlError};
use retl_operator::{RecordFeed, Routed};
use retl_plan::Stream;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Why a worker stopped early
enum Stop {
    Failed(RetlError),
    Cancelled,
}

pub(crate) struct StreamWorker {
    stream: Stream,
    receiver: Option<QueueReceiver>,
    dispatcher: Arc<Dispatcher>,
    policy: FailurePolicy,
    feed_capacity: usize,
    token: CancellationToken,
    report: StreamReport,
}

impl StreamWorker {
    pub(crate) fn new(
        stream: Stream,
        receiver: Option<QueueReceiver>,
        dispatcher: Arc<Dispatcher>,
        policy: FailurePolicy,
        feed_capacity: usize,
    ) -> Self {
        let token = dispatcher.token(&stream.name);
        let report = StreamReport::new(stream.name.clone());
        Self {
            stream,
            receiver,
            dispatcher,
            policy,
            feed_capacity,
            token,
            report,
        }
    }

    /// Run to completion and hand back the stream's report
    pub(crate) async fn run(mut self) -> StreamReport {
        debug!(operators = self.stream.len(), "Stream worker started");

        let outcome = match self.open().await {
            Ok(()) if self.stream.is_source() => self.run_source().await,
            Ok(()) => self.drain().await,
            Err(stop) => Err(stop),
        };

        // Dropping the receiver unblocks producers still sending to us
        self.receiver = None;
        self.dispatcher.release_downstream(&self.stream.name);

        let mut status = match outcome {
            Ok(()) => StreamStatus::Completed,
            Err(Stop::Cancelled) => StreamStatus::Cancelled,
            Err(Stop::Failed(error)) => StreamStatus::Failed { error },
        };
        if let Some(error) = self.close().await {
            if status == StreamStatus::Completed {
                status = StreamStatus::Failed { error };
            }
        }

        debug!(
            status = %status,
            records_in = self.report.metrics.records_in,
            records_routed = self.report.metrics.records_routed,
            failures = self.report.metrics.failures,
            "Stream worker exited"
        );
        self.report.status = status;
        self.report
    }

    async fn open(&mut self) -> Result<(), Stop> {
        for index in 0..self.stream.operators.len() {
            let operator = self.stream.operators[index].operator.clone();
            if let Err(err) = operator.open().await {
                self.record_failure(index, Record::default(), err.clone());
                self.stop(index, &err);
                return Err(Stop::Failed(err));
            }
        }
        Ok(())
    }

    /// Close every operator; returns the first close error
    async fn close(&mut self) -> Option<RetlError> {
        let mut first = None;
        for index in 0..self.stream.operators.len() {
            let operator = self.stream.operators[index].operator.clone();
            if let Err(err) = operator.close().await {
                warn!(operator_index = index, operator = %self.stream.operators[index].call, error = %err, "Operator close failed");
                self.record_failure(index, Record::default(), err.clone());
                first.get_or_insert(err);
            }
        }
        first
    }

    /// Consume the queue until it closes
    async fn drain(&mut self) -> Result<(), Stop> {
        let Some(mut receiver) = self.receiver.take() else {
            return Ok(());
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Err(Stop::Cancelled),
                next = receiver.recv() => next,
            };
            let Some(envelope) = next else {
                return Ok(());
            };

            let result = self.push(envelope, 0).await;
            self.dispatcher.settle(&self.stream.name);
            result?;
        }
    }

    /// Run the head source and push what it produces through the rest of the chain
    async fn run_source(&mut self) -> Result<(), Stop> {
        let source = self.stream.operators[0].operator.clone();
        let (tx, mut rx) = mpsc::channel(self.feed_capacity.max(1));

        let token = self.token.clone();
        let produce = async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(RetlError::Cancelled),
                result = source.produce(RecordFeed::new(tx)) => result,
            }
        };

        let worker = &mut *self;
        let consume = async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = worker.token.cancelled() => return Err(Stop::Cancelled),
                    next = rx.recv() => next,
                };
                let Some(record) = next else {
                    return Ok(());
                };
                worker.push(Envelope::new(record, 0), 1).await?;
            }
        };

        let (produced, consumed) = tokio::join!(produce, consume);
        consumed?;
        match produced {
            Ok(()) | Err(RetlError::Cancelled) => Ok(()),
            Err(err) => self.on_failure(0, Record::default(), err),
        }
    }

    /// Push one record through the chain from operator `start`
    ///
    /// Emitted records continue depth-first in emission order; routed
    /// records leave the stream immediately.
    async fn push(&mut self, envelope: Envelope, start: usize) -> Result<(), Stop> {
        self.report.metrics.record_in();
        let hops = envelope.hops;
        let mut pending = vec![(start, envelope.record)];

        while let Some((index, record)) = pending.pop() {
            let Some(node) = self.stream.operators.get(index) else {
                self.report.metrics.record_out();
                continue;
            };
            let operator = node.operator.clone();

            let result = operator.process(&record).await;
            let emission = match result {
                Ok(emission) => emission,
                Err(err) => {
                    self.on_failure(index, record, err)?;
                    continue;
                }
            };

            for Routed { dest, record: routed } in emission.routed {
                let delivered = self
                    .dispatcher
                    .route(&self.stream.name, &dest, routed, hops, &self.token)
                    .await;
                match delivered {
                    Ok(true) => self.report.metrics.record_routed(),
                    Ok(false) => trace!(dest = %dest, "Routed record dropped"),
                    Err(err) => {
                        error!(operator_index = index, hops, error = %err, "Routing depth exceeded");
                        self.record_failure(index, record, err.clone());
                        self.dispatcher.abort(err.clone());
                        return Err(Stop::Failed(err));
                    }
                }
            }

            pending.extend(emission.records.into_iter().rev().map(|r| (index + 1, r)));

            if self.token.is_cancelled() {
                return Err(Stop::Cancelled);
            }
        }

        Ok(())
    }

    /// Apply the failure policy to a record an operator rejected
    fn on_failure(&mut self, index: usize, record: Record, err: RetlError) -> Result<(), Stop> {
        let call = &self.stream.operators[index].call;
        match self.policy {
            FailurePolicy::SkipRecord => {
                warn!(operator_index = index, operator = %call, record = %record, error = %err, "Skipping record");
                self.report.metrics.record_skip();
                self.record_failure(index, record, err);
                Ok(())
            }
            FailurePolicy::CancelStream | FailurePolicy::AbortPipeline => {
                error!(operator_index = index, operator = %call, record = %record, error = %err, "Stream failed");
                self.record_failure(index, record, err.clone());
                self.stop(index, &err);
                Err(Stop::Failed(err))
            }
        }
    }

    /// Cancel downstream streams, or the whole run under `AbortPipeline`
    fn stop(&self, index: usize, err: &RetlError) {
        if self.policy == FailurePolicy::AbortPipeline {
            self.dispatcher.abort(err.clone());
        } else {
            debug!(operator_index = index, "Cancelling downstream streams");
            self.dispatcher.cancel_downstream(&self.stream.name);
        }
    }

    fn record_failure(&mut self, index: usize, record: Record, error: RetlError) {
        self.report.metrics.record_failure();
        self.report.failures.push(RecordFailure {
            stream: self.stream.name.clone(),
            operator_index: index,
            operator: self.stream.operators[index].call.clone(),
            record,
            error,
        });
    }
}
