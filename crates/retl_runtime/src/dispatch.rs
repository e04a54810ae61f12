//! Record dispatch between stream workers.
//!
//! Queues close per strongly connected component. A component closes once
//! every producer outside it has exited (`external`) and no record sent
//! into it is still being processed (`inflight`). Counting a record as in
//! flight until its worker has finished with it, including everything it
//! routed, is what lets a cycle drain and stop.

use crate::queue::{channel, Envelope, QueueReceiver, QueueSender};
use indexmap::{IndexMap, IndexSet};
use retl_core::{Record, RetlError, RetlResult};
use retl_plan::PipelineGraph;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct ComponentState {
    members: Vec<String>,
    external: usize,
    inflight: usize,
    closed: bool,
}

/// Shared routing state for one run
pub(crate) struct Dispatcher {
    max_depth: u32,
    queues: IndexMap<String, Mutex<Option<QueueSender>>>,
    component_of: IndexMap<String, usize>,
    components: Mutex<IndexMap<usize, ComponentState>>,
    /// Components each stream produces into, other than its own
    releases: IndexMap<String, Vec<usize>>,
    downstream: IndexMap<String, IndexSet<String>>,
    tokens: IndexMap<String, CancellationToken>,
    root: CancellationToken,
    abort: Mutex<Option<RetlError>>,
}

impl Dispatcher {
    /// Create queues for every reachable stream that is not source-headed
    pub(crate) fn build(
        graph: &PipelineGraph,
        reachable: &IndexSet<String>,
        capacity: usize,
        max_depth: u32,
        root: CancellationToken,
    ) -> (Self, IndexMap<String, QueueReceiver>) {
        let mut queues = IndexMap::new();
        let mut receivers = IndexMap::new();
        let mut component_of = IndexMap::new();
        let mut components: IndexMap<usize, ComponentState> = IndexMap::new();
        let mut tokens = IndexMap::new();

        for stream in graph.streams().filter(|s| reachable.contains(&s.name)) {
            let Some(id) = graph.component_of(&stream.name) else {
                continue;
            };
            component_of.insert(stream.name.clone(), id);
            tokens.insert(stream.name.clone(), root.child_token());
            if stream.is_source() {
                continue;
            }

            let (tx, rx) = channel(capacity, graph.is_cyclic(&stream.name));
            queues.insert(stream.name.clone(), Mutex::new(Some(tx)));
            receivers.insert(stream.name.clone(), rx);

            let state = components.entry(id).or_default();
            state.members.push(stream.name.clone());
            if graph.is_entry(&stream.name) {
                state.external += 1;
            }
        }

        let mut releases = IndexMap::new();
        let mut downstream = IndexMap::new();
        for (name, &own) in &component_of {
            let targets: IndexSet<usize> = graph
                .successors(name)
                .into_iter()
                .filter_map(|dest| component_of.get(dest).copied())
                .filter(|&id| id != own)
                .collect();
            for id in &targets {
                if let Some(state) = components.get_mut(id) {
                    state.external += 1;
                }
            }
            releases.insert(name.clone(), targets.into_iter().collect());
            downstream.insert(name.clone(), graph.downstream(name));
        }

        let dispatcher = Self {
            max_depth,
            queues,
            component_of,
            components: Mutex::new(components),
            releases,
            downstream,
            tokens,
            root,
            abort: Mutex::new(None),
        };
        (dispatcher, receivers)
    }

    /// Cancellation token of a stream
    pub(crate) fn token(&self, stream: &str) -> CancellationToken {
        self.tokens
            .get(stream)
            .cloned()
            .unwrap_or_else(|| self.root.clone())
    }

    /// Feed an entry stream from outside the graph
    pub(crate) async fn seed(&self, stream: &str, record: Record) -> bool {
        let token = self.token(stream);
        self.deliver(stream, Envelope::new(record, 0), &token).await
    }

    /// An entry stream will get no more seeds
    pub(crate) fn seed_done(&self, stream: &str) {
        if let Some(&id) = self.component_of.get(stream) {
            self.release(id);
        }
    }

    /// Forward a routed record one hop further
    ///
    /// Returns whether the record was queued; a cancelled destination
    /// discards it.
    pub(crate) async fn route(
        &self,
        from: &str,
        dest: &str,
        record: Record,
        hops: u32,
        token: &CancellationToken,
    ) -> RetlResult<bool> {
        let hops = hops.saturating_add(1);
        if hops > self.max_depth {
            return Err(RetlError::RoutingDepthExceeded {
                stream: from.to_string(),
                dest: dest.to_string(),
                depth: hops,
                max: self.max_depth,
            });
        }
        Ok(self.deliver(dest, Envelope::new(record, hops), token).await)
    }

    async fn deliver(&self, dest: &str, envelope: Envelope, token: &CancellationToken) -> bool {
        self.acquire(dest);
        let sender = self.queues.get(dest).and_then(|q| lock(q).clone());
        let delivered = match sender {
            Some(sender) => tokio::select! {
                biased;
                _ = token.cancelled() => false,
                result = sender.send(envelope) => result.is_ok(),
            },
            None => false,
        };
        if !delivered {
            trace!(dest = %dest, "Record discarded, destination closed");
            self.settle(dest);
        }
        delivered
    }

    fn acquire(&self, stream: &str) {
        if let Some(id) = self.component_of.get(stream) {
            if let Some(state) = lock(&self.components).get_mut(id) {
                state.inflight += 1;
            }
        }
    }

    /// A record taken from `stream`'s queue is fully processed
    pub(crate) fn settle(&self, stream: &str) {
        let Some(id) = self.component_of.get(stream) else {
            return;
        };
        let mut components = lock(&self.components);
        if let Some(state) = components.get_mut(id) {
            state.inflight = state.inflight.saturating_sub(1);
            self.close_if_idle(state);
        }
    }

    /// `stream` has exited and will produce nothing more
    pub(crate) fn release_downstream(&self, stream: &str) {
        if let Some(targets) = self.releases.get(stream) {
            for &id in targets {
                self.release(id);
            }
        }
    }

    fn release(&self, id: usize) {
        let mut components = lock(&self.components);
        if let Some(state) = components.get_mut(&id) {
            state.external = state.external.saturating_sub(1);
            self.close_if_idle(state);
        }
    }

    fn close_if_idle(&self, state: &mut ComponentState) {
        if state.closed || state.external > 0 || state.inflight > 0 {
            return;
        }
        state.closed = true;
        for member in &state.members {
            if let Some(queue) = self.queues.get(member) {
                lock(queue).take();
            }
        }
        debug!(members = ?state.members, "Queues closed");
    }

    /// Cancel `stream` and everything it can reach
    pub(crate) fn cancel_downstream(&self, stream: &str) {
        if let Some(names) = self.downstream.get(stream) {
            for name in names {
                if let Some(token) = self.tokens.get(name) {
                    token.cancel();
                }
            }
        }
    }

    /// Stop the whole run; the first error wins
    pub(crate) fn abort(&self, error: RetlError) {
        {
            let mut slot = lock(&self.abort);
            if slot.is_none() {
                *slot = Some(error);
            }
        }
        self.root.cancel();
    }

    /// Error that aborted the run, if any
    pub(crate) fn take_abort(&self) -> Option<RetlError> {
        lock(&self.abort).take()
    }
}
