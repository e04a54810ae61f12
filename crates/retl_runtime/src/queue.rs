//! Stream queues.
//!
//! Streams outside a routing cycle get a bounded queue so a slow consumer
//! throttles its producers. Streams on a cycle get an unbounded queue: a
//! worker that blocks sending into its own cycle could otherwise wait on
//! itself.

use retl_core::Record;
use tokio::sync::mpsc;

/// A record in flight and the number of branch hops it has taken
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// The record
    pub record: Record,
    /// Branch hops so far
    pub hops: u32,
}

impl Envelope {
    /// Wrap a record
    #[must_use]
    pub fn new(record: Record, hops: u32) -> Self {
        Self { record, hops }
    }
}

/// Sending half of a stream queue
#[derive(Debug, Clone)]
pub(crate) enum QueueSender {
    Bounded(mpsc::Sender<Envelope>),
    Unbounded(mpsc::UnboundedSender<Envelope>),
}

impl QueueSender {
    /// Send, waiting for capacity on a bounded queue
    ///
    /// Gives the envelope back if the receiver is gone.
    pub(crate) async fn send(&self, envelope: Envelope) -> Result<(), Envelope> {
        match self {
            Self::Bounded(tx) => tx.send(envelope).await.map_err(|e| e.0),
            Self::Unbounded(tx) => tx.send(envelope).map_err(|e| e.0),
        }
    }
}

/// Receiving half of a stream queue
#[derive(Debug)]
pub(crate) enum QueueReceiver {
    Bounded(mpsc::Receiver<Envelope>),
    Unbounded(mpsc::UnboundedReceiver<Envelope>),
}

impl QueueReceiver {
    /// Next envelope, or `None` once every sender is dropped and the queue is drained
    pub(crate) async fn recv(&mut self) -> Option<Envelope> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }
}

/// Create a queue; `capacity` is ignored when `unbounded` is set
///
/// Unbounded queues are only used on routing cycles. Their growth is
/// limited by the routers' fan-out raised to `max_routing_depth`, not by
/// `capacity`.
pub(crate) fn channel(capacity: usize, unbounded: bool) -> (QueueSender, QueueReceiver) {
    if unbounded {
        let (tx, rx) = mpsc::unbounded_channel();
        (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
    } else {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
    }
}
