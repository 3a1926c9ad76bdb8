//! In-process message bus — a pair of bounded FIFO queues.
//!
//! Channels publish inbound messages; the runtime consumes them, and pushes
//! replies onto the outbound queue for the channel gateway to fan out.
//! Producers suspend when a queue is full; consumers suspend when empty.
//! `close()` unblocks pending consumers, which drain whatever is still
//! queued and then observe termination.

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::types::{InboundMessage, OutboundMessage};

/// Default queue capacity when the config does not override it.
pub const DEFAULT_BUS_CAPACITY: usize = 128;

/// Error raised when publishing to a closed bus.
#[derive(Debug, thiserror::Error)]
#[error("message bus is closed")]
pub struct BusClosed;

/// Bounded inbound/outbound queue pair.
///
/// Delivery is at-least-once within a single process: a message handed to a
/// consumer is never retried. Order is preserved per producer.
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<mpsc::Receiver<InboundMessage>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Mutex<mpsc::Receiver<OutboundMessage>>,
    shutdown: CancellationToken,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: Mutex::new(outbound_rx),
            shutdown: CancellationToken::new(),
        }
    }

    /// Publish a message from a channel. Suspends while the queue is full.
    pub async fn publish_inbound(&self, msg: InboundMessage) -> Result<(), BusClosed> {
        if self.shutdown.is_cancelled() {
            return Err(BusClosed);
        }
        self.inbound_tx.send(msg).await.map_err(|_| BusClosed)
    }

    /// Publish a reply for the channel gateway. Suspends while full.
    pub async fn publish_outbound(&self, msg: OutboundMessage) -> Result<(), BusClosed> {
        if self.shutdown.is_cancelled() {
            return Err(BusClosed);
        }
        self.outbound_tx.send(msg).await.map_err(|_| BusClosed)
    }

    /// Receive the next inbound message.
    ///
    /// Returns `None` once the bus is closed and the queue is drained.
    pub async fn next_inbound(&self) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        if self.shutdown.is_cancelled() {
            return rx.try_recv().ok();
        }
        tokio::select! {
            _ = self.shutdown.cancelled() => rx.try_recv().ok(),
            msg = rx.recv() => msg,
        }
    }

    /// Receive the next outbound message.
    ///
    /// Returns `None` once the bus is closed and the queue is drained.
    pub async fn next_outbound(&self) -> Option<OutboundMessage> {
        let mut rx = self.outbound_rx.lock().await;
        if self.shutdown.is_cancelled() {
            return rx.try_recv().ok();
        }
        tokio::select! {
            _ = self.shutdown.cancelled() => rx.try_recv().ok(),
            msg = rx.recv() => msg,
        }
    }

    /// Cloneable handle for channel adapters to publish inbound messages.
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound_tx.clone()
    }

    /// Cloneable handle for tools and the executor to publish replies.
    pub fn outbound_sender(&self) -> mpsc::Sender<OutboundMessage> {
        self.outbound_tx.clone()
    }

    /// Close the bus. Idempotent; pending consumers unblock and drain.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
