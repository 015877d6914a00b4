//! Broker abstraction: one trait, two backends (Postgres LISTEN/NOTIFY and
//! AMQP), selected at startup by [`registry`].
//!
//! ## Rust Learning Notes
//!
//! This mirrors the repository pattern the rest of the crate borrows from
//! the teacher: a `Send + Sync` async trait behind `Arc<dyn BrokerAdapter>`,
//! so the connection handler never knows which backend it's talking to.

pub mod amqp;
pub mod postgres;
pub mod registry;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::Result;

/// Default bound on a subscription's pending-message queue.
///
/// Matches the original's `asyncio.Queue(buffer_size)` default of 10
/// (`examples/original_source/taiga_events/queues/pg.py`): this is the
/// "Subscription buffer" contract from the design — a slow client doesn't
/// grow the broker side unboundedly, it simply stalls the reader task.
pub const DEFAULT_BUFFER_SIZE: usize = 10;

/// A single event delivered by a broker adapter.
///
/// `routing_key` is always present; adapters fill `session_id` when the
/// publisher embedded one, which the pump uses for self-echo suppression.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BrokerMessage {
    pub routing_key: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub payload: Value,
}

/// A live subscription to a routing key.
///
/// Owns the receiving half of a bounded channel fed by a background reader
/// task, plus the handle needed to tear that task down. `close` is
/// idempotent; a second call is a harmless no-op, guarded by `closed`.
pub struct Subscription {
    pub routing_key: String,
    receiver: mpsc::Receiver<BrokerMessage>,
    reader: JoinHandle<()>,
    closed: AtomicBool,
}

impl Subscription {
    pub fn new(
        routing_key: String,
        receiver: mpsc::Receiver<BrokerMessage>,
        reader: JoinHandle<()>,
    ) -> Self {
        Self {
            routing_key,
            receiver,
            reader,
            closed: AtomicBool::new(false),
        }
    }

    /// Wait for the next message. Returns `None` once the reader task has
    /// exited and drained its buffer (broker connection lost, or closed).
    pub async fn recv(&mut self) -> Option<BrokerMessage> {
        self.receiver.recv().await
    }

    /// Abort the background reader. Safe to call more than once.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.reader.abort();
        }
    }
}

impl Drop for Subscription {
    /// Guarantees the reader task is aborted even if the pump task holding
    /// this subscription is itself cancelled before it can call
    /// `BrokerAdapter::close` explicitly.
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The interface a pub/sub backend must provide.
///
/// Implementors own a background task per subscription that drains the
/// underlying transport and forwards parsed messages onto the bounded
/// channel inside the returned [`Subscription`].
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Begin listening for events published under `routing_key`.
    async fn subscribe(&self, routing_key: &str) -> Result<Subscription>;

    /// Tear down a subscription. Implementations should be idempotent with
    /// respect to [`Subscription::shutdown`] having already run.
    async fn close(&self, sub: Subscription) -> Result<()>;
}
