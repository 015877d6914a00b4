//! The narrow interface the pump and connection handler write through,
//! hiding the WebSocket framework behind a trait.
//!
//! Grounded on the teacher's `handle_socket` in
//! `api/agents/websocket_handlers.rs`: the inbound axum `WebSocket` is split
//! into a read half (owned by the connection's read loop) and a write half
//! fed by an `mpsc::Sender`, forwarded to the socket by a dedicated task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

/// What the pump and connection handler write to. Implementations must be
/// cheap to clone (an `Arc` internally) and non-blocking to write to.
pub trait ClientSocket: Send + Sync {
    /// Enqueue a text frame for delivery. Non-blocking: if the outbound
    /// buffer is full the frame is dropped and a warning is logged, rather
    /// than applying backpressure to the caller (the write side of a
    /// WebSocket is best-effort from the broker-pump's point of view).
    fn write(&self, text: String);

    /// Send a close frame. Idempotent.
    fn close(&self);

    /// Best-effort identifier for logging (peer address or connection id).
    fn remote_addr(&self) -> String;
}

/// `ClientSocket` backed by a real axum WebSocket connection.
pub struct AxumSocket {
    tx: mpsc::Sender<WsMessage>,
    remote_addr: String,
    closed: Arc<AtomicBool>,
}

impl AxumSocket {
    /// Split `socket` and spawn the forwarding task. Returns the socket
    /// handle plus the receive half of the WebSocket for the caller's read
    /// loop to drive directly.
    pub fn spawn(
        socket: WebSocket,
        remote_addr: String,
        buffer: usize,
    ) -> (Arc<Self>, futures::stream::SplitStream<WebSocket>) {
        let (ws_sender, ws_receiver) = socket.split();
        let (tx, rx) = mpsc::channel(buffer);

        tokio::spawn(Self::forward(ws_sender, rx));

        let handle = Arc::new(Self {
            tx,
            remote_addr,
            closed: Arc::new(AtomicBool::new(false)),
        });

        (handle, ws_receiver)
    }

    async fn forward(
        mut sender: SplitSink<WebSocket, WsMessage>,
        mut rx: mpsc::Receiver<WsMessage>,
    ) {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(msg, WsMessage::Close(_));
            if sender.send(msg).await.is_err() {
                break;
            }
            if is_close {
                break;
            }
        }
    }
}

impl ClientSocket for AxumSocket {
    fn write(&self, text: String) {
        if self.tx.try_send(WsMessage::Text(text)).is_err() {
            debug!(remote_addr = %self.remote_addr, "dropping frame, outbound buffer full or closed");
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.tx.try_send(WsMessage::Close(None));
        }
    }

    fn remote_addr(&self) -> String {
        self.remote_addr.clone()
    }
}
