//! The subscription pump: one task per (connection, routing_key) forwarding
//! broker events to the client's socket while suppressing events the
//! client's own connection produced.
//!
//! Grounded on `examples/original_source/taiga_events/handlers.py`'s
//! `Subscription._subscription_ventilator`: subscribe, then loop consuming
//! messages; a message whose `session_id` matches this connection's own is
//! dropped after yielding once to the scheduler (`asyncio.sleep(0)`, here
//! `tokio::task::yield_now()`) so a client never sees the echo of its own
//! publish; any other message gets its `routing_key` stamped and is written
//! to the socket as JSON. A broker error writes one error frame and closes
//! the socket; the pump's own cancellation is silent.

use std::sync::Arc;

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::broker::BrokerAdapter;
use crate::socket::ClientSocket;

/// Runs until the broker subscription ends, the socket drops, or the pump
/// is stopped. Owns the background task driving that loop.
pub struct Pump {
    handle: JoinHandle<()>,
}

impl Pump {
    /// Subscribe to `routing_key` on `broker` and start forwarding events to
    /// `socket`, suppressing any whose `session_id` equals `own_session_id`.
    pub async fn start(
        broker: Arc<dyn BrokerAdapter>,
        socket: Arc<dyn ClientSocket>,
        routing_key: String,
        own_session_id: String,
    ) -> crate::Result<Self> {
        let mut sub = broker.subscribe(&routing_key).await?;

        let handle = tokio::spawn(async move {
            loop {
                let message = match sub.recv().await {
                    Some(m) => m,
                    None => {
                        debug!(routing_key = %routing_key, "broker subscription ended");
                        break;
                    }
                };

                if message.session_id.as_deref() == Some(own_session_id.as_str()) {
                    // Let other tasks run before looping back, matching the
                    // original's `yield from asyncio.sleep(0)` before
                    // re-entering the consume loop.
                    tokio::task::yield_now().await;
                    continue;
                }

                let mut payload = message.payload.clone();
                if let Some(obj) = payload.as_object_mut() {
                    obj.insert(
                        "routing_key".to_string(),
                        serde_json::Value::String(message.routing_key.clone()),
                    );
                }

                match serde_json::to_string(&payload) {
                    Ok(text) => socket.write(text),
                    Err(err) => {
                        warn!(%err, routing_key = %message.routing_key, "failed to serialize broker message");
                        let error_frame = json!({ "error": "internal error", "routing_key": message.routing_key });
                        socket.write(error_frame.to_string());
                        socket.close();
                        break;
                    }
                }
            }

            broker.close(sub).await.ok();
        });

        Ok(Self { handle })
    }

    /// Abort the pump's task. The underlying broker subscription's reader
    /// task is also aborted as part of `Subscription::shutdown` when the
    /// pump loop next observes the cancellation; calling this does not
    /// block waiting for that to happen.
    pub fn stop(&self) {
        self.handle.abort();
    }
}
