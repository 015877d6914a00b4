//! Postgres LISTEN/NOTIFY broker adapter.
//!
//! Grounded on `examples/original_source/taiga_events/queues/pg.py`: each
//! routing key becomes its own Postgres channel, dots replaced with double
//! underscores (Postgres channel identifiers don't allow dots unquoted),
//! and a dedicated connection listens on it for the lifetime of the
//! subscription.

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::broker::{BrokerAdapter, BrokerMessage, Subscription, DEFAULT_BUFFER_SIZE};
use crate::{GatewayError, Result};

pub struct PostgresAdapter {
    dsn: String,
}

impl PostgresAdapter {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self { dsn: dsn.into() }
    }

    fn channel_name(routing_key: &str) -> String {
        format!("events_{}", routing_key.replace('.', "__"))
    }
}

#[async_trait]
impl BrokerAdapter for PostgresAdapter {
    async fn subscribe(&self, routing_key: &str) -> Result<Subscription> {
        let channel = Self::channel_name(routing_key);

        let mut listener = PgListener::connect(&self.dsn)
            .await
            .map_err(|e| GatewayError::Broker(e.into()))?;
        listener
            .listen(&channel)
            .await
            .map_err(|e| GatewayError::Broker(e.into()))?;

        let (tx, rx) = mpsc::channel(DEFAULT_BUFFER_SIZE);
        let routing_key_owned = routing_key.to_string();

        let reader = tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        let payload = notification.payload();
                        let parsed: serde_json::Value = match serde_json::from_str(payload) {
                            Ok(v) => v,
                            Err(err) => {
                                warn!(%err, %payload, "dropping malformed postgres notification");
                                continue;
                            }
                        };

                        if !parsed.is_object() {
                            warn!(%payload, routing_key = %routing_key_owned, "dropping non-object postgres notification");
                            continue;
                        }

                        let session_id = parsed
                            .get("session_id")
                            .and_then(|v| v.as_str())
                            .map(str::to_string);

                        let message = BrokerMessage {
                            routing_key: routing_key_owned.clone(),
                            session_id,
                            payload: parsed,
                        };

                        if tx.send(message).await.is_err() {
                            debug!(routing_key = %routing_key_owned, "subscriber gone, stopping listener");
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(%err, routing_key = %routing_key_owned, "postgres listener connection lost");
                        break;
                    }
                }
            }
        });

        Ok(Subscription::new(routing_key.to_string(), rx, reader))
    }

    async fn close(&self, sub: Subscription) -> Result<()> {
        sub.shutdown();
        Ok(())
    }
}
