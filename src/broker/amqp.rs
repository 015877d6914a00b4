//! AMQP broker adapter, backed by `lapin`.
//!
//! Grounded on `examples/other_examples/464120f9_szabgab-amqp-lapin-helper`
//! for connection/channel setup, and on
//! `examples/original_source/taiga_events/queues/rabbitmq.py` for the
//! exchange/queue topology: a single topic exchange named `events`
//! (auto-delete), with each subscription declaring its own exclusive,
//! server-named queue bound to the requested routing key.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::broker::{BrokerAdapter, BrokerMessage, Subscription, DEFAULT_BUFFER_SIZE};
use crate::{GatewayError, Result};

const EXCHANGE_NAME: &str = "events";

pub struct AmqpAdapter {
    uri: String,
}

impl AmqpAdapter {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[async_trait]
impl BrokerAdapter for AmqpAdapter {
    async fn subscribe(&self, routing_key: &str) -> Result<Subscription> {
        let conn = Connection::connect(&self.uri, ConnectionProperties::default().with_tokio())
            .await
            .map_err(|e| GatewayError::Broker(e.into()))?;
        let channel = conn
            .create_channel()
            .await
            .map_err(|e| GatewayError::Broker(e.into()))?;

        channel
            .exchange_declare(
                EXCHANGE_NAME,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    auto_delete: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| GatewayError::Broker(e.into()))?;

        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| GatewayError::Broker(e.into()))?;
        let queue_name = queue.name().to_string();

        channel
            .queue_bind(
                &queue_name,
                EXCHANGE_NAME,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| GatewayError::Broker(e.into()))?;

        let mut consumer = channel
            .basic_consume(
                &queue_name,
                "event-gateway",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| GatewayError::Broker(e.into()))?;

        let (tx, rx) = mpsc::channel(DEFAULT_BUFFER_SIZE);
        let routing_key_owned = routing_key.to_string();

        let reader = tokio::spawn(async move {
            // Keep the connection and channel alive for as long as the
            // consumer stream runs; dropping either would close the queue.
            let _conn = conn;
            let _channel = channel;

            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(d) => d,
                    Err(err) => {
                        warn!(%err, routing_key = %routing_key_owned, "amqp consumer error");
                        break;
                    }
                };

                let parsed: serde_json::Value = match serde_json::from_slice(&delivery.data) {
                    Ok(v) => v,
                    Err(err) => {
                        warn!(%err, "dropping malformed amqp message");
                        let _ = delivery.ack(Default::default()).await;
                        continue;
                    }
                };

                if !parsed.is_object() {
                    warn!(routing_key = %routing_key_owned, "dropping non-object amqp message");
                    let _ = delivery.ack(Default::default()).await;
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

                let _ = delivery.ack(Default::default()).await;

                if tx.send(message).await.is_err() {
                    debug!(routing_key = %routing_key_owned, "subscriber gone, stopping consumer");
                    break;
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
