//! Adapter glue: turns the configured broker name into a live
//! `Arc<dyn BrokerAdapter>`.
//!
//! Grounded on the `match storage_type.as_str() { "nats" => ..., "memory" | _ => ... }`
//! dispatch in the teacher's `src/bin/server.rs`.

use std::sync::Arc;

use crate::broker::{amqp::AmqpAdapter, postgres::PostgresAdapter, BrokerAdapter};
use crate::config::BrokerConfig;
use crate::{GatewayError, Result};

/// Which backend a [`BrokerConfig`] selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerKind {
    Postgres,
    Amqp,
}

impl BrokerKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "postgres" | "pg" => Some(Self::Postgres),
            "amqp" | "rabbitmq" => Some(Self::Amqp),
            _ => None,
        }
    }
}

/// Build the adapter named by `conf.name`, wiring in its connection string.
pub fn build_adapter(conf: &BrokerConfig) -> Result<Arc<dyn BrokerAdapter>> {
    match BrokerKind::parse(&conf.name) {
        Some(BrokerKind::Postgres) => Ok(Arc::new(PostgresAdapter::new(conf.url.clone()))),
        Some(BrokerKind::Amqp) => Ok(Arc::new(AmqpAdapter::new(conf.url.clone()))),
        None => Err(GatewayError::UnknownAdapter(conf.name.clone())),
    }
}
