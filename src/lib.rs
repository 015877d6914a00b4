// Event Gateway - Rust Edition
// Bridges a server-side pub/sub broker (Postgres LISTEN/NOTIFY or AMQP) to
// browser clients over WebSockets.

//! # Event Gateway
//!
//! This crate implements the *subscription multiplexer*: the per-connection
//! state machine that authenticates a client, manages its routing-key
//! subscriptions against a pluggable broker, and pumps broker events into
//! the client's WebSocket while suppressing the client's own echoes.
//!
//! ## Module map
//!
//! - [`auth`]: pure HMAC-signed token verification (no I/O).
//! - [`broker`]: the `BrokerAdapter` trait plus the Postgres and AMQP
//!   implementations, and the configuration-driven registry that selects
//!   between them.
//! - [`socket`]: the narrow interface the pump writes through, hiding the
//!   WebSocket framework behind a trait.
//! - [`pump`]: one task per (connection, routing_key) forwarding broker
//!   events to the socket.
//! - [`connection`]: the per-socket command dispatcher and subscription map.
//! - [`server`]: the axum app and `/events` route.
//! - [`config`]: startup configuration loading.

pub mod auth;
pub mod broker;
pub mod config;
pub mod connection;
pub mod pump;
pub mod server;
pub mod socket;

pub use connection::ConnectionHandler;
pub use pump::Pump;

use thiserror::Error;

/// Errors surfaced by the gateway's core components.
///
/// Mirrors the error taxonomy in the design: malformed client input and
/// transient broker hiccups are handled locally and never reach this type
/// at the top level, but individual components use it to report failures
/// up to their caller.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    Auth(#[from] auth::AuthError),

    #[error("broker error: {0}")]
    Broker(#[from] anyhow::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown broker adapter: {0}")]
    UnknownAdapter(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Type alias for Results that use [`GatewayError`].
pub type Result<T> = std::result::Result<T, GatewayError>;
