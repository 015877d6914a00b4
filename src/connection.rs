//! Per-connection state machine: authentication, subscription map, and the
//! command dispatcher driving both.
//!
//! Grounded on the teacher's `Connection`/`ConnectionManager` split in
//! `api/agents/websocket_handlers.rs`, collapsed to one handler instance
//! per socket (this crate has no cross-connection registry to maintain —
//! fan-out happens at the broker, not between connections). The state
//! table itself is `examples/original_source/taiga_events/handlers.py`'s
//! `ConnectionHandler`, translated from `authenticated: bool` plus a
//! `subscriptions` dict into an explicit enum.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{self, AuthError};
use crate::broker::BrokerAdapter;
use crate::pump::Pump;
use crate::socket::ClientSocket;

/// Identity established once, on the first successful `auth` command.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: i64,
    pub session_id: String,
}

#[derive(Debug)]
enum ConnState {
    Unauth,
    Auth(Identity),
    Terminating,
}

/// Hook for gating `subscribe` on project membership. Disabled by default
/// (see design notes); when present, `allowed` must return quickly since it
/// runs inline in the command dispatcher.
#[async_trait]
pub trait MembershipChecker: Send + Sync {
    async fn allowed(&self, user_id: i64, routing_key: &str) -> bool;
}

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd")]
enum Command {
    #[serde(rename = "auth")]
    Auth { data: AuthData },

    #[serde(rename = "subscribe")]
    Subscribe { routing_key: String },

    #[serde(rename = "unsubscribe")]
    Unsubscribe { routing_key: String },
}

#[derive(Debug, Deserialize)]
struct AuthData {
    token: String,
    #[serde(rename = "sessionId")]
    session_id: String,
}

/// Owns one connection's subscriptions and processes its inbound commands
/// one at a time, in arrival order (the command-serialization rule).
///
/// `connection_id` identifies this handler the way the teacher's
/// `ConnectionManager` keys its `HashMap<Uuid, Connection>` — here there's
/// no shared map to key, so it's carried purely for correlating log lines
/// across a connection's lifetime.
pub struct ConnectionHandler {
    connection_id: Uuid,
    state: ConnState,
    subscriptions: HashMap<String, Pump>,
    broker: Arc<dyn BrokerAdapter>,
    socket: Arc<dyn ClientSocket>,
    secret_key: Vec<u8>,
    membership: Option<Arc<dyn MembershipChecker>>,
}

impl ConnectionHandler {
    pub fn new(
        broker: Arc<dyn BrokerAdapter>,
        socket: Arc<dyn ClientSocket>,
        secret_key: Vec<u8>,
        membership: Option<Arc<dyn MembershipChecker>>,
    ) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            state: ConnState::Unauth,
            subscriptions: HashMap::new(),
            broker,
            socket,
            secret_key,
            membership,
        }
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn identity(&self) -> Option<&Identity> {
        match &self.state {
            ConnState::Auth(identity) => Some(identity),
            _ => None,
        }
    }

    /// Parse and apply a single inbound text frame. Malformed frames are
    /// logged and ignored; this never terminates the connection itself
    /// (the forgiving-protocol rule) — callers decide to close the socket
    /// only on `AuthError`.
    pub async fn handle_frame(&mut self, text: &str) {
        let command: Command = match serde_json::from_str(text) {
            Ok(c) => c,
            Err(err) => {
                warn!(%err, connection_id = %self.connection_id, "ignoring malformed command");
                return;
            }
        };

        match command {
            Command::Auth { data } => self.handle_auth(data).await,
            Command::Subscribe { routing_key } => self.handle_subscribe(routing_key).await,
            Command::Unsubscribe { routing_key } => self.handle_unsubscribe(routing_key).await,
        }
    }

    async fn handle_auth(&mut self, data: AuthData) {
        if !matches!(self.state, ConnState::Unauth) {
            warn!(connection_id = %self.connection_id, "ignoring auth command on an already-authenticated connection");
            return;
        }

        let now = chrono::Utc::now().timestamp();
        match auth::verify(&data.token, &self.secret_key, now) {
            Ok(claims) => {
                info!(connection_id = %self.connection_id, user_id = claims.user_id, "connection authenticated");
                self.state = ConnState::Auth(Identity {
                    user_id: claims.user_id,
                    session_id: data.session_id,
                });
            }
            Err(err) => self.fail_auth(err),
        }
    }

    fn fail_auth(&mut self, err: AuthError) {
        warn!(%err, connection_id = %self.connection_id, "authentication failed, closing connection");
        let frame = serde_json::json!({ "error": err.to_string() });
        self.socket.write(frame.to_string());
        self.socket.close();
        self.state = ConnState::Terminating;
    }

    async fn handle_subscribe(&mut self, routing_key: String) {
        let identity = match self.identity() {
            Some(identity) => identity.clone(),
            None => {
                info!(connection_id = %self.connection_id, "ignoring subscribe on unauthenticated connection");
                return;
            }
        };

        if self.subscriptions.contains_key(&routing_key) {
            return;
        }

        if let Some(checker) = &self.membership {
            if !checker.allowed(identity.user_id, &routing_key).await {
                info!(connection_id = %self.connection_id, routing_key = %routing_key, "subscribe denied by membership check");
                return;
            }
        }

        match Pump::start(
            self.broker.clone(),
            self.socket.clone(),
            routing_key.clone(),
            identity.session_id.clone(),
        )
        .await
        {
            Ok(pump) => {
                self.subscriptions.insert(routing_key, pump);
            }
            Err(err) => {
                warn!(%err, connection_id = %self.connection_id, routing_key = %routing_key, "failed to start subscription pump");
            }
        }
    }

    async fn handle_unsubscribe(&mut self, routing_key: String) {
        if self.identity().is_none() {
            info!(connection_id = %self.connection_id, "ignoring unsubscribe on unauthenticated connection");
            return;
        }

        if let Some(pump) = self.subscriptions.remove(&routing_key) {
            pump.stop();
        }
    }

    /// Stop every active pump. Called when the peer closes the socket or
    /// the connection is otherwise torn down.
    pub fn terminate(&mut self) {
        self.state = ConnState::Terminating;
        for (_, pump) in self.subscriptions.drain() {
            pump.stop();
        }
    }
}
