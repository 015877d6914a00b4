//! The axum app: a single `/events` WebSocket route wired to a
//! `ConnectionHandler` per upgrade.
//!
//! Builder pattern grounded on the teacher's `GraphQLServerBuilder` /
//! `GraphQLServer::run` in `src/server/graphql.rs`: an owned builder that
//! accumulates configuration, then `run` constructs the `Router` and
//! serves it with `axum::Server::bind`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::broker::BrokerAdapter;
use crate::connection::{ConnectionHandler, MembershipChecker};
use crate::socket::AxumSocket;

const SOCKET_BUFFER: usize = 32;

#[derive(Clone)]
struct AppState {
    broker: Arc<dyn BrokerAdapter>,
    secret_key: Vec<u8>,
    membership: Option<Arc<dyn MembershipChecker>>,
}

pub struct GatewayServerConfig {
    pub port: u16,
    pub cors_enabled: bool,
}

impl Default for GatewayServerConfig {
    fn default() -> Self {
        Self {
            port: 8888,
            cors_enabled: true,
        }
    }
}

pub struct GatewayServer {
    config: GatewayServerConfig,
    broker: Option<Arc<dyn BrokerAdapter>>,
    secret_key: Option<Vec<u8>>,
    membership: Option<Arc<dyn MembershipChecker>>,
}

impl GatewayServer {
    pub fn new() -> Self {
        Self {
            config: GatewayServerConfig::default(),
            broker: None,
            secret_key: None,
            membership: None,
        }
    }

    pub fn with_config(mut self, config: GatewayServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_broker(mut self, broker: Arc<dyn BrokerAdapter>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_secret_key(mut self, secret_key: Vec<u8>) -> Self {
        self.secret_key = Some(secret_key);
        self
    }

    pub fn with_membership_checker(mut self, checker: Arc<dyn MembershipChecker>) -> Self {
        self.membership = Some(checker);
        self
    }

    pub async fn run(self) -> crate::Result<()> {
        let broker = self
            .broker
            .ok_or_else(|| crate::GatewayError::Config("broker adapter not configured".into()))?;
        let secret_key = self
            .secret_key
            .ok_or_else(|| crate::GatewayError::Config("secret_key not configured".into()))?;

        let state = AppState {
            broker,
            secret_key,
            membership: self.membership,
        };

        let mut app = Router::new()
            .route("/events", get(events_handler))
            .with_state(state);

        if self.config.cors_enabled {
            app = app.layer(CorsLayer::permissive());
        }

        let addr = format!("0.0.0.0:{}", self.config.port);
        info!(%addr, "starting event gateway");

        axum::Server::bind(&addr.parse().map_err(|e: std::net::AddrParseError| {
            crate::GatewayError::Config(e.to_string())
        })?)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| crate::GatewayError::Config(e.to_string()))?;

        Ok(())
    }
}

impl Default for GatewayServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder facade mirroring the teacher's separate `*Builder` type.
pub struct GatewayServerBuilder {
    server: GatewayServer,
}

impl GatewayServerBuilder {
    pub fn new() -> Self {
        Self {
            server: GatewayServer::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.server.config.port = port;
        self
    }

    pub fn with_broker(mut self, broker: Arc<dyn BrokerAdapter>) -> Self {
        self.server = self.server.with_broker(broker);
        self
    }

    pub fn with_secret_key(mut self, secret_key: Vec<u8>) -> Self {
        self.server = self.server.with_secret_key(secret_key);
        self
    }

    pub fn with_membership_checker(mut self, checker: Arc<dyn MembershipChecker>) -> Self {
        self.server = self.server.with_membership_checker(checker);
        self
    }

    pub async fn run(self) -> crate::Result<()> {
        self.server.run().await
    }
}

impl Default for GatewayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn events_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, addr, state))
}

async fn handle_connection(socket: axum::extract::ws::WebSocket, addr: SocketAddr, state: AppState) {
    let (client_socket, mut receiver) = AxumSocket::spawn(socket, addr.to_string(), SOCKET_BUFFER);

    let mut handler = ConnectionHandler::new(
        state.broker.clone(),
        client_socket,
        state.secret_key.clone(),
        state.membership.clone(),
    );

    while let Some(message) = receiver.next().await {
        let message = match message {
            Ok(m) => m,
            Err(err) => {
                warn!(%err, remote_addr = %addr, "websocket read error");
                break;
            }
        };

        match message {
            WsMessage::Text(text) => handler.handle_frame(&text).await,
            WsMessage::Close(_) => break,
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Binary(_) => {}
        }
    }

    handler.terminate();
    info!(remote_addr = %addr, connection_id = %handler.connection_id(), "connection closed");
}
