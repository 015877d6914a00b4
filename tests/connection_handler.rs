//! Integration tests for the connection handler against an in-memory
//! broker double, covering the literal scenarios from the design
//! (happy path, self-echo suppression, bad token, unauth command,
//! unsubscribe, and the subscribe/unsubscribe idempotence laws).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use event_gateway::broker::{BrokerAdapter, BrokerMessage, Subscription};
use event_gateway::connection::ConnectionHandler;
use event_gateway::socket::ClientSocket;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::mpsc;

type HmacSha256 = Hmac<Sha256>;

const SECRET: &[u8] = b"test-secret";

fn make_token(user_id: i64) -> String {
    let payload = serde_json::json!({ "user_id": user_id, "exp": null });
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap());
    let mut mac = HmacSha256::new_from_slice(SECRET).unwrap();
    mac.update(payload_b64.as_bytes());
    let sig = mac.finalize().into_bytes();
    let sig_hex = sig.iter().map(|b| format!("{b:02x}")).collect::<String>();
    format!("{payload_b64}.{sig_hex}")
}

/// A broker double whose subscriptions are fed by an explicit in-test
/// sender, so tests can publish events without a real Postgres/AMQP server.
#[derive(Default)]
struct FakeBroker {
    senders: Mutex<HashMap<String, mpsc::Sender<BrokerMessage>>>,
}

impl FakeBroker {
    fn publish(&self, routing_key: &str, message: BrokerMessage) {
        if let Some(tx) = self.senders.lock().unwrap().get(routing_key) {
            let _ = tx.try_send(message);
        }
    }
}

#[async_trait]
impl BrokerAdapter for FakeBroker {
    async fn subscribe(&self, routing_key: &str) -> event_gateway::Result<Subscription> {
        let (tx, rx) = mpsc::channel(10);
        self.senders
            .lock()
            .unwrap()
            .insert(routing_key.to_string(), tx);
        let reader = tokio::spawn(async {
            // Kept alive only to hold a JoinHandle; the fake broker feeds
            // `rx` directly via the stored sender instead of a real task.
            std::future::pending::<()>().await
        });
        Ok(Subscription::new(routing_key.to_string(), rx, reader))
    }

    async fn close(&self, sub: Subscription) -> event_gateway::Result<()> {
        sub.shutdown();
        Ok(())
    }
}

/// Captures every frame written to it and whether `close` was called.
#[derive(Default)]
struct FakeSocket {
    frames: Mutex<Vec<String>>,
    closed: Mutex<bool>,
}

impl FakeSocket {
    fn frames(&self) -> Vec<String> {
        self.frames.lock().unwrap().clone()
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

impl ClientSocket for FakeSocket {
    fn write(&self, text: String) {
        self.frames.lock().unwrap().push(text);
    }

    fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }

    fn remote_addr(&self) -> String {
        "test".to_string()
    }
}

fn handler(broker: Arc<FakeBroker>, socket: Arc<FakeSocket>) -> ConnectionHandler {
    ConnectionHandler::new(broker, socket, SECRET.to_vec(), None)
}

#[tokio::test]
async fn happy_path_forwards_tagged_event() {
    let broker = Arc::new(FakeBroker::default());
    let socket = Arc::new(FakeSocket::default());
    let mut conn = handler(broker.clone(), socket.clone());

    let auth = serde_json::json!({
        "cmd": "auth",
        "data": { "token": make_token(7), "sessionId": "s1" }
    });
    conn.handle_frame(&auth.to_string()).await;
    assert_eq!(conn.identity().unwrap().user_id, 7);

    let subscribe =
        serde_json::json!({ "cmd": "subscribe", "routing_key": "project.42.changes" });
    conn.handle_frame(&subscribe.to_string()).await;

    broker.publish(
        "project.42.changes",
        BrokerMessage {
            routing_key: "project.42.changes".into(),
            session_id: Some("s2".into()),
            payload: serde_json::json!({ "session_id": "s2", "body": "hi" }),
        },
    );

    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let frames = socket.frames();
    assert_eq!(frames.len(), 1);
    let parsed: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
    assert_eq!(parsed["routing_key"], "project.42.changes");
    assert_eq!(parsed["body"], "hi");
}

#[tokio::test]
async fn self_echo_is_suppressed() {
    let broker = Arc::new(FakeBroker::default());
    let socket = Arc::new(FakeSocket::default());
    let mut conn = handler(broker.clone(), socket.clone());

    let auth = serde_json::json!({
        "cmd": "auth",
        "data": { "token": make_token(7), "sessionId": "s1" }
    });
    conn.handle_frame(&auth.to_string()).await;
    let subscribe =
        serde_json::json!({ "cmd": "subscribe", "routing_key": "project.42.changes" });
    conn.handle_frame(&subscribe.to_string()).await;

    broker.publish(
        "project.42.changes",
        BrokerMessage {
            routing_key: "project.42.changes".into(),
            session_id: Some("s1".into()),
            payload: serde_json::json!({ "session_id": "s1", "body": "mine" }),
        },
    );

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert!(socket.frames().is_empty());
}

#[tokio::test]
async fn bad_token_sends_error_and_closes() {
    let broker = Arc::new(FakeBroker::default());
    let socket = Arc::new(FakeSocket::default());
    let mut conn = handler(broker, socket.clone());

    let auth = serde_json::json!({
        "cmd": "auth",
        "data": { "token": "garbage", "sessionId": "s1" }
    });
    conn.handle_frame(&auth.to_string()).await;

    assert!(conn.identity().is_none());
    assert_eq!(socket.frames().len(), 1);
    assert!(socket.frames()[0].contains("error"));
    assert!(socket.is_closed());
}

#[tokio::test]
async fn subscribe_before_auth_is_ignored() {
    let broker = Arc::new(FakeBroker::default());
    let socket = Arc::new(FakeSocket::default());
    let mut conn = handler(broker, socket.clone());

    let subscribe = serde_json::json!({ "cmd": "subscribe", "routing_key": "x" });
    conn.handle_frame(&subscribe.to_string()).await;

    assert!(socket.frames().is_empty());
    assert!(!socket.is_closed());
}

#[tokio::test]
async fn unsubscribe_stops_forwarding() {
    let broker = Arc::new(FakeBroker::default());
    let socket = Arc::new(FakeSocket::default());
    let mut conn = handler(broker.clone(), socket.clone());

    let auth = serde_json::json!({
        "cmd": "auth",
        "data": { "token": make_token(7), "sessionId": "s1" }
    });
    conn.handle_frame(&auth.to_string()).await;
    let subscribe =
        serde_json::json!({ "cmd": "subscribe", "routing_key": "project.42.changes" });
    conn.handle_frame(&subscribe.to_string()).await;

    let unsubscribe =
        serde_json::json!({ "cmd": "unsubscribe", "routing_key": "project.42.changes" });
    conn.handle_frame(&unsubscribe.to_string()).await;

    broker.publish(
        "project.42.changes",
        BrokerMessage {
            routing_key: "project.42.changes".into(),
            session_id: Some("s2".into()),
            payload: serde_json::json!({ "body": "late" }),
        },
    );

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert!(socket.frames().is_empty());
}

#[tokio::test]
async fn duplicate_subscribe_is_idempotent() {
    let broker = Arc::new(FakeBroker::default());
    let socket = Arc::new(FakeSocket::default());
    let mut conn = handler(broker.clone(), socket.clone());

    let auth = serde_json::json!({
        "cmd": "auth",
        "data": { "token": make_token(7), "sessionId": "s1" }
    });
    conn.handle_frame(&auth.to_string()).await;

    let subscribe =
        serde_json::json!({ "cmd": "subscribe", "routing_key": "project.42.changes" });
    conn.handle_frame(&subscribe.to_string()).await;
    conn.handle_frame(&subscribe.to_string()).await;

    // Re-subscribing replaced nothing: publishing once is observed once.
    broker.publish(
        "project.42.changes",
        BrokerMessage {
            routing_key: "project.42.changes".into(),
            session_id: None,
            payload: serde_json::json!({ "body": "once" }),
        },
    );
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert_eq!(socket.frames().len(), 1);
}

#[tokio::test]
async fn terminate_stops_all_pumps() {
    let broker = Arc::new(FakeBroker::default());
    let socket = Arc::new(FakeSocket::default());
    let mut conn = handler(broker.clone(), socket.clone());

    let auth = serde_json::json!({
        "cmd": "auth",
        "data": { "token": make_token(7), "sessionId": "s1" }
    });
    conn.handle_frame(&auth.to_string()).await;

    for key in ["a.b", "c.d"] {
        let subscribe = serde_json::json!({ "cmd": "subscribe", "routing_key": key });
        conn.handle_frame(&subscribe.to_string()).await;
    }

    conn.terminate();

    broker.publish(
        "a.b",
        BrokerMessage {
            routing_key: "a.b".into(),
            session_id: None,
            payload: serde_json::json!({ "body": "late" }),
        },
    );

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert!(socket.frames().is_empty());
}
