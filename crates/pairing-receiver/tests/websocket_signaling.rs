use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{
    Query, State,
    ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::time::timeout;
use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder};

use pairing_receiver::peer::MockPeerFactory;
use pairing_receiver::signaling::{SignalingChannel, WebSocketSignaling};
use pairing_receiver::{
    ConnectParams, EncryptedEnvelope, KeyMaterial, NegotiationState, PairingConfig,
    PairingSession, SealedBoxCrypto, SessionDescription, SignalFrame, SignalKind,
};

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = SubscriberBuilder::default()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One-client relay: reports the join query, forwards what the client sends,
/// and pushes whatever the test queues.
#[derive(Clone)]
struct Relay {
    joins: mpsc::UnboundedSender<HashMap<String, String>>,
    received: mpsc::UnboundedSender<String>,
    outbound: Arc<AsyncMutex<Option<mpsc::UnboundedReceiver<String>>>>,
}

struct RelayHandle {
    url: String,
    joins: mpsc::UnboundedReceiver<HashMap<String, String>>,
    received: mpsc::UnboundedReceiver<String>,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl RelayHandle {
    fn push(&self, frame: serde_json::Value) {
        if let Some(outbound) = &self.outbound {
            outbound.send(frame.to_string()).expect("relay running");
        }
    }

    async fn next_received(&mut self) -> SignalFrame {
        let text = timeout(WAIT, self.received.recv())
            .await
            .expect("client frame")
            .expect("relay running");
        serde_json::from_str(&text).expect("signal frame json")
    }
}

async fn spawn_relay() -> RelayHandle {
    let (joins_tx, joins) = mpsc::unbounded_channel();
    let (received_tx, received) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let relay = Relay {
        joins: joins_tx,
        received: received_tx,
        outbound: Arc::new(AsyncMutex::new(Some(outbound_rx))),
    };
    let app = Router::new()
        .route("/signal", get(join_relay))
        .with_state(relay);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind relay");
    let addr = listener.local_addr().expect("relay addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    RelayHandle {
        url: format!("ws://{addr}/signal"),
        joins,
        received,
        outbound: Some(outbound_tx),
    }
}

async fn join_relay(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(relay): State<Relay>,
) -> impl IntoResponse {
    let _ = relay.joins.send(params);
    ws.on_upgrade(move |socket| serve_client(socket, relay))
}

async fn serve_client(socket: WebSocket, relay: Relay) {
    let (mut sink, mut stream) = socket.split();
    if let Some(mut outbound) = relay.outbound.lock().await.take() {
        tokio::spawn(async move {
            while let Some(text) = outbound.recv().await {
                if sink.send(WsMessage::Text(text)).await.is_err() {
                    return;
                }
            }
            let _ = sink.send(WsMessage::Close(None)).await;
        });
    }
    while let Some(Ok(message)) = stream.next().await {
        if let WsMessage::Text(text) = message {
            let _ = relay.received.send(text);
        }
    }
}

fn initiator_keys() -> KeyMaterial {
    KeyMaterial::new("A", "B", "c1", "")
}

#[tokio::test]
async fn session_joins_relay_and_answers_offer() {
    init_tracing();
    let mut relay = spawn_relay().await;
    let session = PairingSession::new(
        PairingConfig::localhost(),
        Arc::new(SealedBoxCrypto::new()),
        Arc::new(WebSocketSignaling::new(Duration::ZERO)),
        Arc::new(MockPeerFactory::answering(SessionDescription::new("R1"))),
    );
    session.install_keys("A", "B", "c1").await.unwrap();
    session.connect(&relay.url, None).await.unwrap();
    session.enable_auto_answer();
    assert!(session.is_signaling_open());
    assert_eq!(session.state(), NegotiationState::AwaitingOffer);

    let join = timeout(WAIT, relay.joins.recv()).await.unwrap().unwrap();
    assert_eq!(join.get("role").map(String::as_str), Some("receiver"));
    assert_eq!(join.get("connectionId").map(String::as_str), Some("c1"));
    assert_eq!(join.get("authToken"), Some(&session.auth_token().unwrap()));

    let offer = SealedBoxCrypto::seal(&initiator_keys(), br#"{"type":"offer","sdp":"O1"}"#)
        .unwrap();
    relay.push(json!({"signal": "offer", "payload": offer}));

    let frame = relay.next_received().await;
    assert_eq!(frame.signal, SignalKind::Answer);
    let envelope: EncryptedEnvelope = serde_json::from_value(frame.payload).unwrap();
    let plaintext = SealedBoxCrypto::open(&initiator_keys(), &envelope).unwrap();
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&plaintext).unwrap(),
        json!({"sdp": "R1"})
    );
    assert_eq!(session.state(), NegotiationState::AnsweringOffer);

    session.close_signaling().await;
    assert!(!session.is_signaling_open());
}

#[tokio::test]
async fn override_params_replace_identity() {
    init_tracing();
    let mut relay = spawn_relay().await;
    let session = PairingSession::new(
        PairingConfig::localhost(),
        Arc::new(SealedBoxCrypto::new()),
        Arc::new(WebSocketSignaling::new(Duration::ZERO)),
        Arc::new(MockPeerFactory::answering(SessionDescription::new("R1"))),
    );
    session.install_keys("A", "B", "c1").await.unwrap();
    session
        .connect(&relay.url, Some(ConnectParams::new().with("room", "lab-7")))
        .await
        .unwrap();

    let join = timeout(WAIT, relay.joins.recv()).await.unwrap().unwrap();
    assert_eq!(join.len(), 1);
    assert_eq!(join.get("room").map(String::as_str), Some("lab-7"));
}

#[tokio::test]
async fn heartbeat_pings_the_relay() {
    init_tracing();
    let mut relay = spawn_relay().await;
    let signaling = WebSocketSignaling::new(Duration::from_millis(50));
    let _inbound = signaling
        .connect(&relay.url, &ConnectParams::new())
        .await
        .unwrap();

    let frame = relay.next_received().await;
    assert_eq!(frame.signal, SignalKind::Custom("ping".into()));
    assert_eq!(frame.payload, serde_json::Value::Null);
}

#[tokio::test]
async fn relay_close_is_reported_as_signal() {
    init_tracing();
    let mut relay = spawn_relay().await;
    let signaling = WebSocketSignaling::new(Duration::ZERO);
    let mut inbound = signaling
        .connect(&relay.url, &ConnectParams::new().with("role", "receiver"))
        .await
        .unwrap();
    timeout(WAIT, relay.joins.recv()).await.unwrap().unwrap();

    relay.push(json!({"signal": "device-info", "payload": {"name": "tablet"}}));
    let frame = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    assert_eq!(frame.signal, SignalKind::Custom("device-info".into()));
    assert_eq!(frame.payload, json!({"name": "tablet"}));

    relay.outbound = None;
    let closed = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    assert_eq!(closed.signal, SignalKind::Close);
}
