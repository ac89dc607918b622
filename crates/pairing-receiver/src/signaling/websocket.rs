use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message, error::ProtocolError},
};
use url::Url;

use super::{
    ConnectParams, SignalFrame, SignalKind, SignalingChannel, SignalingError, SignalingResult,
};
use crate::config::DEFAULT_HEARTBEAT_INTERVAL;

const HEARTBEAT_SIGNAL: &str = "ping";

enum Outbound {
    Frame(SignalFrame),
    Close,
}

struct Connection {
    send_tx: mpsc::UnboundedSender<Outbound>,
    tasks: Vec<JoinHandle<()>>,
}

/// Signaling over a relay WebSocket, one JSON [`SignalFrame`] per text message.
pub struct WebSocketSignaling {
    heartbeat: Duration,
    connection: Mutex<Option<Connection>>,
}

impl WebSocketSignaling {
    pub fn new(heartbeat: Duration) -> Self {
        Self {
            heartbeat,
            connection: Mutex::new(None),
        }
    }

    fn shutdown(&self) {
        if let Some(connection) = self.connection.lock().take() {
            let _ = connection.send_tx.send(Outbound::Close);
            // The writer is left to flush the close frame; it exits on its own.
            for task in connection.tasks.iter().skip(1) {
                task.abort();
            }
        }
    }
}

impl Default for WebSocketSignaling {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL)
    }
}

impl Drop for WebSocketSignaling {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl SignalingChannel for WebSocketSignaling {
    async fn connect(
        &self,
        address: &str,
        params: &ConnectParams,
    ) -> SignalingResult<mpsc::UnboundedReceiver<SignalFrame>> {
        self.shutdown();

        let url = build_signaling_url(address, params)?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| SignalingError::Connect(format!("websocket connect failed: {err}")))?;
        tracing::debug!(
            target = "pairing",
            host = url.host_str().unwrap_or_default(),
            path = url.path(),
            "signaling websocket connected"
        );
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<Outbound>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<SignalFrame>();

        let writer_handle = tokio::spawn(async move {
            while let Some(outbound) = send_rx.recv().await {
                match outbound {
                    Outbound::Frame(frame) => {
                        let text = match serde_json::to_string(&frame) {
                            Ok(text) => text,
                            Err(err) => {
                                tracing::warn!(
                                    target = "pairing",
                                    signal = %frame.signal,
                                    error = %err,
                                    "dropping unserializable signaling frame"
                                );
                                continue;
                            }
                        };
                        if ws_write.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Close => {
                        let _ = ws_write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        let reader_handle = tokio::spawn(async move {
            let mut closing_reason = json!({ "reason": "stream ended" });
            while let Some(msg) = ws_read.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(_) => {
                            tracing::debug!(target = "pairing", "ignoring non-utf8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|frame| frame.reason.to_string())
                            .unwrap_or_default();
                        closing_reason = json!({ "reason": reason });
                        break;
                    }
                    Ok(_) => continue,
                    Err(err) => {
                        match &err {
                            WsError::ConnectionClosed
                            | WsError::AlreadyClosed
                            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                                tracing::debug!(
                                    target = "pairing",
                                    "signaling websocket closed: {err}"
                                );
                            }
                            _ => {
                                tracing::warn!(
                                    target = "pairing",
                                    "signaling websocket error: {err}"
                                );
                                let _ = inbound_tx.send(SignalFrame::new(
                                    SignalKind::Error,
                                    json!({ "message": err.to_string() }),
                                ));
                            }
                        }
                        break;
                    }
                };
                tracing::trace!(target = "pairing", event = "ws_in", len = text.len());
                match serde_json::from_str::<SignalFrame>(&text) {
                    Ok(frame) => {
                        if inbound_tx.send(frame).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::debug!(
                            target = "pairing",
                            error = %err,
                            "ignoring unparseable signaling frame"
                        );
                    }
                }
            }
            let _ = inbound_tx.send(SignalFrame::new(SignalKind::Close, closing_reason));
        });

        let mut tasks = vec![writer_handle, reader_handle];
        if !self.heartbeat.is_zero() {
            let heartbeat_tx = send_tx.clone();
            let period = self.heartbeat;
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let ping = SignalFrame::new(
                        SignalKind::Custom(HEARTBEAT_SIGNAL.to_string()),
                        serde_json::Value::Null,
                    );
                    if heartbeat_tx.send(Outbound::Frame(ping)).is_err() {
                        break;
                    }
                }
            }));
        }

        *self.connection.lock() = Some(Connection { send_tx, tasks });
        Ok(inbound_rx)
    }

    fn send(&self, frame: SignalFrame) -> SignalingResult<()> {
        let guard = self.connection.lock();
        let connection = guard.as_ref().ok_or(SignalingError::NotConnected)?;
        connection
            .send_tx
            .send(Outbound::Frame(frame))
            .map_err(|_| SignalingError::ChannelClosed)
    }

    fn is_open(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .map(|connection| {
                !connection.send_tx.is_closed()
                    && connection.tasks.iter().take(2).all(|task| !task.is_finished())
            })
            .unwrap_or(false)
    }

    async fn close(&self) {
        self.shutdown();
    }
}

/// Accepts `ws`/`wss` addresses as-is and maps `http`/`https` onto them, then
/// appends the connect parameters as query pairs.
pub fn build_signaling_url(address: &str, params: &ConnectParams) -> SignalingResult<Url> {
    let mut url = Url::parse(address)
        .map_err(|err| SignalingError::InvalidAddress(format!("{address}: {err}")))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(SignalingError::InvalidAddress(format!(
                "unsupported scheme {other}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| SignalingError::InvalidAddress(format!("cannot use scheme {scheme}")))?;
    if !params.is_empty() {
        let mut query = url.query_pairs_mut();
        for (key, value) in params.iter() {
            query.append_pair(key, value);
        }
    }
    Ok(url)
}
