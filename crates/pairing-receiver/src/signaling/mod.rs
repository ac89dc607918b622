use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod memory;
pub mod websocket;

pub use memory::MemorySignaling;
pub use websocket::WebSocketSignaling;

/// Named signals carried by the signaling channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
    Open,
    Close,
    Error,
    Custom(String),
}

impl SignalKind {
    pub fn as_str(&self) -> &str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Candidate => "candidate",
            SignalKind::Open => "open",
            SignalKind::Close => "close",
            SignalKind::Error => "error",
            SignalKind::Custom(name) => name.as_str(),
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "offer" => SignalKind::Offer,
            "answer" => SignalKind::Answer,
            "candidate" => SignalKind::Candidate,
            "open" => SignalKind::Open,
            "close" => SignalKind::Close,
            "error" => SignalKind::Error,
            other => SignalKind::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for SignalKind {
    fn from(name: &str) -> Self {
        SignalKind::from_name(name)
    }
}

impl Serialize for SignalKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SignalKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(SignalKind::from_name(&name))
    }
}

/// One message on the signaling wire: `{"signal": "<name>", "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalFrame {
    pub signal: SignalKind,
    #[serde(default)]
    pub payload: Value,
}

impl SignalFrame {
    pub fn new(signal: SignalKind, payload: Value) -> Self {
        Self { signal, payload }
    }
}

/// Query parameters sent when joining the signaling channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectParams(BTreeMap<String, String>);

impl ConnectParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConnectParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("invalid signaling address: {0}")]
    InvalidAddress(String),
    #[error("signaling connect failed: {0}")]
    Connect(String),
    #[error("signaling channel is not connected")]
    NotConnected,
    #[error("signaling channel closed")]
    ChannelClosed,
}

pub type SignalingResult<T> = Result<T, SignalingError>;

/// Relayed publish/subscribe transport used to bootstrap the peer connection.
///
/// `connect` returns the stream of inbound frames. Transport-level lifecycle
/// (socket closed, socket error) is reported on the same stream as
/// [`SignalKind::Close`] / [`SignalKind::Error`] frames.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn connect(
        &self,
        address: &str,
        params: &ConnectParams,
    ) -> SignalingResult<mpsc::UnboundedReceiver<SignalFrame>>;

    fn send(&self, frame: SignalFrame) -> SignalingResult<()>;

    fn is_open(&self) -> bool;

    async fn close(&self);
}
