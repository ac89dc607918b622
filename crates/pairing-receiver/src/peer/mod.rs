use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mock;
pub mod rtc;

pub use mock::{MockPeer, MockPeerFactory};
pub use rtc::{WebRtcPeer, WebRtcPeerFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// SDP blob exchanged over signaling, shaped like the browser's
/// `RTCSessionDescriptionInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SdpKind>,
    pub sdp: String,
}

impl SessionDescription {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self {
            kind: None,
            sdp: sdp.into(),
        }
    }

    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: Some(SdpKind::Offer),
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: Some(SdpKind::Answer),
            sdp: sdp.into(),
        }
    }
}

/// Trickled ICE candidate, shaped like the browser's `RTCIceCandidateInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

/// Lifecycle and data events emitted by a peer transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Connected,
    Data(Bytes),
    Closed,
    Error(String),
}

/// Names under which peer events are exposed to session callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerSignal {
    Connect,
    Data,
    Close,
    Error,
}

impl PeerSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerSignal::Connect => "connect",
            PeerSignal::Data => "data",
            PeerSignal::Close => "close",
            PeerSignal::Error => "error",
        }
    }
}

impl fmt::Display for PeerSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("peer setup failed: {0}")]
    Setup(String),
    #[error("offer/answer negotiation failed: {0}")]
    Negotiation(String),
    #[error("ice candidate rejected: {0}")]
    Candidate(String),
    #[error("peer channel is not open")]
    NotConnected,
    #[error("peer send failed: {0}")]
    Send(String),
}

pub type PeerResult<T> = Result<T, PeerError>;

/// A single direct connection attempt with the initiator.
///
/// Instances are single-use: after `close` the session discards the instance
/// and asks the factory for a fresh one.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Applies the remote offer and returns the local answer.
    async fn answer(&self, offer: SessionDescription) -> PeerResult<SessionDescription>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> PeerResult<()>;

    /// Writes one frame to the raw data channel.
    async fn send(&self, frame: Bytes) -> PeerResult<()>;

    /// Hands out the event stream. Returns `None` after the first call.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>>;

    async fn close(&self);
}

#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    async fn create(&self) -> PeerResult<Arc<dyn PeerTransport>>;
}
