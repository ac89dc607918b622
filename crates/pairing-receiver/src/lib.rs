//! Receiver side of an encrypted device-pairing handshake: joins a relayed
//! signaling channel with invitation keys, answers a WebRTC offer, and
//! exchanges sealed messages over the resulting data channel.

pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod peer;
pub mod session;
pub mod signaling;

pub use config::PairingConfig;
pub use crypto::{CryptoService, EncryptedEnvelope, KeyMaterial, SealedBoxCrypto};
pub use error::{PairingError, PairingResult};
pub use peer::{IceCandidate, PeerSignal, SessionDescription};
pub use session::{NegotiationState, PairingSession, PeerMessage, SignalingIdentity};
pub use signaling::{ConnectParams, SignalFrame, SignalKind};
