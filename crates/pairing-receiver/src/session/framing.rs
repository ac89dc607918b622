use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::EncryptedEnvelope;
use crate::error::{PairingError, PairingResult};

/// Largest envelope written to the peer channel in one frame. SCTP messages
/// above this size are not reliably delivered by every WebRTC stack.
pub const MAX_PEER_FRAME: usize = 60_000;

/// Plaintext carried inside every envelope on the peer channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl PeerMessage {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

pub fn encode_envelope(envelope: &EncryptedEnvelope) -> PairingResult<Bytes> {
    let encoded = serde_json::to_vec(envelope)
        .map_err(|err| PairingError::CryptoFailure(format!("envelope encode: {err}")))?;
    if encoded.len() > MAX_PEER_FRAME {
        return Err(PairingError::TransportFailure(format!(
            "frame of {} bytes exceeds limit of {MAX_PEER_FRAME}",
            encoded.len()
        )));
    }
    Ok(Bytes::from(encoded))
}

pub fn decode_envelope(frame: &[u8]) -> PairingResult<EncryptedEnvelope> {
    serde_json::from_slice(frame)
        .map_err(|err| PairingError::MalformedPayload(format!("peer frame: {err}")))
}
