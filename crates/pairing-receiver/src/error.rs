use thiserror::Error;

use crate::crypto::CryptoError;
use crate::peer::PeerError;
use crate::session::NegotiationState;
use crate::signaling::SignalingError;

/// Errors surfaced by [`crate::PairingSession`] operations.
///
/// Every failure is scoped to the current pairing attempt. Failures that occur
/// inside detached tasks (peer events, timeouts) are not returned from any call;
/// they move the session to [`NegotiationState::Failed`] and invoke the bound
/// peer `error` handler instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PairingError {
    #[error("key material has not been installed")]
    KeysNotInstalled,
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),
    #[error("crypto operation failed: {0}")]
    CryptoFailure(String),
    #[error("decryption failed: {0}")]
    DecryptionFailure(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("signaling connection failed: {0}")]
    ConnectionFailure(String),
    #[error("negotiation failed: {0}")]
    NegotiationFailure(String),
    #[error("another offer is already being answered")]
    NegotiationInProgress,
    #[error("operation not permitted while {0}")]
    InvalidState(NegotiationState),
    #[error("peer transport error: {0}")]
    TransportFailure(String),
}

pub type PairingResult<T> = Result<T, PairingError>;

impl From<CryptoError> for PairingError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Sign(_) | CryptoError::Encrypt(_) => {
                PairingError::CryptoFailure(err.to_string())
            }
            CryptoError::Decrypt(_) | CryptoError::UnsupportedVersion(_) => {
                PairingError::DecryptionFailure(err.to_string())
            }
        }
    }
}

impl From<PeerError> for PairingError {
    fn from(err: PeerError) -> Self {
        match err {
            PeerError::Setup(_) | PeerError::Negotiation(_) | PeerError::Candidate(_) => {
                PairingError::NegotiationFailure(err.to_string())
            }
            PeerError::NotConnected | PeerError::Send(_) => {
                PairingError::TransportFailure(err.to_string())
            }
        }
    }
}

impl From<SignalingError> for PairingError {
    fn from(err: SignalingError) -> Self {
        PairingError::ConnectionFailure(err.to_string())
    }
}
