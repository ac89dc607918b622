//! Key material and the crypto service boundary.
//!
//! The session never touches cipher primitives directly; it goes through
//! [`CryptoService`]. [`SealedBoxCrypto`] is the shipped implementation.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub mod sealed;

pub use sealed::SealedBoxCrypto;

const AUTH_TOKEN_LABEL: &[u8] = b"pairing:auth-token:v1";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("signing failed: {0}")]
    Sign(String),
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u32),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Keys handed over by the initiator plus the derived auth token.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    public_key: String,
    private_key: String,
    connection_id: String,
    auth_token: String,
}

impl KeyMaterial {
    pub fn new(
        public_key: impl Into<String>,
        private_key: impl Into<String>,
        connection_id: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            public_key: public_key.into(),
            private_key: private_key.into(),
            connection_id: connection_id.into(),
            auth_token: auth_token.into(),
        }
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .field("connection_id", &self.connection_id)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

/// Ciphertext plus the metadata needed to open it.
///
/// Serialized as `{"version":1,"nonce":"<base64>","ciphertext":"<base64>"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub version: u32,
    pub nonce: String,
    pub ciphertext: String,
}

/// Message signed to produce the auth token: the private key signs itself,
/// bound to the connection id so tokens never carry across connections.
pub fn auth_token_message(private_key: &str, connection_id: &str) -> Vec<u8> {
    let mut message =
        Vec::with_capacity(AUTH_TOKEN_LABEL.len() + connection_id.len() + private_key.len() + 2);
    message.extend_from_slice(AUTH_TOKEN_LABEL);
    message.push(0x1f);
    message.extend_from_slice(connection_id.as_bytes());
    message.push(0x1f);
    message.extend_from_slice(private_key.as_bytes());
    message
}

#[async_trait]
pub trait CryptoService: Send + Sync {
    async fn sign(&self, private_key: &str, message: &[u8]) -> CryptoResult<String>;

    async fn encrypt(&self, keys: &KeyMaterial, plaintext: &[u8])
    -> CryptoResult<EncryptedEnvelope>;

    async fn decrypt(&self, keys: &KeyMaterial, envelope: &EncryptedEnvelope)
    -> CryptoResult<Vec<u8>>;
}
