use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::{CryptoError, CryptoResult, CryptoService, EncryptedEnvelope, KeyMaterial};

pub const ENVELOPE_VERSION: u32 = 1;
const HKDF_INFO_AEAD: &[u8] = b"pairing:envelope:aead:v1";
const AAD_LABEL: &[u8] = b"pairing:envelope";
const NONCE_LENGTH: usize = 12;

/// HMAC-SHA256 auth tokens and ChaCha20-Poly1305 envelopes.
///
/// The AEAD key is `HKDF-SHA256(salt = public key, ikm = private key)`. The
/// connection id is bound in as associated data, so an envelope only opens
/// under the exact key material that sealed it.
#[derive(Debug, Default, Clone, Copy)]
pub struct SealedBoxCrypto;

impl SealedBoxCrypto {
    pub fn new() -> Self {
        Self
    }

    pub fn sign_token(private_key: &str, message: &[u8]) -> CryptoResult<String> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(private_key.as_bytes())
            .map_err(|err| CryptoError::Sign(format!("hmac init failed: {err}")))?;
        mac.update(message);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    pub fn seal(keys: &KeyMaterial, plaintext: &[u8]) -> CryptoResult<EncryptedEnvelope> {
        let key = derive_envelope_key(keys).map_err(CryptoError::Encrypt)?;
        let cipher = ChaCha20Poly1305::new_from_slice(key.as_slice())
            .map_err(|err| CryptoError::Encrypt(format!("invalid key: {err}")))?;
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let aad = build_aad(keys.connection_id());
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|err| CryptoError::Encrypt(err.to_string()))?;

        Ok(EncryptedEnvelope {
            version: ENVELOPE_VERSION,
            nonce: BASE64_STANDARD.encode(nonce_bytes),
            ciphertext: BASE64_STANDARD.encode(ciphertext),
        })
    }

    pub fn open(keys: &KeyMaterial, envelope: &EncryptedEnvelope) -> CryptoResult<Vec<u8>> {
        if envelope.version != ENVELOPE_VERSION {
            return Err(CryptoError::UnsupportedVersion(envelope.version));
        }
        let nonce_bytes = BASE64_STANDARD
            .decode(envelope.nonce.as_bytes())
            .map_err(|err| CryptoError::Decrypt(format!("invalid nonce encoding: {err}")))?;
        if nonce_bytes.len() != NONCE_LENGTH {
            return Err(CryptoError::Decrypt("unexpected nonce length".into()));
        }
        let ciphertext = BASE64_STANDARD
            .decode(envelope.ciphertext.as_bytes())
            .map_err(|err| CryptoError::Decrypt(format!("invalid ciphertext encoding: {err}")))?;
        let key = derive_envelope_key(keys).map_err(CryptoError::Decrypt)?;
        let cipher = ChaCha20Poly1305::new_from_slice(key.as_slice())
            .map_err(|err| CryptoError::Decrypt(format!("invalid key: {err}")))?;
        let aad = build_aad(keys.connection_id());
        cipher
            .decrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::Decrypt("authentication tag mismatch".into()))
    }
}

#[async_trait]
impl CryptoService for SealedBoxCrypto {
    async fn sign(&self, private_key: &str, message: &[u8]) -> CryptoResult<String> {
        Self::sign_token(private_key, message)
    }

    async fn encrypt(
        &self,
        keys: &KeyMaterial,
        plaintext: &[u8],
    ) -> CryptoResult<EncryptedEnvelope> {
        Self::seal(keys, plaintext)
    }

    async fn decrypt(
        &self,
        keys: &KeyMaterial,
        envelope: &EncryptedEnvelope,
    ) -> CryptoResult<Vec<u8>> {
        Self::open(keys, envelope)
    }
}

fn derive_envelope_key(keys: &KeyMaterial) -> Result<Zeroizing<[u8; 32]>, String> {
    let hkdf = Hkdf::<Sha256>::new(
        Some(keys.public_key().as_bytes()),
        keys.private_key().as_bytes(),
    );
    let mut key = Zeroizing::new([0u8; 32]);
    hkdf.expand(HKDF_INFO_AEAD, key.as_mut_slice())
        .map_err(|err| format!("envelope hkdf expand failed: {err}"))?;
    Ok(key)
}

fn build_aad(connection_id: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(AAD_LABEL.len() + connection_id.len() + 1);
    aad.extend_from_slice(AAD_LABEL);
    aad.push(0x1f);
    aad.extend_from_slice(connection_id.as_bytes());
    aad
}
