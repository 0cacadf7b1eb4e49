//! AES-256-GCM encryption for secrets at rest.
//!
//! Every encryption draws a fresh 96-bit nonce; the nonce travels with the
//! ciphertext inside a versioned envelope:
//!
//! ```text
//! v1:<base64url-no-pad(nonce || ciphertext || tag)>
//! ```
//!
//! Decryption fails closed: a bad prefix, undecodable payload, short payload
//! or authentication failure all yield [`CryptoError::DecryptFailed`].

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD},
    Engine,
};
use std::fmt;
use thiserror::Error;

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Envelope prefix for the current format.
const ENVELOPE_PREFIX: &str = "v1:";

/// Encryption errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The encryptor was built without key material.
    #[error("encryptor not initialized")]
    NotInitialized,
    /// Key material did not decode to exactly 32 bytes.
    #[error("encryption key must decode to exactly 32 bytes")]
    InvalidKeyLength,
    /// The cipher refused to seal the plaintext.
    #[error("encryption failed")]
    EncryptFailed,
    /// Envelope is malformed or failed authentication.
    #[error("decryption failed")]
    DecryptFailed,
}

/// Authenticated symmetric encryptor.
///
/// Built once at startup from the process-wide key; cloning shares no
/// mutable state.
#[derive(Clone, Default)]
pub struct Encryptor {
    cipher: Option<Aes256Gcm>,
}

impl fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encryptor")
            .field("initialized", &self.cipher.is_some())
            .finish()
    }
}

impl Encryptor {
    /// Builds an encryptor from key material.
    ///
    /// Accepted encodings, tried in order: base64 (standard or URL-safe,
    /// padded or not), hex, then the raw string itself.
    pub fn new(key_material: &str) -> Result<Self, CryptoError> {
        let key = parse_key(key_material)?;
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::InvalidKeyLength)?;
        Ok(Self {
            cipher: Some(cipher),
        })
    }

    /// An encryptor with no key. Every operation fails with
    /// [`CryptoError::NotInitialized`].
    pub fn uninitialized() -> Self {
        Self::default()
    }

    /// Encrypts `plaintext` into a `v1:` envelope.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let cipher = self.cipher.as_ref().ok_or(CryptoError::NotInitialized)?;

        // Generate random nonce (never reuse!)
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptFailed)?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + sealed.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&sealed);

        Ok(format!("{}{}", ENVELOPE_PREFIX, URL_SAFE_NO_PAD.encode(payload)))
    }

    /// Decrypts an envelope produced by [`Encryptor::encrypt`].
    pub fn decrypt(&self, envelope: &str) -> Result<String, CryptoError> {
        let cipher = self.cipher.as_ref().ok_or(CryptoError::NotInitialized)?;

        let encoded = envelope
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or(CryptoError::DecryptFailed)?;
        let payload = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| CryptoError::DecryptFailed)?;
        if payload.len() < NONCE_SIZE {
            return Err(CryptoError::DecryptFailed);
        }

        let (nonce, sealed) = payload.split_at(NONCE_SIZE);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::DecryptFailed)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptFailed)
    }
}

/// Decodes key material to exactly [`KEY_SIZE`] bytes.
pub fn parse_key(material: &str) -> Result<Vec<u8>, CryptoError> {
    if material.is_empty() {
        return Err(CryptoError::InvalidKeyLength);
    }

    for engine in [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD] {
        if let Ok(bytes) = engine.decode(material) {
            if bytes.len() == KEY_SIZE {
                return Ok(bytes);
            }
        }
    }

    if let Ok(bytes) = hex::decode(material) {
        if bytes.len() == KEY_SIZE {
            return Ok(bytes);
        }
    }

    if material.len() == KEY_SIZE {
        return Ok(material.as_bytes().to_vec());
    }

    Err(CryptoError::InvalidKeyLength)
}
