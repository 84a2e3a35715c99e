#![forbid(unsafe_code)]

//! Authenticated envelope for the one durable piece of PII, the messaging
//! channel identifier.
//!
//! Persisted layout (standard base64 with padding over the concatenation):
//!
//! ```text
//! nonce (NONCE_LEN = 12) || tag (TAG_LEN = 16) || ciphertext
//! ```
//!
//! Everything needed to decrypt with the configured key travels in the
//! envelope. Any reader of previously stored data must use exactly this
//! order; note that it differs from the `ciphertext || tag` order the AEAD
//! crate produces natively.

use std::fmt;

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroize;

use crate::cipher_config::{CipherAlgorithm, CipherConfig};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const ENVELOPE_HEADER_LEN: usize = NONCE_LEN + TAG_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecryptFailure {
    Encoding,
    Truncated,
    Authentication,
    NotUtf8,
}

impl DecryptFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            DecryptFailure::Encoding => "encoding",
            DecryptFailure::Truncated => "truncated",
            DecryptFailure::Authentication => "authentication",
            DecryptFailure::NotUtf8 => "not_utf8",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("decryption failed ({})", .0.as_str())]
    DecryptionFailed(DecryptFailure),
    #[error("encryption failed")]
    EncryptionFailed,
}

pub struct EnvelopeCipher {
    algorithm: CipherAlgorithm,
    aead: Aes256Gcm,
}

impl EnvelopeCipher {
    pub fn new(config: &CipherConfig) -> Self {
        let aead = match config.algorithm() {
            CipherAlgorithm::Aes256Gcm => {
                Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(config.key_bytes()))
            }
        };
        Self {
            algorithm: config.algorithm(),
            aead,
        }
    }

    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, EnvelopeError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = match self.aead.encrypt_in_place_detached(
            Nonce::from_slice(&nonce_bytes),
            b"",
            buffer.as_mut_slice(),
        ) {
            Ok(tag) => tag,
            Err(_) => {
                buffer.zeroize();
                return Err(EnvelopeError::EncryptionFailed);
            }
        };

        let mut envelope = Vec::with_capacity(ENVELOPE_HEADER_LEN + buffer.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(tag.as_slice());
        envelope.extend_from_slice(&buffer);
        Ok(BASE64.encode(envelope))
    }

    pub fn decrypt(&self, envelope: &str) -> Result<String, EnvelopeError> {
        let raw = BASE64
            .decode(envelope.trim().as_bytes())
            .map_err(|_| EnvelopeError::DecryptionFailed(DecryptFailure::Encoding))?;
        if raw.len() < ENVELOPE_HEADER_LEN {
            return Err(EnvelopeError::DecryptionFailed(DecryptFailure::Truncated));
        }
        let (nonce_bytes, rest) = raw.split_at(NONCE_LEN);
        let (tag_bytes, ciphertext) = rest.split_at(TAG_LEN);

        let mut buffer = ciphertext.to_vec();
        self.aead
            .decrypt_in_place_detached(
                Nonce::from_slice(nonce_bytes),
                b"",
                buffer.as_mut_slice(),
                Tag::from_slice(tag_bytes),
            )
            .map_err(|_| EnvelopeError::DecryptionFailed(DecryptFailure::Authentication))?;

        String::from_utf8(buffer).map_err(|err| {
            let mut bytes = err.into_bytes();
            bytes.zeroize();
            EnvelopeError::DecryptionFailed(DecryptFailure::NotUtf8)
        })
    }

    /// Absence is not an encryption target: `None` passes through untouched.
    pub fn encrypt_optional(&self, plaintext: Option<&str>) -> Result<Option<String>, EnvelopeError> {
        plaintext.map(|value| self.encrypt(value)).transpose()
    }

    pub fn decrypt_optional(&self, envelope: Option<&str>) -> Result<Option<String>, EnvelopeError> {
        envelope.map(|value| self.decrypt(value)).transpose()
    }
}

impl fmt::Debug for EnvelopeCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeCipher")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}
