#![forbid(unsafe_code)]

use std::env;
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

pub const ENV_ENCRYPTION_KEY: &str = "HERALD_ENCRYPTION_KEY";
pub const ENV_ENCRYPTION_CIPHER: &str = "HERALD_ENCRYPTION_CIPHER";
pub const KEY_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherAlgorithm {
    Aes256Gcm,
}

impl CipherAlgorithm {
    pub fn parse(raw: &str) -> Result<Self, CipherConfigError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "aes-256-gcm" => Ok(CipherAlgorithm::Aes256Gcm),
            other => Err(CipherConfigError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CipherAlgorithm::Aes256Gcm => "aes-256-gcm",
        }
    }
}

/// Startup-time failures. None of these carry key material.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherConfigError {
    #[error("encryption key is not configured ({0} is unset or blank)")]
    MissingKey(&'static str),
    #[error("encryption key is not valid base64")]
    KeyNotBase64,
    #[error("encryption key must decode to 32 bytes, got {got}")]
    KeyLength { got: usize },
    #[error("unsupported cipher algorithm '{0}'")]
    UnsupportedAlgorithm(String),
}

/// Immutable cipher settings, built once at startup and shared by reference.
#[derive(Clone)]
pub struct CipherConfig {
    algorithm: CipherAlgorithm,
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl CipherConfig {
    pub fn new(algorithm: CipherAlgorithm, key_b64: &str) -> Result<Self, CipherConfigError> {
        let trimmed = key_b64.trim();
        if trimmed.is_empty() {
            return Err(CipherConfigError::MissingKey(ENV_ENCRYPTION_KEY));
        }
        let decoded = Zeroizing::new(
            BASE64
                .decode(trimmed.as_bytes())
                .map_err(|_| CipherConfigError::KeyNotBase64)?,
        );
        if decoded.len() != KEY_LEN {
            return Err(CipherConfigError::KeyLength { got: decoded.len() });
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&decoded);
        Ok(Self { algorithm, key })
    }

    pub fn from_key_bytes(algorithm: CipherAlgorithm, key: [u8; KEY_LEN]) -> Self {
        Self {
            algorithm,
            key: Zeroizing::new(key),
        }
    }

    pub fn from_env() -> Result<Self, CipherConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, CipherConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let algorithm = match lookup(ENV_ENCRYPTION_CIPHER) {
            Some(raw) if !raw.trim().is_empty() => CipherAlgorithm::parse(&raw)?,
            _ => CipherAlgorithm::Aes256Gcm,
        };
        let key_b64 =
            lookup(ENV_ENCRYPTION_KEY).ok_or(CipherConfigError::MissingKey(ENV_ENCRYPTION_KEY))?;
        Self::new(algorithm, &key_b64)
    }

    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    pub(crate) fn key_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }
}

impl fmt::Debug for CipherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherConfig")
            .field("algorithm", &self.algorithm)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Fresh random key in the configured text encoding.
pub fn generate_key_b64() -> String {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(&mut key[..]);
    BASE64.encode(&key[..])
}
