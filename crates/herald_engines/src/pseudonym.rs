#![forbid(unsafe_code)]

use herald_kernel_contracts::directory::Pseudonym;
use sha2::{Digest, Sha256};

/// Unkeyed SHA-256 over the external identifier.
///
/// Known limitation: anyone able to enumerate the identifier space can
/// precompute digests. Accepted for large numeric platform ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct PseudonymHasher;

impl PseudonymHasher {
    pub fn new() -> Self {
        Self
    }

    pub fn hash(&self, identifier: &str) -> Pseudonym {
        let digest: [u8; 32] = Sha256::digest(identifier.as_bytes()).into();
        Pseudonym::from_digest_bytes(&digest)
    }
}
