#![forbid(unsafe_code)]

use herald_engines::cipher_config::{generate_key_b64, CipherConfigError};
use herald_engines::envelope::{EnvelopeCipher, EnvelopeError};
use herald_engines::pseudonym::PseudonymHasher;
use herald_engines::telegram::TelegramConfigError;
use herald_kernel_contracts::dispatch::{ChannelAddress, RunSummary};
use herald_kernel_contracts::lifecycle::LifecycleSummary;
use herald_kernel_contracts::ContractViolation;
use herald_os::config::DispatchConfigError;
use herald_os::tick::TickError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    CipherConfig(#[from] CipherConfigError),
    #[error(transparent)]
    TelegramConfig(#[from] TelegramConfigError),
    #[error(transparent)]
    DispatchConfig(#[from] DispatchConfigError),
    #[error(transparent)]
    Tick(#[from] TickError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error("invalid input: {0}")]
    Contract(#[from] ContractViolation),
    #[error("could not read input: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not render output: {0}")]
    Json(#[from] serde_json::Error),
}

/// Seals a channel id for the directory. The input must already be a
/// numeric address so nothing unusable ever gets stored.
pub fn encrypt_channel_id(cipher: &EnvelopeCipher, raw: &str) -> Result<String, ToolError> {
    ChannelAddress::parse(raw)?;
    Ok(cipher.encrypt(raw.trim())?)
}

pub fn pseudonym_for(raw: &str) -> Result<String, ToolError> {
    let identifier = raw.trim();
    if identifier.is_empty() {
        return Err(ToolError::Usage("identifier must not be empty".to_string()));
    }
    Ok(PseudonymHasher::new().hash(identifier).as_str().to_string())
}

pub fn keygen() -> String {
    generate_key_b64()
}

pub fn render_run_summary(summary: &RunSummary) -> Result<String, ToolError> {
    Ok(serde_json::to_string_pretty(summary)?)
}

pub fn render_lifecycle_summary(summary: &LifecycleSummary) -> Result<String, ToolError> {
    Ok(serde_json::to_string_pretty(summary)?)
}
