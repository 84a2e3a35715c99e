#![forbid(unsafe_code)]

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use zeroize::Zeroize;

use crate::directory::UserId;
use crate::ContractViolation;

/// Decrypted messaging address (a numeric chat id).
///
/// Deliberately not `Clone`, `Display` or `Serialize`; `Debug` is redacted and
/// the value is wiped on drop.
pub struct ChannelAddress(i64);

impl ChannelAddress {
    pub fn parse(raw: &str) -> Result<Self, ContractViolation> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "channel_address",
                reason: "must not be empty",
            });
        }
        trimmed
            .parse::<i64>()
            .map(Self)
            .map_err(|_| ContractViolation::InvalidValue {
                field: "channel_address",
                reason: "must be a decimal integer",
            })
    }

    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    /// Only for handing the address to the transport.
    pub fn expose(&self) -> i64 {
        self.0
    }
}

impl fmt::Debug for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChannelAddress(<redacted>)")
    }
}

impl Drop for ChannelAddress {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Addressable form of one eligible user, alive for a single dispatch
/// iteration.
#[derive(Debug)]
pub struct ResolvedRecipient {
    user_id: UserId,
    channel_address: ChannelAddress,
    partner_channel_address: Option<ChannelAddress>,
}

impl ResolvedRecipient {
    pub fn new(
        user_id: UserId,
        channel_address: ChannelAddress,
        partner_channel_address: Option<ChannelAddress>,
    ) -> Self {
        Self {
            user_id,
            channel_address,
            partner_channel_address,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn channel_address(&self) -> &ChannelAddress {
        &self.channel_address
    }

    pub fn partner_channel_address(&self) -> Option<&ChannelAddress> {
        self.partner_channel_address.as_ref()
    }
}

/// Counters for one dispatch run. `processed` counts successful deliveries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub eligible: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub not_attempted: usize,
}

impl RunSummary {
    pub fn attempted(&self) -> usize {
        self.processed + self.skipped + self.failed
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "eligible={} processed={} skipped={} failed={} not_attempted={}",
            self.eligible, self.processed, self.skipped, self.failed, self.not_attempted
        )
    }
}

/// Failure reported by a content builder or delivery channel. Never carries
/// an address, token or message body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("delivery timed out")]
    Timeout,
    #[error("delivery transport failure ({kind})")]
    Transport { kind: &'static str },
    #[error("provider rejected delivery: http {status}: {description}")]
    Rejected { status: u16, description: String },
    #[error("provider returned an unreadable response")]
    InvalidResponse,
    #[error("content could not be built: {0}")]
    Content(String),
    #[error("delivery collaborator panicked")]
    Panicked,
}

impl DeliveryError {
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryError::Timeout => "timeout",
            DeliveryError::Transport { .. } => "transport",
            DeliveryError::Rejected { .. } => "rejected",
            DeliveryError::InvalidResponse => "invalid_response",
            DeliveryError::Content(_) => "content",
            DeliveryError::Panicked => "panicked",
        }
    }
}
