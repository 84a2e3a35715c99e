#![forbid(unsafe_code)]

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{ContractViolation, Validate};

pub const PSEUDONYM_HEX_LEN: usize = 64;

/// Opaque directory identifier. The only user-identifying value that may
/// appear in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local wall-clock hour (0..=23) at which a user wants to be notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DeliveryHour(u8);

impl DeliveryHour {
    pub const MAX: u8 = 23;

    pub fn new(hour: u8) -> Result<Self, ContractViolation> {
        if hour > Self::MAX {
            return Err(ContractViolation::InvalidRange {
                field: "delivery_hour",
                min: 0,
                max: i64::from(Self::MAX),
                got: i64::from(hour),
            });
        }
        Ok(Self(hour))
    }

    /// Wraps a clock hour. Callers pass `Timelike::hour()`, which is always
    /// below 24; anything larger wraps.
    pub fn from_clock_hour(hour: u32) -> Self {
        Self((hour % 24) as u8)
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for DeliveryHour {
    type Error = ContractViolation;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DeliveryHour> for u8 {
    fn from(value: DeliveryHour) -> Self {
        value.0
    }
}

impl fmt::Display for DeliveryHour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Active,
    Trial,
    Expired,
    Cancelled,
}

impl SubscriptionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionState::Active => "active",
            SubscriptionState::Trial => "trial",
            SubscriptionState::Expired => "expired",
            SubscriptionState::Cancelled => "cancelled",
        }
    }
}

/// One-way digest of an external identifier (lowercase hex SHA-256).
///
/// Only ever used as an equality lookup key. Nothing in this workspace can
/// recover the identifier it was computed from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pseudonym(String);

impl Pseudonym {
    pub fn from_digest_hex(digest: impl Into<String>) -> Result<Self, ContractViolation> {
        let digest = digest.into();
        if digest.len() != PSEUDONYM_HEX_LEN {
            return Err(ContractViolation::InvalidValue {
                field: "pseudonym",
                reason: "must be 64 hex chars",
            });
        }
        if !digest
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(ContractViolation::InvalidValue {
                field: "pseudonym",
                reason: "must be lowercase hex",
            });
        }
        Ok(Self(digest))
    }

    pub fn from_digest_bytes(digest: &[u8; PSEUDONYM_HEX_LEN / 2]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Pseudonym {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_digest_hex(value)
    }
}

impl From<Pseudonym> for String {
    fn from(value: Pseudonym) -> Self {
        value.0
    }
}

/// Directory row as seen by the dispatcher. The channel identifier is only
/// ever held here in envelope form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub pseudonym: Pseudonym,
    #[serde(default)]
    pub channel_id_ciphertext: Option<String>,
    #[serde(default)]
    pub partner_pseudonym: Option<Pseudonym>,
    pub subscription_state: SubscriptionState,
    #[serde(default)]
    pub trial_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub subscription_ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub preferred_hour: Option<DeliveryHour>,
}

impl UserRecord {
    pub fn v1(id: UserId, pseudonym: Pseudonym, subscription_state: SubscriptionState) -> Self {
        Self {
            id,
            pseudonym,
            channel_id_ciphertext: None,
            partner_pseudonym: None,
            subscription_state,
            trial_expires_at: None,
            subscription_ends_at: None,
            preferred_hour: None,
        }
    }

    pub fn with_channel_ciphertext(mut self, envelope: impl Into<String>) -> Self {
        self.channel_id_ciphertext = Some(envelope.into());
        self
    }

    pub fn with_partner(mut self, partner: Pseudonym) -> Self {
        self.partner_pseudonym = Some(partner);
        self
    }

    pub fn with_preferred_hour(mut self, hour: DeliveryHour) -> Self {
        self.preferred_hour = Some(hour);
        self
    }

    pub fn with_trial_expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.trial_expires_at = Some(at);
        self
    }

    pub fn with_subscription_ends_at(mut self, at: DateTime<Utc>) -> Self {
        self.subscription_ends_at = Some(at);
        self
    }

    /// Paid subscription, or a trial that has not yet run out.
    pub fn has_live_subscription(&self, now: DateTime<Utc>) -> bool {
        match self.subscription_state {
            SubscriptionState::Active => true,
            SubscriptionState::Trial => self.trial_expires_at.is_some_and(|at| at > now),
            SubscriptionState::Expired | SubscriptionState::Cancelled => false,
        }
    }

    /// Selection predicate for one dispatch tick.
    ///
    /// A missing `preferred_hour` never matches: no preference means do not
    /// disturb, not any hour.
    pub fn is_eligible_at(&self, hour: DeliveryHour, now: DateTime<Utc>) -> bool {
        self.has_live_subscription(now)
            && self.channel_id_ciphertext.is_some()
            && self.preferred_hour == Some(hour)
    }

    pub fn subscription_ended(&self, now: DateTime<Utc>) -> bool {
        self.subscription_state == SubscriptionState::Active
            && self.subscription_ends_at.is_some_and(|at| at <= now)
    }

    pub fn subscription_ending_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.subscription_state == SubscriptionState::Active
            && self
                .subscription_ends_at
                .is_some_and(|at| at > now && at <= now + window)
    }

    pub fn trial_ended(&self, now: DateTime<Utc>) -> bool {
        self.subscription_state == SubscriptionState::Trial
            && self.trial_expires_at.is_some_and(|at| at <= now)
    }

    pub fn trial_ending_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.subscription_state == SubscriptionState::Trial
            && self
                .trial_expires_at
                .is_some_and(|at| at > now && at <= now + window)
    }
}

impl Validate for UserRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if let Some(envelope) = &self.channel_id_ciphertext {
            if envelope.trim().is_empty() {
                return Err(ContractViolation::InvalidValue {
                    field: "user_record.channel_id_ciphertext",
                    reason: "must not be blank when present",
                });
            }
        }
        if self.partner_pseudonym.as_ref() == Some(&self.pseudonym) {
            return Err(ContractViolation::InvalidValue {
                field: "user_record.partner_pseudonym",
                reason: "must not reference the record itself",
            });
        }
        Ok(())
    }
}
