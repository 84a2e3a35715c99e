#![forbid(unsafe_code)]

use std::env;

use herald_engines::telegram::TelegramChannel;
use herald_kernel_contracts::dispatch::{ChannelAddress, DeliveryError, ResolvedRecipient};
use tracing::{debug, warn};

pub const ENV_MESSAGE_TEXT: &str = "HERALD_MESSAGE_TEXT";
pub const ENV_PARTNER_MESSAGE_TEXT: &str = "HERALD_PARTNER_MESSAGE_TEXT";

const DEFAULT_MESSAGE_TEXT: &str = "Your daily reminder is here.";
const DEFAULT_PARTNER_MESSAGE_TEXT: &str = "Your partner just received their daily reminder.";

/// Transport that can put text in front of one address.
pub trait DeliveryChannel {
    fn send_text(&self, address: &ChannelAddress, text: &str) -> Result<(), DeliveryError>;
}

impl DeliveryChannel for TelegramChannel {
    fn send_text(&self, address: &ChannelAddress, text: &str) -> Result<(), DeliveryError> {
        self.send_message(address.expose(), text)
    }
}

impl<C> DeliveryChannel for &C
where
    C: DeliveryChannel + ?Sized,
{
    fn send_text(&self, address: &ChannelAddress, text: &str) -> Result<(), DeliveryError> {
        (**self).send_text(address, text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundContent {
    pub primary_text: String,
    pub partner_text: Option<String>,
}

pub trait ContentBuilder {
    fn build(&self, recipient: &ResolvedRecipient) -> Result<OutboundContent, DeliveryError>;
}

/// The collaborator the dispatch loop hands each resolved recipient to.
/// No retries happen behind this seam.
pub trait RecipientDelivery {
    fn deliver(&self, recipient: &ResolvedRecipient) -> Result<(), DeliveryError>;
}

/// Fixed texts from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticContentBuilder {
    primary_text: String,
    partner_text: String,
}

impl StaticContentBuilder {
    pub fn mvp_v1() -> Self {
        Self::new(DEFAULT_MESSAGE_TEXT, DEFAULT_PARTNER_MESSAGE_TEXT)
    }

    pub fn new(primary_text: impl Into<String>, partner_text: impl Into<String>) -> Self {
        Self {
            primary_text: primary_text.into(),
            partner_text: partner_text.into(),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |name: &str, fallback: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };
        Self::new(
            pick(ENV_MESSAGE_TEXT, DEFAULT_MESSAGE_TEXT),
            pick(ENV_PARTNER_MESSAGE_TEXT, DEFAULT_PARTNER_MESSAGE_TEXT),
        )
    }
}

impl ContentBuilder for StaticContentBuilder {
    fn build(&self, recipient: &ResolvedRecipient) -> Result<OutboundContent, DeliveryError> {
        Ok(OutboundContent {
            primary_text: self.primary_text.clone(),
            partner_text: recipient
                .partner_channel_address()
                .map(|_| self.partner_text.clone()),
        })
    }
}

/// Builds content, sends it to the primary address, then best-effort to the
/// partner. Only the primary send decides the outcome.
#[derive(Debug, Clone)]
pub struct ChannelDelivery<B, C>
where
    B: ContentBuilder,
    C: DeliveryChannel,
{
    builder: B,
    channel: C,
}

impl<B, C> ChannelDelivery<B, C>
where
    B: ContentBuilder,
    C: DeliveryChannel,
{
    pub fn new(builder: B, channel: C) -> Self {
        Self { builder, channel }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }
}

impl<B, C> RecipientDelivery for ChannelDelivery<B, C>
where
    B: ContentBuilder,
    C: DeliveryChannel,
{
    fn deliver(&self, recipient: &ResolvedRecipient) -> Result<(), DeliveryError> {
        let content = self.builder.build(recipient)?;
        self.channel
            .send_text(recipient.channel_address(), &content.primary_text)?;
        debug!(user_id = %recipient.user_id(), "primary notification sent");

        if let (Some(partner), Some(text)) = (
            recipient.partner_channel_address(),
            content.partner_text.as_deref(),
        ) {
            match self.channel.send_text(partner, text) {
                Ok(()) => debug!(user_id = %recipient.user_id(), "partner notification sent"),
                Err(err) => warn!(
                    user_id = %recipient.user_id(),
                    kind = err.kind(),
                    error = %err,
                    "partner notification failed"
                ),
            }
        }
        Ok(())
    }
}
