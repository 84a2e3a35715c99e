#![forbid(unsafe_code)]

use std::env;
use std::fmt;
use std::time::Duration;

use herald_kernel_contracts::dispatch::DeliveryError;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

pub const ENV_TELEGRAM_BOT_TOKEN: &str = "HERALD_TELEGRAM_BOT_TOKEN";
pub const ENV_TELEGRAM_API_BASE: &str = "HERALD_TELEGRAM_API_BASE";
pub const ENV_TELEGRAM_CONNECT_TIMEOUT_MS: &str = "HERALD_TELEGRAM_CONNECT_TIMEOUT_MS";
pub const ENV_TELEGRAM_READ_TIMEOUT_MS: &str = "HERALD_TELEGRAM_READ_TIMEOUT_MS";

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const MAX_DESCRIPTION_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TelegramConfigError {
    #[error("telegram bot token is not configured (HERALD_TELEGRAM_BOT_TOKEN)")]
    MissingToken,
    #[error("{field} must be an integer in [100, 120000]")]
    InvalidTimeout { field: &'static str },
    #[error("telegram api base must be an http(s) url")]
    InvalidApiBase,
}

#[derive(Clone, PartialEq, Eq)]
pub struct TelegramConfig {
    bot_token: String,
    pub api_base: String,
    pub connect_timeout_ms: u32,
    pub read_timeout_ms: u32,
}

impl TelegramConfig {
    pub fn mvp_v1(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            connect_timeout_ms: 5_000,
            read_timeout_ms: 10_000,
        }
    }

    pub fn from_env() -> Result<Self, TelegramConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, TelegramConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup(ENV_TELEGRAM_BOT_TOKEN)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(TelegramConfigError::MissingToken)?;
        let mut config = Self::mvp_v1(token);
        if let Some(base) = lookup(ENV_TELEGRAM_API_BASE).filter(|v| !v.trim().is_empty()) {
            config.api_base = base.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_TELEGRAM_CONNECT_TIMEOUT_MS) {
            config.connect_timeout_ms = parse_timeout_ms(ENV_TELEGRAM_CONNECT_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_TELEGRAM_READ_TIMEOUT_MS) {
            config.read_timeout_ms = parse_timeout_ms(ENV_TELEGRAM_READ_TIMEOUT_MS, &raw)?;
        }
        Ok(config)
    }

    fn send_message_url(&self) -> Result<String, TelegramConfigError> {
        let base = self.api_base.trim_end_matches('/');
        if !(base.starts_with("https://") || base.starts_with("http://")) {
            return Err(TelegramConfigError::InvalidApiBase);
        }
        Ok(format!("{base}/bot{}/sendMessage", self.bot_token))
    }
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("read_timeout_ms", &self.read_timeout_ms)
            .finish()
    }
}

fn parse_timeout_ms(field: &'static str, raw: &str) -> Result<u32, TelegramConfigError> {
    raw.trim()
        .parse::<u32>()
        .ok()
        .filter(|v| (100..=120_000).contains(v))
        .ok_or(TelegramConfigError::InvalidTimeout { field })
}

#[derive(Debug, Deserialize)]
struct BotApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Bot API `sendMessage` over blocking HTTP. Each call is bounded by the
/// configured connect and read/write timeouts.
pub struct TelegramChannel {
    agent: ureq::Agent,
    send_url: String,
}

impl TelegramChannel {
    pub fn new(config: &TelegramConfig) -> Result<Self, TelegramConfigError> {
        let send_url = config.send_message_url()?;
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_millis(u64::from(config.connect_timeout_ms)))
            .timeout_read(Duration::from_millis(u64::from(config.read_timeout_ms)))
            .timeout_write(Duration::from_millis(u64::from(config.read_timeout_ms)))
            .user_agent("herald-dispatcher/0.1")
            .try_proxy_from_env(false)
            .build();
        Ok(Self { agent, send_url })
    }

    pub fn send_message(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError> {
        if text.trim().is_empty() {
            return Err(DeliveryError::Content("message text is empty".to_string()));
        }
        let payload = json!({ "chat_id": chat_id, "text": text });
        match self
            .agent
            .post(&self.send_url)
            .set("Accept", "application/json")
            .send_json(payload)
        {
            Ok(response) => {
                let body: BotApiResponse = response
                    .into_json()
                    .map_err(|_| DeliveryError::InvalidResponse)?;
                if body.ok {
                    Ok(())
                } else {
                    Err(DeliveryError::Rejected {
                        status: 200,
                        description: safe_description(body.description),
                    })
                }
            }
            Err(ureq::Error::Status(status, response)) => {
                let description = response
                    .into_json::<BotApiResponse>()
                    .ok()
                    .and_then(|body| body.description);
                Err(DeliveryError::Rejected {
                    status,
                    description: safe_description(description),
                })
            }
            Err(ureq::Error::Transport(transport)) => Err(error_from_transport(transport)),
        }
    }
}

impl fmt::Debug for TelegramChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramChannel")
            .field("send_url", &"<redacted>")
            .finish_non_exhaustive()
    }
}

fn safe_description(raw: Option<String>) -> String {
    let mut description = raw.unwrap_or_else(|| "no description".to_string());
    if description.len() > MAX_DESCRIPTION_LEN {
        let mut cut = MAX_DESCRIPTION_LEN;
        while !description.is_char_boundary(cut) {
            cut -= 1;
        }
        description.truncate(cut);
    }
    description
}

// Transport's Display includes the request URL, which embeds the bot token,
// so classification only looks at the kind, message and source.
fn error_from_transport(transport: ureq::Transport) -> DeliveryError {
    let mut combined = format!("{:?}", transport.kind());
    if let Some(message) = transport.message() {
        combined.push(' ');
        combined.push_str(message);
    }
    if let Some(source) = std::error::Error::source(&transport) {
        combined.push(' ');
        combined.push_str(&source.to_string());
    }
    let kind = classify_transport_error_kind(&combined);
    debug!(kind, "telegram transport failure");
    if kind == "timeout" {
        DeliveryError::Timeout
    } else {
        DeliveryError::Transport { kind }
    }
}

fn classify_transport_error_kind(raw: &str) -> &'static str {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        "timeout"
    } else if lower.contains("tls") || lower.contains("ssl") {
        "tls"
    } else if lower.contains("dns") {
        "dns"
    } else if lower.contains("connection") || lower.contains("connect") {
        "connection"
    } else {
        "transport"
    }
}
