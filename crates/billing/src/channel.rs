//! Messaging channel abstractions
//!
//! The orchestrator and relay never talk to the messenger directly; they use
//! these traits, implemented by [`crate::telegram::TelegramBot`] in production.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParseMode {
    Markdown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageOptions {
    pub parse_mode: Option<ParseMode>,
}

impl MessageOptions {
    pub fn markdown() -> Self {
        Self {
            parse_mode: Some(ParseMode::Markdown),
        }
    }
}

/// Delivery failure reported by a channel
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel throttled us; worth retrying later
    #[error("Rate limited by channel (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// The recipient revoked the channel (blocked the bot, deactivated account)
    #[error("Recipient blocked the bot: {0}")]
    Blocked(String),

    /// The bot handle is not running
    #[error("Channel unavailable")]
    Unavailable,

    #[error("Channel API error {code}: {description}")]
    Api { code: u16, description: String },

    #[error("Channel transport error: {0}")]
    Transport(String),
}

impl ChannelError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ChannelError::RateLimited { .. })
    }

    /// Only an explicit revocation signal counts; generic errors never do
    pub fn is_recipient_gone(&self) -> bool {
        matches!(self, ChannelError::Blocked(_))
    }
}

/// Best-effort delivery of a text message to a chat
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        options: &MessageOptions,
    ) -> Result<(), ChannelError>;
}

/// Single-use credential granting course access
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccessGrant {
    pub invite_link: String,
}

impl AccessGrant {
    /// Stand-in used when provisioning fails
    pub fn placeholder() -> Self {
        Self::default()
    }

    pub fn is_placeholder(&self) -> bool {
        self.invite_link.is_empty()
    }
}

#[async_trait]
pub trait AccessGrantProvider: Send + Sync {
    async fn provision_grant(&self) -> Result<AccessGrant, ChannelError>;
}
