//! Notification relay
//!
//! Best-effort message delivery. `send` never fails: it reports whether the
//! message went out on the first attempt and handles the rest locally.
//!
//! - Rate limiting schedules a bounded retry on a detached task
//! - A blocked bot removes the recipient from the user directory
//! - Anything else is logged

use std::sync::Arc;
use std::time::Duration;

use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;

use crate::channel::{ChannelError, MessageOptions, NotificationChannel};
use crate::directory::UserDirectory;

/// Bounded retry for transient delivery failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts made after the first failure
    pub max_retries: u32,
    /// Fixed delay before each retry
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            delay: Duration::from_secs(3),
        }
    }
}

#[derive(Clone)]
pub struct NotificationRelay {
    channel: Arc<dyn NotificationChannel>,
    directory: Arc<dyn UserDirectory>,
    policy: RetryPolicy,
}

impl NotificationRelay {
    pub fn new(
        channel: Arc<dyn NotificationChannel>,
        directory: Arc<dyn UserDirectory>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            channel,
            directory,
            policy,
        }
    }

    /// Deliver `text` to `chat_id`. Returns `true` only when the first attempt succeeded.
    pub async fn send(&self, chat_id: i64, text: &str, options: &MessageOptions) -> bool {
        let err = match self.channel.send_message(chat_id, text, options).await {
            Ok(()) => return true,
            Err(err) => err,
        };

        if err.is_transient() {
            tracing::warn!(chat_id, error = %err, "Message delivery throttled, scheduling retry");
            self.schedule_retry(chat_id, text.to_string(), options.clone());
        } else if err.is_recipient_gone() {
            self.remove_recipient(chat_id, &err).await;
        } else {
            tracing::error!(chat_id, error = %err, "Message delivery failed");
        }

        false
    }

    async fn remove_recipient(&self, chat_id: i64, err: &ChannelError) {
        match self.directory.delete_by_external_id(chat_id).await {
            Ok(true) => {
                tracing::info!(chat_id, reason = %err, "Removed user who blocked the bot");
            }
            Ok(false) => {
                tracing::debug!(chat_id, "Blocked recipient was not in the directory");
            }
            Err(e) => {
                tracing::error!(chat_id, error = %e, "Failed to remove blocked user");
            }
        }
    }

    /// Detached from the caller; the request that triggered the send never awaits it.
    fn schedule_retry(&self, chat_id: i64, text: String, options: MessageOptions) {
        if self.policy.max_retries == 0 {
            return;
        }

        let relay = self.clone();
        tokio::spawn(async move {
            let delay = relay.policy.delay;
            tokio::time::sleep(delay).await;

            let channel = Arc::clone(&relay.channel);
            let strategy =
                FixedInterval::new(delay).take(relay.policy.max_retries.saturating_sub(1) as usize);
            let action = move || {
                let channel = Arc::clone(&channel);
                let text = text.clone();
                let options = options.clone();
                async move { channel.send_message(chat_id, &text, &options).await }
            };

            match RetryIf::spawn(strategy, action, ChannelError::is_transient).await {
                Ok(()) => tracing::info!(chat_id, "Delayed message delivered"),
                Err(err) if err.is_recipient_gone() => relay.remove_recipient(chat_id, &err).await,
                Err(err) => {
                    tracing::error!(chat_id, error = %err, "Delayed message delivery failed, giving up");
                }
            }
        });
    }
}
