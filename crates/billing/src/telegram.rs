//! Telegram Bot API client and the long-lived bot handle
//!
//! `TelegramBot` is built once at startup and shared behind an `Arc`. The
//! rest of the crate only sees it through [`NotificationChannel`] and
//! [`AccessGrantProvider`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::channel::{
    AccessGrant, AccessGrantProvider, ChannelError, MessageOptions, NotificationChannel, ParseMode,
};
use crate::error::BillingResult;

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Descriptions Telegram uses when the recipient has revoked the bot
const RECIPIENT_GONE_MARKERS: [&str; 2] = ["bot was blocked by the user", "user is deactivated"];

#[derive(Clone)]
pub struct TelegramConfig {
    pub token: String,
    pub api_url: String,
    /// Course channel that invite links are issued for
    pub channel_id: String,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &"[redacted]")
            .field("api_url", &self.api_url)
            .field("channel_id", &self.channel_id)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotIdentity {
    pub id: i64,
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatInviteLink {
    invite_link: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<u16>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Serialize)]
struct SendMessageParams<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<ParseMode>,
}

#[derive(Serialize)]
struct CreateInviteLinkParams<'a> {
    chat_id: &'a str,
    member_limit: u32,
}

/// Map a failed Bot API call onto the relay's error taxonomy
fn classify_error(code: u16, description: String, retry_after: Option<u64>) -> ChannelError {
    if code == 429 {
        return ChannelError::RateLimited {
            retry_after: retry_after.map(Duration::from_secs),
        };
    }
    if code == 403
        && RECIPIENT_GONE_MARKERS
            .iter()
            .any(|marker| description.contains(marker))
    {
        return ChannelError::Blocked(description);
    }
    ChannelError::Api { code, description }
}

/// Thin JSON client for the Bot API
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> BillingResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, ChannelError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.method_url(method))
            .json(params)
            .send()
            .await
            // The request URL carries the bot token
            .map_err(|e| ChannelError::Transport(e.without_url().to_string()))?;

        let status = response.status().as_u16();
        let body: ApiResponse<R> = response.json().await.map_err(|e| ChannelError::Api {
            code: status,
            description: format!("unreadable response: {}", e.without_url()),
        })?;

        match body {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse {
                error_code,
                description,
                parameters,
                ..
            } => Err(classify_error(
                error_code.unwrap_or(status),
                description.unwrap_or_default(),
                parameters.and_then(|p| p.retry_after),
            )),
        }
    }

    pub async fn get_me(&self) -> Result<BotIdentity, ChannelError> {
        self.call("getMe", &serde_json::json!({})).await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        options: &MessageOptions,
    ) -> Result<(), ChannelError> {
        let params = SendMessageParams {
            chat_id,
            text,
            parse_mode: options.parse_mode,
        };
        let _: IgnoredAny = self.call("sendMessage", &params).await?;
        Ok(())
    }

    pub async fn create_invite_link(
        &self,
        chat_id: &str,
        member_limit: u32,
    ) -> Result<String, ChannelError> {
        let params = CreateInviteLinkParams {
            chat_id,
            member_limit,
        };
        let link: ChatInviteLink = self.call("createChatInviteLink", &params).await?;
        Ok(link.invite_link)
    }
}

/// Process-wide bot handle with an explicit start/stop lifecycle
pub struct TelegramBot {
    client: TelegramClient,
    channel_id: String,
    identity: OnceCell<BotIdentity>,
    running: AtomicBool,
}

impl TelegramBot {
    pub fn new(config: &TelegramConfig) -> BillingResult<Self> {
        Ok(Self {
            client: TelegramClient::new(config)?,
            channel_id: config.channel_id.clone(),
            identity: OnceCell::new(),
            running: AtomicBool::new(false),
        })
    }

    /// Resolve the bot identity (once) and begin accepting sends
    pub async fn start(&self) -> Result<&BotIdentity, ChannelError> {
        let identity = self
            .identity
            .get_or_try_init(|| self.client.get_me())
            .await?;
        if !self.running.swap(true, Ordering::SeqCst) {
            tracing::info!(
                bot_id = identity.id,
                bot_username = ?identity.username,
                "Telegram bot started"
            );
        }
        Ok(identity)
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("Telegram bot stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationChannel for TelegramBot {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        options: &MessageOptions,
    ) -> Result<(), ChannelError> {
        if !self.is_running() {
            return Err(ChannelError::Unavailable);
        }
        self.client.send_message(chat_id, text, options).await
    }
}

#[async_trait]
impl AccessGrantProvider for TelegramBot {
    async fn provision_grant(&self) -> Result<AccessGrant, ChannelError> {
        if !self.is_running() {
            return Err(ChannelError::Unavailable);
        }
        let invite_link = self.client.create_invite_link(&self.channel_id, 1).await?;
        Ok(AccessGrant { invite_link })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    const TOKEN: &str = "123456:TEST";

    fn config(api_url: String) -> TelegramConfig {
        TelegramConfig {
            token: TOKEN.to_string(),
            api_url,
            channel_id: "-1001234567890".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }

    async fn started_bot(server: &mut mockito::Server) -> TelegramBot {
        server
            .mock("POST", format!("/bot{}/getMe", TOKEN).as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true,"result":{"id":99,"is_bot":true,"first_name":"Course","username":"course_bot"}}"#)
            .create_async()
            .await;
        let bot = TelegramBot::new(&config(server.url())).unwrap();
        bot.start().await.unwrap();
        bot
    }

    #[test]
    fn test_classify_rate_limit() {
        let err = classify_error(429, "Too Many Requests: retry after 3".into(), Some(3));
        assert_eq!(
            err,
            ChannelError::RateLimited {
                retry_after: Some(Duration::from_secs(3))
            }
        );
    }

    #[test]
    fn test_classify_blocked_requires_explicit_signal() {
        assert!(
            classify_error(403, "Forbidden: bot was blocked by the user".into(), None)
                .is_recipient_gone()
        );
        assert!(classify_error(403, "Forbidden: user is deactivated".into(), None).is_recipient_gone());
        // Other 403s are not revocations
        assert!(
            !classify_error(403, "Forbidden: bot can't initiate conversation with a user".into(), None)
                .is_recipient_gone()
        );
        // The phrase on a non-403 is not trusted either
        assert!(!classify_error(400, "bot was blocked by the user".into(), None).is_recipient_gone());
    }

    #[test]
    fn test_config_debug_redacts_token() {
        let rendered = format!("{:?}", config("http://localhost".into()));
        assert!(!rendered.contains(TOKEN));
    }

    #[tokio::test]
    async fn test_send_before_start_is_unavailable() {
        let bot = TelegramBot::new(&config("http://127.0.0.1:9".into())).unwrap();
        let result = bot.send_message(1, "hi", &MessageOptions::default()).await;
        assert_eq!(result, Err(ChannelError::Unavailable));
    }

    #[tokio::test]
    async fn test_start_resolves_identity_once() {
        let mut server = mockito::Server::new_async().await;
        let get_me = server
            .mock("POST", format!("/bot{}/getMe", TOKEN).as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true,"result":{"id":99,"is_bot":true,"first_name":"Course"}}"#)
            .expect(1)
            .create_async()
            .await;

        let bot = TelegramBot::new(&config(server.url())).unwrap();
        assert_eq!(bot.start().await.unwrap().id, 99);
        bot.stop();
        assert!(!bot.is_running());
        bot.start().await.unwrap();
        assert!(bot.is_running());

        get_me.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_message_success() {
        let mut server = mockito::Server::new_async().await;
        let bot = started_bot(&mut server).await;
        let send = server
            .mock("POST", format!("/bot{}/sendMessage", TOKEN).as_str())
            .match_body(Matcher::PartialJson(json!({
                "chat_id": 42,
                "text": "hello",
                "parse_mode": "Markdown"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true,"result":{"message_id":7}}"#)
            .create_async()
            .await;

        bot.send_message(42, "hello", &MessageOptions::markdown())
            .await
            .unwrap();
        send.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_message_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        let bot = started_bot(&mut server).await;
        server
            .mock("POST", format!("/bot{}/sendMessage", TOKEN).as_str())
            .with_status(429)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 5","parameters":{"retry_after":5}}"#)
            .create_async()
            .await;

        let err = bot
            .send_message(42, "hello", &MessageOptions::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ChannelError::RateLimited {
                retry_after: Some(Duration::from_secs(5))
            }
        );
    }

    #[tokio::test]
    async fn test_send_message_blocked() {
        let mut server = mockito::Server::new_async().await;
        let bot = started_bot(&mut server).await;
        server
            .mock("POST", format!("/bot{}/sendMessage", TOKEN).as_str())
            .with_status(403)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":false,"error_code":403,"description":"Forbidden: bot was blocked by the user"}"#)
            .create_async()
            .await;

        let err = bot
            .send_message(42, "hello", &MessageOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_recipient_gone());
    }

    #[tokio::test]
    async fn test_unreadable_response_is_api_error() {
        let mut server = mockito::Server::new_async().await;
        let bot = started_bot(&mut server).await;
        server
            .mock("POST", format!("/bot{}/sendMessage", TOKEN).as_str())
            .with_status(502)
            .with_body("Bad Gateway")
            .create_async()
            .await;

        let err = bot
            .send_message(42, "hello", &MessageOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Api { code: 502, .. }));
        assert!(!err.to_string().contains(TOKEN));
    }

    #[tokio::test]
    async fn test_provision_grant_creates_single_use_link() {
        let mut server = mockito::Server::new_async().await;
        let bot = started_bot(&mut server).await;
        let invite = server
            .mock("POST", format!("/bot{}/createChatInviteLink", TOKEN).as_str())
            .match_body(Matcher::PartialJson(json!({
                "chat_id": "-1001234567890",
                "member_limit": 1
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true,"result":{"invite_link":"https://t.me/+single","creates_join_request":false,"is_primary":false,"is_revoked":false}}"#)
            .create_async()
            .await;

        let grant = bot.provision_grant().await.unwrap();
        assert_eq!(grant.invite_link, "https://t.me/+single");
        invite.assert_async().await;
    }
}
