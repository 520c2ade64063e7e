//! Server configuration from environment variables

use std::time::Duration;

use coursefunnel_billing::{BillingConfig, QuickpayConfig, RetryPolicy, TelegramConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Bot API token
    pub bot_token: String,
    /// Course channel invite links are created for
    pub channel_id: String,
    pub notification_secret: String,
    pub support_contact: String,
    pub telegram_api_url: String,
    pub quickpay: QuickpayConfig,
    pub relay_retry_delay: Duration,
    pub relay_max_retries: u32,
    /// Total budget for one HTTP request
    pub request_timeout: Duration,
    /// Empty means any origin
    pub allowed_origins: Vec<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("bot_token", &"[REDACTED]")
            .field("channel_id", &self.channel_id)
            .field("notification_secret", &"[REDACTED]")
            .field("support_contact", &self.support_contact)
            .field("telegram_api_url", &self.telegram_api_url)
            .field("quickpay", &self.quickpay)
            .field("relay_retry_delay", &self.relay_retry_delay)
            .field("relay_max_retries", &self.relay_max_retries)
            .field("request_timeout", &self.request_timeout)
            .field("allowed_origins", &self.allowed_origins)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| var(name).ok_or(ConfigError::Missing(name));

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            bind_address: var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            bot_token: required("API_KEY_BOT")?,
            channel_id: required("CHANNEL_ID")?,
            notification_secret: required("NOTIFICATION_SECRET")?,
            support_contact: var("SUPPORT_CONTACT").unwrap_or_else(|| "@support".to_string()),
            telegram_api_url: var("TELEGRAM_API_URL")
                .unwrap_or_else(|| coursefunnel_billing::telegram::DEFAULT_API_URL.to_string()),
            quickpay: QuickpayConfig {
                form_url: var("LINK_FOR_CREATE_FORM"),
                receiver: var("WALLET_MERCHANT"),
                payment_type: var("TYPE_PAYMENT"),
                success_url: var("SUCCESS_URL"),
            },
            relay_retry_delay: Duration::from_millis(parse_or(
                "RELAY_RETRY_DELAY_MS",
                var("RELAY_RETRY_DELAY_MS"),
                3000,
            )?),
            relay_max_retries: parse_or("RELAY_MAX_RETRIES", var("RELAY_MAX_RETRIES"), 1)?,
            request_timeout: Duration::from_secs(parse_or(
                "REQUEST_TIMEOUT_SECS",
                var("REQUEST_TIMEOUT_SECS"),
                10,
            )?),
            allowed_origins: var("ALLOWED_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    pub fn telegram(&self) -> TelegramConfig {
        TelegramConfig {
            token: self.bot_token.clone(),
            api_url: self.telegram_api_url.clone(),
            channel_id: self.channel_id.clone(),
            request_timeout: self.request_timeout,
        }
    }

    pub fn billing(&self) -> BillingConfig {
        BillingConfig {
            notification_secret: self.notification_secret.clone(),
            support_contact: self.support_contact.clone(),
            retry: RetryPolicy {
                max_retries: self.relay_max_retries,
                delay: self.relay_retry_delay,
            },
            quickpay: self.quickpay.clone(),
            http_timeout: self.request_timeout,
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 4] = [
        ("DATABASE_URL", "postgresql://localhost/coursefunnel"),
        ("API_KEY_BOT", "123456:TOKEN"),
        ("CHANNEL_ID", "-1001234567890"),
        ("NOTIFICATION_SECRET", "shh"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert_eq!(config.support_contact, "@support");
        assert_eq!(config.relay_retry_delay, Duration::from_secs(3));
        assert_eq!(config.relay_max_retries, 1);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(config.allowed_origins.is_empty());
        assert!(config.quickpay.form_url.is_none());
    }

    #[test]
    fn test_missing_required_variable() {
        for (missing, _) in REQUIRED {
            let vars: Vec<_> = REQUIRED.iter().copied().filter(|(k, _)| *k != missing).collect();
            let err = Config::from_lookup(lookup(&vars)).unwrap_err();
            assert!(matches!(err, ConfigError::Missing(name) if name == missing));
        }
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let mut vars = REQUIRED.to_vec();
        vars[3] = ("NOTIFICATION_SECRET", "  ");
        assert!(matches!(
            Config::from_lookup(lookup(&vars)),
            Err(ConfigError::Missing("NOTIFICATION_SECRET"))
        ));
    }

    #[test]
    fn test_invalid_number() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("RELAY_MAX_RETRIES", "twice"));
        assert!(matches!(
            Config::from_lookup(lookup(&vars)),
            Err(ConfigError::Invalid {
                name: "RELAY_MAX_RETRIES",
                ..
            })
        ));
    }

    #[test]
    fn test_allowed_origins_split() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("ALLOWED_ORIGINS", "https://a.example, https://b.example,"));
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("123456:TOKEN"));
        assert!(!rendered.contains("shh"));
        assert!(!rendered.contains("postgresql://"));
    }
}
