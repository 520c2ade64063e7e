// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Course Funnel Billing Core
//!
//! Validates payment-provider notifications and fulfills course purchases.
//!
//! ## Components
//!
//! - **Signature Verifier**: SHA-1 digest over the provider's field order and the shared secret
//! - **Payment Ledger**: `PENDING -> SUCCESS` exactly once per order, guarded at write time
//! - **Fulfillment Orchestrator**: idempotent confirmation, freeze notices, access grants
//! - **Notification Relay**: best-effort delivery with bounded retry and blocked-user cleanup
//! - **Orders**: payment initiation and payment-form links
//! - **Statistics**: per-user funnel stage flags

pub mod channel;
pub mod directory;
pub mod error;
pub mod fulfillment;
pub mod ledger;
pub mod models;
pub mod orders;
pub mod quickpay;
pub mod relay;
pub mod signature;
pub mod statistics;
pub mod telegram;


// Channel
pub use channel::{
    AccessGrant, AccessGrantProvider, ChannelError, MessageOptions, NotificationChannel, ParseMode,
};

// Directory
pub use directory::{InMemoryUserDirectory, PgUserDirectory, UserDirectory};

// Error
pub use error::{BillingError, BillingResult};

// Fulfillment
pub use fulfillment::{ConfirmationOutcome, FulfillmentService, Messages};

// Ledger
pub use ledger::{InMemoryLedger, PaymentLedger, PgLedger, Transition};

// Models
pub use models::{NewUser, Payment, PaymentStatus, User};

// Orders
pub use orders::{OrderService, PaymentRequest, MAX_ORDER_ID_ATTEMPTS};

// Quickpay
pub use quickpay::{QuickpayClient, QuickpayConfig};

// Relay
pub use relay::{NotificationRelay, RetryPolicy};

// Signature
pub use signature::{NotificationVerifier, RawNotification, VerifiedNotification};

// Statistics
pub use statistics::{FunnelStage, StageUpdate, UserStatistics};

// Telegram
pub use telegram::{BotIdentity, TelegramBot, TelegramClient, TelegramConfig};

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

/// Settings for the billing core
#[derive(Clone)]
pub struct BillingConfig {
    /// Shared secret for notification digests
    pub notification_secret: String,
    /// Handle included in user-facing messages
    pub support_contact: String,
    pub retry: RetryPolicy,
    pub quickpay: QuickpayConfig,
    /// Timeout for outbound HTTP calls to the payment form
    pub http_timeout: Duration,
}

impl std::fmt::Debug for BillingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingConfig")
            .field("notification_secret", &"[REDACTED]")
            .field("support_contact", &self.support_contact)
            .field("retry", &self.retry)
            .field("quickpay", &self.quickpay)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

/// Storage and messaging collaborators
#[derive(Clone)]
pub struct Backends {
    pub ledger: Arc<dyn PaymentLedger>,
    pub directory: Arc<dyn UserDirectory>,
    pub channel: Arc<dyn NotificationChannel>,
    pub grants: Arc<dyn AccessGrantProvider>,
}

impl Backends {
    /// PostgreSQL storage with the bot handle as channel and grant provider
    pub fn postgres(pool: PgPool, bot: Arc<TelegramBot>) -> Self {
        Self {
            ledger: Arc::new(PgLedger::new(pool.clone())),
            directory: Arc::new(PgUserDirectory::new(pool)),
            channel: bot.clone(),
            grants: bot,
        }
    }
}

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub fulfillment: FulfillmentService,
    pub orders: OrderService,
    pub ledger: Arc<dyn PaymentLedger>,
    pub directory: Arc<dyn UserDirectory>,
}

impl BillingService {
    pub fn new(config: BillingConfig, backends: Backends) -> BillingResult<Self> {
        let relay = NotificationRelay::new(
            backends.channel,
            backends.directory.clone(),
            config.retry,
        );
        let quickpay = QuickpayClient::new(config.quickpay, config.http_timeout)?;

        Ok(Self {
            fulfillment: FulfillmentService::new(
                NotificationVerifier::new(config.notification_secret),
                backends.ledger.clone(),
                backends.directory.clone(),
                relay,
                backends.grants,
                Messages::new(config.support_contact),
            ),
            orders: OrderService::new(
                backends.ledger.clone(),
                backends.directory.clone(),
                quickpay,
            ),
            ledger: backends.ledger,
            directory: backends.directory,
        })
    }
}
