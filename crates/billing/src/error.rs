//! Billing error types

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Notification digest did not match, or a signed field was missing
    #[error("Hash validation failed")]
    SignatureInvalid,

    #[error("Invalid notification: {0}")]
    InvalidNotification(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(i64),

    #[error("Order id already exists: {0}")]
    DuplicateOrderId(String),

    #[error("Could not allocate a unique order id after {0} attempts")]
    OrderIdExhausted(u32),

    #[error("Payment link request failed: {0}")]
    PaymentLink(String),

    #[error("Corrupt ledger record: {0}")]
    CorruptRecord(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}
