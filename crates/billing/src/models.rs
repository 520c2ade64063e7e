//! Ledger and directory records

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::BillingError;

/// Lifecycle state of a payment. There is no persisted failure state:
/// rejected or duplicate notifications never touch the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "SUCCESS" => Ok(PaymentStatus::Success),
            other => Err(BillingError::CorruptRecord(format!(
                "unknown payment status '{}'",
                other
            ))),
        }
    }
}

/// One purchase attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: i64,
    pub order_id: String,
    pub user_id: i64,
    /// Smallest currency unit
    pub amount: i64,
    pub status: PaymentStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub processed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Payment {
    /// `processed_at` is the authoritative idempotency guard; status is checked too
    /// so that a record is never treated as pending when either field says otherwise.
    pub fn is_processed(&self) -> bool {
        self.status == PaymentStatus::Success || self.processed_at.is_some()
    }
}

/// Raw `payments` row
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PaymentRow {
    pub id: i64,
    pub order_id: String,
    pub user_id: i64,
    pub amount: i64,
    pub status: String,
    pub processed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = BillingError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: row.id,
            order_id: row.order_id,
            user_id: row.user_id,
            amount: row.amount,
            status: row.status.parse()?,
            processed_at: row.processed_at,
            created_at: row.created_at,
        })
    }
}

/// A bot-platform identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    /// Messaging-platform chat/account id
    pub external_id: i64,
    pub display_name: String,
    pub handle: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub external_id: i64,
    pub display_name: String,
    pub handle: Option<String>,
}
