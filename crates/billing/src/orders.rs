//! Payment initiation
//!
//! Creates the `PENDING` ledger entry for a purchase and requests the
//! provider payment page for it. Order ids are random UUIDs; a collision is
//! resolved here by retrying with a fresh id, never at confirmation time.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::directory::UserDirectory;
use crate::error::{BillingError, BillingResult};
use crate::ledger::PaymentLedger;
use crate::models::Payment;
use crate::quickpay::QuickpayClient;

/// Attempts at allocating a unique order id before giving up
pub const MAX_ORDER_ID_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub payment: Payment,
    pub payment_link: String,
}

pub struct OrderService {
    ledger: Arc<dyn PaymentLedger>,
    directory: Arc<dyn UserDirectory>,
    quickpay: QuickpayClient,
}

impl OrderService {
    pub fn new(
        ledger: Arc<dyn PaymentLedger>,
        directory: Arc<dyn UserDirectory>,
        quickpay: QuickpayClient,
    ) -> Self {
        Self {
            ledger,
            directory,
            quickpay,
        }
    }

    /// Create a pending payment for `user_id` and return its payment link
    pub async fn create_payment(&self, user_id: i64, amount: i64) -> BillingResult<PaymentRequest> {
        if amount <= 0 {
            return Err(BillingError::Validation(
                "Amount must be a positive integer".to_string(),
            ));
        }

        if self.directory.find_by_id(user_id).await?.is_none() {
            tracing::warn!(user_id, "Payment requested for unknown user");
            return Err(BillingError::UserNotFound(user_id));
        }

        let payment = self.allocate(user_id, amount).await?;
        let payment_link = self
            .quickpay
            .create_payment_link(&payment.order_id, payment.amount)
            .await?;

        tracing::info!(
            order_id = %payment.order_id,
            user_id,
            amount,
            "Payment entry created"
        );
        Ok(PaymentRequest {
            payment,
            payment_link,
        })
    }

    async fn allocate(&self, user_id: i64, amount: i64) -> BillingResult<Payment> {
        for attempt in 1..=MAX_ORDER_ID_ATTEMPTS {
            let order_id = Uuid::new_v4().to_string();
            match self.ledger.create_pending(user_id, &order_id, amount).await {
                Ok(payment) => return Ok(payment),
                Err(BillingError::DuplicateOrderId(_)) => {
                    tracing::warn!(order_id = %order_id, attempt, "Order id collision, regenerating");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::error!(user_id, "Order id allocation exhausted");
        Err(BillingError::OrderIdExhausted(MAX_ORDER_ID_ATTEMPTS))
    }
}
