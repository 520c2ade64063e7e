//! Payment ledger
//!
//! Durable record of payment requests and their lifecycle. Every operation is
//! keyed by `order_id`. The only state change a payment ever sees is the
//! single `PENDING -> SUCCESS` transition performed by [`PaymentLedger::fulfill`],
//! which marks the payment and records `coursePaid` in one transaction.

mod memory;
mod postgres;

pub use memory::InMemoryLedger;
pub use postgres::PgLedger;

use async_trait::async_trait;

use crate::error::BillingResult;
use crate::models::Payment;
use crate::statistics::{FunnelStage, StageUpdate, UserStatistics};

/// Outcome of the fulfillment transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// This call performed the transition
    Fulfilled(Payment),
    /// Another confirmation committed first; nothing was written
    AlreadyProcessed,
}

#[async_trait]
pub trait PaymentLedger: Send + Sync {
    async fn lookup(&self, order_id: &str) -> BillingResult<Option<Payment>>;

    /// Insert a `PENDING` payment.
    ///
    /// Fails with [`crate::BillingError::DuplicateOrderId`] when `order_id` is
    /// taken; callers generate a fresh id and try again.
    async fn create_pending(&self, user_id: i64, order_id: &str, amount: i64)
        -> BillingResult<Payment>;

    /// Atomically set `SUCCESS` + `processed_at` and upsert `coursePaid = true`
    /// for the owning user.
    ///
    /// `processed_at` is re-checked at write time, so of any number of
    /// concurrent calls for one order exactly one returns
    /// [`Transition::Fulfilled`]. On error nothing is committed.
    async fn fulfill(&self, order_id: &str) -> BillingResult<Transition>;

    /// Idempotent upsert of a single funnel flag
    async fn record_stage(
        &self,
        user_id: i64,
        stage: FunnelStage,
        value: bool,
    ) -> BillingResult<StageUpdate>;

    async fn statistics(&self, user_id: i64) -> BillingResult<Option<UserStatistics>>;
}
