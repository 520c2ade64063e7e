//! In-memory ledger for local runs and tests
//!
//! A single mutex guards payments and statistics together, which gives
//! `fulfill` the same all-or-nothing behavior as the database transaction.
//! Statistics rows are only written for users the directory knows about,
//! matching the `EXISTS` guard of the PostgreSQL ledger.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::{PaymentLedger, Transition};
use crate::directory::UserDirectory;
use crate::error::{BillingError, BillingResult};
use crate::models::{Payment, PaymentStatus};
use crate::statistics::{FunnelStage, StageUpdate, UserStatistics};

#[derive(Default)]
struct LedgerState {
    payments: HashMap<String, Payment>,
    statistics: HashMap<i64, UserStatistics>,
    next_id: i64,
    fulfillments: u64,
}

impl LedgerState {
    fn upsert_stage(&mut self, user_id: i64, stage: FunnelStage, value: bool) -> StageUpdate {
        let created = !self.statistics.contains_key(&user_id);
        let stats = self
            .statistics
            .entry(user_id)
            .or_insert_with(|| UserStatistics::new(user_id));
        stats.set(stage, value);
        StageUpdate {
            statistics: stats.clone(),
            created,
        }
    }
}

#[derive(Clone)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    directory: Arc<dyn UserDirectory>,
}

impl InMemoryLedger {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            state: Arc::default(),
            directory,
        }
    }

    /// Directory lookup happens before the lock is taken
    async fn user_exists(&self, user_id: i64) -> BillingResult<bool> {
        Ok(self.directory.find_by_id(user_id).await?.is_some())
    }

    /// Number of committed `PENDING -> SUCCESS` transitions
    pub async fn fulfillment_count(&self) -> u64 {
        self.state.lock().await.fulfillments
    }
}

#[async_trait]
impl PaymentLedger for InMemoryLedger {
    async fn lookup(&self, order_id: &str) -> BillingResult<Option<Payment>> {
        Ok(self.state.lock().await.payments.get(order_id).cloned())
    }

    async fn create_pending(
        &self,
        user_id: i64,
        order_id: &str,
        amount: i64,
    ) -> BillingResult<Payment> {
        let mut state = self.state.lock().await;
        if state.payments.contains_key(order_id) {
            return Err(BillingError::DuplicateOrderId(order_id.to_string()));
        }

        state.next_id += 1;
        let payment = Payment {
            id: state.next_id,
            order_id: order_id.to_string(),
            user_id,
            amount,
            status: PaymentStatus::Pending,
            processed_at: None,
            created_at: OffsetDateTime::now_utc(),
        };
        state
            .payments
            .insert(order_id.to_string(), payment.clone());
        Ok(payment)
    }

    async fn fulfill(&self, order_id: &str) -> BillingResult<Transition> {
        let owner_exists = match self.lookup(order_id).await? {
            Some(payment) => self.user_exists(payment.user_id).await?,
            None => return Err(BillingError::PaymentNotFound(order_id.to_string())),
        };

        let mut state = self.state.lock().await;

        let payment = state
            .payments
            .get_mut(order_id)
            .ok_or_else(|| BillingError::PaymentNotFound(order_id.to_string()))?;
        if payment.is_processed() {
            return Ok(Transition::AlreadyProcessed);
        }

        payment.status = PaymentStatus::Success;
        payment.processed_at = Some(OffsetDateTime::now_utc());
        let payment = payment.clone();

        if owner_exists {
            state.upsert_stage(payment.user_id, FunnelStage::CoursePaid, true);
        } else {
            tracing::warn!(
                order_id = %order_id,
                user_id = payment.user_id,
                "Owning user no longer in directory, coursePaid not recorded"
            );
        }
        state.fulfillments += 1;

        tracing::info!(
            order_id = %order_id,
            user_id = payment.user_id,
            amount = payment.amount,
            "Payment transitioned to SUCCESS"
        );
        Ok(Transition::Fulfilled(payment))
    }

    async fn record_stage(
        &self,
        user_id: i64,
        stage: FunnelStage,
        value: bool,
    ) -> BillingResult<StageUpdate> {
        if !self.user_exists(user_id).await? {
            return Err(BillingError::UserNotFound(user_id));
        }
        Ok(self.state.lock().await.upsert_stage(user_id, stage, value))
    }

    async fn statistics(&self, user_id: i64) -> BillingResult<Option<UserStatistics>> {
        Ok(self.state.lock().await.statistics.get(&user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryUserDirectory;
    use crate::models::NewUser;

    async fn ledger_with_user(
        external_id: i64,
    ) -> (InMemoryLedger, Arc<InMemoryUserDirectory>, i64) {
        let directory = Arc::new(InMemoryUserDirectory::new());
        let (user, _) = directory
            .create(NewUser {
                external_id,
                display_name: "Ada".to_string(),
                handle: None,
            })
            .await
            .unwrap();
        (InMemoryLedger::new(directory.clone()), directory, user.id)
    }

    #[tokio::test]
    async fn test_create_pending_rejects_duplicate_order_id() {
        let (ledger, _, user_id) = ledger_with_user(5005).await;
        ledger.create_pending(user_id, "order-1", 500).await.unwrap();

        let err = ledger
            .create_pending(user_id + 1, "order-1", 900)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::DuplicateOrderId(id) if id == "order-1"));

        // The first row is untouched
        let payment = ledger.lookup("order-1").await.unwrap().unwrap();
        assert_eq!(payment.user_id, user_id);
        assert_eq!(payment.amount, 500);
    }

    #[tokio::test]
    async fn test_fulfill_transitions_once() {
        let (ledger, _, user_id) = ledger_with_user(5005).await;
        ledger.create_pending(user_id, "order-1", 500).await.unwrap();

        let first = ledger.fulfill("order-1").await.unwrap();
        let Transition::Fulfilled(payment) = first else {
            panic!("first fulfill should transition");
        };
        assert_eq!(payment.status, PaymentStatus::Success);
        assert!(payment.processed_at.is_some());

        assert_eq!(
            ledger.fulfill("order-1").await.unwrap(),
            Transition::AlreadyProcessed
        );
        assert_eq!(ledger.fulfillment_count().await, 1);

        let stats = ledger.statistics(user_id).await.unwrap().unwrap();
        assert!(stats.course_paid);
    }

    #[tokio::test]
    async fn test_fulfill_unknown_order() {
        let (ledger, _, user_id) = ledger_with_user(5005).await;
        let err = ledger.fulfill("missing").await.unwrap_err();
        assert!(matches!(err, BillingError::PaymentNotFound(_)));
        assert!(ledger.statistics(user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fulfill_for_removed_owner_skips_statistics() {
        let (ledger, directory, user_id) = ledger_with_user(5005).await;
        ledger.create_pending(user_id, "order-1", 500).await.unwrap();
        directory.delete_by_external_id(5005).await.unwrap();

        assert!(matches!(
            ledger.fulfill("order-1").await.unwrap(),
            Transition::Fulfilled(_)
        ));
        assert!(ledger.lookup("order-1").await.unwrap().unwrap().is_processed());
        assert!(ledger.statistics(user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_stage_preserves_other_flags() {
        let (ledger, _, user_id) = ledger_with_user(5005).await;

        let first = ledger
            .record_stage(user_id, FunnelStage::BotLaunch, true)
            .await
            .unwrap();
        assert!(first.created);

        let second = ledger
            .record_stage(user_id, FunnelStage::LearnMoreButtonClicked, true)
            .await
            .unwrap();
        assert!(!second.created);
        assert!(second.statistics.bot_launch);
        assert!(second.statistics.learn_more_button_clicked);
        assert!(!second.statistics.course_paid);
    }

    #[tokio::test]
    async fn test_record_stage_unknown_user() {
        let (ledger, _, user_id) = ledger_with_user(5005).await;
        let err = ledger
            .record_stage(user_id + 1, FunnelStage::BotLaunch, true)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::UserNotFound(id) if id == user_id + 1));
    }
}
