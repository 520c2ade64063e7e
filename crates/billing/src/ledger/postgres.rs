//! PostgreSQL ledger
//!
//! `mark_success` and `upsert_stage` take a `PgConnection` borrowed from an
//! open transaction; they are not reachable outside [`PgLedger::fulfill`] and
//! [`PgLedger::record_stage`].

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use super::{PaymentLedger, Transition};
use crate::error::{BillingError, BillingResult};
use crate::models::{Payment, PaymentRow};
use crate::statistics::{FunnelStage, StageUpdate, UserStatistics};

const PAYMENT_COLUMNS: &str = "id, order_id, user_id, amount, status, processed_at, created_at";

#[derive(Debug, sqlx::FromRow)]
struct StageRow {
    #[sqlx(flatten)]
    statistics: UserStatistics,
    inserted: bool,
}

#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Compare-and-set transition. Under concurrent updates PostgreSQL re-evaluates
/// the `WHERE` clause against the committed row, so a second writer matches
/// nothing once the first has committed.
async fn mark_success(conn: &mut PgConnection, order_id: &str) -> BillingResult<Option<Payment>> {
    let row = sqlx::query_as::<_, PaymentRow>(&format!(
        r#"
        UPDATE payments
        SET status = 'SUCCESS',
            processed_at = NOW()
        WHERE order_id = $1
          AND processed_at IS NULL
          AND status = 'PENDING'
        RETURNING {PAYMENT_COLUMNS}
        "#
    ))
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(Payment::try_from).transpose()
}

/// Upsert one flag. Returns `None` when the user is not in the directory.
async fn upsert_stage(
    conn: &mut PgConnection,
    user_id: i64,
    stage: FunnelStage,
    value: bool,
) -> BillingResult<Option<StageUpdate>> {
    // Column names come from the FunnelStage enumeration only
    let column = stage.column();
    let row = sqlx::query_as::<_, StageRow>(&format!(
        r#"
        INSERT INTO user_statistics (user_id, {column})
        SELECT $1::BIGINT, $2::BOOLEAN
        WHERE EXISTS (SELECT 1 FROM users WHERE id = $1)
        ON CONFLICT (user_id) DO UPDATE
        SET {column} = EXCLUDED.{column},
            updated_at = NOW()
        RETURNING user_id,
                  bot_launch,
                  mini_app_link_clicked,
                  learn_more_button_clicked,
                  course_button_clicked,
                  course_paid,
                  (xmax = 0) AS inserted
        "#
    ))
    .bind(user_id)
    .bind(value)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|row| StageUpdate {
        statistics: row.statistics,
        created: row.inserted,
    }))
}

#[async_trait]
impl PaymentLedger for PgLedger {
    async fn lookup(&self, order_id: &str) -> BillingResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Payment::try_from).transpose()
    }

    async fn create_pending(
        &self,
        user_id: i64,
        order_id: &str,
        amount: i64,
    ) -> BillingResult<Payment> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            r#"
            INSERT INTO payments (order_id, user_id, amount, status)
            VALUES ($1, $2, $3, 'PENDING')
            ON CONFLICT (order_id) DO NOTHING
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(order_id)
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Payment::try_from(row),
            None => Err(BillingError::DuplicateOrderId(order_id.to_string())),
        }
    }

    async fn fulfill(&self, order_id: &str) -> BillingResult<Transition> {
        let mut tx = self.pool.begin().await?;

        let Some(payment) = mark_success(&mut tx, order_id).await? else {
            tx.rollback().await?;
            // Payments are never deleted, so no match means either an unknown
            // order or a transition that already committed.
            return match self.lookup(order_id).await? {
                Some(_) => Ok(Transition::AlreadyProcessed),
                None => Err(BillingError::PaymentNotFound(order_id.to_string())),
            };
        };

        let stats = upsert_stage(&mut tx, payment.user_id, FunnelStage::CoursePaid, true).await?;
        if stats.is_none() {
            tracing::warn!(
                order_id = %order_id,
                user_id = payment.user_id,
                "Owning user no longer in directory, coursePaid not recorded"
            );
        }

        tx.commit().await?;

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
        let mut conn = self.pool.acquire().await?;
        upsert_stage(&mut conn, user_id, stage, value)
            .await?
            .ok_or(BillingError::UserNotFound(user_id))
    }

    async fn statistics(&self, user_id: i64) -> BillingResult<Option<UserStatistics>> {
        let stats = sqlx::query_as::<_, UserStatistics>(
            r#"
            SELECT user_id,
                   bot_launch,
                   mini_app_link_clicked,
                   learn_more_button_clicked,
                   course_button_clicked,
                   course_paid
            FROM user_statistics
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(stats)
    }
}
