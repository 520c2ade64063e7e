//! User directory
//!
//! Lookup, registration and removal of bot users by their messaging-platform
//! id. The relay removes users who revoked the bot; everything else here is
//! plain registration.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::BillingResult;
use crate::models::{NewUser, User};

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_external_id(&self, external_id: i64) -> BillingResult<Option<User>>;

    async fn find_by_id(&self, id: i64) -> BillingResult<Option<User>>;

    /// Register a user; returns the existing row (and `false`) if one already exists
    async fn create(&self, user: NewUser) -> BillingResult<(User, bool)>;

    /// Returns whether a user was removed
    async fn delete_by_external_id(&self, external_id: i64) -> BillingResult<bool>;
}

/// PostgreSQL-backed directory over the `users` table
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_external_id(&self, external_id: i64) -> BillingResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, external_id, display_name, handle, created_at
            FROM users
            WHERE external_id = $1
            "#,
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> BillingResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, external_id, display_name, handle, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn create(&self, user: NewUser) -> BillingResult<(User, bool)> {
        // ON CONFLICT DO NOTHING returns no row when a concurrent /start won the insert
        let inserted = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (external_id, display_name, handle)
            VALUES ($1, $2, $3)
            ON CONFLICT (external_id) DO NOTHING
            RETURNING id, external_id, display_name, handle, created_at
            "#,
        )
        .bind(user.external_id)
        .bind(&user.display_name)
        .bind(&user.handle)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(created) = inserted {
            tracing::info!(
                user_id = created.id,
                external_id = created.external_id,
                "Registered new user"
            );
            return Ok((created, true));
        }

        let existing = sqlx::query_as::<_, User>(
            r#"
            SELECT id, external_id, display_name, handle, created_at
            FROM users
            WHERE external_id = $1
            "#,
        )
        .bind(user.external_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((existing, false))
    }

    async fn delete_by_external_id(&self, external_id: i64) -> BillingResult<bool> {
        let rows_affected = sqlx::query("DELETE FROM users WHERE external_id = $1")
            .bind(external_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows_affected > 0)
    }
}

#[derive(Default)]
struct DirectoryState {
    users: HashMap<i64, User>,
    next_id: i64,
}

/// In-memory directory keyed by internal id, for local runs and tests
#[derive(Default, Clone)]
pub struct InMemoryUserDirectory {
    state: Arc<RwLock<DirectoryState>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_external_id(&self, external_id: i64) -> BillingResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|u| u.external_id == external_id)
            .cloned())
    }

    async fn find_by_id(&self, id: i64) -> BillingResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.get(&id).cloned())
    }

    async fn create(&self, user: NewUser) -> BillingResult<(User, bool)> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .users
            .values()
            .find(|u| u.external_id == user.external_id)
        {
            return Ok((existing.clone(), false));
        }

        state.next_id += 1;
        let created = User {
            id: state.next_id,
            external_id: user.external_id,
            display_name: user.display_name,
            handle: user.handle,
            created_at: OffsetDateTime::now_utc(),
        };
        state.users.insert(created.id, created.clone());
        Ok((created, true))
    }

    async fn delete_by_external_id(&self, external_id: i64) -> BillingResult<bool> {
        let mut state = self.state.write().await;
        let before = state.users.len();
        state.users.retain(|_, u| u.external_id != external_id);
        Ok(state.users.len() < before)
    }
}
