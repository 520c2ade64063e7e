#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Course Funnel shared infrastructure
//!
//! Database pool construction and the embedded schema migrations used by
//! both the API server and the billing core.

pub mod db;

pub use db::{create_pool, run_migrations, DbError, PoolSettings};
