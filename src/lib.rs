//! Subscription and payment backend for the Outlivion VPN service.

mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod responses;
pub mod subscription;
pub mod workflows;

use anyhow::Context;
use anyhow::Result;
pub use api::init_router;
pub use models::AppState;
use sqlx::{PgPool, postgres::PgPoolOptions};

/// Rubles credited to a referrer when their invitee redeems a first code.
pub const REFERRAL_BONUS: i64 = 50;

/// Initializes the database pool.
pub async fn init_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await
        .context("Failed to connect to Postgres")?;
    Ok(pool)
}
