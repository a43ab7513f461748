use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;

/// The application state.
#[derive(Clone)]
pub struct AppState {
    /// The database pool.
    pub pool: PgPool,
    /// The application configuration.
    pub config: Config,
    /// Shared HTTP client for outbound gateway calls.
    pub http: reqwest::Client,
}

/// A user account row. `plan` is a stored label; the effective status is
/// always computed from `subscription_expires`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub telegram_id: i64,
    pub balance: i64,
    pub plan: String,
    /// Legacy reference into the `plans` table, kept for wallet-era accounts.
    pub plan_id: Option<i64>,
    pub subscription_expires: Option<DateTime<Utc>>,
}

/// A legacy by-id subscription tier.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PlanRow {
    pub id: i64,
    pub name: String,
    pub price: i64,
    pub duration_days: i32,
}

/// A single-use promotional code.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Code {
    pub id: i64,
    pub code: String,
    pub plan: String,
    pub days_valid: i32,
    pub used_by: Option<Uuid>,
    pub used_at: Option<DateTime<Utc>>,
}

/// A payment row. Created `pending` and transitions exactly once to
/// `completed` or `failed`; `plan_type` fixes the reconciliation path at
/// creation time.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub method: String,
    pub gateway: String,
    pub status: String,
    pub plan_type: Option<String>,
    pub plan_name: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub gateway_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A referral pairing. The reward is paid at most once, gated on
/// `reward_amount = 0`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Referral {
    pub id: i64,
    pub referrer_id: Uuid,
    pub referred_id: Uuid,
    pub reward_amount: i64,
}

/// A short-lived single-use login token issued by the messaging bot.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuthToken {
    pub token: String,
    pub telegram_id: i64,
    /// Identity assigned by the auth layer, when it diverged from ours.
    pub auth_user_id: Option<Uuid>,
    pub used: bool,
    pub expires_at: DateTime<Utc>,
}

/// A bearer session minted by `/auth/verify-token`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Session {
    pub token: Uuid,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// The request to activate a promo code.
#[derive(Deserialize)]
pub struct ActivateCodeRequest {
    /// The code being redeemed.
    pub code: String,
    /// Target user; honored only for trusted internal callers.
    pub user_id: Option<Uuid>,
}

/// The response after a successful code activation.
#[derive(Debug, Serialize)]
pub struct ActivateCodeResponse {
    pub success: bool,
    /// Days the code added to the subscription.
    pub days_added: i32,
    /// The new expiry timestamp.
    pub new_expiration: DateTime<Utc>,
}

/// The request to create a payment.
#[derive(Deserialize)]
pub struct CreatePaymentRequest {
    pub user_id: Uuid,
    /// Payment method label: card, sbp or promo.
    pub method: String,
    /// Target gateway: enot or yookassa.
    pub gateway: String,
    /// Direct pay-for-plan purchases name a plan type.
    pub plan_type: Option<String>,
    /// Legacy wallet top-ups name a `plans` row instead.
    pub plan_id: Option<i64>,
}

/// The response after creating a payment.
#[derive(Serialize)]
pub struct CreatePaymentResponse {
    /// Where to redirect the user to complete checkout.
    pub payment_url: String,
    pub payment_id: Uuid,
    pub gateway: String,
}

/// The request to check a subscription by external identity.
#[derive(Deserialize)]
pub struct SubscriptionCheckRequest {
    pub telegram_id: i64,
}

/// The subscription status report for one user.
#[derive(Serialize)]
pub struct SubscriptionCheckResponse {
    pub user_id: Uuid,
    pub telegram_id: i64,
    pub plan: String,
    pub subscription_expires: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_trial: bool,
    pub is_expired: bool,
    pub days_remaining: i64,
    pub balance: i64,
}

/// The request to exchange a bot-issued token for a session.
#[derive(Deserialize)]
pub struct VerifyTokenRequest {
    pub token: String,
}

/// The response after a successful token exchange.
#[derive(Serialize)]
pub struct VerifyTokenResponse {
    pub user: User,
    pub session: Session,
}
