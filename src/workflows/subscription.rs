//! Subscription status lookups for the bot and other backend services. The
//! report is derived from the expiry timestamp at request time, never from
//! the stored plan label alone.

use axum::{
    Extension, Json,
    extract::{Query, State},
};
use chrono::Utc;
use serde::Deserialize;

use crate::db;
use crate::error::{ApiError, ApiErrorWithMeta, E_USER_NOT_FOUND};
use crate::models::{AppState, SubscriptionCheckRequest, SubscriptionCheckResponse, User};
use crate::responses::RequestMeta;
use crate::subscription::{Plan, subscription_status};

pub async fn check_subscription_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<SubscriptionCheckRequest>,
) -> Result<Json<SubscriptionCheckResponse>, ApiErrorWithMeta> {
    check_subscription(&state, req.telegram_id, meta).await
}

#[derive(Deserialize)]
pub struct SubscriptionCheckQuery {
    pub telegram_id: i64,
}

pub async fn check_subscription_query_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Query(query): Query<SubscriptionCheckQuery>,
) -> Result<Json<SubscriptionCheckResponse>, ApiErrorWithMeta> {
    check_subscription(&state, query.telegram_id, meta).await
}

async fn check_subscription(
    state: &AppState,
    telegram_id: i64,
    meta: RequestMeta,
) -> Result<Json<SubscriptionCheckResponse>, ApiErrorWithMeta> {
    let user = db::get_user_by_telegram_id(&state.pool, telegram_id)
        .await
        .map_err(|e| ApiError::from(e).with_meta(meta.clone()))?;

    // consumed by the bot, which expects this message verbatim
    let Some(user) = user else {
        return Err(ApiError::NotFound("User not found".to_string())
            .with_meta(meta)
            .with_code(E_USER_NOT_FOUND));
    };

    Ok(Json(build_report(&user)))
}

fn build_report(user: &User) -> SubscriptionCheckResponse {
    let plan = user.plan.parse::<Plan>().unwrap_or(Plan::Expired);
    let status = subscription_status(plan, user.subscription_expires, Utc::now());

    SubscriptionCheckResponse {
        user_id: user.id,
        telegram_id: user.telegram_id,
        plan: status.plan.to_string(),
        subscription_expires: status.expires_at,
        is_active: status.is_active,
        is_trial: status.is_trial,
        is_expired: status.is_expired,
        days_remaining: status.days_remaining,
        balance: user.balance,
    }
}
