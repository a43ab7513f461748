//! Promo-code redemption: extends the subscription, consumes the code and
//! pays the one-shot referral bonus on a user's first-ever redemption. The
//! whole sequence runs in one transaction; the code claim and the reward
//! grant are conditional updates, so a concurrent duplicate request loses
//! cleanly instead of double-applying.

use axum::{Extension, Json, extract::State, http::HeaderMap, http::header::AUTHORIZATION};
use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::REFERRAL_BONUS;
use crate::db;
use crate::error::{
    ApiError, ApiErrorWithMeta, E_CODE_NOT_FOUND, E_CODE_USED, E_UNAUTHORIZED, E_USER_NOT_FOUND,
    WorkflowError,
};
use crate::models::{ActivateCodeRequest, ActivateCodeResponse, AppState};
use crate::responses::RequestMeta;
use crate::subscription::extend_from;

/// Resolves the acting user: a bearer session token, or a raw `user_id` from
/// a caller presenting the internal service key. An unauthenticated `user_id`
/// is never honored.
async fn resolve_actor(
    state: &AppState,
    headers: &HeaderMap,
    body_user_id: Option<Uuid>,
) -> Result<Uuid, WorkflowError> {
    if let Some(bearer) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        let session_token = bearer.trim().parse::<Uuid>().map_err(|_| {
            WorkflowError::new(
                ApiError::Unauthorized("Недействительная сессия".to_string()),
                E_UNAUTHORIZED,
            )
        })?;
        let user = db::get_session_user(&state.pool, session_token).await?;
        return match user {
            Some(user) => Ok(user.id),
            None => Err(WorkflowError::new(
                ApiError::Unauthorized("Недействительная сессия".to_string()),
                E_UNAUTHORIZED,
            )),
        };
    }

    let internal_key = headers
        .get("X-Internal-Api-Key")
        .and_then(|v| v.to_str().ok());
    if let (Some(presented), Some(expected), Some(user_id)) = (
        internal_key,
        state.config.internal_api_key.as_deref(),
        body_user_id,
    ) {
        if !expected.is_empty() && presented == expected {
            return Ok(user_id);
        }
    }

    Err(WorkflowError::new(
        ApiError::Unauthorized("Требуется авторизация".to_string()),
        E_UNAUTHORIZED,
    ))
}

pub async fn activate_code_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    headers: HeaderMap,
    Json(req): Json<ActivateCodeRequest>,
) -> Result<Json<ActivateCodeResponse>, ApiErrorWithMeta> {
    let user_id = resolve_actor(&state, &headers, req.user_id)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;

    let response = activate_code(&state.pool, user_id, &req.code)
        .await
        .map_err(|e| e.with_meta(meta))?;

    Ok(Json(response))
}

pub async fn activate_code(
    pool: &PgPool,
    user_id: Uuid,
    code: &str,
) -> Result<ActivateCodeResponse, WorkflowError> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let code_row = db::get_code(tx.as_mut(), code).await?.ok_or_else(|| {
        WorkflowError::new(
            ApiError::NotFound("Код не найден".to_string()),
            E_CODE_NOT_FOUND,
        )
    })?;

    if code_row.used_by.is_some() {
        return Err(WorkflowError::new(
            ApiError::Conflict("Код уже был использован".to_string()),
            E_CODE_USED,
        ));
    }

    let user = db::get_user(tx.as_mut(), user_id).await?.ok_or_else(|| {
        WorkflowError::new(
            ApiError::NotFound("Пользователь не найден".to_string()),
            E_USER_NOT_FOUND,
        )
    })?;

    let new_expiration = extend_from(
        user.subscription_expires,
        i64::from(code_row.days_valid),
        now,
    );

    // the claim is the serialization point: whoever flips used_by first wins
    if !db::claim_code(tx.as_mut(), code, user_id, now).await? {
        return Err(WorkflowError::new(
            ApiError::Conflict("Код уже был использован".to_string()),
            E_CODE_USED,
        ));
    }

    db::set_subscription_expiry(tx.as_mut(), user_id, new_expiration).await?;
    db::insert_transaction(
        tx.as_mut(),
        user_id,
        "code",
        0,
        &format!("Активация кода: {} ({})", code_row.code, code_row.plan),
    )
    .await?;

    info!(
        user_id = %user_id,
        code = %code_row.code,
        days_added = code_row.days_valid,
        new_expiration = %new_expiration,
        "code activated"
    );

    pay_first_redemption_bonus(&mut tx, user_id, code).await?;

    tx.commit().await?;

    Ok(ActivateCodeResponse {
        success: true,
        days_added: code_row.days_valid,
        new_expiration,
    })
}

/// Credits the referrer once, on the referred user's first redemption. The
/// `reward_amount = 0` guard keeps a re-triggered check from paying twice.
async fn pay_first_redemption_bonus(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    just_claimed: &str,
) -> Result<(), WorkflowError> {
    let prior = db::count_other_codes_used_by(tx.as_mut(), user_id, just_claimed).await?;
    if prior > 0 {
        return Ok(());
    }

    let Some(referral) = db::get_referral_by_referred(tx.as_mut(), user_id).await? else {
        return Ok(());
    };
    if referral.reward_amount != 0 {
        return Ok(());
    }

    if !db::grant_referral_reward(tx.as_mut(), referral.id, REFERRAL_BONUS).await? {
        warn!(referral_id = referral.id, "referral reward already granted");
        return Ok(());
    }

    db::add_user_balance(tx.as_mut(), referral.referrer_id, REFERRAL_BONUS).await?;
    db::insert_transaction(
        tx.as_mut(),
        referral.referrer_id,
        "referral",
        REFERRAL_BONUS,
        "Бонус за приглашение друга",
    )
    .await?;

    info!(
        referrer_id = %referral.referrer_id,
        referred_id = %user_id,
        amount = REFERRAL_BONUS,
        "referral bonus credited"
    );

    Ok(())
}
