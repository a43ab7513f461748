//! Token exchange: a single-use token minted by the bot becomes a bearer
//! session. When the auth layer assigned the account a different id than our
//! profile carries, the profile is migrated to the auth-side id so both views
//! of the user converge.

use axum::{Extension, Json, extract::State};
use chrono::{Duration, Utc};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::db;
use crate::error::{
    ApiError, ApiErrorWithMeta, E_TOKEN_EXPIRED, E_TOKEN_INVALID, E_TOKEN_USED, WorkflowError,
};
use crate::models::{AppState, VerifyTokenRequest, VerifyTokenResponse};
use crate::responses::RequestMeta;

const SESSION_TTL_DAYS: i64 = 7;

pub async fn verify_token_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<VerifyTokenRequest>,
) -> Result<Json<VerifyTokenResponse>, ApiErrorWithMeta> {
    let response = verify_token(&state.pool, &req.token)
        .await
        .map_err(|e| e.with_meta(meta))?;
    Ok(Json(response))
}

pub async fn verify_token(
    pool: &PgPool,
    token: &str,
) -> Result<VerifyTokenResponse, WorkflowError> {
    let now = Utc::now();

    let auth_token = db::get_auth_token(pool, token).await?.ok_or_else(|| {
        WorkflowError::new(
            ApiError::Unauthorized("Неверный или истекший токен".to_string()),
            E_TOKEN_INVALID,
        )
    })?;

    if auth_token.used {
        return Err(WorkflowError::new(
            ApiError::Unauthorized("Токен уже использован".to_string()),
            E_TOKEN_USED,
        ));
    }
    if auth_token.expires_at < now {
        return Err(WorkflowError::new(
            ApiError::Unauthorized("Токен истёк".to_string()),
            E_TOKEN_EXPIRED,
        ));
    }

    let mut tx = pool.begin().await?;

    let user = match db::get_user_by_telegram_id(tx.as_mut(), auth_token.telegram_id).await? {
        Some(profile) => match auth_token.auth_user_id {
            // the auth layer knows this account under a different id
            Some(auth_id) if auth_id != profile.id => {
                let migrated = db::migrate_user_identity(&mut tx, profile.id, auth_id).await?;
                info!(
                    old_id = %profile.id,
                    new_id = %auth_id,
                    telegram_id = auth_token.telegram_id,
                    "user identity migrated"
                );
                migrated
            }
            _ => profile,
        },
        None => {
            let id = auth_token.auth_user_id.unwrap_or_else(Uuid::new_v4);
            let created = db::create_user_profile(tx.as_mut(), id, auth_token.telegram_id).await?;
            info!(user_id = %created.id, telegram_id = created.telegram_id, "user profile created");
            created
        }
    };

    // losing this race means another exchange spent the token first; the
    // transaction drop rolls back anything done above
    if !db::mark_token_used(tx.as_mut(), token).await? {
        return Err(WorkflowError::new(
            ApiError::Unauthorized("Токен уже использован".to_string()),
            E_TOKEN_USED,
        ));
    }

    let session = db::insert_session(tx.as_mut(), user.id, Duration::days(SESSION_TTL_DAYS)).await?;

    tx.commit().await?;

    info!(user_id = %user.id, session_expires = %session.expires_at, "session issued");

    Ok(VerifyTokenResponse { user, session })
}
