//! Query helpers over the Postgres store. Writes that guard a state
//! transition (code claim, payment status, referral reward, token use) are
//! single conditional UPDATEs checked via `rows_affected`, so the store
//! itself enforces exactly-once semantics under concurrent requests.

use chrono::{DateTime, Duration, Utc};
use sqlx::{PgExecutor, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{AuthToken, Code, Payment, PlanRow, Referral, Session, User};

const USER_COLUMNS: &str = "id, telegram_id, balance, plan, plan_id, subscription_expires";

pub async fn get_user<'e>(exec: impl PgExecutor<'e>, id: Uuid) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(exec)
    .await
}

pub async fn get_user_by_telegram_id<'e>(
    exec: impl PgExecutor<'e>,
    telegram_id: i64,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE telegram_id = $1"
    ))
    .bind(telegram_id)
    .fetch_optional(exec)
    .await
}

pub async fn create_user_profile<'e>(
    exec: impl PgExecutor<'e>,
    id: Uuid,
    telegram_id: i64,
) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (id, telegram_id) VALUES ($1, $2) RETURNING {USER_COLUMNS}"
    ))
    .bind(id)
    .bind(telegram_id)
    .fetch_one(exec)
    .await
}

pub async fn set_subscription_expiry<'e>(
    exec: impl PgExecutor<'e>,
    user_id: Uuid,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET subscription_expires = $1 WHERE id = $2")
        .bind(expires_at)
        .bind(user_id)
        .execute(exec)
        .await?;
    Ok(())
}

pub async fn set_plan_and_expiry<'e>(
    exec: impl PgExecutor<'e>,
    user_id: Uuid,
    plan: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET plan = $1, subscription_expires = $2 WHERE id = $3")
        .bind(plan)
        .bind(expires_at)
        .bind(user_id)
        .execute(exec)
        .await?;
    Ok(())
}

pub async fn add_user_balance<'e>(
    exec: impl PgExecutor<'e>,
    user_id: Uuid,
    delta: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET balance = balance + $1 WHERE id = $2")
        .bind(delta)
        .bind(user_id)
        .execute(exec)
        .await?;
    Ok(())
}

pub async fn get_code<'e>(exec: impl PgExecutor<'e>, code: &str) -> Result<Option<Code>, sqlx::Error> {
    sqlx::query_as::<_, Code>(
        "SELECT id, code, plan, days_valid, used_by, used_at FROM codes WHERE code = $1",
    )
    .bind(code)
    .fetch_optional(exec)
    .await
}

/// Atomically claims a code for a user. Returns `false` when someone already
/// claimed it.
pub async fn claim_code<'e>(
    exec: impl PgExecutor<'e>,
    code: &str,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE codes SET used_by = $1, used_at = $2 WHERE code = $3 AND used_by IS NULL",
    )
    .bind(user_id)
    .bind(now)
    .bind(code)
    .execute(exec)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Counts code redemptions by this user other than the one just claimed.
pub async fn count_other_codes_used_by<'e>(
    exec: impl PgExecutor<'e>,
    user_id: Uuid,
    except_code: &str,
) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM codes WHERE used_by = $1 AND code <> $2")
            .bind(user_id)
            .bind(except_code)
            .fetch_one(exec)
            .await?;
    Ok(count)
}

pub async fn get_referral_by_referred<'e>(
    exec: impl PgExecutor<'e>,
    referred_id: Uuid,
) -> Result<Option<Referral>, sqlx::Error> {
    sqlx::query_as::<_, Referral>(
        "SELECT id, referrer_id, referred_id, reward_amount FROM referrals WHERE referred_id = $1",
    )
    .bind(referred_id)
    .fetch_optional(exec)
    .await
}

/// Sets the referral reward exactly once; the `reward_amount = 0` guard makes
/// a re-triggered bonus a no-op.
pub async fn grant_referral_reward<'e>(
    exec: impl PgExecutor<'e>,
    referral_id: i64,
    amount: i64,
) -> Result<bool, sqlx::Error> {
    let res =
        sqlx::query("UPDATE referrals SET reward_amount = $1 WHERE id = $2 AND reward_amount = 0")
            .bind(amount)
            .bind(referral_id)
            .execute(exec)
            .await?;
    Ok(res.rows_affected() == 1)
}

/// Appends a ledger entry. The ledger is append-only; rows are never updated
/// or deleted.
pub async fn insert_transaction<'e>(
    exec: impl PgExecutor<'e>,
    user_id: Uuid,
    kind: &str,
    amount: i64,
    description: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO transactions (user_id, type, amount, description) VALUES ($1, $2, $3, $4)",
    )
    .bind(user_id)
    .bind(kind)
    .bind(amount)
    .bind(description)
    .execute(exec)
    .await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_payment<'e>(
    exec: impl PgExecutor<'e>,
    id: Uuid,
    user_id: Uuid,
    amount: i64,
    method: &str,
    gateway: &str,
    plan_type: Option<&str>,
    plan_name: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO payments (id, user_id, amount, method, gateway, status, plan_type, plan_name)
         VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7)",
    )
    .bind(id)
    .bind(user_id)
    .bind(amount)
    .bind(method)
    .bind(gateway)
    .bind(plan_type)
    .bind(plan_name)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn get_payment<'e>(
    exec: impl PgExecutor<'e>,
    id: Uuid,
) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as::<_, Payment>(
        "SELECT id, user_id, amount, method, gateway, status, plan_type, plan_name,
                gateway_payment_id, gateway_data, created_at
         FROM payments WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(exec)
    .await
}

pub async fn set_payment_gateway_ref<'e>(
    exec: impl PgExecutor<'e>,
    id: Uuid,
    gateway_payment_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE payments SET gateway_payment_id = $1 WHERE id = $2")
        .bind(gateway_payment_id)
        .bind(id)
        .execute(exec)
        .await?;
    Ok(())
}

/// `pending -> completed` transition. Returns `false` when the payment was
/// already in a terminal state (idempotent webhook replay).
pub async fn mark_payment_completed<'e>(
    exec: impl PgExecutor<'e>,
    id: Uuid,
    gateway_payment_id: Option<&str>,
    gateway_data: &serde_json::Value,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE payments
         SET status = 'completed',
             gateway_payment_id = COALESCE($1, gateway_payment_id),
             gateway_data = $2
         WHERE id = $3 AND status = 'pending'",
    )
    .bind(gateway_payment_id)
    .bind(gateway_data)
    .bind(id)
    .execute(exec)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// `pending -> failed` transition, same guard as completion.
pub async fn mark_payment_failed<'e>(
    exec: impl PgExecutor<'e>,
    id: Uuid,
    gateway_data: Option<&serde_json::Value>,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE payments
         SET status = 'failed', gateway_data = COALESCE($1, gateway_data)
         WHERE id = $2 AND status = 'pending'",
    )
    .bind(gateway_data)
    .bind(id)
    .execute(exec)
    .await?;
    Ok(res.rows_affected() == 1)
}

pub async fn get_plan<'e>(exec: impl PgExecutor<'e>, id: i64) -> Result<Option<PlanRow>, sqlx::Error> {
    sqlx::query_as::<_, PlanRow>("SELECT id, name, price, duration_days FROM plans WHERE id = $1")
        .bind(id)
        .fetch_optional(exec)
        .await
}

pub async fn get_auth_token<'e>(
    exec: impl PgExecutor<'e>,
    token: &str,
) -> Result<Option<AuthToken>, sqlx::Error> {
    sqlx::query_as::<_, AuthToken>(
        "SELECT token, telegram_id, auth_user_id, used, expires_at FROM auth_tokens WHERE token = $1",
    )
    .bind(token)
    .fetch_optional(exec)
    .await
}

/// Flips the single-use flag; a concurrent second exchange loses.
pub async fn mark_token_used<'e>(exec: impl PgExecutor<'e>, token: &str) -> Result<bool, sqlx::Error> {
    let res = sqlx::query("UPDATE auth_tokens SET used = TRUE WHERE token = $1 AND used = FALSE")
        .bind(token)
        .execute(exec)
        .await?;
    Ok(res.rows_affected() == 1)
}

pub async fn insert_session<'e>(
    exec: impl PgExecutor<'e>,
    user_id: Uuid,
    ttl: Duration,
) -> Result<Session, sqlx::Error> {
    sqlx::query_as::<_, Session>(
        "INSERT INTO sessions (token, user_id, expires_at) VALUES ($1, $2, $3)
         RETURNING token, user_id, expires_at",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(Utc::now() + ttl)
    .fetch_one(exec)
    .await
}

pub async fn get_session_user<'e>(
    exec: impl PgExecutor<'e>,
    session_token: Uuid,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        "SELECT u.id, u.telegram_id, u.balance, u.plan, u.plan_id, u.subscription_expires
         FROM sessions s JOIN users u ON u.id = s.user_id
         WHERE s.token = $1 AND s.expires_at > NOW()",
    )
    .bind(session_token)
    .fetch_optional(exec)
    .await
}

/// Dependent tables rewritten when a profile changes its primary key.
const USER_REFERENCES: &[(&str, &str)] = &[
    ("codes", "used_by"),
    ("referrals", "referrer_id"),
    ("referrals", "referred_id"),
    ("transactions", "user_id"),
    ("payments", "user_id"),
    ("sessions", "user_id"),
];

/// Rewrites every foreign-key reference from `old_id` to `new_id`, then the
/// profile row itself. Runs inside the caller's transaction so a mid-sequence
/// failure rolls everything back.
pub async fn migrate_user_identity(
    tx: &mut Transaction<'_, Postgres>,
    old_id: Uuid,
    new_id: Uuid,
) -> Result<User, sqlx::Error> {
    for (table, column) in USER_REFERENCES {
        // fixed identifier list, not user input
        let sql = format!("UPDATE {table} SET {column} = $1 WHERE {column} = $2");
        sqlx::query(&sql)
            .bind(new_id)
            .bind(old_id)
            .execute(tx.as_mut())
            .await?;
    }

    sqlx::query_as::<_, User>(&format!(
        "UPDATE users SET id = $1 WHERE id = $2 RETURNING {USER_COLUMNS}"
    ))
    .bind(new_id)
    .bind(old_id)
    .fetch_one(tx.as_mut())
    .await
}
