//! Database-backed tests for the guarded state transitions: consumed codes
//! stay consumed, completed payments refuse replays, and the referral bonus
//! pays out once. Requires `TEST_DATABASE_URL`; the database is dropped and
//! recreated per run.

use axum::{Extension, Json, extract::State};
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde_json::json;
use uuid::Uuid;

use outlivion_api::db;
use outlivion_api::error::{ApiError, E_CODE_USED};
use outlivion_api::workflows::{code, payment};

mod support;

fn enot_sign(merchant_id: &str, amount: &str, secret: &str, order_id: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(format!("{merchant_id}:{amount}:{secret}:{order_id}").as_bytes());
    hex::encode(hasher.finalize())
}

async fn expiry_of(pool: &sqlx::PgPool, user_id: Uuid) -> Option<DateTime<Utc>> {
    let (expires,): (Option<DateTime<Utc>>,) =
        sqlx::query_as("SELECT subscription_expires FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .expect("select expiry");
    expires
}

#[tokio::test]
async fn used_code_conflicts_and_leaves_no_trace() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;

    let first = support::insert_user(pool, 0).await;
    let second = support::insert_user(pool, 0).await;
    support::insert_code(pool, "ABCD-1234-EFGH", 30).await;

    let response = code::activate_code(pool, first, "ABCD-1234-EFGH")
        .await
        .expect("first redemption");
    assert!(response.success);
    assert_eq!(response.days_added, 30);
    assert_eq!(support::count_transactions(pool, first, "code").await, 1);

    // same code again, different user: must conflict and mutate nothing
    let err = code::activate_code(pool, second, "ABCD-1234-EFGH")
        .await
        .expect_err("second redemption must fail");
    assert!(matches!(err.error, ApiError::Conflict(_)));
    assert_eq!(err.code, E_CODE_USED);
    assert_eq!(expiry_of(pool, second).await, None);
    assert_eq!(support::count_transactions(pool, second, "code").await, 0);

    let (used_by,): (Option<Uuid>,) =
        sqlx::query_as("SELECT used_by FROM codes WHERE code = $1")
            .bind("ABCD-1234-EFGH")
            .fetch_one(pool)
            .await
            .expect("select code");
    assert_eq!(used_by, Some(first));

    // the store-level claim itself also refuses a second winner
    let now = Utc::now();
    assert!(
        !db::claim_code(pool, "ABCD-1234-EFGH", second, now)
            .await
            .expect("claim")
    );
}

#[tokio::test]
async fn completed_payment_webhook_replay_is_a_noop() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let state = support::build_state(pool.clone());

    let user_id = support::insert_user(pool, 0).await;
    let payment_id = support::insert_pending_payment(pool, user_id, 199, Some("month")).await;
    let order_id = payment_id.to_string();

    let body = json!({
        "merchant_id": "1024",
        "amount": "199",
        "order_id": order_id,
        "status": "success",
        "payment_id": "inv-1",
        "sign": enot_sign("1024", "199", "k2", &order_id)
    });

    let Json(first) = payment::enot_webhook_handler(
        State(state.clone()),
        Extension(support::request_meta()),
        Json(body.clone()),
    )
    .await
    .expect("first delivery");
    assert_eq!(first["ok"], true);

    let (plan, status): (String, String) = sqlx::query_as(
        "SELECT u.plan, p.status FROM users u JOIN payments p ON p.user_id = u.id WHERE u.id = $1",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
    .expect("select plan/status");
    assert_eq!(plan, "month");
    assert_eq!(status, "completed");
    assert_eq!(
        support::count_transactions(pool, user_id, "subscription").await,
        1
    );
    let expiry_after_first = expiry_of(pool, user_id).await.expect("expiry set");

    // redelivery: acknowledged, but nothing moves
    let Json(second) = payment::enot_webhook_handler(
        State(state),
        Extension(support::request_meta()),
        Json(body),
    )
    .await
    .expect("redelivery");
    assert_eq!(second["ok"], true);
    assert_eq!(second["message"], "Already processed");
    assert_eq!(
        support::count_transactions(pool, user_id, "subscription").await,
        1
    );
    assert_eq!(expiry_of(pool, user_id).await, Some(expiry_after_first));

    // the guarded transition itself reports the replay
    assert!(
        !db::mark_payment_completed(pool, payment_id, None, &json!({}))
            .await
            .expect("mark completed")
    );
}

#[tokio::test]
async fn referral_bonus_is_credited_exactly_once() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;

    let referrer = support::insert_user(pool, 0).await;
    let referred = support::insert_user(pool, 0).await;
    sqlx::query("INSERT INTO referrals (referrer_id, referred_id) VALUES ($1, $2)")
        .bind(referrer)
        .bind(referred)
        .execute(pool)
        .await
        .expect("insert referral");
    support::insert_code(pool, "FIRST-CODE", 7).await;
    support::insert_code(pool, "SECOND-CODE", 7).await;

    code::activate_code(pool, referred, "FIRST-CODE")
        .await
        .expect("first redemption");
    assert_eq!(support::user_balance(pool, referrer).await, 50);
    assert_eq!(
        support::count_transactions(pool, referrer, "referral").await,
        1
    );

    // a later redemption is no longer "first" and pays nothing
    code::activate_code(pool, referred, "SECOND-CODE")
        .await
        .expect("second redemption");
    assert_eq!(support::user_balance(pool, referrer).await, 50);
    assert_eq!(
        support::count_transactions(pool, referrer, "referral").await,
        1
    );

    // the reward guard is spent even when triggered directly
    let referral_id: i64 =
        sqlx::query_as::<_, (i64,)>("SELECT id FROM referrals WHERE referred_id = $1")
            .bind(referred)
            .fetch_one(pool)
            .await
            .expect("select referral")
            .0;
    assert!(
        !db::grant_referral_reward(pool, referral_id, 50)
            .await
            .expect("grant")
    );
}
