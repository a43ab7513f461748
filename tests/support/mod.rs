use std::env;
use std::sync::OnceLock;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use outlivion_api::AppState;
use outlivion_api::config::Config;
use outlivion_api::responses::RequestMeta;

fn split_db_url(url: &str) -> Result<(String, String), String> {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base.to_string(), Some(query)),
        None => (url.to_string(), None),
    };

    let db_start = base
        .rfind('/')
        .ok_or_else(|| "invalid database url".to_string())?;
    if db_start + 1 >= base.len() {
        return Err("database name is empty".to_string());
    }

    let db_name = base[db_start + 1..].to_string();
    let mut admin_url = format!("{}postgres", &base[..db_start + 1]);
    if let Some(query) = query {
        admin_url = format!("{admin_url}?{query}");
    }

    Ok((admin_url, db_name))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

static TEST_DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub struct TestDb {
    pub pool: PgPool,
    _guard: MutexGuard<'static, ()>,
}

/// Drops and recreates the database named by `TEST_DATABASE_URL`, runs the
/// migrations, and holds a process-wide lock so tests touching shared rows do
/// not interleave.
pub async fn init_test_db() -> TestDb {
    dotenvy::dotenv().ok();
    let test_url = env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let (admin_url, db_name) = split_db_url(&test_url).expect("invalid TEST_DATABASE_URL format");

    let lock = TEST_DB_LOCK.get_or_init(|| Mutex::new(()));
    let guard = lock.lock().await;

    let admin_pool = PgPool::connect(&admin_url).await.expect("connect admin db");

    let _ = sqlx::query("SELECT pg_advisory_lock(727272)")
        .execute(&admin_pool)
        .await;

    let quoted_name = quote_identifier(&db_name);
    let drop_sql = format!("DROP DATABASE IF EXISTS {quoted_name} WITH (FORCE)");
    let create_sql = format!("CREATE DATABASE {quoted_name}");

    let _ = sqlx::query(&drop_sql).execute(&admin_pool).await;
    sqlx::query(&create_sql)
        .execute(&admin_pool)
        .await
        .expect("create test db");

    let _ = sqlx::query("SELECT pg_advisory_unlock(727272)")
        .execute(&admin_pool)
        .await;

    admin_pool.close().await;

    let pool = PgPool::connect(&test_url).await.expect("connect test db");
    sqlx::migrate!().run(&pool).await.expect("migrations");
    TestDb { pool, _guard: guard }
}

pub fn build_state(pool: PgPool) -> AppState {
    AppState {
        pool,
        config: Config {
            server_port: 8000,
            database_url: String::new(),
            public_app_url: "http://localhost".to_string(),
            enot_shop_id: Some("1024".to_string()),
            enot_secret_key: Some("k1".to_string()),
            enot_secret_key_2: Some("k2".to_string()),
            yookassa_shop_id: None,
            yookassa_secret_key: None,
            enable_yookassa: false,
            internal_api_key: Some("test-internal".to_string()),
        },
        http: reqwest::Client::new(),
    }
}

pub fn request_meta() -> RequestMeta {
    let now = Utc::now();
    RequestMeta {
        request_id: Uuid::new_v4().to_string(),
        request_at: now.to_rfc3339(),
        timestamp: now.timestamp(),
    }
}

pub async fn insert_user(pool: &PgPool, balance: i64) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, telegram_id, balance) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(rand_telegram_id())
        .bind(balance)
        .execute(pool)
        .await
        .expect("insert user");
    id
}

pub async fn insert_code(pool: &PgPool, code: &str, days_valid: i32) {
    sqlx::query("INSERT INTO codes (code, plan, days_valid) VALUES ($1, 'month', $2)")
        .bind(code)
        .bind(days_valid)
        .execute(pool)
        .await
        .expect("insert code");
}

pub async fn insert_pending_payment(
    pool: &PgPool,
    user_id: Uuid,
    amount: i64,
    plan_type: Option<&str>,
) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO payments (id, user_id, amount, method, gateway, status, plan_type, plan_name)
         VALUES ($1, $2, $3, 'card', 'enot', 'pending', $4, $4)",
    )
    .bind(id)
    .bind(user_id)
    .bind(amount)
    .bind(plan_type)
    .execute(pool)
    .await
    .expect("insert payment");
    id
}

pub async fn count_transactions(pool: &PgPool, user_id: Uuid, kind: &str) -> i64 {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM transactions WHERE user_id = $1 AND type = $2")
            .bind(user_id)
            .bind(kind)
            .fetch_one(pool)
            .await
            .expect("count transactions");
    count
}

pub async fn user_balance(pool: &PgPool, user_id: Uuid) -> i64 {
    let (balance,): (i64,) = sqlx::query_as("SELECT balance FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .expect("select balance");
    balance
}

fn rand_telegram_id() -> i64 {
    // unique enough for one test database
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let entropy = i64::from(Uuid::new_v4().as_bytes()[0]);
    (nanos & 0x3FFF_FFFF_FFFF) + entropy
}
