//! Payment creation and webhook reconciliation.
//!
//! The purpose of a payment is fixed at creation time: a `plan_type` on the
//! row means a direct pay-for-plan purchase, its absence means a legacy
//! wallet top-up. Reconciliation re-materializes that as a tagged variant and
//! never re-infers it from loose webhook metadata.

use std::str::FromStr;

use axum::{Extension, Json, extract::State};
use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db;
use crate::error::{
    ApiError, ApiErrorWithMeta, E_BAD_PAYLOAD, E_BAD_SIGNATURE, E_GATEWAY_FAILURE,
    E_GATEWAY_MISMATCH, E_MISSING_PARAMS, E_PAYMENT_NOT_FOUND, E_PLAN_NOT_FOUND, E_USER_NOT_FOUND,
    WorkflowError,
};
use crate::gateway::{CreatePaymentParams, GatewayKind, PaymentStatus, enot, yookassa};
use crate::models::{AppState, CreatePaymentRequest, CreatePaymentResponse, Payment, User};
use crate::responses::RequestMeta;
use crate::subscription::{Plan, calculate_subscription_end};

/// What a completed payment does to the account, decided once at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentPurpose {
    PlanExtension(Plan),
    BalanceTopUp,
}

impl PaymentPurpose {
    /// Re-materializes the purpose from the payment row. Only purchasable
    /// plan labels count; anything else falls back to the top-up path.
    pub fn of(payment: &Payment) -> Self {
        match payment.plan_type.as_deref().map(Plan::from_str) {
            Some(Ok(plan)) if plan.is_purchasable() => PaymentPurpose::PlanExtension(plan),
            _ => PaymentPurpose::BalanceTopUp,
        }
    }
}

pub async fn create_payment_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<Json<CreatePaymentResponse>, ApiErrorWithMeta> {
    let gateway_kind = req.gateway.parse::<GatewayKind>().map_err(|_| {
        ApiError::BadRequest("Неизвестный платёжный шлюз".to_string())
            .with_meta(meta.clone())
            .with_code(E_BAD_PAYLOAD)
    })?;

    if !matches!(req.method.as_str(), "card" | "sbp" | "promo") {
        return Err(ApiError::BadRequest("Неизвестный способ оплаты".to_string())
            .with_meta(meta)
            .with_code(E_BAD_PAYLOAD));
    }

    // amount, plan_type and plan_name are resolved here, once
    let (amount, plan_type, plan_name) = match (&req.plan_type, req.plan_id) {
        (Some(label), _) => {
            let plan = label.parse::<Plan>().ok().filter(|p| p.is_purchasable());
            let Some(plan) = plan else {
                return Err(ApiError::BadRequest("Неизвестный тариф".to_string())
                    .with_meta(meta)
                    .with_code(E_PLAN_NOT_FOUND));
            };
            (plan.price(), Some(plan.as_str().to_string()), plan.name_ru().to_string())
        }
        (None, Some(plan_id)) => {
            let plan = db::get_plan(&state.pool, plan_id)
                .await
                .map_err(|e| ApiError::from(e).with_meta(meta.clone()))?;
            let Some(plan) = plan else {
                return Err(ApiError::NotFound("Тариф не найден".to_string())
                    .with_meta(meta)
                    .with_code(E_PLAN_NOT_FOUND));
            };
            (plan.price, None, plan.name)
        }
        (None, None) => {
            return Err(
                ApiError::BadRequest("Отсутствуют обязательные параметры".to_string())
                    .with_meta(meta)
                    .with_code(E_MISSING_PARAMS),
            );
        }
    };

    let user = db::get_user(&state.pool, req.user_id)
        .await
        .map_err(|e| ApiError::from(e).with_meta(meta.clone()))?;
    if user.is_none() {
        return Err(ApiError::NotFound("Пользователь не найден".to_string())
            .with_meta(meta)
            .with_code(E_USER_NOT_FOUND));
    }

    let payment_id = Uuid::new_v4();
    db::insert_payment(
        &state.pool,
        payment_id,
        req.user_id,
        amount,
        &req.method,
        gateway_kind.as_str(),
        plan_type.as_deref(),
        Some(plan_name.as_str()),
    )
    .await
    .map_err(|e| ApiError::from(e).with_meta(meta.clone()))?;

    let params = CreatePaymentParams {
        amount,
        order_id: payment_id,
        description: format!("Оплата тарифа {plan_name}"),
        return_url: format!("{}/payment/success", state.config.public_app_url),
    };

    let created = match gateway_kind {
        GatewayKind::Enot => enot::create_payment(
            state.config.enot_shop_id.as_deref(),
            state.config.enot_secret_key.as_deref(),
            &params,
            &format!("{}/payment/fail", state.config.public_app_url),
        ),
        GatewayKind::Yookassa => {
            yookassa::create_payment(
                &state.http,
                state.config.yookassa_shop_id.as_deref(),
                state.config.yookassa_secret_key.as_deref(),
                state.config.enable_yookassa,
                &params,
            )
            .await
        }
    };

    let created = match created {
        Ok(created) => created,
        Err(e) => {
            // keep the audit trail: the row records the failed attempt
            if let Err(db_err) = db::mark_payment_failed(&state.pool, payment_id, None).await {
                warn!(payment_id = %payment_id, "failed to mark payment failed: {db_err}");
            }
            return Err(ApiError::Gateway(e.into())
                .with_meta(meta)
                .with_code(E_GATEWAY_FAILURE));
        }
    };

    db::set_payment_gateway_ref(&state.pool, payment_id, &created.gateway_payment_id)
        .await
        .map_err(|e| ApiError::from(e).with_meta(meta.clone()))?;

    info!(
        payment_id = %payment_id,
        gateway = %gateway_kind,
        amount,
        "payment created"
    );

    Ok(Json(CreatePaymentResponse {
        payment_url: created.redirect_url,
        payment_id,
        gateway: gateway_kind.as_str().to_string(),
    }))
}

/// Outcome of applying a completed-status webhook.
enum Applied {
    Done,
    AlreadyProcessed,
}

/// Applies a completed payment inside the caller's transaction. The guarded
/// `pending -> completed` update is the idempotence gate: a redelivered
/// webhook finds zero affected rows and stops.
async fn apply_completed_payment(
    tx: &mut Transaction<'_, Postgres>,
    payment: &Payment,
    gateway_payment_id: Option<&str>,
    gateway_data: &serde_json::Value,
) -> Result<Applied, WorkflowError> {
    if !db::mark_payment_completed(tx.as_mut(), payment.id, gateway_payment_id, gateway_data).await? {
        return Ok(Applied::AlreadyProcessed);
    }

    let Some(user) = db::get_user(tx.as_mut(), payment.user_id).await? else {
        warn!(payment_id = %payment.id, user_id = %payment.user_id, "payment owner not found");
        return Ok(Applied::Done);
    };

    match PaymentPurpose::of(payment) {
        PaymentPurpose::PlanExtension(plan) => extend_plan(tx, &user, payment, plan).await?,
        PaymentPurpose::BalanceTopUp => top_up_balance(tx, &user, payment).await?,
    }

    Ok(Applied::Done)
}

async fn extend_plan(
    tx: &mut Transaction<'_, Postgres>,
    user: &User,
    payment: &Payment,
    plan: Plan,
) -> Result<(), WorkflowError> {
    let now = Utc::now();
    let new_end = calculate_subscription_end(user.subscription_expires, plan, now);

    db::set_plan_and_expiry(tx.as_mut(), user.id, plan.as_str(), new_end).await?;

    let label = payment.plan_name.clone().unwrap_or_else(|| plan.name_ru().to_string());
    db::insert_transaction(
        tx.as_mut(),
        user.id,
        "subscription",
        payment.amount,
        &format!("Продление подписки: {label} ({})", payment.gateway),
    )
    .await?;

    info!(
        user_id = %user.id,
        plan = %plan,
        expires_at = %new_end,
        "subscription extended"
    );
    Ok(())
}

/// Legacy wallet path: credit the balance, then auto-renew the old
/// plan-by-id subscription when it is expired and the balance now covers it.
async fn top_up_balance(
    tx: &mut Transaction<'_, Postgres>,
    user: &User,
    payment: &Payment,
) -> Result<(), WorkflowError> {
    let now = Utc::now();

    db::add_user_balance(tx.as_mut(), user.id, payment.amount).await?;
    db::insert_transaction(
        tx.as_mut(),
        user.id,
        "payment",
        payment.amount,
        &format!("Пополнение баланса через {}", payment.method),
    )
    .await?;

    let new_balance = user.balance + payment.amount;
    info!(user_id = %user.id, new_balance, amount = payment.amount, "balance topped up");

    let Some(plan_id) = user.plan_id else {
        return Ok(());
    };
    let Some(plan) = db::get_plan(tx.as_mut(), plan_id).await? else {
        return Ok(());
    };

    let is_expired = user.subscription_expires.map(|e| e < now).unwrap_or(true);
    if !is_expired || new_balance < plan.price {
        return Ok(());
    }

    let new_end = now + Duration::days(i64::from(plan.duration_days));
    db::add_user_balance(tx.as_mut(), user.id, -plan.price).await?;
    db::set_subscription_expiry(tx.as_mut(), user.id, new_end).await?;
    db::insert_transaction(
        tx.as_mut(),
        user.id,
        "subscription",
        -plan.price,
        "Автоматическое продление подписки",
    )
    .await?;

    info!(
        user_id = %user.id,
        plan_id,
        price = plan.price,
        expires_at = %new_end,
        "subscription auto-renewed from balance"
    );
    Ok(())
}

/// Looks the payment up and enforces the cross-gateway spoofing guard.
async fn load_payment_for(
    pool: &PgPool,
    order_id: Uuid,
    expected_gateway: GatewayKind,
) -> Result<Payment, WorkflowError> {
    let payment = db::get_payment(pool, order_id).await?.ok_or_else(|| {
        WorkflowError::new(
            ApiError::NotFound("Платёж не найден".to_string()),
            E_PAYMENT_NOT_FOUND,
        )
    })?;

    if payment.gateway != expected_gateway.as_str() {
        warn!(
            payment_id = %payment.id,
            expected = expected_gateway.as_str(),
            actual = %payment.gateway,
            "gateway mismatch"
        );
        return Err(WorkflowError::new(
            ApiError::BadRequest("Gateway mismatch".to_string()),
            E_GATEWAY_MISMATCH,
        ));
    }

    Ok(payment)
}

/// Enot webhook. The MD5 signature is verified before anything is read from
/// the store; responses never carry internal detail back to the gateway.
pub async fn enot_webhook_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(raw): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiErrorWithMeta> {
    let payload: enot::EnotWebhookPayload = serde_json::from_value(raw.clone()).map_err(|_| {
        ApiError::BadRequest("Invalid webhook payload".to_string())
            .with_meta(meta.clone())
            .with_code(E_BAD_PAYLOAD)
    })?;

    info!(
        order_id = payload.order_id.as_deref().unwrap_or("-"),
        status = payload.status.as_deref().unwrap_or("-"),
        "enot webhook received"
    );

    if !enot::verify_webhook_signature(&payload, state.config.enot_secret_key_2.as_deref()) {
        warn!("enot webhook signature verification failed");
        return Err(ApiError::Unauthorized("Invalid signature".to_string())
            .with_meta(meta)
            .with_code(E_BAD_SIGNATURE));
    }

    let order_id = payload
        .order_id
        .as_deref()
        .and_then(|s| s.parse::<Uuid>().ok())
        .ok_or_else(|| {
            ApiError::BadRequest("Invalid order_id".to_string())
                .with_meta(meta.clone())
                .with_code(E_BAD_PAYLOAD)
        })?;

    let payment = load_payment_for(&state.pool, order_id, GatewayKind::Enot)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;

    let status = payload.status.as_deref().map(enot::normalize_status);
    reconcile(&state.pool, &payment, status, payload.payment_id.as_deref(), &raw)
        .await
        .map_err(|e| e.with_meta(meta))
}

/// YooKassa webhook. Verification is structural; see `gateway::yookassa`.
pub async fn yookassa_webhook_handler(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(raw): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiErrorWithMeta> {
    let payload: yookassa::YooKassaWebhookPayload =
        serde_json::from_value(raw.clone()).map_err(|_| {
            ApiError::BadRequest("Invalid webhook payload".to_string())
                .with_meta(meta.clone())
                .with_code(E_BAD_PAYLOAD)
        })?;

    let object = match payload.object {
        Some(ref object) if yookassa::verify_webhook(&payload) => object.clone(),
        _ => {
            warn!("yookassa webhook failed structural verification");
            return Err(ApiError::BadRequest("Invalid webhook payload".to_string())
                .with_meta(meta)
                .with_code(E_BAD_PAYLOAD));
        }
    };
    info!(
        yookassa_id = %object.id,
        status = %object.status,
        event = payload.event.as_deref().unwrap_or("-"),
        "yookassa webhook received"
    );

    let order_id = object
        .order_id()
        .and_then(|s| s.parse::<Uuid>().ok())
        .ok_or_else(|| {
            ApiError::BadRequest("Missing order_id in metadata".to_string())
                .with_meta(meta.clone())
                .with_code(E_BAD_PAYLOAD)
        })?;

    let payment = load_payment_for(&state.pool, order_id, GatewayKind::Yookassa)
        .await
        .map_err(|e| e.with_meta(meta.clone()))?;

    let status = yookassa::normalize_status(&object.status);
    let audit = raw.get("object").cloned().unwrap_or(raw.clone());
    reconcile(&state.pool, &payment, Some(status), Some(&object.id), &audit)
        .await
        .map_err(|e| e.with_meta(meta))
}

/// Shared tail of both webhook handlers: branch on the normalized status and
/// answer the gateway with minimal JSON.
async fn reconcile(
    pool: &PgPool,
    payment: &Payment,
    status: Option<PaymentStatus>,
    gateway_payment_id: Option<&str>,
    gateway_data: &serde_json::Value,
) -> Result<Json<serde_json::Value>, WorkflowError> {
    if payment.status != "pending" {
        info!(payment_id = %payment.id, status = %payment.status, "payment already processed");
        return Ok(Json(json!({ "ok": true, "message": "Already processed" })));
    }

    match status {
        Some(PaymentStatus::Completed) => {
            let mut tx = pool.begin().await?;
            let applied =
                apply_completed_payment(&mut tx, payment, gateway_payment_id, gateway_data).await?;
            tx.commit().await?;

            match applied {
                Applied::Done => Ok(Json(json!({ "ok": true }))),
                Applied::AlreadyProcessed => {
                    Ok(Json(json!({ "ok": true, "message": "Already processed" })))
                }
            }
        }
        Some(PaymentStatus::Failed) => {
            db::mark_payment_failed(pool, payment.id, Some(gateway_data)).await?;
            info!(payment_id = %payment.id, "payment marked as failed");
            Ok(Json(json!({ "ok": true })))
        }
        Some(PaymentStatus::Pending) | None => {
            // provider will redeliver once the payment settles
            Ok(Json(json!({ "ok": true, "ignored": true })))
        }
    }
}
