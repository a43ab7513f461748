//! YooKassa adapter. Payments are created through the v3 REST API; webhook
//! notifications carry no usable signature, so verification here is
//! structural only and real deployments allowlist YooKassa's source IPs at
//! the edge.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use super::{CreatePaymentParams, CreatedPayment, GatewayError, PaymentStatus};

const YOOKASSA_API_URL: &str = "https://api.yookassa.ru/v3/payments";

/// Amounts go over the wire as strings with two decimal places.
pub fn format_amount(amount: i64) -> String {
    format!("{amount}.00")
}

#[derive(Debug, Deserialize)]
pub struct YooKassaAmount {
    pub value: String,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
pub struct YooKassaConfirmation {
    #[serde(rename = "type")]
    pub kind: String,
    pub confirmation_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct YooKassaPayment {
    pub id: String,
    pub status: String,
    pub amount: YooKassaAmount,
    pub confirmation: Option<YooKassaConfirmation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct YooKassaPaymentMethod {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct YooKassaWebhookObject {
    pub id: String,
    pub status: String,
    pub metadata: Option<serde_json::Value>,
    pub payment_method: Option<YooKassaPaymentMethod>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct YooKassaWebhookPayload {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub event: Option<String>,
    pub object: Option<YooKassaWebhookObject>,
}

impl YooKassaWebhookObject {
    /// The `order_id` we planted in metadata at creation time.
    pub fn order_id(&self) -> Option<&str> {
        self.metadata.as_ref()?.get("order_id")?.as_str()
    }
}

#[derive(Debug, Serialize)]
struct CreateRequest {
    amount: serde_json::Value,
    capture: bool,
    confirmation: serde_json::Value,
    description: String,
    metadata: serde_json::Value,
}

/// Creates a payment through the YooKassa v3 API. An `Idempotence-Key` is
/// minted per call so provider-side retries cannot mint duplicate payments.
pub async fn create_payment(
    http: &reqwest::Client,
    shop_id: Option<&str>,
    secret_key: Option<&str>,
    enabled: bool,
    params: &CreatePaymentParams,
) -> Result<CreatedPayment, GatewayError> {
    if !enabled {
        return Err(GatewayError::Misconfigured("yookassa is disabled"));
    }
    let (shop_id, secret_key) = match (shop_id, secret_key) {
        (Some(s), Some(k)) if !s.is_empty() && !k.is_empty() => (s, k),
        _ => return Err(GatewayError::Misconfigured("yookassa credentials")),
    };

    let body = CreateRequest {
        amount: json!({ "value": format_amount(params.amount), "currency": "RUB" }),
        capture: true,
        confirmation: json!({ "type": "redirect", "return_url": params.return_url }),
        description: params.description.clone(),
        metadata: json!({ "order_id": params.order_id.to_string() }),
    };

    let resp = http
        .post(YOOKASSA_API_URL)
        .basic_auth(shop_id, Some(secret_key))
        .header("Idempotence-Key", Uuid::new_v4().to_string())
        .json(&body)
        .send()
        .await?;

    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        return Err(GatewayError::Api {
            status: status.as_u16(),
            body: text,
        });
    }

    let payment: YooKassaPayment = serde_json::from_str(&text)
        .map_err(|e| GatewayError::InvalidResponse(format!("{e}; body={text}")))?;

    let redirect_url = payment
        .confirmation
        .and_then(|c| c.confirmation_url)
        .ok_or_else(|| GatewayError::InvalidResponse("no confirmation_url".to_string()))?;

    Ok(CreatedPayment {
        redirect_url,
        gateway_payment_id: payment.id,
    })
}

/// Structural validation of a webhook notification. YooKassa does not sign
/// webhook bodies; source-IP allowlisting is the production control and lives
/// in front of this service.
pub fn verify_webhook(payload: &YooKassaWebhookPayload) -> bool {
    payload.kind.as_deref() == Some("notification")
        && payload.event.is_some()
        && payload.object.is_some()
}

pub fn normalize_status(status: &str) -> PaymentStatus {
    match status.to_ascii_lowercase().as_str() {
        "succeeded" => PaymentStatus::Completed,
        "canceled" => PaymentStatus::Failed,
        "pending" | "waiting_for_capture" => PaymentStatus::Pending,
        other => {
            warn!(status = other, "unknown yookassa status, treating as pending");
            PaymentStatus::Pending
        }
    }
}
