//! Enot.io adapter. Checkout is redirect-based (no API call at creation),
//! webhooks are authenticated with an MD5 signature over a fixed field order.

use md5::{Digest, Md5};
use serde::Deserialize;
use tracing::warn;

use super::{CreatePaymentParams, CreatedPayment, GatewayError, PaymentStatus};

const ENOT_PAY_URL: &str = "https://enot.io/pay";

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Builds the Enot.io redirect checkout URL. The request signature covers
/// `shop_id:amount:secret:order_id`.
pub fn create_payment(
    shop_id: Option<&str>,
    secret_key: Option<&str>,
    params: &CreatePaymentParams,
    fail_url: &str,
) -> Result<CreatedPayment, GatewayError> {
    let (shop_id, secret_key) = match (shop_id, secret_key) {
        (Some(s), Some(k)) if !s.is_empty() && !k.is_empty() => (s, k),
        _ => return Err(GatewayError::Misconfigured("enot credentials")),
    };

    let amount = params.amount.to_string();
    let order_id = params.order_id.to_string();
    let sign = md5_hex(&format!("{shop_id}:{amount}:{secret_key}:{order_id}"));

    let query: String = form_urlencoded::Serializer::new(String::new())
        .append_pair("merchant", shop_id)
        .append_pair("amount", &amount)
        .append_pair("order_id", &order_id)
        .append_pair("currency", "RUB")
        .append_pair("comment", &params.description)
        .append_pair("success_url", &params.return_url)
        .append_pair("fail_url", fail_url)
        .append_pair("sign", &sign)
        .finish();

    Ok(CreatedPayment {
        redirect_url: format!("{ENOT_PAY_URL}?{query}"),
        gateway_payment_id: order_id,
    })
}

/// Webhook notification body. Enot posts amounts as strings; unknown fields
/// are kept for the audit record.
#[derive(Debug, Clone, Deserialize)]
pub struct EnotWebhookPayload {
    pub merchant_id: Option<String>,
    pub amount: Option<String>,
    pub order_id: Option<String>,
    pub status: Option<String>,
    pub sign: Option<String>,
    pub payment_id: Option<String>,
    pub payment_system: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// Recomputes `md5(merchant_id:amount:secret_key_2:order_id)` and compares it
/// to the `sign` field. Returns `false` on any missing field or missing
/// secret, never an error.
pub fn verify_webhook_signature(payload: &EnotWebhookPayload, secret_key_2: Option<&str>) -> bool {
    let Some(secret) = secret_key_2.filter(|s| !s.is_empty()) else {
        warn!("ENOT_SECRET_KEY_2 is not configured, rejecting webhook");
        return false;
    };

    let (Some(merchant_id), Some(amount), Some(order_id), Some(sign)) = (
        payload.merchant_id.as_deref(),
        payload.amount.as_deref(),
        payload.order_id.as_deref(),
        payload.sign.as_deref(),
    ) else {
        return false;
    };

    let expected = md5_hex(&format!("{merchant_id}:{amount}:{secret}:{order_id}"));
    expected == sign
}

pub fn normalize_status(status: &str) -> PaymentStatus {
    match status.to_ascii_lowercase().as_str() {
        "success" => PaymentStatus::Completed,
        "fail" | "failed" | "expired" | "rejected" => PaymentStatus::Failed,
        other => {
            warn!(status = other, "unexpected enot status, treating as pending");
            PaymentStatus::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn payload(merchant_id: &str, amount: &str, order_id: &str, sign: &str) -> EnotWebhookPayload {
        EnotWebhookPayload {
            merchant_id: Some(merchant_id.to_string()),
            amount: Some(amount.to_string()),
            order_id: Some(order_id.to_string()),
            status: Some("success".to_string()),
            sign: Some(sign.to_string()),
            payment_id: Some("p-1".to_string()),
            payment_system: Some("card".to_string()),
            extra: serde_json::json!({}),
        }
    }

    #[test]
    fn signature_accepts_known_vector() {
        // md5("shop-1:500:secret2:order-1")
        let sign = md5_hex("shop-1:500:secret2:order-1");
        let p = payload("shop-1", "500", "order-1", &sign);
        assert!(verify_webhook_signature(&p, Some("secret2")));
    }

    #[test]
    fn signature_rejects_tampered_amount() {
        let sign = md5_hex("shop-1:500:secret2:order-1");
        let p = payload("shop-1", "9999", "order-1", &sign);
        assert!(!verify_webhook_signature(&p, Some("secret2")));
    }

    #[test]
    fn signature_rejects_missing_fields() {
        let mut p = payload("shop-1", "500", "order-1", "deadbeef");
        p.order_id = None;
        assert!(!verify_webhook_signature(&p, Some("secret2")));
    }

    #[test]
    fn signature_rejects_without_secret() {
        let sign = md5_hex("shop-1:500:secret2:order-1");
        let p = payload("shop-1", "500", "order-1", &sign);
        assert!(!verify_webhook_signature(&p, None));
        assert!(!verify_webhook_signature(&p, Some("")));
    }

    #[test]
    fn status_normalization_table() {
        assert_eq!(normalize_status("success"), PaymentStatus::Completed);
        assert_eq!(normalize_status("SUCCESS"), PaymentStatus::Completed);
        assert_eq!(normalize_status("fail"), PaymentStatus::Failed);
        assert_eq!(normalize_status("failed"), PaymentStatus::Failed);
        assert_eq!(normalize_status("expired"), PaymentStatus::Failed);
        assert_eq!(normalize_status("rejected"), PaymentStatus::Failed);
        assert_eq!(normalize_status("processing"), PaymentStatus::Pending);
    }

    #[test]
    fn create_payment_builds_signed_redirect() {
        let order_id = Uuid::new_v4();
        let params = CreatePaymentParams {
            amount: 199,
            order_id,
            description: "Оплата тарифа 1 месяц".to_string(),
            return_url: "https://app.example/payment/success".to_string(),
        };
        let created =
            create_payment(Some("shop-1"), Some("secret"), &params, "https://app.example/payment/fail")
                .unwrap();

        assert!(created.redirect_url.starts_with("https://enot.io/pay?"));
        assert!(created.redirect_url.contains("merchant=shop-1"));
        assert!(created.redirect_url.contains(&format!("order_id={order_id}")));
        let expected_sign = md5_hex(&format!("shop-1:199:secret:{order_id}"));
        assert!(created.redirect_url.contains(&format!("sign={expected_sign}")));
        assert_eq!(created.gateway_payment_id, order_id.to_string());
    }

    #[test]
    fn create_payment_requires_credentials() {
        let params = CreatePaymentParams {
            amount: 199,
            order_id: Uuid::new_v4(),
            description: String::new(),
            return_url: String::new(),
        };
        assert!(matches!(
            create_payment(None, Some("k"), &params, ""),
            Err(GatewayError::Misconfigured(_))
        ));
        assert!(matches!(
            create_payment(Some("s"), None, &params, ""),
            Err(GatewayError::Misconfigured(_))
        ));
    }

    #[test]
    fn webhook_payload_parses_from_json() {
        let p: EnotWebhookPayload = serde_json::from_value(serde_json::json!({
            "merchant": "m",
            "merchant_id": "shop-1",
            "amount": "500.00",
            "order_id": "abc",
            "currency": "RUB",
            "payment_id": "77",
            "payment_system": "sbp",
            "status": "success",
            "sign": "00ff",
            "credited": "485.00"
        }))
        .unwrap();
        assert_eq!(p.merchant_id.as_deref(), Some("shop-1"));
        assert_eq!(p.amount.as_deref(), Some("500.00"));
        assert_eq!(p.extra["credited"], "485.00");
    }
}
