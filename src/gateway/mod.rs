pub mod enot;
pub mod yookassa;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// External payment service provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    Enot,
    Yookassa,
}

impl GatewayKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GatewayKind::Enot => "enot",
            GatewayKind::Yookassa => "yookassa",
        }
    }
}

impl FromStr for GatewayKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enot" => Ok(GatewayKind::Enot),
            "yookassa" => Ok(GatewayKind::Yookassa),
            _ => Err(()),
        }
    }
}

impl fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical 3-state payment status every provider vocabulary collapses into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }
}

#[derive(Debug)]
pub enum GatewayError {
    Http(reqwest::Error),
    Api { status: u16, body: String },
    Misconfigured(&'static str),
    InvalidResponse(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Http(e) => write!(f, "http error: {e}"),
            GatewayError::Api { status, body } => {
                write!(f, "gateway api error status={status} body={body}")
            }
            GatewayError::Misconfigured(what) => write!(f, "gateway misconfigured: {what}"),
            GatewayError::InvalidResponse(e) => write!(f, "invalid gateway response: {e}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<reqwest::Error> for GatewayError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

/// Result of an outgoing payment-creation call: where to send the user, and
/// the provider's id for the payment (when it mints one up front).
#[derive(Debug, Clone)]
pub struct CreatedPayment {
    pub redirect_url: String,
    pub gateway_payment_id: String,
}

/// Parameters common to both providers' payment creation.
#[derive(Debug, Clone)]
pub struct CreatePaymentParams {
    pub amount: i64,
    pub order_id: Uuid,
    pub description: String,
    pub return_url: String,
}
