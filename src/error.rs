use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::responses::RequestMeta;

pub const E_MISSING_PARAMS: &str = "MISSING_PARAMS";
pub const E_BAD_PAYLOAD: &str = "BAD_PAYLOAD";
pub const E_BAD_SIGNATURE: &str = "BAD_SIGNATURE";
pub const E_UNAUTHORIZED: &str = "UNAUTHORIZED";
pub const E_TOKEN_INVALID: &str = "TOKEN_INVALID";
pub const E_TOKEN_USED: &str = "TOKEN_USED";
pub const E_TOKEN_EXPIRED: &str = "TOKEN_EXPIRED";
pub const E_CODE_NOT_FOUND: &str = "CODE_NOT_FOUND";
pub const E_CODE_USED: &str = "CODE_USED";
pub const E_USER_NOT_FOUND: &str = "USER_NOT_FOUND";
pub const E_PLAN_NOT_FOUND: &str = "PLAN_NOT_FOUND";
pub const E_PAYMENT_NOT_FOUND: &str = "PAYMENT_NOT_FOUND";
pub const E_GATEWAY_MISMATCH: &str = "GATEWAY_MISMATCH";
pub const E_GATEWAY_FAILURE: &str = "GATEWAY_FAILURE";
pub const E_DB_FAILURE: &str = "DB_FAILURE";

/// API-level error taxonomy. User-facing messages are in Russian; internal
/// detail is logged and never returned to the caller.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    Gateway(anyhow::Error),
    Internal(anyhow::Error),
}

#[derive(Debug)]
pub struct ApiErrorWithMeta {
    error: ApiError,
    meta: RequestMeta,
    code: Option<String>,
}

impl ApiError {
    pub fn with_meta(self, meta: RequestMeta) -> ApiErrorWithMeta {
        ApiErrorWithMeta {
            error: self,
            meta,
            code: None,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Internal(e.into())
    }
}

impl ApiErrorWithMeta {
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }
}

/// A workflow failure paired with its error code, mapped onto a response at
/// the handler boundary once request metadata is in hand.
#[derive(Debug)]
pub struct WorkflowError {
    pub error: ApiError,
    pub code: &'static str,
}

impl WorkflowError {
    pub fn new(error: ApiError, code: &'static str) -> Self {
        Self { error, code }
    }

    pub fn with_meta(self, meta: RequestMeta) -> ApiErrorWithMeta {
        self.error.with_meta(meta).with_code(self.code)
    }
}

impl From<sqlx::Error> for WorkflowError {
    fn from(e: sqlx::Error) -> Self {
        Self::new(ApiError::Internal(e.into()), E_DB_FAILURE)
    }
}

impl IntoResponse for ApiErrorWithMeta {
    fn into_response(self) -> Response {
        let (status, error_message) = match self.error {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            // already-used code / already-processed payment; the bot client
            // contract expects 400 here, not 409
            ApiError::Conflict(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Gateway(e) => {
                error!("gateway error: {:?}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "Платёжный шлюз временно недоступен".to_string(),
                )
            }
            ApiError::Internal(e) => {
                error!("internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Внутренняя ошибка сервера".to_string(),
                )
            }
        };

        let mut body = json!({
            "request_id": self.meta.request_id,
            "error": error_message,
        });
        if let Some(code) = self.code {
            body["code"] = json!(code);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    fn meta() -> RequestMeta {
        RequestMeta {
            request_id: "test-req".to_string(),
            request_at: "2026-01-10T12:00:00Z".to_string(),
            timestamp: 1_768_046_400,
        }
    }

    #[test]
    fn status_mapping() {
        let cases = [
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (ApiError::NotFound("x".into()), StatusCode::NOT_FOUND),
            // conflicts surface as 400 for existing clients
            (ApiError::Conflict("x".into()), StatusCode::BAD_REQUEST),
            (
                ApiError::Gateway(anyhow::anyhow!("x")),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ApiError::Internal(anyhow::anyhow!("x")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            let resp = err.with_meta(meta()).into_response();
            assert_eq!(resp.status(), expected);
        }
    }
}
