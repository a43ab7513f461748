use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::models::AppState;
use crate::responses::meta_middleware;
use crate::workflows::{auth, code, payment, subscription};

pub fn init_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/auth/verify-token", post(auth::verify_token_handler))
        .route("/code/activate", post(code::activate_code_handler))
        .route("/payment/create", post(payment::create_payment_handler))
        .route("/payment/webhook", post(payment::enot_webhook_handler))
        .route(
            "/payment/webhook/yookassa",
            post(payment::yookassa_webhook_handler),
        )
        .route(
            "/subscription/check",
            post(subscription::check_subscription_handler)
                .get(subscription::check_subscription_query_handler),
        )
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(meta_middleware))
}
