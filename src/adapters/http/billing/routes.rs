//! Axum router configuration for club billing endpoints.

use std::time::Duration;

use axum::{
    body::Body,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::handlers::{
    enforce_payment, health, join_free, payment_webhook, start_checkout, BillingAppState,
};

/// Club-scoped membership and enforcement routes, mounted at `/api/clubs`.
///
/// # Routes
/// - `POST /:club_id/memberships/free` - Join a free club
/// - `POST /:club_id/memberships/checkout` - Start a paid checkout
/// - `POST /:club_id/payment-enforcement` - Host moves free members to paid
pub fn club_routes() -> Router<BillingAppState> {
    Router::new()
        .route("/:club_id/memberships/free", post(join_free))
        .route("/:club_id/memberships/checkout", post(start_checkout))
        .route("/:club_id/payment-enforcement", post(enforce_payment))
}

/// Gateway webhook routes, mounted at `/api/webhooks`.
///
/// No caller identity; requests are verified by signature.
pub fn webhook_routes() -> Router<BillingAppState> {
    Router::new().route("/payments", post(payment_webhook))
}

/// The complete service router without middleware.
pub fn billing_router() -> Router<BillingAppState> {
    Router::new()
        .route("/health", get(health))
        .nest("/api/clubs", club_routes())
        .nest("/api/webhooks", webhook_routes())
}

fn request_span(request: &http::Request<Body>) -> tracing::Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    tracing::info_span!(
        "http_request",
        method = %request.method(),
        uri = %request.uri(),
        request_id = %request_id,
    )
}

/// Service router with tracing, request ids and a request timeout applied.
pub fn app(state: BillingAppState, request_timeout: Duration) -> Router {
    billing_router().with_state(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http().make_span_with(request_span))
            .layer(TimeoutLayer::new(request_timeout))
            .layer(PropagateRequestIdLayer::x_request_id()),
    )
}
