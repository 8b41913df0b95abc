//! HTTP handlers for club billing endpoints.
//!
//! These handlers connect Axum routes to the application layer handlers.
//! The caller's identity comes from the `X-User-Id` header set by the
//! upstream auth gateway; webhooks are authenticated by signature instead.

use std::sync::Arc;

use axum::extract::{Json, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;

use crate::application::{
    BillingError, BillingSettings, EnforcePaymentCommand, EnforcePaymentHandler,
    IngestPaymentEventCommand, IngestPaymentEventHandler, JoinFreeCommand, JoinFreeHandler,
    StartCheckoutCommand, StartCheckoutHandler, StartCheckoutResult,
};
use crate::domain::foundation::{ClubId, UserId};
use crate::ports::{AnalyticsSink, DocumentStore, PaymentGateway};

use super::dto::{
    CheckoutResponse, EnforcementResponse, ErrorResponse, MembershipResponse,
    StartCheckoutRequest, WebhookResponse,
};

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared application state containing all dependencies.
///
/// Cloned for each request; handlers are built on demand from the shared
/// ports.
#[derive(Clone)]
pub struct BillingAppState {
    pub store: Arc<dyn DocumentStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub sink: Arc<dyn AnalyticsSink>,
    pub settings: Arc<BillingSettings>,
}

impl BillingAppState {
    pub fn join_free_handler(&self) -> JoinFreeHandler {
        JoinFreeHandler::new(self.store.clone())
    }

    pub fn start_checkout_handler(&self) -> StartCheckoutHandler {
        StartCheckoutHandler::new(self.store.clone(), self.gateway.clone())
    }

    pub fn enforce_payment_handler(&self) -> EnforcePaymentHandler {
        EnforcePaymentHandler::new(self.store.clone(), self.settings.clone())
    }

    pub fn ingest_handler(&self) -> IngestPaymentEventHandler {
        IngestPaymentEventHandler::new(
            self.store.clone(),
            self.gateway.clone(),
            self.sink.clone(),
            self.settings.clone(),
        )
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Caller Context
// ════════════════════════════════════════════════════════════════════════════════

/// Caller identity forwarded by the auth gateway.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
}

/// Rejection type for AuthenticatedUser extraction.
pub struct AuthenticationRequired;

impl IntoResponse for AuthenticationRequired {
    fn into_response(self) -> axum::response::Response {
        let error = ErrorResponse::new("UNAUTHORIZED", "Authentication required");
        (StatusCode::UNAUTHORIZED, Json(error)).into_response()
    }
}

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthenticationRequired;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| UserId::new(s).ok())
            .ok_or(AuthenticationRequired)?;

        Ok(AuthenticatedUser { user_id })
    }
}

fn club_id(raw: String) -> Result<ClubId, ApiError> {
    ClubId::new(raw).map_err(|e| ApiError(BillingError::from(e)))
}

// ════════════════════════════════════════════════════════════════════════════════
// Command Handlers (POST endpoints)
// ════════════════════════════════════════════════════════════════════════════════

/// POST /api/clubs/:club_id/memberships/free - Join a free club
pub async fn join_free(
    State(state): State<BillingAppState>,
    Path(club): Path<String>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ApiError> {
    let cmd = JoinFreeCommand {
        club_id: club_id(club)?,
        user_id: user.user_id,
    };

    let outcome = state.join_free_handler().handle(cmd).await?;

    let status = if outcome.already_member {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(MembershipResponse::from(outcome))))
}

/// POST /api/clubs/:club_id/memberships/checkout - Start paid checkout flow
pub async fn start_checkout(
    State(state): State<BillingAppState>,
    Path(club): Path<String>,
    user: AuthenticatedUser,
    Json(request): Json<StartCheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let cmd = StartCheckoutCommand {
        club_id: club_id(club)?,
        user_id: user.user_id,
        success_url: request.success_url,
        cancel_url: request.cancel_url,
    };

    let response = match state.start_checkout_handler().handle(cmd).await? {
        StartCheckoutResult::Session(session) => {
            (StatusCode::CREATED, Json(CheckoutResponse::session(session)))
        }
        StartCheckoutResult::AlreadyMember(status) => {
            (StatusCode::OK, Json(CheckoutResponse::already_member(status)))
        }
    };
    Ok(response)
}

/// POST /api/clubs/:club_id/payment-enforcement - Move free members to paid
///
/// Responds 202 when the time budget ran out; the host calls again to resume.
pub async fn enforce_payment(
    State(state): State<BillingAppState>,
    Path(club): Path<String>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ApiError> {
    let cmd = EnforcePaymentCommand {
        club_id: club_id(club)?,
        host_id: user.user_id,
    };

    let result = state.enforce_payment_handler().handle(cmd).await?;

    let status = if result.partial {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(EnforcementResponse::from(result))))
}

/// POST /api/webhooks/payments - Handle payment gateway events
pub async fn payment_webhook(
    State(state): State<BillingAppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            BillingError::validation("Stripe-Signature", "missing Stripe-Signature header")
        })?;

    let cmd = IngestPaymentEventCommand {
        payload: body.to_vec(),
        signature: signature.to_string(),
    };

    // Mirror sends run detached; their handles are not awaited here.
    let result = state.ingest_handler().handle(cmd).await?;

    Ok((StatusCode::OK, Json(WebhookResponse::from(&result.outcome))))
}

/// GET /health - Liveness probe
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts application errors to HTTP responses.
#[derive(Debug)]
pub struct ApiError(pub BillingError);

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        Self(err)
    }
}

impl ApiError {
    /// Retryable failures map to 5xx so the gateway redelivers.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            BillingError::Validation { .. } => StatusCode::BAD_REQUEST,
            BillingError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            BillingError::Forbidden(_) => StatusCode::FORBIDDEN,
            BillingError::NotFound { .. } => StatusCode::NOT_FOUND,
            BillingError::Conflict(_) => StatusCode::SERVICE_UNAVAILABLE,
            BillingError::ExternalDependency { .. } => StatusCode::BAD_GATEWAY,
            BillingError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, code = self.0.code(), "Request failed");
        }
        let body = ErrorResponse::new(self.0.code(), self.0.user_message());
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_service_unavailable() {
        let err = ApiError(BillingError::Conflict("version mismatch".into()));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn internal_message_is_not_exposed() {
        let err = ApiError(BillingError::internal("pool exhausted at db-3"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.0.user_message(), "Something went wrong");
    }

    #[test]
    fn validation_maps_to_bad_request() {
        let err = ApiError(BillingError::validation("signature", "bad"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
