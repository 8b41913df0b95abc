//! Data Transfer Objects for club billing endpoints.

use serde::{Deserialize, Serialize};

use crate::application::{EnforcePaymentResult, IngestOutcome, JoinFreeOutcome};
use crate::domain::membership::MembershipStatus;
use crate::ports::CheckoutSession;

// ════════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Request to start a paid membership checkout.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCheckoutRequest {
    pub success_url: String,
    pub cancel_url: String,
}

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MembershipResponse {
    pub status: MembershipStatus,
    pub already_member: bool,
}

impl From<JoinFreeOutcome> for MembershipResponse {
    fn from(outcome: JoinFreeOutcome) -> Self {
        Self {
            status: outcome.status,
            already_member: outcome.already_member,
        }
    }
}

/// Either a session to redirect to, or the access the user already has.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MembershipStatus>,
    pub already_member: bool,
}

impl CheckoutResponse {
    pub fn session(session: CheckoutSession) -> Self {
        Self {
            session_id: Some(session.id),
            checkout_url: Some(session.url),
            status: None,
            already_member: false,
        }
    }

    pub fn already_member(status: MembershipStatus) -> Self {
        Self {
            session_id: None,
            checkout_url: None,
            status: Some(status),
            already_member: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementResponse {
    pub updated_members: usize,
    pub batches_processed: usize,
    pub partial: bool,
}

impl From<EnforcePaymentResult> for EnforcementResponse {
    fn from(result: EnforcePaymentResult) -> Self {
        Self {
            updated_members: result.updated_members,
            batches_processed: result.batches_processed,
            partial: result.partial,
        }
    }
}

/// Acknowledgement returned to the payment gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub received: bool,
    pub event_id: String,
    /// `processed`, `already_processed` or `ignored`
    pub outcome: String,
}

impl From<&IngestOutcome> for WebhookResponse {
    fn from(outcome: &IngestOutcome) -> Self {
        let (event_id, label) = match outcome {
            IngestOutcome::Processed { event_id, .. } => (event_id, "processed"),
            IngestOutcome::AlreadyProcessed { event_id, .. } => (event_id, "already_processed"),
            IngestOutcome::Ignored { event_id, .. } => (event_id, "ignored"),
        };
        Self {
            received: true,
            event_id: event_id.clone(),
            outcome: label.to_string(),
        }
    }
}

/// Standard error response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn checkout_request_reads_camel_case() {
        let request: StartCheckoutRequest = serde_json::from_value(json!({
            "successUrl": "https://club.example.com/ok",
            "cancelUrl": "https://club.example.com/cancel"
        }))
        .unwrap();
        assert_eq!(request.success_url, "https://club.example.com/ok");
    }

    #[test]
    fn already_member_checkout_omits_session_fields() {
        let body = serde_json::to_value(CheckoutResponse::already_member(
            MembershipStatus::Active,
        ))
        .unwrap();
        assert_eq!(body, json!({"status": "active", "alreadyMember": true}));
    }

    #[test]
    fn webhook_response_labels_outcome() {
        let outcome = IngestOutcome::AlreadyProcessed {
            event_id: "evt_1".into(),
            key: "invoice_in_1".into(),
        };
        let response = WebhookResponse::from(&outcome);
        assert_eq!(response.outcome, "already_processed");
        assert_eq!(response.event_id, "evt_1");
    }
}
