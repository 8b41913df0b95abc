//! StartCheckoutHandler - Command handler for starting a paid membership checkout.

use std::sync::Arc;

use crate::application::documents::{load_club, load_user, membership_of};
use crate::application::BillingError;
use crate::domain::foundation::{ClubId, Money, UserId};
use crate::domain::membership::{MembershipRecord, MembershipStatus};
use crate::domain::payments::SubscriptionMetadata;
use crate::ports::{CheckoutSession, CreateCheckoutRequest, DocumentStore, PaymentGateway};

/// Command to start a checkout for a paid club.
#[derive(Debug, Clone)]
pub struct StartCheckoutCommand {
    pub club_id: ClubId,
    pub user_id: UserId,
    pub success_url: String,
    pub cancel_url: String,
}

/// Result of starting a checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartCheckoutResult {
    /// Redirect the user to this session.
    Session(CheckoutSession),
    /// The user already has access; no session was created.
    AlreadyMember(MembershipStatus),
}

/// Handler that opens gateway checkout sessions.
///
/// The session carries the membership metadata that ingestion later routes
/// the completed checkout on. Nothing is written to the store here; the
/// membership only changes once the gateway reports the checkout.
pub struct StartCheckoutHandler {
    store: Arc<dyn DocumentStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl StartCheckoutHandler {
    pub fn new(store: Arc<dyn DocumentStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    pub async fn handle(
        &self,
        cmd: StartCheckoutCommand,
    ) -> Result<StartCheckoutResult, BillingError> {
        // 1. Validate redirect targets
        validate_url("success_url", &cmd.success_url)?;
        validate_url("cancel_url", &cmd.cancel_url)?;

        // 2. Club must exist and be paid
        let loaded = load_club(self.store.as_ref(), &cmd.club_id).await?;
        let info = &loaded.club.info;
        if info.is_free() {
            return Err(BillingError::validation(
                "club_id",
                "club is free; join it directly",
            ));
        }

        // 3. Existing access short-circuits
        let user = load_user(self.store.as_ref(), &cmd.user_id).await?;
        let previous = membership_of(&user, &cmd.club_id)?;
        if let Some(record) = previous.as_ref().filter(|r| r.status.has_access()) {
            return Ok(StartCheckoutResult::AlreadyMember(record.status));
        }

        // 4. Create the session
        let request = CreateCheckoutRequest {
            club_id: cmd.club_id.clone(),
            user_id: cmd.user_id.clone(),
            price: Money::new(info.price, info.currency()),
            product_name: info
                .name
                .clone()
                .unwrap_or_else(|| "Club membership".to_string()),
            trial_days: trial_days(info.trial_days, previous.as_ref()),
            success_url: cmd.success_url,
            cancel_url: cmd.cancel_url,
            metadata: SubscriptionMetadata::membership(cmd.club_id.clone(), cmd.user_id.clone()),
        };

        let session = self
            .gateway
            .create_checkout_session(request)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    club_id = %cmd.club_id,
                    user_id = %cmd.user_id,
                    "Checkout session creation failed"
                );
                BillingError::from(e)
            })?;

        tracing::info!(
            club_id = %cmd.club_id,
            user_id = %cmd.user_id,
            session_id = %session.id,
            "Checkout session created"
        );
        Ok(StartCheckoutResult::Session(session))
    }
}

/// Trials are offered only to users who never had a paid subscription here.
fn trial_days(club_trial_days: Option<u32>, previous: Option<&MembershipRecord>) -> Option<u32> {
    let had_subscription = previous
        .map(|r| r.external_subscription_id.is_some() || !r.last_payment_type.is_free())
        .unwrap_or(false);
    club_trial_days.filter(|days| *days > 0 && !had_subscription)
}

fn validate_url(field: &str, url: &str) -> Result<(), BillingError> {
    if url.starts_with("https://") || url.starts_with("http://") {
        Ok(())
    } else {
        Err(BillingError::validation(field, "must be an absolute http(s) URL"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::document_store::InMemoryDocumentStore;
    use crate::adapters::stripe::MockPaymentGateway;
    use crate::application::documents::collections;
    use crate::domain::payments::SubscriptionPurpose;
    use crate::ports::{DocumentPath, PaymentError};
    use serde_json::json;

    async fn setup(
        info: serde_json::Value,
        user: serde_json::Value,
    ) -> (MockPaymentGateway, StartCheckoutHandler) {
        let store = Arc::new(InMemoryDocumentStore::new());
        store
            .insert(
                DocumentPath::new(collections::CLUBS, "club-1"),
                json!({"hostId": "host-1", "info": info}),
            )
            .await;
        store
            .insert(DocumentPath::new(collections::USERS, "user-a"), user)
            .await;
        let gateway = MockPaymentGateway::new();
        let handler = StartCheckoutHandler::new(store, Arc::new(gateway.clone()));
        (gateway, handler)
    }

    fn cmd() -> StartCheckoutCommand {
        StartCheckoutCommand {
            club_id: ClubId::new("club-1").unwrap(),
            user_id: UserId::new("user-a").unwrap(),
            success_url: "https://app.example.com/ok".into(),
            cancel_url: "https://app.example.com/cancel".into(),
        }
    }

    #[tokio::test]
    async fn creates_session_with_membership_metadata_and_trial() {
        let (gateway, handler) = setup(
            json!({"name": "Book Club", "price": 999, "currency": "eur", "trialDays": 14}),
            json!({}),
        )
        .await;

        let result = handler.handle(cmd()).await.unwrap();

        assert!(matches!(result, StartCheckoutResult::Session(_)));
        let requests = gateway.checkout_requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.price.amount, 999);
        assert_eq!(request.price.currency.as_str(), "eur");
        assert_eq!(request.trial_days, Some(14));
        assert_eq!(request.product_name, "Book Club");
        assert_eq!(request.metadata.purpose, Some(SubscriptionPurpose::Membership));
    }

    #[tokio::test]
    async fn returning_subscriber_gets_no_trial() {
        let (gateway, handler) = setup(
            json!({"price": 999, "trialDays": 14}),
            json!({"memberships": {"club-1": {
                "status": "canceled",
                "lastPaymentType": "subscription_renewal",
                "lastPaymentAt": "2024-01-01T00:00:00Z",
                "externalSubscriptionId": "sub_old",
                "joinedAt": "2023-01-01T00:00:00Z",
                "updatedAt": "2024-02-01T00:00:00Z"
            }}}),
        )
        .await;

        handler.handle(cmd()).await.unwrap();

        assert_eq!(gateway.checkout_requests()[0].trial_days, None);
    }

    #[tokio::test]
    async fn active_member_is_reported() {
        let (gateway, handler) = setup(
            json!({"price": 999}),
            json!({"memberships": {"club-1": {
                "status": "active",
                "lastPaymentType": "subscription",
                "lastPaymentAt": "2024-01-01T00:00:00Z",
                "joinedAt": "2023-01-01T00:00:00Z",
                "updatedAt": "2024-02-01T00:00:00Z"
            }}}),
        )
        .await;

        let result = handler.handle(cmd()).await.unwrap();

        assert_eq!(result, StartCheckoutResult::AlreadyMember(MembershipStatus::Active));
        assert!(!gateway.was_called("create_checkout_session"));
    }

    #[tokio::test]
    async fn free_club_is_rejected() {
        let (_gateway, handler) = setup(json!({"price": 0}), json!({})).await;
        assert!(matches!(
            handler.handle(cmd()).await,
            Err(BillingError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn relative_redirect_is_rejected() {
        let (gateway, handler) = setup(json!({"price": 999}), json!({})).await;
        let mut command = cmd();
        command.success_url = "/ok".into();

        let err = handler.handle(command).await.unwrap_err();

        assert_eq!(err, BillingError::validation("success_url", "must be an absolute http(s) URL"));
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn gateway_failure_is_external_dependency() {
        let (gateway, handler) = setup(json!({"price": 999}), json!({})).await;
        gateway.set_next_error(PaymentError::network("connection reset"));

        let err = handler.handle(cmd()).await.unwrap_err();

        assert_eq!(err.code(), "EXTERNAL_DEPENDENCY");
        assert!(err.is_retryable());
    }
}
