//! Mock payment gateway for testing.
//!
//! Provides a configurable implementation of `PaymentGateway` for unit and
//! integration tests. Supports:
//! - Queued verified events
//! - An in-memory subscription "database" that amendments mutate
//! - Error injection, per method or for the next call
//! - Call tracking

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::payments::PaymentEvent;
use crate::ports::{
    CheckoutSession, CreateCheckoutRequest, GatewaySubscription, PaymentError, PaymentGateway,
    SubscriptionStatus,
};

/// Mock payment gateway for testing.
///
/// # Example
///
/// ```ignore
/// let mock = MockPaymentGateway::new();
/// mock.push_event(PaymentEvent::Unrecognized { .. });
/// mock.add_subscription(subscription);
/// mock.set_method_error("update_subscription_price", PaymentError::network("down"));
/// ```
#[derive(Default, Clone)]
pub struct MockPaymentGateway {
    /// Inner state (thread-safe for async tests).
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    /// Events handed out by `verify_event`, in order.
    events: VecDeque<PaymentEvent>,

    subscriptions: HashMap<String, GatewaySubscription>,

    /// Next checkout session to return.
    next_checkout: Option<CheckoutSession>,

    /// Error to return on next call.
    next_error: Option<PaymentError>,

    /// Specific errors by method name. These persist until cleared.
    method_errors: HashMap<String, PaymentError>,

    /// Checkout requests received, for assertions.
    checkout_requests: Vec<CreateCheckoutRequest>,

    call_log: Vec<MethodCall>,

    reject_signatures: bool,

    checkout_counter: u32,
}

/// Recorded method call for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCall {
    pub method: String,
    pub args: Vec<String>,
}

impl MockPaymentGateway {
    /// Create a new mock gateway with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that fails all webhook verifications.
    pub fn rejecting_webhooks() -> Self {
        let mock = Self::new();
        mock.state().reject_signatures = true;
        mock
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Methods
    // ════════════════════════════════════════════════════════════════════════════

    /// Queue an event for the next `verify_event` call.
    pub fn push_event(&self, event: PaymentEvent) {
        self.state().events.push_back(event);
    }

    /// Add a subscription to the "database".
    pub fn add_subscription(&self, subscription: GatewaySubscription) {
        let id = subscription.id.clone();
        self.state().subscriptions.insert(id, subscription);
    }

    /// Current view of a stored subscription.
    pub fn subscription(&self, id: &str) -> Option<GatewaySubscription> {
        self.state().subscriptions.get(id).cloned()
    }

    /// Set the checkout session to return.
    pub fn set_checkout_session(&self, session: CheckoutSession) {
        self.state().next_checkout = Some(session);
    }

    /// Fail the next call, whatever it is.
    pub fn set_next_error(&self, error: PaymentError) {
        self.state().next_error = Some(error);
    }

    /// Fail every call to `method` until cleared.
    pub fn set_method_error(&self, method: &str, error: PaymentError) {
        self.state().method_errors.insert(method.to_string(), error);
    }

    pub fn clear_errors(&self) {
        let mut state = self.state();
        state.next_error = None;
        state.method_errors.clear();
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Assertion Methods
    // ════════════════════════════════════════════════════════════════════════════

    /// Get all recorded method calls.
    pub fn calls(&self) -> Vec<MethodCall> {
        self.state().call_log.clone()
    }

    /// Calls made to a specific method.
    pub fn calls_to(&self, method: &str) -> Vec<MethodCall> {
        self.state()
            .call_log
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    pub fn was_called(&self, method: &str) -> bool {
        !self.calls_to(method).is_empty()
    }

    pub fn checkout_requests(&self) -> Vec<CreateCheckoutRequest> {
        self.state().checkout_requests.clone()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Internal Helpers
    // ════════════════════════════════════════════════════════════════════════════

    /// Record the call and return any injected error.
    fn begin(&self, method: &str, args: Vec<String>) -> Result<MutexGuard<'_, MockState>, PaymentError> {
        let mut state = self.state();
        state.call_log.push(MethodCall {
            method: method.to_string(),
            args,
        });

        if let Some(error) = state.next_error.take() {
            return Err(error);
        }
        if let Some(error) = state.method_errors.get(method) {
            return Err(error.clone());
        }
        Ok(state)
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn verify_event(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<PaymentEvent, PaymentError> {
        let mut state = self.begin(
            "verify_event",
            vec![payload.len().to_string(), signature.to_string()],
        )?;

        if state.reject_signatures {
            return Err(PaymentError::invalid_webhook("Invalid signature"));
        }

        state
            .events
            .pop_front()
            .ok_or_else(|| PaymentError::invalid_webhook("No event queued in mock gateway"))
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<GatewaySubscription>, PaymentError> {
        let state = self.begin("get_subscription", vec![subscription_id.to_string()])?;
        Ok(state.subscriptions.get(subscription_id).cloned())
    }

    async fn update_subscription_price(
        &self,
        subscription_id: &str,
        price_id: &str,
    ) -> Result<GatewaySubscription, PaymentError> {
        let mut state = self.begin(
            "update_subscription_price",
            vec![subscription_id.to_string(), price_id.to_string()],
        )?;

        let subscription = state
            .subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| PaymentError::not_found("Subscription"))?;

        let item = subscription.items.first_mut().ok_or_else(|| {
            PaymentError::invalid_request(format!(
                "Subscription {} has no items to amend",
                subscription_id
            ))
        })?;
        item.price_id = price_id.to_string();

        Ok(subscription.clone())
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), PaymentError> {
        let mut state = self.begin("cancel_subscription", vec![subscription_id.to_string()])?;

        let subscription = state
            .subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| PaymentError::not_found("Subscription"))?;
        subscription.status = SubscriptionStatus::Canceled;
        Ok(())
    }

    async fn create_checkout_session(
        &self,
        request: CreateCheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let mut state = self.begin(
            "create_checkout_session",
            vec![request.club_id.to_string(), request.user_id.to_string()],
        )?;
        state.checkout_requests.push(request);

        if let Some(session) = state.next_checkout.take() {
            return Ok(session);
        }

        state.checkout_counter += 1;
        let id = format!("cs_mock_{}", state.checkout_counter);
        Ok(CheckoutSession {
            url: format!("https://checkout.example.com/{}", id),
            id,
            expires_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{ClubId, Money, UserId};
    use crate::domain::payments::SubscriptionMetadata;
    use crate::ports::{PaymentErrorCode, SubscriptionItem};

    fn subscription(id: &str, price: &str) -> GatewaySubscription {
        GatewaySubscription {
            id: id.to_string(),
            customer_id: Some("cus_1".to_string()),
            status: SubscriptionStatus::Active,
            items: vec![SubscriptionItem {
                id: "si_1".to_string(),
                price_id: price.to_string(),
            }],
            metadata: SubscriptionMetadata::default(),
            trial_end: None,
            current_period_end: None,
        }
    }

    fn checkout_request() -> CreateCheckoutRequest {
        let club = ClubId::new("club-1").unwrap();
        let user = UserId::new("user-1").unwrap();
        CreateCheckoutRequest {
            club_id: club.clone(),
            user_id: user.clone(),
            price: Money::new(1999, Default::default()),
            product_name: "Membership".to_string(),
            trial_days: None,
            success_url: "https://example.com/ok".to_string(),
            cancel_url: "https://example.com/cancel".to_string(),
            metadata: SubscriptionMetadata::membership(club, user),
        }
    }

    #[tokio::test]
    async fn verify_event_pops_queued_events_in_order() {
        let mock = MockPaymentGateway::new();
        mock.push_event(PaymentEvent::Unrecognized {
            event_id: "evt_1".into(),
            event_type: "a".into(),
        });
        mock.push_event(PaymentEvent::Unrecognized {
            event_id: "evt_2".into(),
            event_type: "b".into(),
        });

        assert_eq!(mock.verify_event(b"{}", "sig").await.unwrap().event_id(), "evt_1");
        assert_eq!(mock.verify_event(b"{}", "sig").await.unwrap().event_id(), "evt_2");
        assert!(mock.verify_event(b"{}", "sig").await.is_err());
    }

    #[tokio::test]
    async fn rejecting_mock_fails_verification() {
        let mock = MockPaymentGateway::rejecting_webhooks();
        let err = mock.verify_event(b"{}", "sig").await.unwrap_err();
        assert_eq!(err.code, PaymentErrorCode::InvalidWebhook);
    }

    #[tokio::test]
    async fn update_price_mutates_stored_subscription() {
        let mock = MockPaymentGateway::new();
        mock.add_subscription(subscription("sub_1", "price_tier_a"));

        let updated = mock
            .update_subscription_price("sub_1", "price_tier_b")
            .await
            .unwrap();

        assert_eq!(updated.items[0].price_id, "price_tier_b");
        assert_eq!(
            mock.subscription("sub_1").unwrap().items[0].price_id,
            "price_tier_b"
        );
        assert_eq!(
            mock.calls_to("update_subscription_price")[0].args,
            vec!["sub_1".to_string(), "price_tier_b".to_string()]
        );
    }

    #[tokio::test]
    async fn missing_subscription_is_not_found() {
        let mock = MockPaymentGateway::new();
        assert!(mock.get_subscription("sub_x").await.unwrap().is_none());
        let err = mock.cancel_subscription("sub_x").await.unwrap_err();
        assert_eq!(err.code, PaymentErrorCode::NotFound);
    }

    #[tokio::test]
    async fn cancel_marks_subscription_canceled() {
        let mock = MockPaymentGateway::new();
        mock.add_subscription(subscription("sub_1", "price_tier_a"));
        mock.cancel_subscription("sub_1").await.unwrap();
        assert_eq!(
            mock.subscription("sub_1").unwrap().status,
            SubscriptionStatus::Canceled
        );
    }

    #[tokio::test]
    async fn method_error_persists_and_next_error_is_one_shot() {
        let mock = MockPaymentGateway::new();
        mock.add_subscription(subscription("sub_1", "price_tier_a"));

        mock.set_next_error(PaymentError::network("blip"));
        assert!(mock.get_subscription("sub_1").await.is_err());
        assert!(mock.get_subscription("sub_1").await.is_ok());

        mock.set_method_error("cancel_subscription", PaymentError::provider("down"));
        assert!(mock.cancel_subscription("sub_1").await.is_err());
        assert!(mock.cancel_subscription("sub_1").await.is_err());

        mock.clear_errors();
        assert!(mock.cancel_subscription("sub_1").await.is_ok());
    }

    #[tokio::test]
    async fn checkout_generates_sessions_and_records_requests() {
        let mock = MockPaymentGateway::new();
        let first = mock.create_checkout_session(checkout_request()).await.unwrap();
        let second = mock.create_checkout_session(checkout_request()).await.unwrap();

        assert_eq!(first.id, "cs_mock_1");
        assert_eq!(second.id, "cs_mock_2");
        assert!(first.url.ends_with("cs_mock_1"));
        assert_eq!(mock.checkout_requests().len(), 2);
        assert!(mock.was_called("create_checkout_session"));
    }
}
