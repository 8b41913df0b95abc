//! Stripe payment gateway adapter.
//!
//! Implements the `PaymentGateway` port against the Stripe REST API:
//! webhook verification, subscription lookups and price amendments,
//! cancellation, and subscription-mode checkout sessions.
//!
//! # Security
//!
//! - HMAC-SHA256 signature verification with constant-time comparison
//! - Timestamp validation (5-minute window) for replay attack prevention
//! - Secrets handled via `secrecy::SecretString`
//!
//! # Configuration
//!
//! ```ignore
//! let config = StripeConfig::new(api_key, webhook_secret);
//! let gateway = StripeGateway::new(config);
//! ```

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::domain::foundation::{Currency, Money, Timestamp};
use crate::domain::payments::{
    BillingReason, CheckoutCompleted, InvoiceEvent, PaymentEvent, SubscriptionDeleted,
    SubscriptionMetadata,
};
use crate::ports::{
    CheckoutSession, CreateCheckoutRequest, GatewaySubscription, PaymentError, PaymentErrorCode,
    PaymentGateway, SubscriptionItem, SubscriptionStatus,
};

use super::wire::{
    SignatureHeader, StripeCheckoutSession, StripeErrorBody, StripeInvoice, StripeSubscription,
    StripeWebhookEvent,
};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age for webhook events (5 minutes).
const MAX_TIMESTAMP_AGE_SECS: i64 = 300;

/// Clock skew tolerance for future timestamps (60 seconds).
const MAX_FUTURE_TOLERANCE_SECS: i64 = 60;

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Stripe secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,

    /// Webhook signing secret (whsec_...).
    webhook_secret: SecretString,

    /// Base URL for Stripe API (default: https://api.stripe.com).
    api_base_url: String,

    /// Whether to require livemode events in production.
    require_livemode: bool,

    /// Per-request timeout for API calls.
    request_timeout: Duration,
}

impl StripeConfig {
    /// Create a new Stripe configuration.
    pub fn new(api_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key.into()),
            webhook_secret: SecretString::new(webhook_secret.into()),
            api_base_url: "https://api.stripe.com".to_string(),
            require_livemode: false,
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Set a custom API base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Require livemode events in production.
    pub fn with_require_livemode(mut self, require: bool) -> Self {
        self.require_livemode = require;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Stripe payment gateway adapter.
pub struct StripeGateway {
    config: StripeConfig,
    http_client: reqwest::Client,
}

impl StripeGateway {
    /// Create a new Stripe gateway with the given configuration.
    pub fn new(config: StripeConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    /// Verify webhook signature using HMAC-SHA256.
    ///
    /// Any of the `v1` signatures may match; Stripe sends more than one
    /// while a signing secret is being rolled.
    fn verify_signature(&self, payload: &[u8], header: &SignatureHeader) -> Result<(), PaymentError> {
        // 1. Validate timestamp (prevent replay attacks)
        let now = chrono::Utc::now().timestamp();
        let age = now - header.timestamp;

        if age > MAX_TIMESTAMP_AGE_SECS {
            tracing::warn!(
                event_timestamp = header.timestamp,
                current_time = now,
                age_secs = age,
                "Webhook event too old - possible replay attack"
            );
            return Err(PaymentError::invalid_webhook(format!(
                "Event too old ({} seconds)",
                age
            )));
        }

        if age < -MAX_FUTURE_TOLERANCE_SECS {
            tracing::warn!(
                event_timestamp = header.timestamp,
                current_time = now,
                "Webhook event from future - clock skew or manipulation"
            );
            return Err(PaymentError::invalid_webhook("Event timestamp in future"));
        }

        // 2. Compute expected signature over "{t}.{raw body}"
        let mut mac = HmacSha256::new_from_slice(
            self.config.webhook_secret.expose_secret().as_bytes(),
        )
        .map_err(|e| PaymentError::invalid_webhook(format!("Unusable signing secret: {}", e)))?;

        mac.update(header.timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = mac.finalize().into_bytes();

        // 3. Constant-time comparison
        let expected_bytes: &[u8] = expected.as_slice();
        let matched = header
            .v1_signatures
            .iter()
            .any(|provided| expected_bytes.ct_eq(provided.as_slice()).unwrap_u8() == 1);

        if !matched {
            tracing::warn!(
                signature_count = header.v1_signatures.len(),
                "Invalid webhook signature"
            );
            return Err(PaymentError::invalid_webhook("Invalid signature"));
        }

        Ok(())
    }

    /// Parse a verified Stripe event into the domain event.
    fn parse_event(&self, payload: &[u8]) -> Result<PaymentEvent, PaymentError> {
        let stripe_event: StripeWebhookEvent = serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(error = %e, "Failed to parse webhook payload");
            PaymentError::invalid_webhook(format!("Invalid JSON: {}", e))
        })?;

        // Check livemode if required
        if self.config.require_livemode && !stripe_event.livemode {
            tracing::warn!(
                event_id = %stripe_event.id,
                "Rejected test mode event in production"
            );
            return Err(PaymentError::invalid_webhook(
                "Test mode events not allowed in production",
            ));
        }

        let occurred_at = Timestamp::from_unix_secs(stripe_event.created).ok_or_else(|| {
            PaymentError::invalid_webhook(format!(
                "Invalid event timestamp: {}",
                stripe_event.created
            ))
        })?;
        let event_id = stripe_event.id.clone();

        let event = match stripe_event.event_type.as_str() {
            "checkout.session.completed" => {
                let session: StripeCheckoutSession = object(&stripe_event, "checkout session")?;
                PaymentEvent::CheckoutCompleted(CheckoutCompleted {
                    event_id,
                    amount_total: money(session.amount_total.unwrap_or(0), session.currency.as_deref()),
                    metadata: SubscriptionMetadata::from_map(&session.metadata),
                    session_id: session.id,
                    subscription_id: session.subscription,
                    customer_id: session.customer,
                    occurred_at,
                })
            }

            "invoice.paid" | "invoice.payment_succeeded" => {
                let invoice: StripeInvoice = object(&stripe_event, "invoice")?;
                let amount = invoice.amount_paid;
                PaymentEvent::InvoicePaid(invoice_event(event_id, invoice, amount, occurred_at))
            }

            "invoice.payment_failed" => {
                let invoice: StripeInvoice = object(&stripe_event, "invoice")?;
                let amount = invoice.amount_due;
                PaymentEvent::InvoicePaymentFailed(invoice_event(
                    event_id,
                    invoice,
                    amount,
                    occurred_at,
                ))
            }

            "customer.subscription.deleted" => {
                let sub: StripeSubscription = object(&stripe_event, "subscription")?;
                PaymentEvent::SubscriptionDeleted(SubscriptionDeleted {
                    event_id,
                    metadata: SubscriptionMetadata::from_map(&sub.metadata),
                    subscription_id: sub.id,
                    customer_id: sub.customer,
                    occurred_at,
                })
            }

            other => PaymentEvent::Unrecognized {
                event_id,
                event_type: other.to_string(),
            },
        };

        Ok(event)
    }

    /// Send a request and decode the JSON body, mapping Stripe errors.
    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, PaymentError> {
        let response = request
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| PaymentError::network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(
                operation,
                status = status.as_u16(),
                error = %error_text,
                "Stripe API call failed"
            );
            return Err(api_error(status, &error_text));
        }

        response.json().await.map_err(|e| {
            PaymentError::provider(format!("Failed to parse Stripe response: {}", e))
        })
    }
}

fn object<T: DeserializeOwned>(event: &StripeWebhookEvent, what: &str) -> Result<T, PaymentError> {
    serde_json::from_value(event.data.object.clone())
        .map_err(|e| PaymentError::invalid_webhook(format!("Invalid {}: {}", what, e)))
}

fn money(amount: i64, currency: Option<&str>) -> Money {
    let currency = currency
        .and_then(|c| Currency::new(c).ok())
        .unwrap_or_default();
    Money::new(amount, currency)
}

fn invoice_event(
    event_id: String,
    invoice: StripeInvoice,
    amount: i64,
    occurred_at: Timestamp,
) -> InvoiceEvent {
    let metadata = invoice
        .subscription_details
        .map(|details| SubscriptionMetadata::from_map(&details.metadata))
        .unwrap_or_default();

    InvoiceEvent {
        event_id,
        amount: money(amount, invoice.currency.as_deref()),
        billing_reason: BillingReason::parse(invoice.billing_reason.as_deref().unwrap_or("")),
        invoice_id: invoice.id,
        subscription_id: invoice.subscription,
        customer_id: invoice.customer,
        metadata,
        occurred_at,
    }
}

fn api_error(status: reqwest::StatusCode, body: &str) -> PaymentError {
    let detail = serde_json::from_str::<StripeErrorBody>(body).ok().map(|b| b.error);
    let message = detail
        .as_ref()
        .and_then(|d| d.message.clone())
        .unwrap_or_else(|| format!("Stripe API error: {}", status));

    let code = match status.as_u16() {
        401 | 403 => PaymentErrorCode::AuthenticationError,
        404 => PaymentErrorCode::NotFound,
        429 => PaymentErrorCode::RateLimitExceeded,
        400..=499 => PaymentErrorCode::InvalidRequest,
        500..=599 => PaymentErrorCode::ProviderError,
        _ => PaymentErrorCode::Unknown,
    };

    let error = PaymentError::new(code, message);
    match detail.and_then(|d| d.code) {
        Some(provider_code) => error.with_provider_code(provider_code),
        None => error,
    }
}

fn subscription_status(status: &str) -> SubscriptionStatus {
    serde_json::from_value(serde_json::Value::String(status.to_string()))
        .unwrap_or(SubscriptionStatus::Unknown)
}

fn to_gateway_subscription(sub: StripeSubscription) -> GatewaySubscription {
    GatewaySubscription {
        status: subscription_status(&sub.status),
        items: sub
            .items
            .data
            .into_iter()
            .map(|item| SubscriptionItem {
                id: item.id,
                price_id: item.price.id,
            })
            .collect(),
        metadata: SubscriptionMetadata::from_map(&sub.metadata),
        trial_end: sub.trial_end.and_then(Timestamp::from_unix_secs),
        current_period_end: sub.current_period_end.and_then(Timestamp::from_unix_secs),
        id: sub.id,
        customer_id: sub.customer,
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn verify_event(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<PaymentEvent, PaymentError> {
        let header = SignatureHeader::parse(signature).map_err(|e| {
            tracing::warn!(error = %e, "Malformed Stripe-Signature header");
            PaymentError::invalid_webhook(e.to_string())
        })?;

        self.verify_signature(payload, &header)?;
        let event = self.parse_event(payload)?;

        tracing::info!(
            event_id = %event.event_id(),
            event_type = %event.kind(),
            "Verified Stripe webhook"
        );

        Ok(event)
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<GatewaySubscription>, PaymentError> {
        let request = self
            .http_client
            .get(self.url(&format!("/v1/subscriptions/{}", subscription_id)));

        match self.execute::<StripeSubscription>("get_subscription", request).await {
            Ok(sub) => Ok(Some(to_gateway_subscription(sub))),
            Err(e) if e.code == PaymentErrorCode::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn update_subscription_price(
        &self,
        subscription_id: &str,
        price_id: &str,
    ) -> Result<GatewaySubscription, PaymentError> {
        let current = self
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| PaymentError::not_found("Subscription"))?;

        let item = current.items.first().ok_or_else(|| {
            PaymentError::invalid_request(format!(
                "Subscription {} has no items to amend",
                subscription_id
            ))
        })?;

        let params = vec![
            ("items[0][id]", item.id.clone()),
            ("items[0][price]", price_id.to_string()),
            ("proration_behavior", "create_prorations".to_string()),
        ];

        let request = self
            .http_client
            .post(self.url(&format!("/v1/subscriptions/{}", subscription_id)))
            .form(&params);

        let updated: StripeSubscription =
            self.execute("update_subscription_price", request).await?;

        tracing::info!(
            subscription_id = %subscription_id,
            price_id = %price_id,
            "Stripe subscription price amended"
        );

        Ok(to_gateway_subscription(updated))
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), PaymentError> {
        let request = self
            .http_client
            .delete(self.url(&format!("/v1/subscriptions/{}", subscription_id)));

        let _: StripeSubscription = self.execute("cancel_subscription", request).await?;

        tracing::info!(subscription_id = %subscription_id, "Stripe subscription canceled");
        Ok(())
    }

    async fn create_checkout_session(
        &self,
        request: CreateCheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let mut params = vec![
            ("mode", "subscription".to_string()),
            ("success_url", request.success_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            ("client_reference_id", request.user_id.to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            (
                "line_items[0][price_data][currency]",
                request.price.currency.to_string(),
            ),
            (
                "line_items[0][price_data][unit_amount]",
                request.price.amount.to_string(),
            ),
            (
                "line_items[0][price_data][recurring][interval]",
                "month".to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]",
                request.product_name.clone(),
            ),
        ];

        if let Some(days) = request.trial_days.filter(|d| *d > 0) {
            params.push(("subscription_data[trial_period_days]", days.to_string()));
        }

        let mut metadata: Vec<(String, String)> = request.metadata.to_map().into_iter().collect();
        metadata.sort();
        let mut form: Vec<(String, String)> = params
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        for (key, value) in metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
            form.push((format!("subscription_data[metadata][{}]", key), value));
        }

        let http_request = self
            .http_client
            .post(self.url("/v1/checkout/sessions"))
            .form(&form);

        let session: StripeCheckoutSession =
            self.execute("create_checkout_session", http_request).await?;

        let url = session
            .url
            .ok_or_else(|| PaymentError::provider("Checkout session has no URL"))?;

        tracing::info!(
            session_id = %session.id,
            club_id = %request.club_id,
            user_id = %request.user_id,
            "Stripe checkout session created"
        );

        Ok(CheckoutSession {
            id: session.id,
            url,
            expires_at: session.expires_at.and_then(Timestamp::from_unix_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::stripe::wire::hex_encode;
    use crate::domain::billing::BillingTier;
    use crate::domain::payments::SubscriptionTarget;

    fn test_config() -> StripeConfig {
        StripeConfig::new("sk_test_123", "whsec_test_secret")
    }

    fn create_test_signature(secret: &str, timestamp: i64, payload: &str) -> String {
        let signed_payload = format!("{}.{}", timestamp, payload);
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(signed_payload.as_bytes());
        let result = mac.finalize().into_bytes();

        format!("t={},v1={}", timestamp, hex_encode(&result))
    }

    fn event_json(event_type: &str, object: serde_json::Value) -> String {
        serde_json::json!({
            "id": "evt_1",
            "object": "event",
            "type": event_type,
            "created": 1704067200,
            "livemode": false,
            "data": { "object": object }
        })
        .to_string()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn config_new_sets_defaults() {
        let config = StripeConfig::new("api_key", "webhook_secret");
        assert_eq!(config.api_base_url, "https://api.stripe.com");
        assert!(!config.require_livemode);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn config_builders_override() {
        let config = test_config()
            .with_base_url("http://localhost:12111")
            .with_require_livemode(true)
            .with_timeout(Duration::from_secs(3));
        assert_eq!(config.api_base_url, "http://localhost:12111");
        assert!(config.require_livemode);
        assert_eq!(config.request_timeout, Duration::from_secs(3));
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Signature Verification Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn verify_signature_valid() {
        let gateway = StripeGateway::new(test_config());
        let payload = r#"{"id":"evt_test"}"#;
        let timestamp = chrono::Utc::now().timestamp();
        let signature = create_test_signature("whsec_test_secret", timestamp, payload);

        let header = SignatureHeader::parse(&signature).unwrap();
        assert!(gateway.verify_signature(payload.as_bytes(), &header).is_ok());
    }

    #[test]
    fn verify_signature_invalid() {
        let gateway = StripeGateway::new(test_config());
        let payload = r#"{"id":"evt_test"}"#;
        let timestamp = chrono::Utc::now().timestamp();
        let signature = create_test_signature("wrong_secret", timestamp, payload);

        let header = SignatureHeader::parse(&signature).unwrap();
        let err = gateway
            .verify_signature(payload.as_bytes(), &header)
            .unwrap_err();
        assert_eq!(err.code, PaymentErrorCode::InvalidWebhook);
    }

    #[test]
    fn verify_signature_accepts_any_rolled_secret() {
        let gateway = StripeGateway::new(test_config());
        let payload = r#"{"id":"evt_test"}"#;
        let timestamp = chrono::Utc::now().timestamp();
        let good = create_test_signature("whsec_test_secret", timestamp, payload);
        let bad = create_test_signature("old_secret", timestamp, payload);
        let bad_sig = bad.split(",v1=").nth(1).unwrap();

        let header = SignatureHeader::parse(&format!("{},v1={}", good, bad_sig)).unwrap();
        assert!(gateway.verify_signature(payload.as_bytes(), &header).is_ok());
    }

    #[test]
    fn verify_signature_rejects_old_timestamp() {
        let gateway = StripeGateway::new(test_config());
        let payload = r#"{"id":"evt_test"}"#;
        let timestamp = chrono::Utc::now().timestamp() - 600;
        let signature = create_test_signature("whsec_test_secret", timestamp, payload);

        let header = SignatureHeader::parse(&signature).unwrap();
        let err = gateway
            .verify_signature(payload.as_bytes(), &header)
            .unwrap_err();
        assert!(err.message.contains("too old"));
    }

    #[test]
    fn verify_signature_rejects_future_timestamp() {
        let gateway = StripeGateway::new(test_config());
        let payload = r#"{"id":"evt_test"}"#;
        let timestamp = chrono::Utc::now().timestamp() + 120;
        let signature = create_test_signature("whsec_test_secret", timestamp, payload);

        let header = SignatureHeader::parse(&signature).unwrap();
        let err = gateway
            .verify_signature(payload.as_bytes(), &header)
            .unwrap_err();
        assert!(err.message.contains("future"));
    }

    #[test]
    fn verify_signature_allows_small_clock_skew() {
        let gateway = StripeGateway::new(test_config());
        let payload = r#"{"id":"evt_test"}"#;
        let timestamp = chrono::Utc::now().timestamp() + 30;
        let signature = create_test_signature("whsec_test_secret", timestamp, payload);

        let header = SignatureHeader::parse(&signature).unwrap();
        assert!(gateway.verify_signature(payload.as_bytes(), &header).is_ok());
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Event Parsing Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn parse_checkout_completed() {
        let gateway = StripeGateway::new(test_config());
        let payload = event_json(
            "checkout.session.completed",
            serde_json::json!({
                "id": "cs_1",
                "object": "checkout.session",
                "customer": "cus_1",
                "subscription": "sub_1",
                "amount_total": 0,
                "currency": "usd",
                "metadata": {"purpose": "membership", "clubId": "club-1", "userId": "user-1"}
            }),
        );

        match gateway.parse_event(payload.as_bytes()).unwrap() {
            PaymentEvent::CheckoutCompleted(c) => {
                assert_eq!(c.event_id, "evt_1");
                assert_eq!(c.session_id, "cs_1");
                assert_eq!(c.subscription_id.as_deref(), Some("sub_1"));
                assert_eq!(c.amount_total.amount, 0);
                assert!(matches!(
                    c.metadata.target(),
                    Some(SubscriptionTarget::Membership { .. })
                ));
                assert_eq!(c.occurred_at.as_unix_secs(), 1704067200);
            }
            other => panic!("expected checkout, got {:?}", other),
        }
    }

    #[test]
    fn parse_invoice_paid_uses_subscription_details_metadata() {
        let gateway = StripeGateway::new(test_config());
        let payload = event_json(
            "invoice.paid",
            serde_json::json!({
                "id": "in_1",
                "object": "invoice",
                "subscription": "sub_1",
                "billing_reason": "subscription_cycle",
                "amount_paid": 1999,
                "amount_due": 1999,
                "currency": "CAD",
                "subscription_details": {"metadata": {"clubId": "club-1", "hostId": "host-1", "tier": "tier_b"}}
            }),
        );

        match gateway.parse_event(payload.as_bytes()).unwrap() {
            PaymentEvent::InvoicePaid(inv) => {
                assert_eq!(inv.invoice_id, "in_1");
                assert_eq!(inv.billing_reason, BillingReason::SubscriptionCycle);
                assert_eq!(inv.amount.amount, 1999);
                assert_eq!(inv.amount.currency.as_str(), "cad");
                assert_eq!(inv.metadata.tier, Some(BillingTier::TierB));
            }
            other => panic!("expected invoice paid, got {:?}", other),
        }
    }

    #[test]
    fn parse_payment_succeeded_alias() {
        let gateway = StripeGateway::new(test_config());
        let payload = event_json(
            "invoice.payment_succeeded",
            serde_json::json!({"id": "in_2", "object": "invoice"}),
        );
        let event = gateway.parse_event(payload.as_bytes()).unwrap();
        assert!(matches!(event, PaymentEvent::InvoicePaid(_)));
        assert_eq!(event.idempotency_key().unwrap().document_id(), "invoice_in_2");
    }

    #[test]
    fn parse_invoice_failed_uses_amount_due() {
        let gateway = StripeGateway::new(test_config());
        let payload = event_json(
            "invoice.payment_failed",
            serde_json::json!({
                "id": "in_3",
                "object": "invoice",
                "subscription": "sub_1",
                "billing_reason": "subscription_cycle",
                "amount_paid": 0,
                "amount_due": 500,
                "currency": "usd"
            }),
        );

        match gateway.parse_event(payload.as_bytes()).unwrap() {
            PaymentEvent::InvoicePaymentFailed(inv) => {
                assert_eq!(inv.amount.amount, 500);
                assert!(inv.metadata.is_empty());
            }
            other => panic!("expected invoice failed, got {:?}", other),
        }
    }

    #[test]
    fn parse_subscription_deleted() {
        let gateway = StripeGateway::new(test_config());
        let payload = event_json(
            "customer.subscription.deleted",
            serde_json::json!({
                "id": "sub_9",
                "object": "subscription",
                "status": "canceled",
                "customer": "cus_9",
                "metadata": {"clubId": "club-1", "userId": "user-1"}
            }),
        );

        match gateway.parse_event(payload.as_bytes()).unwrap() {
            PaymentEvent::SubscriptionDeleted(d) => {
                assert_eq!(d.subscription_id, "sub_9");
                assert_eq!(d.customer_id.as_deref(), Some("cus_9"));
            }
            other => panic!("expected subscription deleted, got {:?}", other),
        }
    }

    #[test]
    fn parse_unknown_event_is_unrecognized() {
        let gateway = StripeGateway::new(test_config());
        let payload = event_json("charge.refunded", serde_json::json!({"id": "ch_1"}));

        let event = gateway.parse_event(payload.as_bytes()).unwrap();
        assert_eq!(
            event,
            PaymentEvent::Unrecognized {
                event_id: "evt_1".to_string(),
                event_type: "charge.refunded".to_string(),
            }
        );
        assert!(event.idempotency_key().is_none());
    }

    #[test]
    fn parse_rejects_test_mode_when_livemode_required() {
        let gateway = StripeGateway::new(test_config().with_require_livemode(true));
        let payload = event_json("charge.refunded", serde_json::json!({"id": "ch_1"}));

        let err = gateway.parse_event(payload.as_bytes()).unwrap_err();
        assert_eq!(err.code, PaymentErrorCode::InvalidWebhook);
    }

    #[test]
    fn parse_rejects_invalid_json() {
        let gateway = StripeGateway::new(test_config());
        let err = gateway.parse_event(b"not json").unwrap_err();
        assert!(err.message.contains("Invalid JSON"));
    }

    #[tokio::test]
    async fn verify_event_end_to_end() {
        let gateway = StripeGateway::new(test_config());
        let payload = event_json("charge.refunded", serde_json::json!({"id": "ch_1"}));
        let timestamp = chrono::Utc::now().timestamp();
        let signature = create_test_signature("whsec_test_secret", timestamp, &payload);

        let event = gateway
            .verify_event(payload.as_bytes(), &signature)
            .await
            .unwrap();
        assert_eq!(event.event_id(), "evt_1");
    }

    #[tokio::test]
    async fn verify_event_rejects_malformed_header() {
        let gateway = StripeGateway::new(test_config());
        let err = gateway.verify_event(b"{}", "garbage").await.unwrap_err();
        assert_eq!(err.code, PaymentErrorCode::InvalidWebhook);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Conversion Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn api_error_maps_status_codes() {
        let body = r#"{"error": {"code": "resource_missing", "message": "No such subscription"}}"#;
        let err = api_error(reqwest::StatusCode::NOT_FOUND, body);
        assert_eq!(err.code, PaymentErrorCode::NotFound);
        assert_eq!(err.message, "No such subscription");
        assert_eq!(err.provider_code.as_deref(), Some("resource_missing"));

        let err = api_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "");
        assert!(err.retryable);

        let err = api_error(reqwest::StatusCode::BAD_GATEWAY, "oops");
        assert_eq!(err.code, PaymentErrorCode::ProviderError);
    }

    #[test]
    fn subscription_status_maps_known_and_unknown() {
        assert_eq!(subscription_status("past_due"), SubscriptionStatus::PastDue);
        assert_eq!(subscription_status("trialing"), SubscriptionStatus::Trialing);
        assert_eq!(subscription_status("mystery"), SubscriptionStatus::Unknown);
    }

    #[test]
    fn to_gateway_subscription_copies_items() {
        let sub: StripeSubscription = serde_json::from_value(serde_json::json!({
            "id": "sub_1",
            "status": "active",
            "trial_end": 1706745600,
            "items": {"data": [{"id": "si_1", "price": {"id": "price_tier_a"}}]}
        }))
        .unwrap();

        let converted = to_gateway_subscription(sub);
        assert_eq!(converted.status, SubscriptionStatus::Active);
        assert_eq!(converted.items[0].price_id, "price_tier_a");
        assert_eq!(converted.trial_end.map(|t| t.as_unix_secs()), Some(1706745600));
    }
}
