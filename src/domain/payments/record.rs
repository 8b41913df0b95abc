//! Immutable payment records (`payments` collection).
//!
//! One record per completed or failed monetary event, stored under its
//! idempotency key so a second write for the same key fails the
//! "must not exist" precondition.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::{ClubId, Money, Timestamp, UserId};
use crate::domain::membership::LastPaymentType;

/// Namespace part of an idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyNamespace {
    Checkout,
    Invoice,
    InvoiceFailed,
    Subscription,
}

impl KeyNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyNamespace::Checkout => "checkout",
            KeyNamespace::Invoice => "invoice",
            KeyNamespace::InvoiceFailed => "invoice_failed",
            KeyNamespace::Subscription => "subscription",
        }
    }
}

/// External identifier used to detect re-delivery of the same event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub namespace: KeyNamespace,
    pub external_id: String,
}

impl IdempotencyKey {
    pub fn new(namespace: KeyNamespace, external_id: impl Into<String>) -> Self {
        Self {
            namespace,
            external_id: external_id.into(),
        }
    }

    /// `<namespace>_<externalId>`, the payment document id.
    pub fn document_id(&self) -> String {
        format!("{}_{}", self.namespace.as_str(), self.external_id)
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.document_id())
    }
}

/// What a payment record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    TrialStart,
    /// Charge collected while the trial window is still open.
    TrialCharge,
    Subscription,
    SubscriptionFirstCharge,
    SubscriptionRenewal,
    PaymentFailed,
    HostSubscription,
    HostInvoice,
}

impl PaymentKind {
    /// True for member payments that count as a prior charge of a subscription.
    pub fn is_membership_charge(&self) -> bool {
        matches!(
            self,
            PaymentKind::Subscription
                | PaymentKind::SubscriptionFirstCharge
                | PaymentKind::SubscriptionRenewal
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::TrialStart => "trial_start",
            PaymentKind::TrialCharge => "trial_charge",
            PaymentKind::Subscription => "subscription",
            PaymentKind::SubscriptionFirstCharge => "subscription_first_charge",
            PaymentKind::SubscriptionRenewal => "subscription_renewal",
            PaymentKind::PaymentFailed => "payment_failed",
            PaymentKind::HostSubscription => "host_subscription",
            PaymentKind::HostInvoice => "host_invoice",
        }
    }

    /// Record kind for a membership's payment marker. Free markers have none.
    pub fn for_payment_type(value: LastPaymentType) -> Option<Self> {
        match value {
            LastPaymentType::Free | LastPaymentType::FreeExpired => None,
            LastPaymentType::TrialStart => Some(PaymentKind::TrialStart),
            LastPaymentType::Subscription => Some(PaymentKind::Subscription),
            LastPaymentType::SubscriptionFirstCharge => Some(PaymentKind::SubscriptionFirstCharge),
            LastPaymentType::SubscriptionRenewal => Some(PaymentKind::SubscriptionRenewal),
        }
    }
}

/// A payment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub kind: PaymentKind,
    pub club_id: ClubId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<UserId>,
    #[serde(flatten)]
    pub money: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_invoice_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_subscription_id: Option<String>,
    pub created_at: Timestamp,
}
