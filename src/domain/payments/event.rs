//! Verified payment gateway events.
//!
//! The gateway adapter parses its wire format into this closed enum. The
//! ingestion handler dispatches on it with an exhaustive `match`, so a new
//! event kind cannot be silently dropped.

use std::collections::HashMap;

use super::{IdempotencyKey, KeyNamespace};
use crate::domain::billing::BillingTier;
use crate::domain::foundation::{ClubId, Money, Timestamp, UserId};

/// What a gateway subscription pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionPurpose {
    Membership,
    HostBilling,
}

impl SubscriptionPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionPurpose::Membership => "membership",
            SubscriptionPurpose::HostBilling => "host_billing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "membership" => Some(SubscriptionPurpose::Membership),
            "host_billing" => Some(SubscriptionPurpose::HostBilling),
            _ => None,
        }
    }
}

/// Metadata attached to checkout sessions and subscriptions.
///
/// Parsing is lenient: malformed ids are dropped and show up as missing
/// when the target is resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionMetadata {
    pub purpose: Option<SubscriptionPurpose>,
    pub club_id: Option<ClubId>,
    pub user_id: Option<UserId>,
    pub host_id: Option<UserId>,
    pub tier: Option<BillingTier>,
}

/// Who an event is about, resolved from metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionTarget {
    Membership {
        club_id: ClubId,
        user_id: UserId,
    },
    HostBilling {
        club_id: ClubId,
        host_id: UserId,
        tier: Option<BillingTier>,
    },
}

impl SubscriptionMetadata {
    pub const PURPOSE: &'static str = "purpose";
    pub const CLUB_ID: &'static str = "clubId";
    pub const USER_ID: &'static str = "userId";
    pub const HOST_ID: &'static str = "hostId";
    pub const TIER: &'static str = "tier";

    pub fn from_map(map: &HashMap<String, String>) -> Self {
        Self {
            purpose: map.get(Self::PURPOSE).and_then(|s| SubscriptionPurpose::parse(s)),
            club_id: map.get(Self::CLUB_ID).and_then(|s| ClubId::new(s.as_str()).ok()),
            user_id: map.get(Self::USER_ID).and_then(|s| UserId::new(s.as_str()).ok()),
            host_id: map.get(Self::HOST_ID).and_then(|s| UserId::new(s.as_str()).ok()),
            tier: map.get(Self::TIER).and_then(|s| BillingTier::parse(s)),
        }
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        if let Some(purpose) = self.purpose {
            map.insert(Self::PURPOSE.to_string(), purpose.as_str().to_string());
        }
        if let Some(club) = &self.club_id {
            map.insert(Self::CLUB_ID.to_string(), club.to_string());
        }
        if let Some(user) = &self.user_id {
            map.insert(Self::USER_ID.to_string(), user.to_string());
        }
        if let Some(host) = &self.host_id {
            map.insert(Self::HOST_ID.to_string(), host.to_string());
        }
        if let Some(tier) = self.tier {
            map.insert(Self::TIER.to_string(), tier.as_str().to_string());
        }
        map
    }

    pub fn membership(club_id: ClubId, user_id: UserId) -> Self {
        Self {
            purpose: Some(SubscriptionPurpose::Membership),
            club_id: Some(club_id),
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Resolves the target. Without an explicit purpose a `userId` means
    /// membership and a `hostId` means host billing.
    pub fn target(&self) -> Option<SubscriptionTarget> {
        let club_id = self.club_id.clone()?;
        let purpose = match self.purpose {
            Some(p) => p,
            None if self.user_id.is_some() => SubscriptionPurpose::Membership,
            None if self.host_id.is_some() => SubscriptionPurpose::HostBilling,
            None => return None,
        };
        match purpose {
            SubscriptionPurpose::Membership => Some(SubscriptionTarget::Membership {
                club_id,
                user_id: self.user_id.clone()?,
            }),
            SubscriptionPurpose::HostBilling => Some(SubscriptionTarget::HostBilling {
                club_id,
                host_id: self.host_id.clone().or_else(|| self.user_id.clone())?,
                tier: self.tier,
            }),
        }
    }
}

/// Why the gateway produced an invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingReason {
    SubscriptionCreate,
    SubscriptionCycle,
    SubscriptionUpdate,
    Manual,
    Other(String),
}

impl BillingReason {
    pub fn parse(s: &str) -> Self {
        match s {
            "subscription_create" => BillingReason::SubscriptionCreate,
            "subscription_cycle" => BillingReason::SubscriptionCycle,
            "subscription_update" => BillingReason::SubscriptionUpdate,
            "manual" => BillingReason::Manual,
            other => BillingReason::Other(other.to_string()),
        }
    }

    /// Paid invoices only matter for subscription creation and renewal.
    pub fn applies_to_paid_invoice(&self) -> bool {
        matches!(
            self,
            BillingReason::SubscriptionCreate | BillingReason::SubscriptionCycle
        )
    }

    /// Failed invoices only count for renewals.
    pub fn applies_to_failed_invoice(&self) -> bool {
        matches!(self, BillingReason::SubscriptionCycle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutCompleted {
    pub event_id: String,
    pub session_id: String,
    pub subscription_id: Option<String>,
    pub customer_id: Option<String>,
    pub amount_total: Money,
    pub metadata: SubscriptionMetadata,
    pub occurred_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceEvent {
    pub event_id: String,
    pub invoice_id: String,
    pub subscription_id: Option<String>,
    pub customer_id: Option<String>,
    pub billing_reason: BillingReason,
    /// Paid amount for successful invoices, due amount for failed ones.
    pub amount: Money,
    /// Subscription metadata copied onto the invoice; may be empty.
    pub metadata: SubscriptionMetadata,
    pub occurred_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionDeleted {
    pub event_id: String,
    pub subscription_id: String,
    pub customer_id: Option<String>,
    pub metadata: SubscriptionMetadata,
    pub occurred_at: Timestamp,
}

/// A verified gateway event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    CheckoutCompleted(CheckoutCompleted),
    InvoicePaid(InvoiceEvent),
    InvoicePaymentFailed(InvoiceEvent),
    SubscriptionDeleted(SubscriptionDeleted),
    Unrecognized { event_id: String, event_type: String },
}

impl PaymentEvent {
    pub fn event_id(&self) -> &str {
        match self {
            PaymentEvent::CheckoutCompleted(e) => &e.event_id,
            PaymentEvent::InvoicePaid(e) | PaymentEvent::InvoicePaymentFailed(e) => &e.event_id,
            PaymentEvent::SubscriptionDeleted(e) => &e.event_id,
            PaymentEvent::Unrecognized { event_id, .. } => event_id,
        }
    }

    /// Short name used in logs and analytics.
    pub fn kind(&self) -> &str {
        match self {
            PaymentEvent::CheckoutCompleted(_) => "checkout_completed",
            PaymentEvent::InvoicePaid(_) => "invoice_paid",
            PaymentEvent::InvoicePaymentFailed(_) => "invoice_payment_failed",
            PaymentEvent::SubscriptionDeleted(_) => "subscription_deleted",
            PaymentEvent::Unrecognized { event_type, .. } => event_type,
        }
    }

    /// Key that identifies re-delivery of this event.
    pub fn idempotency_key(&self) -> Option<IdempotencyKey> {
        match self {
            PaymentEvent::CheckoutCompleted(e) => {
                Some(IdempotencyKey::new(KeyNamespace::Checkout, &e.session_id))
            }
            PaymentEvent::InvoicePaid(e) => {
                Some(IdempotencyKey::new(KeyNamespace::Invoice, &e.invoice_id))
            }
            PaymentEvent::InvoicePaymentFailed(e) => {
                Some(IdempotencyKey::new(KeyNamespace::InvoiceFailed, &e.invoice_id))
            }
            PaymentEvent::SubscriptionDeleted(e) => Some(IdempotencyKey::new(
                KeyNamespace::Subscription,
                &e.subscription_id,
            )),
            PaymentEvent::Unrecognized { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::Currency;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn membership_metadata_resolves_target() {
        let meta = SubscriptionMetadata::from_map(&map(&[
            ("purpose", "membership"),
            ("clubId", "club-1"),
            ("userId", "user-1"),
        ]));
        assert_eq!(
            meta.target(),
            Some(SubscriptionTarget::Membership {
                club_id: ClubId::new("club-1").unwrap(),
                user_id: UserId::new("user-1").unwrap(),
            })
        );
    }

    #[test]
    fn host_metadata_carries_tier() {
        let meta = SubscriptionMetadata::from_map(&map(&[
            ("purpose", "host_billing"),
            ("clubId", "club-1"),
            ("hostId", "host-1"),
            ("tier", "tier_b"),
        ]));
        match meta.target() {
            Some(SubscriptionTarget::HostBilling { tier, host_id, .. }) => {
                assert_eq!(tier, Some(BillingTier::TierB));
                assert_eq!(host_id.as_str(), "host-1");
            }
            other => panic!("expected host billing, got {:?}", other),
        }
    }

    #[test]
    fn missing_purpose_is_inferred_from_ids() {
        let meta =
            SubscriptionMetadata::from_map(&map(&[("clubId", "club-1"), ("hostId", "host-1")]));
        assert!(matches!(
            meta.target(),
            Some(SubscriptionTarget::HostBilling { .. })
        ));
    }

    #[test]
    fn malformed_ids_leave_no_target() {
        let meta = SubscriptionMetadata::from_map(&map(&[
            ("purpose", "membership"),
            ("clubId", "club/1"),
            ("userId", "user-1"),
        ]));
        assert_eq!(meta.target(), None);
        assert!(SubscriptionMetadata::default().is_empty());
    }

    #[test]
    fn metadata_map_round_trips() {
        let meta = SubscriptionMetadata::membership(
            ClubId::new("club-1").unwrap(),
            UserId::new("user-1").unwrap(),
        );
        assert_eq!(SubscriptionMetadata::from_map(&meta.to_map()), meta);
    }

    #[test]
    fn billing_reason_filters() {
        assert!(BillingReason::parse("subscription_create").applies_to_paid_invoice());
        assert!(BillingReason::parse("subscription_cycle").applies_to_failed_invoice());
        assert!(!BillingReason::parse("subscription_create").applies_to_failed_invoice());
        assert!(!BillingReason::parse("manual").applies_to_paid_invoice());
        assert_eq!(
            BillingReason::parse("upcoming"),
            BillingReason::Other("upcoming".into())
        );
    }

    #[test]
    fn idempotency_keys_follow_event_kind() {
        let invoice = InvoiceEvent {
            event_id: "evt_1".into(),
            invoice_id: "in_1".into(),
            subscription_id: Some("sub_1".into()),
            customer_id: None,
            billing_reason: BillingReason::SubscriptionCycle,
            amount: Money::new(500, Currency::default()),
            metadata: SubscriptionMetadata::default(),
            occurred_at: Timestamp::now(),
        };
        let paid = PaymentEvent::InvoicePaid(invoice.clone());
        let failed = PaymentEvent::InvoicePaymentFailed(invoice);

        assert_eq!(paid.idempotency_key().unwrap().document_id(), "invoice_in_1");
        assert_eq!(
            failed.idempotency_key().unwrap().document_id(),
            "invoice_failed_in_1"
        );

        let unknown = PaymentEvent::Unrecognized {
            event_id: "evt_2".into(),
            event_type: "charge.refunded".into(),
        };
        assert_eq!(unknown.idempotency_key(), None);
        assert_eq!(unknown.kind(), "charge.refunded");
    }
}
