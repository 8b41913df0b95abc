//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};

use club_billing::adapters::{InMemoryDocumentStore, MockAnalyticsSink, MockPaymentGateway};
use club_billing::application::documents::{collections, membership_field};
use club_billing::application::BillingSettings;
use club_billing::domain::foundation::{ClubId, Currency, Money, Timestamp, UserId};
use club_billing::domain::membership::MembershipRecord;
use club_billing::domain::payments::{
    BillingReason, CheckoutCompleted, InvoiceEvent, PaymentEvent, SubscriptionDeleted,
    SubscriptionMetadata,
};
use club_billing::ports::{
    DocumentPath, DocumentStore, GatewaySubscription, SubscriptionItem, SubscriptionStatus,
};

pub const CLUB: &str = "club-1";
pub const HOST: &str = "host-1";
pub const MEMBER: &str = "user-a";

pub struct World {
    pub store: Arc<InMemoryDocumentStore>,
    pub gateway: MockPaymentGateway,
    pub sink: MockAnalyticsSink,
    pub settings: Arc<BillingSettings>,
}

impl World {
    /// A club priced at `price` minor units, its host and one user.
    pub async fn with_club(price: i64) -> Self {
        let store = Arc::new(InMemoryDocumentStore::new());
        store
            .insert(
                DocumentPath::new(collections::CLUBS, CLUB),
                json!({"hostId": HOST, "info": {"name": "Run Club", "price": price}}),
            )
            .await;
        for user in [HOST, MEMBER] {
            store
                .insert(DocumentPath::new(collections::USERS, user), json!({}))
                .await;
        }
        Self {
            store,
            gateway: MockPaymentGateway::new(),
            sink: MockAnalyticsSink::new(),
            settings: Arc::new(BillingSettings::default()),
        }
    }

    pub async fn club(&self) -> Value {
        self.store
            .get(&DocumentPath::new(collections::CLUBS, CLUB))
            .await
            .unwrap()
            .unwrap()
            .data
    }

    pub async fn membership(&self, user: &str) -> Option<MembershipRecord> {
        self.store
            .get(&DocumentPath::new(collections::USERS, user))
            .await
            .unwrap()
            .unwrap()
            .decode_field(&membership_field(&club_id()))
            .unwrap()
    }

    pub async fn set_price(&self, price: i64) {
        self.store
            .set_merge(
                &DocumentPath::new(collections::CLUBS, CLUB),
                club_billing::ports::Patch::new().set("info.price", price),
            )
            .await
            .unwrap();
    }

    /// Every stored document, keyed by path, for before/after comparisons.
    pub async fn snapshot(&self) -> Vec<(String, Value)> {
        let mut all = Vec::new();
        for collection in [
            collections::USERS,
            collections::CLUBS,
            collections::PAYMENTS,
            collections::BILLING_EVENTS,
            collections::AUDIT_LOGS,
            collections::CLUB_ANALYTICS,
            collections::SUBSCRIPTION_FAILURES,
        ] {
            for doc in self.store.documents(collection).await {
                all.push((doc.path.to_string(), doc.data));
            }
        }
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

pub fn club_id() -> ClubId {
    ClubId::new(CLUB).unwrap()
}

pub fn user_id(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

pub fn usd(amount: i64) -> Money {
    Money::new(amount, Currency::default())
}

pub fn member_metadata() -> SubscriptionMetadata {
    SubscriptionMetadata::membership(club_id(), user_id(MEMBER))
}

pub fn member_subscription(id: &str) -> GatewaySubscription {
    GatewaySubscription {
        id: id.to_string(),
        customer_id: Some("cus_a".to_string()),
        status: SubscriptionStatus::Active,
        items: vec![SubscriptionItem {
            id: "si_a".to_string(),
            price_id: "price_member".to_string(),
        }],
        metadata: member_metadata(),
        trial_end: None,
        current_period_end: None,
    }
}

pub fn checkout_completed(session: &str, subscription: &str, amount: i64, at: Timestamp) -> PaymentEvent {
    PaymentEvent::CheckoutCompleted(CheckoutCompleted {
        event_id: format!("evt_{}", session),
        session_id: session.to_string(),
        subscription_id: Some(subscription.to_string()),
        customer_id: Some("cus_a".to_string()),
        amount_total: usd(amount),
        metadata: member_metadata(),
        occurred_at: at,
    })
}

pub fn invoice(id: &str, subscription: &str, reason: &str, amount: i64, at: Timestamp) -> InvoiceEvent {
    InvoiceEvent {
        event_id: format!("evt_{}", id),
        invoice_id: id.to_string(),
        subscription_id: Some(subscription.to_string()),
        customer_id: Some("cus_a".to_string()),
        billing_reason: BillingReason::parse(reason),
        amount: usd(amount),
        metadata: member_metadata(),
        occurred_at: at,
    }
}

pub fn subscription_deleted(subscription: &str, at: Timestamp) -> PaymentEvent {
    PaymentEvent::SubscriptionDeleted(SubscriptionDeleted {
        event_id: format!("evt_del_{}", subscription),
        subscription_id: subscription.to_string(),
        customer_id: Some("cus_a".to_string()),
        metadata: member_metadata(),
        occurred_at: at,
    })
}
