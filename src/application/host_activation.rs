//! Shared host billing activation routine.
//!
//! Used by gateway checkouts, gateway cancellations and tier executions
//! from the automaton. Loads the club, checks that the caller-supplied
//! host owns it, applies the change to the billing profile and commits
//! the profile together with its billing event.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use super::documents::{club_path, collections, load_club, to_value};
use super::{BillingError, BillingSettings};
use crate::domain::billing::{
    BillingActor, BillingEventRecord, BillingEventType, BillingTier, ClubBillingProfile,
    HostBillingStatus,
};
use crate::domain::foundation::{ClubId, Timestamp, UserId};
use crate::ports::{DocumentPath, DocumentStore, Patch, WriteBatch};

/// What to do to the profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostBillingChange {
    /// Move to `tier` with `status`. Covers first activation and tier changes.
    Activate {
        tier: BillingTier,
        status: HostBillingStatus,
    },
    /// Cancel and fall back to the entry tier.
    Cancel,
}

#[derive(Debug, Clone)]
pub struct HostActivationRequest {
    pub club_id: ClubId,
    pub host_id: UserId,
    pub change: HostBillingChange,
    pub external_customer_id: Option<String>,
    pub external_subscription_id: Option<String>,
    pub event_type: BillingEventType,
    pub actor: BillingActor,
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostActivationResult {
    pub from_tier: BillingTier,
    pub profile: ClubBillingProfile,
}

pub struct HostActivation {
    store: Arc<dyn DocumentStore>,
    settings: Arc<BillingSettings>,
}

impl HostActivation {
    pub fn new(store: Arc<dyn DocumentStore>, settings: Arc<BillingSettings>) -> Self {
        Self { store, settings }
    }

    /// Applies `request`, committing it atomically with `batch`.
    ///
    /// `batch` carries any writes the caller needs in the same commit, such
    /// as the payment record of the triggering event. The club document is
    /// pinned to the version read here. Returns `None`, writing nothing,
    /// when the profile's status does not allow the change.
    pub async fn apply(
        &self,
        request: HostActivationRequest,
        batch: WriteBatch,
        now: Timestamp,
    ) -> Result<Option<HostActivationResult>, BillingError> {
        let loaded = load_club(self.store.as_ref(), &request.club_id).await?;
        if !loaded.club.is_host(&request.host_id) {
            tracing::warn!(
                club_id = %request.club_id,
                host_id = %request.host_id,
                "Host billing change rejected: caller does not own the club"
            );
            return Err(BillingError::forbidden(format!(
                "user {} is not the host of club {}",
                request.host_id, request.club_id
            )));
        }

        let table = &self.settings.tiers;
        let mut profile = loaded
            .club
            .billing
            .clone()
            .unwrap_or_else(|| ClubBillingProfile::unsubscribed(table, now));
        let from_tier = profile.tier;

        let (applied, to_tier) = match request.change {
            HostBillingChange::Activate { tier, status } => {
                (profile.apply_activation(tier, status, table, now), tier)
            }
            HostBillingChange::Cancel => (
                profile.apply_cancellation(BillingTier::TierA, table, now),
                BillingTier::TierA,
            ),
        };
        if let Err(e) = applied {
            tracing::warn!(
                club_id = %request.club_id,
                error = %e,
                event_type = %request.event_type,
                "Host billing change not allowed from current status"
            );
            return Ok(None);
        }
        if let HostBillingChange::Activate { .. } = request.change {
            if request.external_customer_id.is_some() {
                profile.external_customer_id = request.external_customer_id.clone();
            }
            if request.external_subscription_id.is_some() {
                profile.external_subscription_id = request.external_subscription_id.clone();
            }
        }

        let event = BillingEventRecord::builder(request.club_id.clone(), request.event_type)
            .tiers(Some(from_tier), Some(to_tier))
            .actor(request.actor)
            .details(request.details)
            .build(now);

        let path = club_path(&request.club_id);
        let event_path = DocumentPath::new(
            collections::BILLING_EVENTS,
            Uuid::new_v4().simple().to_string(),
        );
        let batch = batch
            .expect(&path, Some(&loaded.snapshot))
            .merge(path, Patch::new().set("billing", to_value(&profile)?))
            .create(event_path, to_value(&event)?);
        self.store.commit(batch).await?;

        tracing::info!(
            club_id = %request.club_id,
            event_type = %request.event_type,
            from_tier = %from_tier,
            to_tier = %to_tier,
            status = %profile.status,
            "Host billing profile updated"
        );

        Ok(Some(HostActivationResult { from_tier, profile }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::document_store::InMemoryDocumentStore;
    use serde_json::json;

    fn now() -> Timestamp {
        Timestamp::from_unix_secs(1_717_200_000).unwrap()
    }

    async fn setup(billing: Option<Value>) -> (Arc<InMemoryDocumentStore>, HostActivation) {
        let store = Arc::new(InMemoryDocumentStore::new());
        let mut club = json!({"hostId": "host-1", "info": {"price": 500}});
        if let Some(billing) = billing {
            club["billing"] = billing;
        }
        store
            .insert(DocumentPath::new(collections::CLUBS, "club-1"), club)
            .await;
        let activation = HostActivation::new(store.clone(), Arc::new(BillingSettings::default()));
        (store, activation)
    }

    fn request(host: &str, change: HostBillingChange) -> HostActivationRequest {
        HostActivationRequest {
            club_id: ClubId::new("club-1").unwrap(),
            host_id: UserId::new(host).unwrap(),
            change,
            external_customer_id: Some("cus_1".into()),
            external_subscription_id: Some("sub_host".into()),
            event_type: BillingEventType::Activated,
            actor: BillingActor::Gateway,
            details: json!({"sessionId": "cs_1"}),
        }
    }

    async fn stored_profile(store: &InMemoryDocumentStore) -> ClubBillingProfile {
        store
            .get(&DocumentPath::new(collections::CLUBS, "club-1"))
            .await
            .unwrap()
            .unwrap()
            .decode_field(&"billing".into())
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn first_activation_creates_profile_and_event() {
        let (store, activation) = setup(None).await;

        let result = activation
            .apply(
                request(
                    "host-1",
                    HostBillingChange::Activate {
                        tier: BillingTier::TierB,
                        status: HostBillingStatus::Trialing,
                    },
                ),
                WriteBatch::new(),
                now(),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.from_tier, BillingTier::TierA);
        let profile = stored_profile(&store).await;
        assert_eq!(profile.tier, BillingTier::TierB);
        assert_eq!(profile.status, HostBillingStatus::Trialing);
        assert_eq!(profile.external_subscription_id.as_deref(), Some("sub_host"));

        let events = store.documents(collections::BILLING_EVENTS).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["type"], "ACTIVATED");
        assert_eq!(events[0].data["toTier"], "tier_b");
    }

    #[tokio::test]
    async fn wrong_host_is_forbidden_and_writes_nothing() {
        let (store, activation) = setup(None).await;

        let result = activation
            .apply(request("intruder", HostBillingChange::Cancel), WriteBatch::new(), now())
            .await;

        assert!(matches!(result, Err(BillingError::Forbidden(_))));
        assert_eq!(store.commit_count().await, 0);
    }

    #[tokio::test]
    async fn cancellation_falls_back_to_entry_tier() {
        let table = BillingSettings::default().tiers;
        let mut existing = ClubBillingProfile::new(BillingTier::TierC, &table, now());
        existing.external_subscription_id = Some("sub_host".into());
        let (store, activation) = setup(Some(serde_json::to_value(&existing).unwrap())).await;

        let mut req = request("host-1", HostBillingChange::Cancel);
        req.event_type = BillingEventType::Canceled;
        activation.apply(req, WriteBatch::new(), now()).await.unwrap();

        let profile = stored_profile(&store).await;
        assert_eq!(profile.tier, BillingTier::TierA);
        assert_eq!(profile.status, HostBillingStatus::Canceled);
        assert!(profile.external_subscription_id.is_none());
    }

    #[tokio::test]
    async fn caller_batch_commits_with_profile() {
        let (store, activation) = setup(None).await;
        let extra = DocumentPath::new(collections::PAYMENTS, "checkout_cs_1");
        let batch = WriteBatch::new()
            .expect_missing(&extra)
            .create(extra.clone(), json!({"kind": "host_subscription"}));

        activation
            .apply(
                request(
                    "host-1",
                    HostBillingChange::Activate {
                        tier: BillingTier::TierA,
                        status: HostBillingStatus::Active,
                    },
                ),
                batch,
                now(),
            )
            .await
            .unwrap();

        assert!(store.get(&extra).await.unwrap().is_some());
        assert_eq!(store.commit_count().await, 1);
    }

    #[tokio::test]
    async fn disallowed_transition_writes_nothing() {
        let table = BillingSettings::default().tiers;
        let mut canceled = ClubBillingProfile::new(BillingTier::TierA, &table, now());
        canceled.status = HostBillingStatus::Canceled;
        let (store, activation) = setup(Some(serde_json::to_value(&canceled).unwrap())).await;

        let result = activation
            .apply(request("host-1", HostBillingChange::Cancel), WriteBatch::new(), now())
            .await;

        assert_eq!(result, Ok(None));
        assert_eq!(store.commit_count().await, 0);
    }
}
