//! Collection layout and typed views over stored documents.
//!
//! Handlers read whole documents (so they can pin versions in a batch)
//! and decode only the parts they need through these views.

use serde::Deserialize;
use serde_json::Value;

use super::BillingError;
use crate::domain::billing::ClubBillingProfile;
use crate::domain::foundation::{ClubId, Currency, UserId};
use crate::domain::membership::{MembershipRecord, SubscriptionFailureTracker};
use crate::domain::payments::IdempotencyKey;
use crate::ports::{Document, DocumentPath, DocumentStore, FieldPath, Patch};

pub mod collections {
    pub const USERS: &str = "users";
    pub const CLUBS: &str = "clubs";
    pub const PAYMENTS: &str = "payments";
    pub const BILLING_EVENTS: &str = "billingEvents";
    pub const AUDIT_LOGS: &str = "membershipAuditLogs";
    pub const CLUB_ANALYTICS: &str = "clubAnalytics";
    pub const SUBSCRIPTION_FAILURES: &str = "subscriptionFailures";
    pub const USAGE_DAILY: &str = "clubUsageDaily";
    pub const USAGE_MONTHLY: &str = "clubUsageMonthly";
}

pub fn user_path(user_id: &UserId) -> DocumentPath {
    DocumentPath::new(collections::USERS, user_id.as_str())
}

pub fn club_path(club_id: &ClubId) -> DocumentPath {
    DocumentPath::new(collections::CLUBS, club_id.as_str())
}

pub fn payment_path(key: &IdempotencyKey) -> DocumentPath {
    DocumentPath::new(collections::PAYMENTS, key.document_id())
}

pub fn failure_path(subscription_id: &str) -> DocumentPath {
    DocumentPath::new(collections::SUBSCRIPTION_FAILURES, subscription_id)
}

/// `memberships.<clubId>` inside a user document.
pub fn membership_field(club_id: &ClubId) -> FieldPath {
    FieldPath::from_segments(["memberships", club_id.as_str()])
}

/// `info` block of a club document. Owned by club editing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClubInfo {
    #[serde(default)]
    pub name: Option<String>,
    /// Monthly price in minor units; 0 means free.
    #[serde(default)]
    pub price: i64,
    #[serde(default)]
    pub currency: Option<Currency>,
    #[serde(default)]
    pub pricing_locked: bool,
    #[serde(default)]
    pub trial_days: Option<u32>,
}

impl ClubInfo {
    pub fn is_free(&self) -> bool {
        self.price <= 0
    }

    pub fn currency(&self) -> Currency {
        self.currency.clone().unwrap_or_default()
    }
}

/// Decoded club document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClubDocument {
    pub host_id: UserId,
    #[serde(default)]
    pub info: ClubInfo,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub members_count: i64,
    #[serde(default)]
    pub paying_members_count: i64,
    #[serde(default)]
    pub billing: Option<ClubBillingProfile>,
}

impl ClubDocument {
    pub fn is_host(&self, user_id: &UserId) -> bool {
        &self.host_id == user_id
    }

    pub fn paying_members(&self) -> u64 {
        u64::try_from(self.paying_members_count).unwrap_or(0)
    }
}

/// Club document plus the snapshot it was decoded from.
#[derive(Debug, Clone)]
pub struct LoadedClub {
    pub snapshot: Document,
    pub club: ClubDocument,
}

/// Reads a club, failing with `NotFound` when it does not exist.
pub async fn load_club(
    store: &dyn DocumentStore,
    club_id: &ClubId,
) -> Result<LoadedClub, BillingError> {
    let snapshot = store
        .get(&club_path(club_id))
        .await?
        .ok_or_else(|| BillingError::not_found("Club", club_id.as_str()))?;
    let club = snapshot.decode()?;
    Ok(LoadedClub { snapshot, club })
}

/// Reads a user, failing with `NotFound` when it does not exist.
pub async fn load_user(
    store: &dyn DocumentStore,
    user_id: &UserId,
) -> Result<Document, BillingError> {
    store
        .get(&user_path(user_id))
        .await?
        .ok_or_else(|| BillingError::not_found("User", user_id.as_str()))
}

/// The user's membership in `club_id`, if any.
pub fn membership_of(
    user: &Document,
    club_id: &ClubId,
) -> Result<Option<MembershipRecord>, BillingError> {
    Ok(user.decode_field(&membership_field(club_id))?)
}

pub async fn load_failure_tracker(
    store: &dyn DocumentStore,
    subscription_id: &str,
) -> Result<(Option<Document>, Option<SubscriptionFailureTracker>), BillingError> {
    let snapshot = store.get(&failure_path(subscription_id)).await?;
    let tracker = snapshot.as_ref().map(Document::decode).transpose()?;
    Ok((snapshot, tracker))
}

/// Patch setting every top-level field of `value`, which must be an object.
pub fn fields_patch(value: &Value) -> Result<Patch, BillingError> {
    let fields = value
        .as_object()
        .ok_or_else(|| BillingError::internal("expected a JSON object"))?;
    Ok(fields.iter().fold(Patch::new(), |patch, (key, field)| {
        patch.set(FieldPath::from_segments([key.as_str()]), field.clone())
    }))
}

/// Serializes a domain value for storage.
pub fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, BillingError> {
    serde_json::to_value(value).map_err(|e| BillingError::internal(e.to_string()))
}
