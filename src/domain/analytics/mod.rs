//! Monthly analytics counters and the events that move them.
//!
//! A bucket document (`clubAnalytics/<clubId>_<YYYY-MM>`) is only ever
//! changed through signed increments. The event's own timestamp picks the
//! bucket, so a replayed event lands in the month it happened in.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::foundation::{ClubId, Currency, Timestamp, UserId};

/// Counter fields of a monthly bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnalyticsCounter {
    NewSubscribers,
    ActiveSubscribers,
    TrialConversions,
    TotalRevenue,
    Cancellations,
    TrialStarts,
}

impl AnalyticsCounter {
    pub const ALL: [AnalyticsCounter; 6] = [
        AnalyticsCounter::NewSubscribers,
        AnalyticsCounter::ActiveSubscribers,
        AnalyticsCounter::TrialConversions,
        AnalyticsCounter::TotalRevenue,
        AnalyticsCounter::Cancellations,
        AnalyticsCounter::TrialStarts,
    ];

    /// Field name in the bucket document.
    pub fn field_name(&self) -> &'static str {
        match self {
            AnalyticsCounter::NewSubscribers => "newSubscribers",
            AnalyticsCounter::ActiveSubscribers => "activeSubscribers",
            AnalyticsCounter::TrialConversions => "trialConversions",
            AnalyticsCounter::TotalRevenue => "totalRevenue",
            AnalyticsCounter::Cancellations => "cancellations",
            AnalyticsCounter::TrialStarts => "trialStarts",
        }
    }
}

/// Direction applied to every increment of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsMode {
    #[default]
    Add,
    Subtract,
}

impl AnalyticsMode {
    pub fn sign(&self) -> i64 {
        match self {
            AnalyticsMode::Add => 1,
            AnalyticsMode::Subtract => -1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyticsMode::Add => "add",
            AnalyticsMode::Subtract => "subtract",
        }
    }
}

/// Logical analytics event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsEventType {
    TrialStarted,
    SubscriptionStarted,
    SubscriptionCharged,
    SubscriptionCanceled,
}

impl AnalyticsEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyticsEventType::TrialStarted => "trial_started",
            AnalyticsEventType::SubscriptionStarted => "subscription_started",
            AnalyticsEventType::SubscriptionCharged => "subscription_charged",
            AnalyticsEventType::SubscriptionCanceled => "subscription_canceled",
        }
    }
}

impl fmt::Display for AnalyticsEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One analytics event: signed increments plus attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub event_type: AnalyticsEventType,
    pub club_id: ClubId,
    pub user_id: Option<UserId>,
    pub increments: BTreeMap<AnalyticsCounter, i64>,
    pub currency: Currency,
    /// Selects the monthly bucket. Not wall-clock time.
    pub occurred_at: Timestamp,
    /// Gateway object id the event derives from.
    pub idempotency_key: String,
    pub mode: AnalyticsMode,
}

impl AnalyticsEvent {
    pub fn new(
        event_type: AnalyticsEventType,
        club_id: ClubId,
        currency: Currency,
        occurred_at: Timestamp,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            club_id,
            user_id: None,
            increments: BTreeMap::new(),
            currency,
            occurred_at,
            idempotency_key: idempotency_key.into(),
            mode: AnalyticsMode::Add,
        }
    }

    pub fn user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Adds `amount` to `counter`. Zero amounts are dropped.
    pub fn increment(mut self, counter: AnalyticsCounter, amount: i64) -> Self {
        if amount != 0 {
            *self.increments.entry(counter).or_insert(0) += amount;
        }
        self
    }

    pub fn mode(mut self, mode: AnalyticsMode) -> Self {
        self.mode = mode;
        self
    }

    /// Increments with the mode's sign applied, zeros skipped.
    pub fn signed_increments(&self) -> impl Iterator<Item = (AnalyticsCounter, i64)> + '_ {
        let sign = self.mode.sign();
        self.increments
            .iter()
            .filter(|(_, v)| **v != 0)
            .map(move |(k, v)| (*k, v * sign))
    }

    pub fn is_empty(&self) -> bool {
        self.signed_increments().next().is_none()
    }

    /// `<clubId>_<YYYY-MM>` of the bucket this event lands in.
    pub fn bucket_id(&self) -> String {
        bucket_id(&self.club_id, &self.occurred_at)
    }

    /// Hex SHA-256 of (event type, idempotency key, mode).
    ///
    /// Stable across re-sends so the sink can deduplicate.
    pub fn insert_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.event_type.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.idempotency_key.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.mode.as_str().as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

/// Bucket document id for `club_id` in the month of `at`.
pub fn bucket_id(club_id: &ClubId, at: &Timestamp) -> String {
    format!("{}_{}", club_id, at.month_key())
}
