//! Append-only billing event log entries (`billingEvents` collection).
//!
//! One entry per tier lifecycle transition. Used to answer "why is this
//! club on this tier?" long after the fact.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::BillingTier;
use crate::domain::foundation::{ClubId, Timestamp};

/// Types of billing events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingEventType {
    UpgradeScheduled,
    UpgradeExecuted,
    DowngradeScheduled,
    DowngradeExecuted,
    TrialStarted,
    Activated,
    Canceled,
    SubscriptionCanceledForNonpayment,
}

impl fmt::Display for BillingEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BillingEventType::UpgradeScheduled => "UPGRADE_SCHEDULED",
            BillingEventType::UpgradeExecuted => "UPGRADE_EXECUTED",
            BillingEventType::DowngradeScheduled => "DOWNGRADE_SCHEDULED",
            BillingEventType::DowngradeExecuted => "DOWNGRADE_EXECUTED",
            BillingEventType::TrialStarted => "TRIAL_STARTED",
            BillingEventType::Activated => "ACTIVATED",
            BillingEventType::Canceled => "CANCELED",
            BillingEventType::SubscriptionCanceledForNonpayment => {
                "SUBSCRIPTION_CANCELED_FOR_NONPAYMENT"
            }
        };
        write!(f, "{}", s)
    }
}

/// Who triggered the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingActor {
    /// Scheduled automation
    System,
    /// Club owner action
    Host,
    /// Payment gateway webhook
    Gateway,
}

/// A billing event record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingEventRecord {
    pub club_id: ClubId,
    #[serde(rename = "type")]
    pub event_type: BillingEventType,
    pub from_tier: Option<BillingTier>,
    pub to_tier: Option<BillingTier>,
    pub scheduled_for: Option<Timestamp>,
    pub actor: BillingActor,
    pub details: Value,
    pub created_at: Timestamp,
}

impl BillingEventRecord {
    pub fn builder(club_id: ClubId, event_type: BillingEventType) -> BillingEventBuilder {
        BillingEventBuilder::new(club_id, event_type)
    }
}

/// Builder for billing event records.
pub struct BillingEventBuilder {
    club_id: ClubId,
    event_type: BillingEventType,
    from_tier: Option<BillingTier>,
    to_tier: Option<BillingTier>,
    scheduled_for: Option<Timestamp>,
    actor: BillingActor,
    details: Value,
}

impl BillingEventBuilder {
    pub fn new(club_id: ClubId, event_type: BillingEventType) -> Self {
        Self {
            club_id,
            event_type,
            from_tier: None,
            to_tier: None,
            scheduled_for: None,
            actor: BillingActor::System,
            details: serde_json::json!({}),
        }
    }

    /// Set the tiers moved between
    pub fn tiers(mut self, from: Option<BillingTier>, to: Option<BillingTier>) -> Self {
        self.from_tier = from;
        self.to_tier = to;
        self
    }

    pub fn scheduled_for(mut self, at: Timestamp) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    pub fn actor(mut self, actor: BillingActor) -> Self {
        self.actor = actor;
        self
    }

    /// Set free-form details (gateway ids, counts)
    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn build(self, created_at: Timestamp) -> BillingEventRecord {
        BillingEventRecord {
            club_id: self.club_id,
            event_type: self.event_type,
            from_tier: self.from_tier,
            to_tier: self.to_tier,
            scheduled_for: self.scheduled_for,
            actor: self.actor,
            details: self.details,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_display_matches_stored_form() {
        let t = BillingEventType::SubscriptionCanceledForNonpayment;
        assert_eq!(
            serde_json::to_string(&t).unwrap(),
            format!("\"{}\"", t)
        );
        assert_eq!(t.to_string(), "SUBSCRIPTION_CANCELED_FOR_NONPAYMENT");
    }

    #[test]
    fn builder_defaults_to_system_actor() {
        let now = Timestamp::now();
        let record = BillingEventRecord::builder(
            ClubId::new("club-1").unwrap(),
            BillingEventType::UpgradeScheduled,
        )
        .tiers(Some(BillingTier::TierA), Some(BillingTier::TierB))
        .scheduled_for(now.add_hours(48))
        .build(now);

        assert_eq!(record.actor, BillingActor::System);
        assert_eq!(record.to_tier, Some(BillingTier::TierB));

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "UPGRADE_SCHEDULED");
        assert_eq!(value["fromTier"], "tier_a");
        assert_eq!(value["actor"], "system");
    }
}
