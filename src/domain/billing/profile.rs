//! Club billing profile, embedded in the club document at `billing`.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{BillingTier, SoftLimits, TierTable};
use crate::domain::foundation::{DomainError, StateMachine, Timestamp};

/// Status of the host's platform subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostBillingStatus {
    #[default]
    Active,
    Trialing,
    Canceled,
}

impl HostBillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostBillingStatus::Active => "active",
            HostBillingStatus::Trialing => "trialing",
            HostBillingStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for HostBillingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StateMachine for HostBillingStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use HostBillingStatus::*;
        matches!(
            (self, target),
            (Active, Active) // Tier change
                | (Active, Canceled)
                | (Trialing, Active)
                | (Trialing, Trialing) // Tier change during trial
                | (Trialing, Canceled)
                | (Canceled, Active)
                | (Canceled, Trialing)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use HostBillingStatus::*;
        match self {
            Active => vec![Active, Canceled],
            Trialing => vec![Active, Trialing, Canceled],
            Canceled => vec![Active, Trialing],
        }
    }
}

/// Usage counters and hysteresis streaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageCounters {
    pub paying_members: u64,
    pub uploads: u64,
    pub bandwidth_bytes: u64,
    /// Consecutive periods at or over the upgrade threshold.
    pub streak_over_soft_limit_days: u32,
    /// Consecutive periods under the downgrade threshold.
    pub streak_below_threshold_days: u32,
}

/// Billing state of one club.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClubBillingProfile {
    pub tier: BillingTier,
    pub transaction_fee_percent: f64,
    pub included_members: u64,
    #[serde(default)]
    pub soft_limits: SoftLimits,
    #[serde(default)]
    pub usage: UsageCounters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_scheduled_for: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downgrade_eligible_after: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_customer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_subscription_id: Option<String>,
    #[serde(default)]
    pub status: HostBillingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

impl ClubBillingProfile {
    /// Fresh profile on `tier` with no gateway subscription yet.
    pub fn new(tier: BillingTier, table: &TierTable, now: Timestamp) -> Self {
        let def = table.get(tier);
        Self {
            tier,
            transaction_fee_percent: def.transaction_fee_percent,
            included_members: def.included_members,
            soft_limits: def.soft_limits,
            usage: UsageCounters::default(),
            upgrade_scheduled_for: None,
            downgrade_eligible_after: None,
            external_customer_id: None,
            external_subscription_id: None,
            status: HostBillingStatus::Active,
            updated_at: Some(now),
        }
    }

    /// Profile of a club whose host never subscribed.
    pub fn unsubscribed(table: &TierTable, now: Timestamp) -> Self {
        Self {
            status: HostBillingStatus::Canceled,
            ..Self::new(BillingTier::TierA, table, now)
        }
    }

    /// True when either a tier upgrade or downgrade is pending.
    pub fn has_pending_change(&self) -> bool {
        self.upgrade_scheduled_for.is_some() || self.downgrade_eligible_after.is_some()
    }

    /// Moves the profile onto `target` with `status`.
    ///
    /// Copies the tier parameters, resets both streaks and clears any
    /// pending schedule. Shared by automaton executions and host checkouts.
    pub fn apply_activation(
        &mut self,
        target: BillingTier,
        status: HostBillingStatus,
        table: &TierTable,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        self.status = self.status.transition_to(status)?;
        self.set_tier(target, table);
        self.updated_at = Some(now);
        Ok(())
    }

    /// Cancels the host subscription and falls back to `target`.
    pub fn apply_cancellation(
        &mut self,
        target: BillingTier,
        table: &TierTable,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        self.status = self.status.transition_to(HostBillingStatus::Canceled)?;
        self.set_tier(target, table);
        self.external_subscription_id = None;
        self.updated_at = Some(now);
        Ok(())
    }

    fn set_tier(&mut self, target: BillingTier, table: &TierTable) {
        let def = table.get(target);
        self.tier = target;
        self.transaction_fee_percent = def.transaction_fee_percent;
        self.included_members = def.included_members;
        self.soft_limits = def.soft_limits;
        self.usage.streak_over_soft_limit_days = 0;
        self.usage.streak_below_threshold_days = 0;
        self.upgrade_scheduled_for = None;
        self.downgrade_eligible_after = None;
    }
}
