//! Tier hysteresis automaton.
//!
//! One call to [`evaluate`] is one period for one club. It updates the
//! streak counters and the upgrade/downgrade schedules on a copy of the
//! profile and returns the actions the caller must carry out. Executing a
//! tier change needs the gateway, so `evaluate` only reports it; the
//! schedule stays on the returned profile until the caller applies the
//! activation, which keeps a failed gateway call retryable next period.
//!
//! A pending upgrade and a pending downgrade never coexist. If stored data
//! has both and both are due, the upgrade executes and the downgrade is
//! cleared.

use super::{BillingTier, ClubBillingProfile, HostBillingStatus, TierTable};
use crate::domain::foundation::Timestamp;

/// Automaton knobs, taken from `billing` configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutomatonSettings {
    pub warning_window_hours: i64,
    pub downgrade_cooldown_periods: u32,
}

impl Default for AutomatonSettings {
    fn default() -> Self {
        Self {
            warning_window_hours: 48,
            downgrade_cooldown_periods: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierDirection {
    Upgrade,
    Downgrade,
}

/// Why a due tier change could not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingSubscription,
}

/// Something the caller must do or log after an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomatonAction {
    UpgradeScheduled {
        from: BillingTier,
        to: BillingTier,
        scheduled_for: Timestamp,
    },
    UpgradeScheduleCleared,
    DowngradeScheduled {
        from: BillingTier,
        to: BillingTier,
        eligible_after: Timestamp,
    },
    DowngradeEligibilityWithdrawn,
    Execute {
        direction: TierDirection,
        from: BillingTier,
        to: BillingTier,
    },
    ExecutionSkipped {
        direction: TierDirection,
        reason: SkipReason,
    },
}

/// Updated profile plus the actions it implies.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub profile: ClubBillingProfile,
    pub actions: Vec<AutomatonAction>,
}

impl Evaluation {
    /// The tier change to carry out this period, if any.
    pub fn execution(&self) -> Option<(TierDirection, BillingTier, BillingTier)> {
        self.actions.iter().find_map(|a| match a {
            AutomatonAction::Execute {
                direction,
                from,
                to,
            } => Some((*direction, *from, *to)),
            _ => None,
        })
    }
}

/// Runs one period of the automaton for one club.
pub fn evaluate(
    current: &ClubBillingProfile,
    paying_members: u64,
    table: &TierTable,
    settings: &AutomatonSettings,
    now: Timestamp,
) -> Evaluation {
    let mut profile = current.clone();
    let mut actions = Vec::new();

    let def = table.get(profile.tier);
    let next = profile.tier.next();
    let previous = profile.tier.previous();

    let over = next.is_some()
        && def
            .upgrade_threshold
            .map(|t| paying_members >= t)
            .unwrap_or(false);
    let below = previous.is_some()
        && def
            .downgrade_threshold
            .map(|t| paying_members < t)
            .unwrap_or(false);

    profile.usage.paying_members = paying_members;
    profile.usage.streak_over_soft_limit_days = if over {
        profile.usage.streak_over_soft_limit_days.saturating_add(1)
    } else {
        0
    };
    profile.usage.streak_below_threshold_days = if below {
        profile.usage.streak_below_threshold_days.saturating_add(1)
    } else {
        0
    };
    profile.updated_at = Some(now);

    if profile.status == HostBillingStatus::Canceled {
        return Evaluation { profile, actions };
    }

    if !over && profile.upgrade_scheduled_for.take().is_some() {
        actions.push(AutomatonAction::UpgradeScheduleCleared);
    }
    if !below && profile.downgrade_eligible_after.take().is_some() {
        actions.push(AutomatonAction::DowngradeEligibilityWithdrawn);
    }

    let upgrade_due = profile
        .upgrade_scheduled_for
        .map(|at| !at.is_after(&now))
        .unwrap_or(false);
    let downgrade_due = profile
        .downgrade_eligible_after
        .map(|at| !at.is_after(&now))
        .unwrap_or(false);

    if let (true, Some(to)) = (upgrade_due, next) {
        if profile.downgrade_eligible_after.take().is_some() {
            actions.push(AutomatonAction::DowngradeEligibilityWithdrawn);
        }
        actions.push(execute_or_skip(&profile, TierDirection::Upgrade, to));
    } else if let (true, Some(to)) = (downgrade_due, previous) {
        actions.push(execute_or_skip(&profile, TierDirection::Downgrade, to));
    } else if over && profile.upgrade_scheduled_for.is_none() {
        if let Some(to) = next {
            let scheduled_for = now.add_hours(settings.warning_window_hours);
            profile.upgrade_scheduled_for = Some(scheduled_for);
            if profile.downgrade_eligible_after.take().is_some() {
                actions.push(AutomatonAction::DowngradeEligibilityWithdrawn);
            }
            actions.push(AutomatonAction::UpgradeScheduled {
                from: profile.tier,
                to,
                scheduled_for,
            });
        }
    } else if below
        && profile.downgrade_eligible_after.is_none()
        && profile.usage.streak_below_threshold_days >= settings.downgrade_cooldown_periods
    {
        if let Some(to) = previous {
            profile.downgrade_eligible_after = Some(now);
            if profile.upgrade_scheduled_for.take().is_some() {
                actions.push(AutomatonAction::UpgradeScheduleCleared);
            }
            actions.push(AutomatonAction::DowngradeScheduled {
                from: profile.tier,
                to,
                eligible_after: now,
            });
        }
    }

    Evaluation { profile, actions }
}

fn execute_or_skip(
    profile: &ClubBillingProfile,
    direction: TierDirection,
    to: BillingTier,
) -> AutomatonAction {
    if profile.external_subscription_id.is_none() {
        return AutomatonAction::ExecutionSkipped {
            direction,
            reason: SkipReason::MissingSubscription,
        };
    }
    AutomatonAction::Execute {
        direction,
        from: profile.tier,
        to,
    }
}
