//! Membership record and its transition functions.
//!
//! A record lives embedded in the user document at `memberships.<clubId>`.
//! Every change goes through one of the constructors on
//! [`MembershipTransition`], which validate the status move and produce
//! the complete next record. Callers derive counter deltas, audit entries
//! and analytics from the `previous`/`next` pair instead of tracking them
//! separately.
//!
//! # Design Decisions
//!
//! - **Records are never deleted**: cancellation only moves the status
//! - **Trialing members are not counted**: they join `members` on conversion
//! - **Pure functions**: the caller supplies `now`, nothing reads the clock

use crate::domain::foundation::{DomainError, StateMachine, Timestamp};
use serde::{Deserialize, Serialize};

use super::{LastPaymentType, MembershipStatus};

/// Per-(user, club) membership state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipRecord {
    pub status: MembershipStatus,

    #[serde(default)]
    pub is_trialing: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trial_ends_at: Option<Timestamp>,

    pub last_payment_type: LastPaymentType,

    pub last_payment_at: Timestamp,

    #[serde(default)]
    pub consecutive_failed_payments: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_subscription_id: Option<String>,

    pub joined_at: Timestamp,

    pub updated_at: Timestamp,
}

impl MembershipRecord {
    /// True when the member is in the club's `members` array.
    ///
    /// Trialing members get access but are only counted once their first
    /// charge lands.
    pub fn is_counted_member(&self) -> bool {
        self.status == MembershipStatus::Active && !self.is_trialing
    }

    /// True when invoices of `subscription_id` may still change this record.
    ///
    /// A canceled record, or one now tied to another subscription (or to
    /// none, after a free rejoin), only sees stale or out-of-order invoices.
    pub fn is_billed_by(&self, subscription_id: &str) -> bool {
        self.status != MembershipStatus::Canceled
            && self.external_subscription_id.as_deref() == Some(subscription_id)
    }

    /// True when the member contributes to `payingMembersCount`.
    pub fn is_paying(&self) -> bool {
        self.is_counted_member() && !self.last_payment_type.is_free()
    }

    /// True while a trial window is still open at `at`.
    pub fn in_trial_window(&self, at: &Timestamp) -> bool {
        self.is_trialing
            && self
                .trial_ends_at
                .map(|ends| ends.is_after(at))
                .unwrap_or(false)
    }
}

/// A status move from `from` (absent on first join) to `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub from: Option<MembershipStatus>,
    pub to: MembershipStatus,
}

/// Result of asking a free join to proceed.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinFreeDecision {
    /// The user already has access; nothing to write.
    AlreadyMember(MembershipStatus),
    /// Apply this transition.
    Join(MembershipTransition),
}

/// Result of applying a paid invoice to a membership.
#[derive(Debug, Clone, PartialEq)]
pub enum InvoicePaidDecision {
    /// Inside an open trial window. The payment is still recorded.
    WithinTrial,
    /// Apply this transition.
    Apply(MembershipTransition),
}

/// Before/after pair produced by every membership change.
#[derive(Debug, Clone, PartialEq)]
pub struct MembershipTransition {
    pub previous: Option<MembershipRecord>,
    pub next: MembershipRecord,
}

impl MembershipTransition {
    /// Free join. A user who already has access is reported, not rejoined.
    pub fn join_free(
        previous: Option<&MembershipRecord>,
        now: Timestamp,
    ) -> Result<JoinFreeDecision, DomainError> {
        if let Some(prev) = previous {
            if prev.status.has_access() {
                return Ok(JoinFreeDecision::AlreadyMember(prev.status));
            }
            prev.status.transition_to(MembershipStatus::Active)?;
        }

        let next = MembershipRecord {
            status: MembershipStatus::Active,
            is_trialing: false,
            trial_ends_at: None,
            last_payment_type: LastPaymentType::Free,
            last_payment_at: now,
            consecutive_failed_payments: 0,
            external_subscription_id: None,
            joined_at: previous.map(|p| p.joined_at).unwrap_or(now),
            updated_at: now,
        };

        Ok(JoinFreeDecision::Join(Self {
            previous: previous.cloned(),
            next,
        }))
    }

    /// Paid checkout that granted a trial.
    pub fn start_trial(
        previous: Option<&MembershipRecord>,
        subscription_id: impl Into<String>,
        trial_ends_at: Timestamp,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        if let Some(prev) = previous {
            prev.status.transition_to(MembershipStatus::Trialing)?;
        }

        let next = MembershipRecord {
            status: MembershipStatus::Trialing,
            is_trialing: true,
            trial_ends_at: Some(trial_ends_at),
            last_payment_type: LastPaymentType::TrialStart,
            last_payment_at: now,
            consecutive_failed_payments: 0,
            external_subscription_id: Some(subscription_id.into()),
            joined_at: previous.map(|p| p.joined_at).unwrap_or(now),
            updated_at: now,
        };

        Ok(Self {
            previous: previous.cloned(),
            next,
        })
    }

    /// Paid checkout without a trial.
    pub fn activate_paid(
        previous: Option<&MembershipRecord>,
        subscription_id: Option<String>,
        payment_type: LastPaymentType,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        if let Some(prev) = previous {
            prev.status.transition_to(MembershipStatus::Active)?;
        }

        let next = MembershipRecord {
            status: MembershipStatus::Active,
            is_trialing: false,
            trial_ends_at: None,
            last_payment_type: payment_type,
            last_payment_at: now,
            consecutive_failed_payments: 0,
            external_subscription_id: subscription_id,
            joined_at: previous.map(|p| p.joined_at).unwrap_or(now),
            updated_at: now,
        };

        Ok(Self {
            previous: previous.cloned(),
            next,
        })
    }

    /// Charged invoice. `occurred_at` is the gateway's event time and is
    /// what the trial window is compared against.
    pub fn invoice_paid(
        previous: &MembershipRecord,
        payment_type: LastPaymentType,
        occurred_at: Timestamp,
        now: Timestamp,
    ) -> Result<InvoicePaidDecision, DomainError> {
        if previous.in_trial_window(&occurred_at) {
            return Ok(InvoicePaidDecision::WithinTrial);
        }
        previous.status.transition_to(MembershipStatus::Active)?;

        let next = MembershipRecord {
            status: MembershipStatus::Active,
            is_trialing: false,
            trial_ends_at: None,
            last_payment_type: payment_type,
            last_payment_at: now,
            consecutive_failed_payments: 0,
            updated_at: now,
            ..previous.clone()
        };

        Ok(InvoicePaidDecision::Apply(Self {
            previous: Some(previous.clone()),
            next,
        }))
    }

    /// Failed renewal. Status is untouched, the failure counter grows.
    pub fn payment_failed(previous: &MembershipRecord, now: Timestamp) -> Self {
        let next = MembershipRecord {
            consecutive_failed_payments: previous.consecutive_failed_payments.saturating_add(1),
            updated_at: now,
            ..previous.clone()
        };
        Self {
            previous: Some(previous.clone()),
            next,
        }
    }

    /// External cancellation. `None` when the record is already canceled.
    pub fn cancel(previous: &MembershipRecord, now: Timestamp) -> Result<Option<Self>, DomainError> {
        if previous.status == MembershipStatus::Canceled {
            return Ok(None);
        }
        previous.status.transition_to(MembershipStatus::Canceled)?;

        let next = MembershipRecord {
            status: MembershipStatus::Canceled,
            is_trialing: false,
            trial_ends_at: None,
            updated_at: now,
            ..previous.clone()
        };
        Ok(Some(Self {
            previous: Some(previous.clone()),
            next,
        }))
    }

    /// Host-forced move of a free member to `payment_required`.
    ///
    /// `None` unless the record was last paid for as `free`.
    pub fn require_payment(
        previous: &MembershipRecord,
        now: Timestamp,
    ) -> Result<Option<Self>, DomainError> {
        if previous.last_payment_type != LastPaymentType::Free {
            return Ok(None);
        }
        let status = if previous.status == MembershipStatus::Active {
            previous.status.transition_to(MembershipStatus::PaymentRequired)?
        } else {
            // Canceled free members stay canceled but lose their free marker.
            previous.status
        };

        let next = MembershipRecord {
            status,
            last_payment_type: LastPaymentType::FreeExpired,
            updated_at: now,
            ..previous.clone()
        };
        Ok(Some(Self {
            previous: Some(previous.clone()),
            next,
        }))
    }

    /// The status move this transition makes, if any.
    pub fn status_change(&self) -> Option<StatusChange> {
        let from = self.previous.as_ref().map(|p| p.status);
        if from == Some(self.next.status) {
            return None;
        }
        Some(StatusChange {
            from,
            to: self.next.status,
        })
    }

    /// +1 when the user enters the `members` array, -1 when they leave it.
    pub fn member_delta(&self) -> i64 {
        let before = self
            .previous
            .as_ref()
            .map(MembershipRecord::is_counted_member)
            .unwrap_or(false);
        delta(before, self.next.is_counted_member())
    }

    /// Change to `payingMembersCount`.
    pub fn paying_delta(&self) -> i64 {
        let before = self
            .previous
            .as_ref()
            .map(MembershipRecord::is_paying)
            .unwrap_or(false);
        delta(before, self.next.is_paying())
    }

    /// True when the record was trialing before this transition.
    pub fn was_trialing(&self) -> bool {
        self.previous
            .as_ref()
            .map(|p| p.is_trialing)
            .unwrap_or(false)
    }
}

fn delta(before: bool, after: bool) -> i64 {
    i64::from(after) - i64::from(before)
}
