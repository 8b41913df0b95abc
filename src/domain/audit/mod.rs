//! Membership audit log entries (`membershipAuditLogs` collection).

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{ClubId, Timestamp, UserId};
use crate::domain::membership::{MembershipStatus, StatusChange};

/// Who caused a membership status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangedBy {
    System,
    Host,
}

/// Reason code stored with each audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditReason {
    FreeJoin,
    TrialStarted,
    CheckoutCompleted,
    InvoicePaid,
    SubscriptionCanceled,
    PaymentRequired,
}

impl AuditReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditReason::FreeJoin => "free_join",
            AuditReason::TrialStarted => "trial_started",
            AuditReason::CheckoutCompleted => "checkout_completed",
            AuditReason::InvoicePaid => "invoice_paid",
            AuditReason::SubscriptionCanceled => "subscription_canceled",
            AuditReason::PaymentRequired => "payment_required",
        }
    }
}

/// One immutable status transition record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub club_id: ClubId,
    pub user_id: UserId,
    pub old_status: Option<MembershipStatus>,
    pub new_status: MembershipStatus,
    pub changed_by: ChangedBy,
    pub reason: AuditReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_detail: Option<String>,
    pub created_at: Timestamp,
}

impl AuditEntry {
    pub fn for_change(
        club_id: ClubId,
        user_id: UserId,
        change: StatusChange,
        changed_by: ChangedBy,
        reason: AuditReason,
        created_at: Timestamp,
    ) -> Self {
        Self {
            club_id,
            user_id,
            old_status: change.from,
            new_status: change.to,
            changed_by,
            reason,
            reason_detail: None,
            created_at,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.reason_detail = Some(detail.into());
        self
    }
}
