//! Per-subscription failed invoice tracking.
//!
//! Stored at `subscriptionFailures/<subscriptionId>`. Created on the first
//! failed invoice, deleted on the next successful charge or on cancellation.

use crate::domain::foundation::{ClubId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

/// Failure tracker for one external subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionFailureTracker {
    pub failure_count: u32,
    pub last_invoice_id: String,
    pub last_failed_at: Timestamp,
    pub club_id: ClubId,
    pub user_id: UserId,
}

impl SubscriptionFailureTracker {
    /// Records a failed invoice.
    ///
    /// Returns `None` when `invoice_id` is the invoice already recorded last,
    /// which makes a repeated failure notification a no-op.
    pub fn record_failure(
        existing: Option<&Self>,
        invoice_id: &str,
        club_id: ClubId,
        user_id: UserId,
        failed_at: Timestamp,
    ) -> Option<Self> {
        match existing {
            Some(tracker) if tracker.last_invoice_id == invoice_id => None,
            Some(tracker) => Some(Self {
                failure_count: tracker.failure_count.saturating_add(1),
                last_invoice_id: invoice_id.to_string(),
                last_failed_at: failed_at,
                club_id,
                user_id,
            }),
            None => Some(Self {
                failure_count: 1,
                last_invoice_id: invoice_id.to_string(),
                last_failed_at: failed_at,
                club_id,
                user_id,
            }),
        }
    }

    /// True once the failure count reaches `max_failed_payments`.
    pub fn should_cancel(&self, max_failed_payments: u32) -> bool {
        self.failure_count >= max_failed_payments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (ClubId, UserId) {
        (ClubId::new("club-1").unwrap(), UserId::new("user-1").unwrap())
    }

    #[test]
    fn first_failure_starts_at_one() {
        let (club, user) = ids();
        let tracker =
            SubscriptionFailureTracker::record_failure(None, "in_1", club, user, Timestamp::now())
                .unwrap();
        assert_eq!(tracker.failure_count, 1);
        assert!(!tracker.should_cancel(3));
    }

    #[test]
    fn same_invoice_is_not_counted_twice() {
        let (club, user) = ids();
        let tracker = SubscriptionFailureTracker::record_failure(
            None,
            "in_1",
            club.clone(),
            user.clone(),
            Timestamp::now(),
        )
        .unwrap();
        let again = SubscriptionFailureTracker::record_failure(
            Some(&tracker),
            "in_1",
            club,
            user,
            Timestamp::now(),
        );
        assert!(again.is_none());
    }

    #[test]
    fn third_distinct_failure_reaches_threshold() {
        let (club, user) = ids();
        let mut tracker = None;
        for invoice in ["in_1", "in_2", "in_3"] {
            tracker = SubscriptionFailureTracker::record_failure(
                tracker.as_ref(),
                invoice,
                club.clone(),
                user.clone(),
                Timestamp::now(),
            );
        }
        let tracker = tracker.unwrap();
        assert_eq!(tracker.failure_count, 3);
        assert!(tracker.should_cancel(3));
        assert_eq!(tracker.last_invoice_id, "in_3");
    }
}
