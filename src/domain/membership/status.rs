//! Membership status state machine.
//!
//! Defines the four states a (user, club) membership can be in and the
//! transitions the billing lifecycle allows between them.

use crate::domain::foundation::StateMachine;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Membership status as stored at `memberships.<clubId>.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    /// Full access. Either a free member or a paying subscriber.
    Active,

    /// Paid subscription inside its trial window.
    /// Access is granted, nothing has been charged yet.
    Trialing,

    /// Former free member of a club that became paid.
    /// No access until a checkout completes.
    PaymentRequired,

    /// Subscription ended. The record stays for history.
    Canceled,
}

impl MembershipStatus {
    /// Returns true if this status grants access to club content.
    pub fn has_access(&self) -> bool {
        matches!(self, MembershipStatus::Active | MembershipStatus::Trialing)
    }

    /// Wire name, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Active => "active",
            MembershipStatus::Trialing => "trialing",
            MembershipStatus::PaymentRequired => "payment_required",
            MembershipStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StateMachine for MembershipStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use MembershipStatus::*;
        matches!(
            (self, target),
            // From ACTIVE
            (Active, Active) // Renewal
                | (Active, Trialing) // Free member upgrading with a trial
                | (Active, PaymentRequired) // Club switched from free to paid
                | (Active, Canceled)
            // From TRIALING
                | (Trialing, Active) // Trial conversion
                | (Trialing, Canceled)
            // From PAYMENT_REQUIRED
                | (PaymentRequired, Active)
                | (PaymentRequired, Trialing)
                | (PaymentRequired, Canceled)
            // From CANCELED
                | (Canceled, Active) // Rejoin
                | (Canceled, Trialing)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use MembershipStatus::*;
        match self {
            Active => vec![Active, Trialing, PaymentRequired, Canceled],
            Trialing => vec![Active, Canceled],
            PaymentRequired => vec![Active, Trialing, Canceled],
            Canceled => vec![Active, Trialing],
        }
    }
}
