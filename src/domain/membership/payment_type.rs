//! How a membership was last paid for.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Value of `memberships.<clubId>.lastPaymentType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastPaymentType {
    /// Joined a club whose price was zero.
    Free,
    /// Free member of a club that has since become paid.
    FreeExpired,
    /// Checkout completed without a charge (trial or zero amount).
    TrialStart,
    /// Checkout completed with an immediate charge.
    Subscription,
    /// First invoice charged for a subscription.
    SubscriptionFirstCharge,
    /// Any later invoice charged for a subscription.
    SubscriptionRenewal,
}

impl LastPaymentType {
    /// Wire name, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            LastPaymentType::Free => "free",
            LastPaymentType::FreeExpired => "free_expired",
            LastPaymentType::TrialStart => "trial_start",
            LastPaymentType::Subscription => "subscription",
            LastPaymentType::SubscriptionFirstCharge => "subscription_first_charge",
            LastPaymentType::SubscriptionRenewal => "subscription_renewal",
        }
    }

    /// True for the two variants that never involved the gateway.
    pub fn is_free(&self) -> bool {
        matches!(self, LastPaymentType::Free | LastPaymentType::FreeExpired)
    }

    /// True when money actually changed hands.
    pub fn is_charge(&self) -> bool {
        matches!(
            self,
            LastPaymentType::Subscription
                | LastPaymentType::SubscriptionFirstCharge
                | LastPaymentType::SubscriptionRenewal
        )
    }
}

impl fmt::Display for LastPaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_variants_are_not_charges() {
        assert!(LastPaymentType::Free.is_free());
        assert!(LastPaymentType::FreeExpired.is_free());
        assert!(!LastPaymentType::Free.is_charge());
        assert!(!LastPaymentType::TrialStart.is_charge());
    }

    #[test]
    fn subscription_variants_are_charges() {
        assert!(LastPaymentType::Subscription.is_charge());
        assert!(LastPaymentType::SubscriptionFirstCharge.is_charge());
        assert!(LastPaymentType::SubscriptionRenewal.is_charge());
    }

    #[test]
    fn as_str_matches_serde() {
        for kind in [
            LastPaymentType::Free,
            LastPaymentType::FreeExpired,
            LastPaymentType::TrialStart,
            LastPaymentType::Subscription,
            LastPaymentType::SubscriptionFirstCharge,
            LastPaymentType::SubscriptionRenewal,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
