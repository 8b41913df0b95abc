//! Host billing tiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform pricing tier of a club, lowest first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BillingTier {
    #[default]
    TierA,
    TierB,
    TierC,
}

impl BillingTier {
    /// All tiers in chain order.
    pub const ALL: [BillingTier; 3] = [BillingTier::TierA, BillingTier::TierB, BillingTier::TierC];

    /// Position in the chain, starting at zero.
    pub fn rank(&self) -> usize {
        match self {
            BillingTier::TierA => 0,
            BillingTier::TierB => 1,
            BillingTier::TierC => 2,
        }
    }

    /// Tier above this one. The top tier has none.
    pub fn next(&self) -> Option<BillingTier> {
        Self::ALL.get(self.rank() + 1).copied()
    }

    /// Tier below this one. The bottom tier has none.
    pub fn previous(&self) -> Option<BillingTier> {
        self.rank().checked_sub(1).and_then(|r| Self::ALL.get(r).copied())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BillingTier::TierA => "tier_a",
            BillingTier::TierB => "tier_b",
            BillingTier::TierC => "tier_c",
        }
    }

    /// Parses the wire name, as found in gateway metadata.
    pub fn parse(s: &str) -> Option<BillingTier> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for BillingTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
