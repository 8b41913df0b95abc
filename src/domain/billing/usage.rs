//! Daily and monthly usage snapshots for host-facing reporting.

use serde::{Deserialize, Serialize};

use super::{BillingTier, UsageCounters};
use crate::domain::foundation::{ClubId, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub paying_members: u64,
    pub uploads: u64,
    pub bandwidth_bytes: u64,
    pub tier: BillingTier,
    pub recorded_at: Timestamp,
}

impl UsageSnapshot {
    pub fn from_usage(usage: &UsageCounters, tier: BillingTier, recorded_at: Timestamp) -> Self {
        Self {
            paying_members: usage.paying_members,
            uploads: usage.uploads,
            bandwidth_bytes: usage.bandwidth_bytes,
            tier,
            recorded_at,
        }
    }

    /// `<clubId>_<YYYY-MM-DD>`
    pub fn daily_id(club_id: &ClubId, at: &Timestamp) -> String {
        format!("{}_{}", club_id, at.day_key())
    }

    /// `<clubId>_<YYYY-MM>`
    pub fn monthly_id(club_id: &ClubId, at: &Timestamp) -> String {
        format!("{}_{}", club_id, at.month_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_ids_use_calendar_keys() {
        let club = ClubId::new("club-7").unwrap();
        let at = Timestamp::from_unix_secs(1_709_596_800).unwrap(); // 2024-03-05
        assert_eq!(UsageSnapshot::daily_id(&club, &at), "club-7_2024-03-05");
        assert_eq!(UsageSnapshot::monthly_id(&club, &at), "club-7_2024-03");
    }
}
