//! Per-tier pricing parameters.
//!
//! Loaded once from configuration and shared read-only. Thresholds drive
//! the tier automaton; the remaining fields are copied onto a club's
//! billing profile when a tier is activated.

use serde::{Deserialize, Serialize};

use super::BillingTier;
use crate::domain::foundation::ValidationError;

/// Advisory usage ceilings for a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftLimits {
    #[serde(default)]
    pub members: u64,
    #[serde(default)]
    pub uploads: u64,
    #[serde(default, alias = "bandwidth_bytes")]
    pub bandwidth_bytes: u64,
}

/// Parameters of one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierDefinition {
    /// Gateway price the host subscription item is amended to.
    pub price_id: String,
    pub transaction_fee_percent: f64,
    pub included_members: u64,
    #[serde(default)]
    pub soft_limits: SoftLimits,
    /// Paying members at or above which an upgrade is scheduled.
    #[serde(default)]
    pub upgrade_threshold: Option<u64>,
    /// Paying members below which the downgrade streak grows.
    #[serde(default)]
    pub downgrade_threshold: Option<u64>,
}

/// The fixed tier chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTable {
    pub tier_a: TierDefinition,
    pub tier_b: TierDefinition,
    pub tier_c: TierDefinition,
}

impl TierTable {
    pub fn get(&self, tier: BillingTier) -> &TierDefinition {
        match tier {
            BillingTier::TierA => &self.tier_a,
            BillingTier::TierB => &self.tier_b,
            BillingTier::TierC => &self.tier_c,
        }
    }

    /// Finds the tier whose gateway price is `price_id`.
    pub fn tier_for_price(&self, price_id: &str) -> Option<BillingTier> {
        BillingTier::ALL
            .into_iter()
            .find(|t| self.get(*t).price_id == price_id)
    }

    /// Checks fee ranges and that every band leaves a hysteresis gap.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for tier in BillingTier::ALL {
            let def = self.get(tier);
            let field = |name: &str| format!("billing.tiers.{}.{}", tier, name);

            if def.price_id.trim().is_empty() {
                return Err(ValidationError::empty_field(field("price_id")));
            }
            if !(0.0..=100.0).contains(&def.transaction_fee_percent) {
                return Err(ValidationError::out_of_range(
                    field("transaction_fee_percent"),
                    0,
                    100,
                    def.transaction_fee_percent as i64,
                ));
            }
            if let (Some(up), Some(down)) = (def.upgrade_threshold, def.downgrade_threshold) {
                if up <= down {
                    return Err(ValidationError::invalid_format(
                        field("upgrade_threshold"),
                        format!("must be above downgrade_threshold ({} <= {})", up, down),
                    ));
                }
            }
            if tier.next().is_none() && def.upgrade_threshold.is_some() {
                return Err(ValidationError::invalid_format(
                    field("upgrade_threshold"),
                    "top tier cannot upgrade",
                ));
            }
            if tier.previous().is_none() && def.downgrade_threshold.is_some() {
                return Err(ValidationError::invalid_format(
                    field("downgrade_threshold"),
                    "bottom tier cannot downgrade",
                ));
            }
            if let Some(next) = tier.next() {
                let upper = self.get(next);
                if let (Some(up), Some(down)) = (def.upgrade_threshold, upper.downgrade_threshold) {
                    if down >= up {
                        return Err(ValidationError::invalid_format(
                            format!("billing.tiers.{}.downgrade_threshold", next),
                            format!("must be below {} upgrade_threshold ({})", tier, up),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            tier_a: TierDefinition {
                price_id: "price_tier_a".to_string(),
                transaction_fee_percent: 10.0,
                included_members: 100,
                soft_limits: SoftLimits {
                    members: 100,
                    uploads: 500,
                    bandwidth_bytes: 10 * 1024 * 1024 * 1024,
                },
                upgrade_threshold: Some(100),
                downgrade_threshold: None,
            },
            tier_b: TierDefinition {
                price_id: "price_tier_b".to_string(),
                transaction_fee_percent: 7.0,
                included_members: 500,
                soft_limits: SoftLimits {
                    members: 500,
                    uploads: 2_500,
                    bandwidth_bytes: 50 * 1024 * 1024 * 1024,
                },
                upgrade_threshold: Some(500),
                downgrade_threshold: Some(80),
            },
            tier_c: TierDefinition {
                price_id: "price_tier_c".to_string(),
                transaction_fee_percent: 5.0,
                included_members: 5_000,
                soft_limits: SoftLimits {
                    members: 5_000,
                    uploads: 25_000,
                    bandwidth_bytes: 500 * 1024 * 1024 * 1024,
                },
                upgrade_threshold: None,
                downgrade_threshold: Some(400),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_is_valid() {
        assert!(TierTable::default().validate().is_ok());
    }

    #[test]
    fn fee_above_hundred_is_rejected() {
        let mut table = TierTable::default();
        table.tier_b.transaction_fee_percent = 120.0;
        let err = table.validate().unwrap_err();
        assert_eq!(err.field(), "billing.tiers.tier_b.transaction_fee_percent");
    }

    #[test]
    fn overlapping_band_is_rejected() {
        let mut table = TierTable::default();
        table.tier_b.downgrade_threshold = Some(100);
        assert!(table.validate().is_err());
    }

    #[test]
    fn upgrade_must_exceed_downgrade_within_tier() {
        let mut table = TierTable::default();
        table.tier_b.upgrade_threshold = Some(50);
        assert!(table.validate().is_err());
    }

    #[test]
    fn price_lookup_finds_tier() {
        let table = TierTable::default();
        assert_eq!(table.tier_for_price("price_tier_c"), Some(BillingTier::TierC));
        assert_eq!(table.tier_for_price("price_unknown"), None);
    }

    #[test]
    fn soft_limits_accept_snake_case_alias() {
        let limits: SoftLimits =
            serde_json::from_str(r#"{"members":1,"uploads":2,"bandwidth_bytes":3}"#).unwrap();
        assert_eq!(limits.bandwidth_bytes, 3);
    }
}
