//! Billing automaton and tier configuration

use serde::Deserialize;

use super::error::ValidationError;
use crate::domain::billing::{AutomatonSettings, TierTable};

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Hours an upgrade or downgrade stays scheduled before it executes
    #[serde(default = "default_warning_window_hours")]
    pub warning_window_hours: i64,

    /// Consecutive periods under the downgrade threshold before scheduling
    #[serde(default = "default_downgrade_cooldown_periods")]
    pub downgrade_cooldown_periods: u32,

    /// Failed renewals before a member's subscription is canceled
    #[serde(default = "default_max_failed_payments")]
    pub max_failed_payments: u32,

    /// Six-field cron expression for the periodic evaluation
    #[serde(default = "default_evaluation_cron")]
    pub evaluation_cron: String,

    #[serde(default = "default_max_concurrent_evaluations")]
    pub max_concurrent_evaluations: usize,

    #[serde(default)]
    pub tiers: TierTable,
}

impl BillingConfig {
    pub fn automaton(&self) -> AutomatonSettings {
        AutomatonSettings {
            warning_window_hours: self.warning_window_hours,
            downgrade_cooldown_periods: self.downgrade_cooldown_periods,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.warning_window_hours < 0 {
            return Err(ValidationError::TooSmall {
                field: "billing.warning_window_hours",
                min: 0,
            });
        }
        if self.downgrade_cooldown_periods == 0 {
            return Err(ValidationError::TooSmall {
                field: "billing.downgrade_cooldown_periods",
                min: 1,
            });
        }
        if self.max_failed_payments == 0 {
            return Err(ValidationError::TooSmall {
                field: "billing.max_failed_payments",
                min: 1,
            });
        }
        if self.max_concurrent_evaluations == 0 {
            return Err(ValidationError::TooSmall {
                field: "billing.max_concurrent_evaluations",
                min: 1,
            });
        }
        // The scheduler parses the expression itself; only the field count is checked here.
        if self.evaluation_cron.split_whitespace().count() != 6 {
            return Err(ValidationError::InvalidCron(self.evaluation_cron.clone()));
        }
        self.tiers.validate()?;
        Ok(())
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            warning_window_hours: default_warning_window_hours(),
            downgrade_cooldown_periods: default_downgrade_cooldown_periods(),
            max_failed_payments: default_max_failed_payments(),
            evaluation_cron: default_evaluation_cron(),
            max_concurrent_evaluations: default_max_concurrent_evaluations(),
            tiers: TierTable::default(),
        }
    }
}

fn default_warning_window_hours() -> i64 {
    48
}

fn default_downgrade_cooldown_periods() -> u32 {
    30
}

fn default_max_failed_payments() -> u32 {
    3
}

fn default_evaluation_cron() -> String {
    "0 0 3 * * *".to_string()
}

fn default_max_concurrent_evaluations() -> usize {
    8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BillingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.automaton(), AutomatonSettings::default());
        assert_eq!(config.evaluation_cron, "0 0 3 * * *");
    }

    #[test]
    fn bad_cron_is_rejected() {
        let config = BillingConfig {
            evaluation_cron: "every night".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ValidationError::InvalidCron(_))));
    }

    #[test]
    fn zero_failed_payments_is_rejected() {
        let config = BillingConfig {
            max_failed_payments: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::TooSmall { .. })
        ));
    }

    #[test]
    fn inverted_thresholds_fail_tier_validation() {
        let mut config = BillingConfig::default();
        config.tiers.tier_b.downgrade_threshold = Some(600);
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidTierTable(_))
        ));
    }
}
