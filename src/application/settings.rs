//! Immutable billing settings shared by every handler.
//!
//! Built once at startup from `AppConfig`, wrapped in `Arc` and passed
//! into handler constructors.

use std::time::Duration;

use crate::domain::billing::{AutomatonSettings, TierTable};

/// Batch limits for the payment enforcement job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnforcementSettings {
    pub page_size: usize,
    pub time_budget: Duration,
    pub safety_buffer: Duration,
}

impl EnforcementSettings {
    /// Elapsed time after which no further page is started.
    pub fn deadline(&self) -> Duration {
        self.time_budget.saturating_sub(self.safety_buffer)
    }
}

impl Default for EnforcementSettings {
    fn default() -> Self {
        Self {
            page_size: 200,
            time_budget: Duration::from_secs(50),
            safety_buffer: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BillingSettings {
    pub tiers: TierTable,
    pub automaton: AutomatonSettings,
    /// Failed renewals before the subscription is canceled.
    pub max_failed_payments: u32,
    pub max_concurrent_evaluations: usize,
    pub enforcement: EnforcementSettings,
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self {
            tiers: TierTable::default(),
            automaton: AutomatonSettings::default(),
            max_failed_payments: 3,
            max_concurrent_evaluations: 8,
            enforcement: EnforcementSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_subtracts_buffer() {
        assert_eq!(
            EnforcementSettings::default().deadline(),
            Duration::from_secs(45)
        );
    }

    #[test]
    fn deadline_saturates_at_zero() {
        let settings = EnforcementSettings {
            page_size: 10,
            time_budget: Duration::from_secs(1),
            safety_buffer: Duration::from_secs(5),
        };
        assert_eq!(settings.deadline(), Duration::ZERO);
    }
}
