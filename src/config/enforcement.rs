//! Payment enforcement batch limits

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::application::EnforcementSettings;

/// One batch commits at most 500 writes; each member costs two.
const MAX_PAGE_SIZE: usize = 249;

#[derive(Debug, Clone, Deserialize)]
pub struct EnforcementConfig {
    /// Members committed per batch
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Wall-clock budget for one invocation
    #[serde(default = "default_time_budget")]
    pub time_budget_secs: u64,

    /// Margin kept free at the end of the budget
    #[serde(default = "default_safety_buffer")]
    pub safety_buffer_secs: u64,
}

impl EnforcementConfig {
    pub fn settings(&self) -> EnforcementSettings {
        EnforcementSettings {
            page_size: self.page_size,
            time_budget: Duration::from_secs(self.time_budget_secs),
            safety_buffer: Duration::from_secs(self.safety_buffer_secs),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(ValidationError::OutOfRange {
                field: "enforcement.page_size",
                min: 1,
                max: MAX_PAGE_SIZE as u64,
            });
        }
        if self.safety_buffer_secs >= self.time_budget_secs {
            return Err(ValidationError::InvalidTimeBudget);
        }
        Ok(())
    }
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            time_budget_secs: default_time_budget(),
            safety_buffer_secs: default_safety_buffer(),
        }
    }
}

fn default_page_size() -> usize {
    200
}

fn default_time_budget() -> u64 {
    50
}

fn default_safety_buffer() -> u64 {
    5
}
