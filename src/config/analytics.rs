//! External analytics sink configuration

use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::adapters::analytics::HttpSinkConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    /// Mirror events to the external sink
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl AnalyticsConfig {
    /// Sink configuration, or `None` when mirroring is disabled.
    pub fn sink_config(&self) -> Option<HttpSinkConfig> {
        self.enabled.then(|| HttpSinkConfig {
            endpoint: self.endpoint.clone(),
            api_key: SecretString::new(self.api_key.clone()),
            timeout: Duration::from_millis(self.timeout_ms),
        })
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.enabled {
            return Ok(());
        }
        if !self.endpoint.starts_with("https://") && !self.endpoint.starts_with("http://") {
            return Err(ValidationError::InvalidAnalyticsEndpoint);
        }
        if self.api_key.is_empty() {
            return Err(ValidationError::MissingRequired("ANALYTICS_API_KEY"));
        }
        if self.timeout_ms == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        Ok(())
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            api_key: String::new(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    2_000
}
