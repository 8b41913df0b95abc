//! Application configuration module
//!
//! Type-safe configuration loaded from environment variables using the
//! `config` and `dotenvy` crates. Variables carry the `CLUB_BILLING`
//! prefix and nested values are separated by double underscores.
//!
//! # Example
//!
//! ```no_run
//! use club_billing::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod analytics;
mod billing;
mod database;
mod enforcement;
mod error;
mod logging;
mod payment;
mod server;

pub use analytics::AnalyticsConfig;
pub use billing::BillingConfig;
pub use database::{DatabaseConfig, StoreBackend};
pub use enforcement::EnforcementConfig;
pub use error::{ConfigError, ValidationError};
pub use logging::{LogFormat, LoggingConfig};
pub use payment::PaymentConfig;
pub use server::{Environment, ServerConfig};

use serde::Deserialize;

use crate::application::BillingSettings;

/// Root application configuration
///
/// Load using [`AppConfig::load()`] which reads from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment)
    #[serde(default)]
    pub server: ServerConfig,

    /// Document store backend and PostgreSQL connection
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Payment configuration (Stripe)
    pub payment: PaymentConfig,

    /// External analytics sink
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Tier table and automaton knobs
    #[serde(default)]
    pub billing: BillingConfig,

    /// Payment enforcement batch limits
    #[serde(default)]
    pub enforcement: EnforcementConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `CLUB_BILLING` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `CLUB_BILLING__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `CLUB_BILLING__BILLING__TIERS__TIER_B__UPGRADE_THRESHOLD=400`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or values
    /// cannot be parsed into the expected types.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("CLUB_BILLING")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.database.validate()?;
        self.payment.validate()?;
        self.analytics.validate()?;
        self.billing.validate()?;
        self.enforcement.validate()?;
        Ok(())
    }

    /// Immutable settings handed to every handler.
    pub fn billing_settings(&self) -> BillingSettings {
        BillingSettings {
            tiers: self.billing.tiers.clone(),
            automaton: self.billing.automaton(),
            max_failed_payments: self.billing.max_failed_payments,
            max_concurrent_evaluations: self.billing.max_concurrent_evaluations,
            enforcement: self.enforcement.settings(),
        }
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}
