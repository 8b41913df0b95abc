//! Application layer - Commands and Handlers.
//!
//! This layer orchestrates domain operations and coordinates between ports.
//! Shared write routines (membership writes, host activation, analytics,
//! audit) live beside the handlers that compose them.

pub mod analytics;
pub mod audit_log;
pub mod documents;
mod errors;
pub mod handlers;
pub mod host_activation;
pub mod membership_writes;
mod settings;

pub use errors::BillingError;
pub use settings::{BillingSettings, EnforcementSettings};

pub use handlers::{
    // Membership
    EnforcePaymentCommand, EnforcePaymentHandler, EnforcePaymentResult,
    JoinFreeCommand, JoinFreeHandler, JoinFreeOutcome,
    StartCheckoutCommand, StartCheckoutHandler, StartCheckoutResult,
    // Payments
    IngestOutcome, IngestPaymentEventCommand, IngestPaymentEventHandler, IngestResult,
    // Billing
    ClubFailure, EvaluateAllClubBillingCommand, EvaluateAllClubBillingHandler, EvaluationSummary,
};
