//! Application handlers.
//!
//! Command handlers that orchestrate domain operations over the ports.

pub mod billing;
pub mod membership;
pub mod payments;

pub use billing::{
    ClubFailure, EvaluateAllClubBillingCommand, EvaluateAllClubBillingHandler, EvaluationSummary,
};
pub use membership::{
    EnforcePaymentCommand, EnforcePaymentHandler, EnforcePaymentResult, JoinFreeCommand,
    JoinFreeHandler, JoinFreeOutcome, StartCheckoutCommand, StartCheckoutHandler,
    StartCheckoutResult,
};
pub use payments::{
    IngestOutcome, IngestPaymentEventCommand, IngestPaymentEventHandler, IngestResult,
};
