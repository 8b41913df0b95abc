//! Membership handlers.
//!
//! ## Commands
//! - Joining a free club
//! - Starting a paid checkout
//! - Moving free members to `payment_required` when a club becomes paid

mod enforce_payment;
mod join_free;
mod start_checkout;

pub use enforce_payment::{EnforcePaymentCommand, EnforcePaymentHandler, EnforcePaymentResult};
pub use join_free::{JoinFreeCommand, JoinFreeHandler, JoinFreeOutcome};
pub use start_checkout::{StartCheckoutCommand, StartCheckoutHandler, StartCheckoutResult};
