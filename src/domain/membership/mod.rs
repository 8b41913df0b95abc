//! Membership domain module.
//!
//! Handles the per-(user, club) subscription lifecycle.
//!
//! # Module Structure
//!
//! - `status` - MembershipStatus state machine
//! - `payment_type` - LastPaymentType markers
//! - `record` - MembershipRecord and its transition functions
//! - `failure_tracker` - Failed invoice counting per subscription

mod failure_tracker;
mod payment_type;
mod record;
mod status;

pub use failure_tracker::SubscriptionFailureTracker;
pub use payment_type::LastPaymentType;
pub use record::{
    InvoicePaidDecision, JoinFreeDecision, MembershipRecord, MembershipTransition, StatusChange,
};
pub use status::MembershipStatus;
