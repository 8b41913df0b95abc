//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (value objects, IDs, errors)
//! - `membership` - Per-(user, club) membership lifecycle
//! - `billing` - Host billing tiers and the hysteresis automaton
//! - `payments` - Payment records and verified gateway events
//! - `analytics` - Monthly counters and analytics events
//! - `audit` - Membership audit log entries

pub mod analytics;
pub mod audit;
pub mod billing;
pub mod foundation;
pub mod membership;
pub mod payments;
