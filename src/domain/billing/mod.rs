//! Host billing domain module.
//!
//! # Module Structure
//!
//! - `tier` - BillingTier chain
//! - `tier_table` - Per-tier parameters loaded from configuration
//! - `profile` - ClubBillingProfile and the shared activation routine
//! - `automaton` - Hysteresis control loop, one period per call
//! - `event` - BillingEventRecord log entries
//! - `usage` - Usage snapshots

mod automaton;
mod event;
mod profile;
mod tier;
mod tier_table;
mod usage;

pub use automaton::{
    evaluate, AutomatonAction, AutomatonSettings, Evaluation, SkipReason, TierDirection,
};
pub use event::{BillingActor, BillingEventBuilder, BillingEventRecord, BillingEventType};
pub use profile::{ClubBillingProfile, HostBillingStatus, UsageCounters};
pub use tier::BillingTier;
pub use tier_table::{SoftLimits, TierDefinition, TierTable};
pub use usage::UsageSnapshot;
