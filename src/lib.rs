//! Club Billing - membership and host billing reconciliation for paid clubs
//!
//! Keeps per-user club memberships, per-club host billing tiers and
//! monthly analytics consistent with the payment gateway's view. Gateway
//! events are ingested idempotently, free members are moved to paid when a
//! club starts charging, and a periodic automaton adjusts each host's tier
//! from usage with hysteresis.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
