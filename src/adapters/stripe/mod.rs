//! Stripe payment gateway adapter.
//!
//! Implements the `PaymentGateway` port for Stripe, including:
//! - Webhook signature verification and event parsing
//! - Subscription lookup, price amendment and cancellation
//! - Subscription-mode checkout sessions
//!
//! # Security
//!
//! - Webhook signatures use HMAC-SHA256 with constant-time comparison
//! - Timestamps are validated to prevent replay attacks (5-minute window)
//! - All secrets are handled via `secrecy::SecretString`

mod mock_gateway;
mod stripe_gateway;
mod wire;

pub use mock_gateway::{MethodCall, MockPaymentGateway};
pub use stripe_gateway::{StripeConfig, StripeGateway};
pub use wire::{SignatureHeader, SignatureParseError};
