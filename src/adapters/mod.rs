//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the application to external systems:
//! - `document_store` - In-memory and PostgreSQL JSONB document stores
//! - `stripe` - Stripe payment gateway and its mock
//! - `analytics` - HTTP analytics sink, mock and no-op sinks
//! - `http` - Axum REST surface

pub mod analytics;
pub mod document_store;
pub mod http;
pub mod stripe;

pub use analytics::{HttpAnalyticsSink, MockAnalyticsSink, NoopAnalyticsSink};
pub use document_store::{InMemoryDocumentStore, PostgresDocumentStore};
pub use stripe::{MockPaymentGateway, StripeGateway};
