//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! - `DocumentStore` - Documents with optimistic multi-document commits
//! - `PaymentGateway` - Signed events, subscriptions and checkout sessions
//! - `AnalyticsSink` - Best-effort external event mirror

mod analytics_sink;
mod document_store;
mod payment_gateway;

pub use analytics_sink::{AnalyticsSink, SinkError};
pub use document_store::{
    Document, DocumentPath, DocumentStore, FieldPath, Page, Patch, PatchValue, Precondition,
    Query, StoreError, WriteBatch, WriteOp,
};
pub use payment_gateway::{
    CheckoutSession, CreateCheckoutRequest, GatewaySubscription, PaymentError, PaymentErrorCode,
    PaymentGateway, SubscriptionItem, SubscriptionStatus,
};
