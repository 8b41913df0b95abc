//! Payment records and verified gateway events.

mod event;
mod record;

pub use event::{
    BillingReason, CheckoutCompleted, InvoiceEvent, PaymentEvent, SubscriptionDeleted,
    SubscriptionMetadata, SubscriptionPurpose, SubscriptionTarget,
};
pub use record::{IdempotencyKey, KeyNamespace, PaymentKind, PaymentRecord};
