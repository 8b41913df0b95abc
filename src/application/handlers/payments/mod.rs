//! Payment gateway event handlers.

mod ingest_payment_event;

pub use ingest_payment_event::{
    IngestOutcome, IngestPaymentEventCommand, IngestPaymentEventHandler, IngestResult,
};
