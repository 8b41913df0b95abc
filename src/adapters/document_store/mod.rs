//! Document store adapters.
//!
//! - `InMemoryDocumentStore` - tests and local development
//! - `PostgresDocumentStore` - JSONB-backed production store

mod in_memory;
mod postgres;

pub use in_memory::InMemoryDocumentStore;
pub use postgres::PostgresDocumentStore;
