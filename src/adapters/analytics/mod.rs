//! Analytics sink adapters.
//!
//! - `HttpAnalyticsSink` - JSON ingestion endpoint
//! - `MockAnalyticsSink` - records events for tests
//! - `NoopAnalyticsSink` - analytics disabled

mod http_sink;
mod mock_sink;

pub use http_sink::{HttpAnalyticsSink, HttpSinkConfig};
pub use mock_sink::{MockAnalyticsSink, NoopAnalyticsSink};
