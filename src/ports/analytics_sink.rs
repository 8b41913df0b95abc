//! External analytics sink port.
//!
//! Fire-and-forget event ingestion keyed by an insert id that is safe to
//! re-send. The aggregator never lets a sink failure reach its caller.

use crate::domain::analytics::AnalyticsEvent;
use async_trait::async_trait;
use thiserror::Error;

/// Errors from the analytics sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("analytics sink unreachable: {0}")]
    Transport(String),

    #[error("analytics sink rejected event: status {status}")]
    Rejected { status: u16 },

    #[error("analytics mirror task failed: {0}")]
    Task(String),
}

/// Port for the external analytics sink.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    /// Sends one event under `insert_id`.
    async fn send(&self, insert_id: &str, event: &AnalyticsEvent) -> Result<(), SinkError>;
}
