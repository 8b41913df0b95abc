//! Recording and no-op analytics sinks.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::analytics::AnalyticsEvent;
use crate::ports::{AnalyticsSink, SinkError};

/// Records every event it receives; can be told to fail.
#[derive(Debug, Default, Clone)]
pub struct MockAnalyticsSink {
    inner: Arc<Mutex<MockSinkState>>,
}

#[derive(Debug, Default)]
struct MockSinkState {
    sent: Vec<(String, AnalyticsEvent)>,
    failure: Option<SinkError>,
}

impl MockAnalyticsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every `send` fails with `error`.
    pub fn failing(error: SinkError) -> Self {
        let sink = Self::new();
        sink.state().failure = Some(error);
        sink
    }

    fn state(&self) -> MutexGuard<'_, MockSinkState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `(insert_id, event)` pairs in send order.
    pub fn sent(&self) -> Vec<(String, AnalyticsEvent)> {
        self.state().sent.clone()
    }

    pub fn insert_ids(&self) -> Vec<String> {
        self.state().sent.iter().map(|(id, _)| id.clone()).collect()
    }
}

#[async_trait]
impl AnalyticsSink for MockAnalyticsSink {
    async fn send(&self, insert_id: &str, event: &AnalyticsEvent) -> Result<(), SinkError> {
        let mut state = self.state();
        if let Some(error) = &state.failure {
            return Err(error.clone());
        }
        state.sent.push((insert_id.to_string(), event.clone()));
        Ok(())
    }
}

/// Sink used when analytics mirroring is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAnalyticsSink;

#[async_trait]
impl AnalyticsSink for NoopAnalyticsSink {
    async fn send(&self, _insert_id: &str, _event: &AnalyticsEvent) -> Result<(), SinkError> {
        Ok(())
    }
}
