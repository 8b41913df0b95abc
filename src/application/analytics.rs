//! Analytics Aggregator - monthly counters plus the external mirror.
//!
//! Counters are merged into `clubAnalytics/<clubId>_<YYYY-MM>` with atomic
//! increments, so concurrent events in the same bucket never lose updates.
//! The external sink send runs on a spawned task; its `JoinHandle` goes
//! back to the caller, which may await it or drop it.

use std::sync::Arc;

use tokio::task::JoinHandle;

use super::documents::collections;
use super::BillingError;
use crate::domain::analytics::AnalyticsEvent;
use crate::ports::{AnalyticsSink, DocumentPath, DocumentStore, Patch, SinkError};

/// Handle to one in-flight sink send.
pub type MirrorHandle = JoinHandle<Result<(), SinkError>>;

pub struct AnalyticsAggregator {
    store: Arc<dyn DocumentStore>,
    sink: Arc<dyn AnalyticsSink>,
}

impl AnalyticsAggregator {
    pub fn new(store: Arc<dyn DocumentStore>, sink: Arc<dyn AnalyticsSink>) -> Self {
        Self { store, sink }
    }

    /// Applies `event` to its monthly bucket and starts the mirror send.
    ///
    /// Returns `None` without touching anything when the event carries no
    /// non-zero increment. A bucket write failure is returned; a sink
    /// failure never is.
    pub async fn record(&self, event: AnalyticsEvent) -> Result<Option<MirrorHandle>, BillingError> {
        if event.is_empty() {
            return Ok(None);
        }

        let path = DocumentPath::new(collections::CLUB_ANALYTICS, event.bucket_id());
        let patch = event
            .signed_increments()
            .fold(Patch::new(), |patch, (counter, by)| {
                patch.increment(counter.field_name(), by)
            })
            .set("clubId", event.club_id.as_str())
            .set("month", event.occurred_at.month_key())
            .set("currency", event.currency.as_str())
            .server_timestamp("updatedAt");
        self.store.set_merge(&path, patch).await?;

        tracing::debug!(
            bucket = %path,
            event_type = %event.event_type,
            mode = event.mode.as_str(),
            "Analytics bucket updated"
        );

        Ok(Some(self.mirror(event)))
    }

    /// Records several events in order, collecting their mirror handles.
    pub async fn record_all(
        &self,
        events: Vec<AnalyticsEvent>,
    ) -> Result<Vec<MirrorHandle>, BillingError> {
        let mut handles = Vec::with_capacity(events.len());
        for event in events {
            if let Some(handle) = self.record(event).await? {
                handles.push(handle);
            }
        }
        Ok(handles)
    }

    fn mirror(&self, event: AnalyticsEvent) -> MirrorHandle {
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            let insert_id = event.insert_id();
            let result = sink.send(&insert_id, &event).await;
            if let Err(e) = &result {
                tracing::warn!(
                    error = %e,
                    insert_id = %insert_id,
                    event_type = %event.event_type,
                    club_id = %event.club_id,
                    "Analytics mirror send failed"
                );
            }
            result
        })
    }
}

/// Awaits a mirror send, folding a panicked or aborted task into `SinkError`.
pub async fn join_mirror(handle: MirrorHandle) -> Result<(), SinkError> {
    handle
        .await
        .unwrap_or_else(|e| Err(SinkError::Task(e.to_string())))
}
