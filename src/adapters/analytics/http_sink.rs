//! HTTP analytics sink.
//!
//! Posts each event as JSON to an ingestion endpoint. The insert id goes
//! in the body so the receiving service can drop re-sent events.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::analytics::AnalyticsEvent;
use crate::ports::{AnalyticsSink, SinkError};

/// Connection settings for the HTTP sink.
#[derive(Clone)]
pub struct HttpSinkConfig {
    pub endpoint: String,
    pub api_key: SecretString,
    pub timeout: Duration,
}

/// Analytics sink backed by a JSON ingestion endpoint.
pub struct HttpAnalyticsSink {
    config: HttpSinkConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SinkPayload<'a> {
    insert_id: &'a str,
    event: &'a str,
    club_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
    properties: BTreeMap<&'static str, i64>,
    currency: &'a str,
    mode: &'static str,
    /// Unix seconds of the originating event.
    time: i64,
}

impl<'a> SinkPayload<'a> {
    fn new(insert_id: &'a str, event: &'a AnalyticsEvent) -> Self {
        Self {
            insert_id,
            event: event.event_type.as_str(),
            club_id: event.club_id.as_str(),
            user_id: event.user_id.as_ref().map(|u| u.as_str()),
            properties: event
                .signed_increments()
                .map(|(counter, amount)| (counter.field_name(), amount))
                .collect(),
            currency: event.currency.as_str(),
            mode: event.mode.as_str(),
            time: event.occurred_at.as_unix_secs(),
        }
    }
}

impl HttpAnalyticsSink {
    pub fn new(config: HttpSinkConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AnalyticsSink for HttpAnalyticsSink {
    async fn send(&self, insert_id: &str, event: &AnalyticsEvent) -> Result<(), SinkError> {
        let payload = SinkPayload::new(insert_id, event);

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(self.config.api_key.expose_secret())
            .timeout(self.config.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Rejected {
                status: status.as_u16(),
            });
        }

        tracing::debug!(
            insert_id = %insert_id,
            event_type = %event.event_type,
            club_id = %event.club_id,
            "Analytics event mirrored"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::analytics::{
        AnalyticsCounter, AnalyticsEvent, AnalyticsEventType, AnalyticsMode,
    };
    use crate::domain::foundation::{ClubId, Currency, Timestamp, UserId};

    #[test]
    fn payload_carries_signed_properties() {
        let event = AnalyticsEvent::new(
            AnalyticsEventType::SubscriptionCanceled,
            ClubId::new("club-1").unwrap(),
            Currency::default(),
            Timestamp::from_unix_secs(1_709_596_800).unwrap(),
            "subscription_sub_1",
        )
        .user(UserId::new("user-1").unwrap())
        .increment(AnalyticsCounter::ActiveSubscribers, 1)
        .mode(AnalyticsMode::Subtract);

        let insert_id = event.insert_id();
        let value = serde_json::to_value(SinkPayload::new(&insert_id, &event)).unwrap();

        assert_eq!(value["insertId"], insert_id.as_str());
        assert_eq!(value["event"], "subscription_canceled");
        assert_eq!(value["userId"], "user-1");
        assert_eq!(value["properties"]["activeSubscribers"], -1);
        assert_eq!(value["mode"], "subtract");
        assert_eq!(value["time"], 1_709_596_800);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let sink = HttpAnalyticsSink::new(HttpSinkConfig {
            endpoint: "http://127.0.0.1:9/ingest".to_string(),
            api_key: SecretString::new("key".to_string()),
            timeout: Duration::from_millis(200),
        });
        let event = AnalyticsEvent::new(
            AnalyticsEventType::TrialStarted,
            ClubId::new("club-1").unwrap(),
            Currency::default(),
            Timestamp::now(),
            "checkout_cs_1",
        );

        let err = sink.send("id", &event).await.unwrap_err();
        assert!(matches!(err, SinkError::Transport(_)));
    }
}
