//! EvaluateAllClubBillingHandler - One automaton period over every club.
//!
//! Clubs are read page by page and evaluated concurrently, bounded by
//! `max_concurrent_evaluations`. Each club is independent: a failure is
//! logged, reported in the summary and does not stop the pass.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::json;
use uuid::Uuid;

use crate::application::documents::{
    club_path, collections, fields_patch, to_value, ClubDocument,
};
use crate::application::host_activation::{
    HostActivation, HostActivationRequest, HostBillingChange,
};
use crate::application::{BillingError, BillingSettings};
use crate::domain::billing::{
    evaluate, AutomatonAction, BillingActor, BillingEventRecord, BillingEventType,
    ClubBillingProfile, TierDirection, UsageSnapshot,
};
use crate::domain::foundation::{ClubId, Timestamp};
use crate::ports::{Document, DocumentPath, DocumentStore, Patch, PaymentGateway, Query, WriteBatch};

const CLUB_PAGE_SIZE: usize = 100;

/// Command for one evaluation pass.
#[derive(Debug, Clone, Copy)]
pub struct EvaluateAllClubBillingCommand {
    /// Period time. Schedules are compared against it.
    pub now: Timestamp,
}

impl EvaluateAllClubBillingCommand {
    pub fn now() -> Self {
        Self {
            now: Timestamp::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClubFailure {
    pub club_id: String,
    pub message: String,
}

/// Totals for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationSummary {
    pub clubs_evaluated: usize,
    pub upgrades_scheduled: usize,
    pub downgrades_scheduled: usize,
    pub schedules_cleared: usize,
    pub upgrades_executed: usize,
    pub downgrades_executed: usize,
    pub skipped: usize,
    pub failures: Vec<ClubFailure>,
}

impl EvaluationSummary {
    fn record(&mut self, report: ClubReport) {
        self.clubs_evaluated += 1;
        for action in &report.actions {
            match action {
                AutomatonAction::UpgradeScheduled { .. } => self.upgrades_scheduled += 1,
                AutomatonAction::DowngradeScheduled { .. } => self.downgrades_scheduled += 1,
                AutomatonAction::UpgradeScheduleCleared
                | AutomatonAction::DowngradeEligibilityWithdrawn => self.schedules_cleared += 1,
                AutomatonAction::ExecutionSkipped { .. } => self.skipped += 1,
                AutomatonAction::Execute { .. } => {}
            }
        }
        match report.executed {
            Some(TierDirection::Upgrade) => self.upgrades_executed += 1,
            Some(TierDirection::Downgrade) => self.downgrades_executed += 1,
            None => {}
        }
        if let Some(message) = report.failure {
            self.failures.push(ClubFailure {
                club_id: report.club_id,
                message,
            });
        }
    }

    fn fail(&mut self, club_id: String, error: &BillingError) {
        self.clubs_evaluated += 1;
        self.failures.push(ClubFailure {
            club_id,
            message: error.to_string(),
        });
    }
}

/// What happened to one club.
#[derive(Debug)]
struct ClubReport {
    club_id: String,
    actions: Vec<AutomatonAction>,
    executed: Option<TierDirection>,
    /// Set when a due tier change could not be carried out.
    failure: Option<String>,
}

pub struct EvaluateAllClubBillingHandler {
    store: Arc<dyn DocumentStore>,
    gateway: Arc<dyn PaymentGateway>,
    settings: Arc<BillingSettings>,
    host: HostActivation,
}

impl EvaluateAllClubBillingHandler {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        gateway: Arc<dyn PaymentGateway>,
        settings: Arc<BillingSettings>,
    ) -> Self {
        Self {
            host: HostActivation::new(Arc::clone(&store), Arc::clone(&settings)),
            store,
            gateway,
            settings,
        }
    }

    pub async fn handle(
        &self,
        cmd: EvaluateAllClubBillingCommand,
    ) -> Result<EvaluationSummary, BillingError> {
        let mut summary = EvaluationSummary::default();
        let mut cursor = None;
        let concurrency = self.settings.max_concurrent_evaluations.max(1);
        let now = cmd.now;

        loop {
            let page = self
                .store
                .query(
                    Query::collection(collections::CLUBS)
                        .start_after(cursor.take())
                        .limit(CLUB_PAGE_SIZE),
                )
                .await?;

            let results: Vec<(String, Result<ClubReport, BillingError>)> =
                stream::iter(page.documents)
                    .map(|doc| async move {
                        let id = doc.id().to_string();
                        (id, self.evaluate_club(doc, now).await)
                    })
                    .buffer_unordered(concurrency)
                    .collect()
                    .await;

            for (club_id, result) in results {
                match result {
                    Ok(report) => summary.record(report),
                    Err(e) => {
                        tracing::error!(error = %e, club_id = %club_id, "Club billing evaluation failed");
                        summary.fail(club_id, &e);
                    }
                }
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::info!(
            clubs = summary.clubs_evaluated,
            upgrades_scheduled = summary.upgrades_scheduled,
            downgrades_scheduled = summary.downgrades_scheduled,
            upgrades_executed = summary.upgrades_executed,
            downgrades_executed = summary.downgrades_executed,
            failures = summary.failures.len(),
            "Club billing evaluation finished"
        );
        Ok(summary)
    }

    async fn evaluate_club(&self, doc: Document, now: Timestamp) -> Result<ClubReport, BillingError> {
        let club_id = ClubId::new(doc.id())?;
        let club: ClubDocument = doc.decode()?;
        let table = &self.settings.tiers;

        // 1. Run the automaton
        let current = club
            .billing
            .clone()
            .unwrap_or_else(|| ClubBillingProfile::unsubscribed(table, now));
        let evaluation = evaluate(
            &current,
            club.paying_members(),
            table,
            &self.settings.automaton,
            now,
        );

        // 2. Persist the profile and any schedule events
        let path = club_path(&club_id);
        let mut batch = WriteBatch::new()
            .expect(&path, Some(&doc))
            .merge(path, Patch::new().set("billing", to_value(&evaluation.profile)?));
        for action in &evaluation.actions {
            log_action(&club_id, action);
            if let Some(event) = schedule_event(&club_id, action, now) {
                batch = batch.create(
                    DocumentPath::new(
                        collections::BILLING_EVENTS,
                        Uuid::new_v4().simple().to_string(),
                    ),
                    to_value(&event)?,
                );
            }
        }
        self.store.commit(batch).await?;

        // 3. Usage snapshots
        let snapshot = to_value(&UsageSnapshot::from_usage(
            &evaluation.profile.usage,
            evaluation.profile.tier,
            now,
        ))?;
        self.store
            .set_merge(
                &DocumentPath::new(
                    collections::USAGE_DAILY,
                    UsageSnapshot::daily_id(&club_id, &now),
                ),
                fields_patch(&snapshot)?,
            )
            .await?;
        self.store
            .set_merge(
                &DocumentPath::new(
                    collections::USAGE_MONTHLY,
                    UsageSnapshot::monthly_id(&club_id, &now),
                ),
                fields_patch(&snapshot)?,
            )
            .await?;

        let mut report = ClubReport {
            club_id: club_id.to_string(),
            actions: evaluation.actions.clone(),
            executed: None,
            failure: None,
        };

        // 4. Carry out a due tier change
        let Some((direction, from, to)) = evaluation.execution() else {
            return Ok(report);
        };
        let Some(subscription_id) = evaluation.profile.external_subscription_id.clone() else {
            return Ok(report);
        };
        let price_id = &table.get(to).price_id;

        if let Err(e) = self
            .gateway
            .update_subscription_price(&subscription_id, price_id)
            .await
        {
            // The schedule stays on the profile; the next pass retries.
            tracing::error!(
                error = %e,
                club_id = %club_id,
                subscription_id = %subscription_id,
                from_tier = %from,
                to_tier = %to,
                "Tier change amendment failed"
            );
            report.failure = Some(e.to_string());
            return Ok(report);
        }

        let request = HostActivationRequest {
            club_id: club_id.clone(),
            host_id: club.host_id.clone(),
            change: HostBillingChange::Activate {
                tier: to,
                status: evaluation.profile.status,
            },
            external_customer_id: None,
            external_subscription_id: None,
            event_type: match direction {
                TierDirection::Upgrade => BillingEventType::UpgradeExecuted,
                TierDirection::Downgrade => BillingEventType::DowngradeExecuted,
            },
            actor: BillingActor::System,
            details: json!({
                "subscriptionId": subscription_id,
                "priceId": price_id,
                "payingMembers": evaluation.profile.usage.paying_members,
            }),
        };
        match self.host.apply(request, WriteBatch::new(), now).await? {
            Some(_) => report.executed = Some(direction),
            None => report.failure = Some("billing status does not allow a tier change".into()),
        }
        Ok(report)
    }
}

fn schedule_event(
    club_id: &ClubId,
    action: &AutomatonAction,
    now: Timestamp,
) -> Option<BillingEventRecord> {
    match *action {
        AutomatonAction::UpgradeScheduled {
            from,
            to,
            scheduled_for,
        } => Some(
            BillingEventRecord::builder(club_id.clone(), BillingEventType::UpgradeScheduled)
                .tiers(Some(from), Some(to))
                .scheduled_for(scheduled_for)
                .actor(BillingActor::System)
                .build(now),
        ),
        AutomatonAction::DowngradeScheduled {
            from,
            to,
            eligible_after,
        } => Some(
            BillingEventRecord::builder(club_id.clone(), BillingEventType::DowngradeScheduled)
                .tiers(Some(from), Some(to))
                .scheduled_for(eligible_after)
                .actor(BillingActor::System)
                .build(now),
        ),
        _ => None,
    }
}

fn log_action(club_id: &ClubId, action: &AutomatonAction) {
    match action {
        AutomatonAction::UpgradeScheduled {
            from,
            to,
            scheduled_for,
        } => tracing::info!(
            club_id = %club_id,
            from_tier = %from,
            to_tier = %to,
            scheduled_for = %scheduled_for.as_datetime(),
            "Tier upgrade scheduled"
        ),
        AutomatonAction::DowngradeScheduled { from, to, .. } => tracing::info!(
            club_id = %club_id,
            from_tier = %from,
            to_tier = %to,
            "Club eligible for tier downgrade"
        ),
        AutomatonAction::UpgradeScheduleCleared => {
            tracing::info!(club_id = %club_id, "Tier upgrade schedule cleared")
        }
        AutomatonAction::DowngradeEligibilityWithdrawn => {
            tracing::info!(club_id = %club_id, "Tier downgrade eligibility withdrawn")
        }
        AutomatonAction::Execute { from, to, .. } => tracing::info!(
            club_id = %club_id,
            from_tier = %from,
            to_tier = %to,
            "Tier change due"
        ),
        AutomatonAction::ExecutionSkipped { direction, reason } => tracing::warn!(
            club_id = %club_id,
            direction = ?direction,
            reason = ?reason,
            "Due tier change skipped"
        ),
    }
}
