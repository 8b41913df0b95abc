//! IngestPaymentEventHandler - Idempotent processing of verified gateway events.
//!
//! Every monetary event maps to an idempotency key (`checkout_<session>`,
//! `invoice_<id>`, `invoice_failed_<id>`). The payment record stored under
//! that key is written in the same atomic batch as the state change and
//! carries a must-not-exist precondition, so concurrent or repeated
//! deliveries commit at most once.
//!
//! Side effects run in a fixed order:
//! 1. idempotency check
//! 2. state transition
//! 3. payment or billing-event record (committed together with 2)
//! 4. analytics
//! 5. audit log
//!
//! Any failure from step 2 on is returned as an error so the gateway
//! re-delivers; the idempotency check makes the retry safe.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::application::analytics::{AnalyticsAggregator, MirrorHandle};
use crate::application::audit_log::AuditLogWriter;
use crate::application::documents::{
    collections, failure_path, fields_patch, load_club, load_failure_tracker, load_user,
    membership_of, payment_path, to_value,
};
use crate::application::host_activation::{
    HostActivation, HostActivationRequest, HostBillingChange,
};
use crate::application::membership_writes::{audit_entry, stage_transition};
use crate::application::{BillingError, BillingSettings};
use crate::domain::analytics::{AnalyticsCounter, AnalyticsEvent, AnalyticsEventType, AnalyticsMode};
use crate::domain::audit::{AuditReason, ChangedBy};
use crate::domain::billing::{
    BillingActor, BillingEventRecord, BillingEventType, BillingTier, HostBillingStatus,
};
use crate::domain::foundation::{ClubId, DomainError, ErrorCode, Money, Timestamp, UserId};
use crate::domain::membership::{
    InvoicePaidDecision, LastPaymentType, MembershipTransition, SubscriptionFailureTracker,
};
use crate::domain::payments::{
    CheckoutCompleted, IdempotencyKey, InvoiceEvent, KeyNamespace, PaymentEvent, PaymentKind,
    PaymentRecord, SubscriptionDeleted, SubscriptionMetadata, SubscriptionTarget,
};
use crate::ports::{
    AnalyticsSink, DocumentPath, DocumentStore, GatewaySubscription, PaymentErrorCode,
    PaymentGateway, Query, WriteBatch,
};

/// Command carrying a raw, unverified webhook delivery.
#[derive(Debug, Clone)]
pub struct IngestPaymentEventCommand {
    pub payload: Vec<u8>,
    pub signature: String,
}

/// What ingestion did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// State changed.
    Processed { event_id: String, kind: String },
    /// A previous delivery already applied this event.
    AlreadyProcessed { event_id: String, key: String },
    /// Acknowledged without any change.
    Ignored { event_id: String, reason: String },
}

/// Outcome plus the handles of any analytics mirror sends it started.
#[derive(Debug)]
pub struct IngestResult {
    pub outcome: IngestOutcome,
    pub mirrors: Vec<MirrorHandle>,
}

impl IngestResult {
    fn processed(event_id: &str, kind: &str) -> Self {
        Self {
            outcome: IngestOutcome::Processed {
                event_id: event_id.to_string(),
                kind: kind.to_string(),
            },
            mirrors: Vec::new(),
        }
    }

    fn already_processed(event_id: &str, key: impl ToString) -> Self {
        tracing::info!(event_id = %event_id, "Payment event already processed");
        Self {
            outcome: IngestOutcome::AlreadyProcessed {
                event_id: event_id.to_string(),
                key: key.to_string(),
            },
            mirrors: Vec::new(),
        }
    }

    fn ignored(event_id: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::info!(event_id = %event_id, reason = %reason, "Payment event ignored");
        Self {
            outcome: IngestOutcome::Ignored {
                event_id: event_id.to_string(),
                reason,
            },
            mirrors: Vec::new(),
        }
    }

    fn with_mirrors(mut self, mirrors: Vec<MirrorHandle>) -> Self {
        self.mirrors = mirrors;
        self
    }
}

/// Handler for gateway webhook deliveries.
pub struct IngestPaymentEventHandler {
    store: Arc<dyn DocumentStore>,
    gateway: Arc<dyn PaymentGateway>,
    settings: Arc<BillingSettings>,
    analytics: AnalyticsAggregator,
    audit: AuditLogWriter,
    host: HostActivation,
}

impl IngestPaymentEventHandler {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        gateway: Arc<dyn PaymentGateway>,
        sink: Arc<dyn AnalyticsSink>,
        settings: Arc<BillingSettings>,
    ) -> Self {
        Self {
            analytics: AnalyticsAggregator::new(Arc::clone(&store), sink),
            audit: AuditLogWriter::new(Arc::clone(&store)),
            host: HostActivation::new(Arc::clone(&store), Arc::clone(&settings)),
            store,
            gateway,
            settings,
        }
    }

    /// Verifies the delivery's signature, then ingests it.
    pub async fn handle(&self, cmd: IngestPaymentEventCommand) -> Result<IngestResult, BillingError> {
        let event = self
            .gateway
            .verify_event(&cmd.payload, &cmd.signature)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Payment event verification failed");
                BillingError::from(e)
            })?;
        self.ingest(event).await
    }

    /// Ingests an already verified event.
    pub async fn ingest(&self, event: PaymentEvent) -> Result<IngestResult, BillingError> {
        let event_id = event.event_id().to_string();
        let kind = event.kind().to_string();
        tracing::debug!(event_id = %event_id, kind = %kind, "Ingesting payment event");

        let result = match event {
            PaymentEvent::CheckoutCompleted(e) => self.checkout_completed(e).await,
            PaymentEvent::InvoicePaid(e) => self.invoice_paid(e).await,
            PaymentEvent::InvoicePaymentFailed(e) => self.invoice_payment_failed(e).await,
            PaymentEvent::SubscriptionDeleted(e) => self.subscription_deleted(e).await,
            PaymentEvent::Unrecognized { event_id, event_type } => Ok(IngestResult::ignored(
                &event_id,
                format!("unhandled event type {}", event_type),
            )),
        };

        if let Err(e) = &result {
            tracing::error!(
                error = %e,
                event_id = %event_id,
                kind = %kind,
                retryable = e.is_retryable(),
                "Payment event ingestion failed"
            );
        }
        result
    }

    // ════════════════════════════════════════════════════════════════════════════
    // checkout.session.completed
    // ════════════════════════════════════════════════════════════════════════════

    async fn checkout_completed(&self, e: CheckoutCompleted) -> Result<IngestResult, BillingError> {
        let key = IdempotencyKey::new(KeyNamespace::Checkout, &e.session_id);
        if self.is_recorded(&key).await? {
            return Ok(IngestResult::already_processed(&e.event_id, key));
        }

        let subscription = match &e.subscription_id {
            Some(id) => self.gateway.get_subscription(id).await?,
            None => None,
        };
        let Some(target) = target_of(&e.metadata, subscription.as_ref()) else {
            return Ok(IngestResult::ignored(&e.event_id, "checkout carries no subscription metadata"));
        };

        match target {
            SubscriptionTarget::Membership { club_id, user_id } => {
                self.membership_checkout(e, key, club_id, user_id, subscription)
                    .await
            }
            SubscriptionTarget::HostBilling {
                club_id,
                host_id,
                tier,
            } => {
                self.host_checkout(e, key, club_id, host_id, tier, subscription)
                    .await
            }
        }
    }

    async fn membership_checkout(
        &self,
        e: CheckoutCompleted,
        key: IdempotencyKey,
        club_id: ClubId,
        user_id: UserId,
        subscription: Option<GatewaySubscription>,
    ) -> Result<IngestResult, BillingError> {
        let now = Timestamp::now();
        load_club(self.store.as_ref(), &club_id).await?;
        let user = load_user(self.store.as_ref(), &user_id).await?;
        let previous = membership_of(&user, &club_id)?;

        let trial_end = subscription
            .as_ref()
            .and_then(|s| s.trial_end)
            .filter(|end| end.is_after(&e.occurred_at));

        let (transition, kind, amount) = match (trial_end, e.subscription_id.clone()) {
            (Some(ends), Some(subscription_id)) => (
                MembershipTransition::start_trial(previous.as_ref(), subscription_id, ends, now),
                PaymentKind::TrialStart,
                Money::zero(e.amount_total.currency.clone()),
            ),
            _ => {
                let (payment_type, kind) = if e.amount_total.is_positive() {
                    (LastPaymentType::Subscription, PaymentKind::Subscription)
                } else {
                    (LastPaymentType::TrialStart, PaymentKind::TrialStart)
                };
                (
                    MembershipTransition::activate_paid(
                        previous.as_ref(),
                        e.subscription_id.clone(),
                        payment_type,
                        now,
                    ),
                    kind,
                    e.amount_total.clone(),
                )
            }
        };
        let Some(transition) = allowed(transition, &e.event_id)? else {
            return Ok(IngestResult::ignored(&e.event_id, "membership cannot start a subscription from its current status"));
        };

        // 2 + 3. State change and payment record
        let record = PaymentRecord {
            user_id: Some(user_id.clone()),
            external_session_id: Some(e.session_id.clone()),
            external_subscription_id: e.subscription_id.clone(),
            ..payment(kind, &club_id, amount, now)
        };
        let batch = stage_payment(WriteBatch::new(), &key, &record)?;
        let batch = stage_transition(batch, &user, &club_id, &user_id, &transition)?;
        self.store.commit(batch).await?;

        let trialing = trial_end.is_some();
        tracing::info!(
            event_id = %e.event_id,
            club_id = %club_id,
            user_id = %user_id,
            session_id = %e.session_id,
            trialing,
            "Membership checkout completed"
        );

        // 4. Analytics
        let base = AnalyticsEvent::new(
            if trialing {
                AnalyticsEventType::TrialStarted
            } else {
                AnalyticsEventType::SubscriptionStarted
            },
            club_id.clone(),
            e.amount_total.currency.clone(),
            e.occurred_at,
            key.document_id(),
        )
        .user(user_id.clone())
        .increment(AnalyticsCounter::NewSubscribers, 1);
        let event = if trialing {
            base.increment(AnalyticsCounter::TrialStarts, 1)
        } else {
            base.increment(AnalyticsCounter::ActiveSubscribers, 1)
        };
        let mirrors = self.analytics.record_all(vec![event]).await?;

        // 5. Audit
        let reason = if trialing {
            AuditReason::TrialStarted
        } else {
            AuditReason::CheckoutCompleted
        };
        self.audit_transition(&club_id, &user_id, &transition, reason, &e.session_id, now)
            .await?;

        Ok(IngestResult::processed(&e.event_id, "membership_checkout").with_mirrors(mirrors))
    }

    async fn host_checkout(
        &self,
        e: CheckoutCompleted,
        key: IdempotencyKey,
        club_id: ClubId,
        host_id: UserId,
        tier: Option<BillingTier>,
        subscription: Option<GatewaySubscription>,
    ) -> Result<IngestResult, BillingError> {
        let now = Timestamp::now();
        let trialing = subscription
            .as_ref()
            .and_then(|s| s.trial_end)
            .map(|end| end.is_after(&e.occurred_at))
            .unwrap_or(false);
        let tier = tier
            .or_else(|| {
                subscription
                    .as_ref()
                    .and_then(|s| s.items.first())
                    .and_then(|item| self.settings.tiers.tier_for_price(&item.price_id))
            })
            .unwrap_or_default();

        let record = PaymentRecord {
            host_id: Some(host_id.clone()),
            external_session_id: Some(e.session_id.clone()),
            external_subscription_id: e.subscription_id.clone(),
            ..payment(PaymentKind::HostSubscription, &club_id, e.amount_total.clone(), now)
        };
        let batch = stage_payment(WriteBatch::new(), &key, &record)?;

        let request = HostActivationRequest {
            club_id,
            host_id,
            change: HostBillingChange::Activate {
                tier,
                status: if trialing {
                    HostBillingStatus::Trialing
                } else {
                    HostBillingStatus::Active
                },
            },
            external_customer_id: e.customer_id.clone(),
            external_subscription_id: e.subscription_id.clone(),
            event_type: if trialing {
                BillingEventType::TrialStarted
            } else {
                BillingEventType::Activated
            },
            actor: BillingActor::Gateway,
            details: json!({"eventId": e.event_id, "sessionId": e.session_id}),
        };

        match self.host.apply(request, batch, now).await? {
            Some(_) => Ok(IngestResult::processed(&e.event_id, "host_checkout")),
            None => Ok(IngestResult::ignored(&e.event_id, "host billing cannot activate from its current status")),
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // invoice.paid
    // ════════════════════════════════════════════════════════════════════════════

    async fn invoice_paid(&self, e: InvoiceEvent) -> Result<IngestResult, BillingError> {
        let key = IdempotencyKey::new(KeyNamespace::Invoice, &e.invoice_id);
        if self.is_recorded(&key).await? {
            return Ok(IngestResult::already_processed(&e.event_id, key));
        }
        if !e.billing_reason.applies_to_paid_invoice() {
            return Ok(IngestResult::ignored(&e.event_id, "billing reason does not affect membership"));
        }
        if !e.amount.is_positive() {
            return Ok(IngestResult::ignored(&e.event_id, "zero-amount invoice"));
        }
        let Some(subscription_id) = e.subscription_id.clone() else {
            return Ok(IngestResult::ignored(&e.event_id, "invoice has no subscription"));
        };
        let Some(target) = self.resolve_target(&e.metadata, &subscription_id).await? else {
            return Ok(IngestResult::ignored(&e.event_id, "subscription carries no metadata"));
        };

        match target {
            SubscriptionTarget::Membership { club_id, user_id } => {
                self.membership_invoice_paid(e, key, subscription_id, club_id, user_id)
                    .await
            }
            SubscriptionTarget::HostBilling {
                club_id, host_id, ..
            } => {
                self.host_invoice_paid(e, key, subscription_id, club_id, host_id)
                    .await
            }
        }
    }

    async fn membership_invoice_paid(
        &self,
        e: InvoiceEvent,
        key: IdempotencyKey,
        subscription_id: String,
        club_id: ClubId,
        user_id: UserId,
    ) -> Result<IngestResult, BillingError> {
        let now = Timestamp::now();
        load_club(self.store.as_ref(), &club_id).await?;
        let user = load_user(self.store.as_ref(), &user_id).await?;
        let Some(previous) = membership_of(&user, &club_id)? else {
            // Invoices can arrive before their checkout; let the gateway retry.
            tracing::warn!(
                event_id = %e.event_id,
                club_id = %club_id,
                user_id = %user_id,
                subscription_id = %subscription_id,
                "Invoice paid before membership exists"
            );
            return Err(BillingError::Conflict(format!(
                "no membership yet for subscription {}",
                subscription_id
            )));
        };
        // Deliveries are unordered: a late invoice must not revive a
        // canceled membership or bill one that moved to another subscription.
        if !previous.is_billed_by(&subscription_id) {
            tracing::warn!(
                event_id = %e.event_id,
                club_id = %club_id,
                user_id = %user_id,
                subscription_id = %subscription_id,
                status = %previous.status,
                "Invoice paid for a canceled or replaced subscription"
            );
            return Ok(IngestResult::ignored(&e.event_id, "subscription is canceled or replaced"));
        }

        let first_charge = !self.has_prior_charge(&subscription_id).await?;
        let (payment_type, charge_kind) = if first_charge {
            (LastPaymentType::SubscriptionFirstCharge, PaymentKind::SubscriptionFirstCharge)
        } else {
            (LastPaymentType::SubscriptionRenewal, PaymentKind::SubscriptionRenewal)
        };

        let decision = MembershipTransition::invoice_paid(&previous, payment_type, e.occurred_at, now);
        let Some(decision) = allowed(decision, &e.event_id)? else {
            return Ok(IngestResult::ignored(&e.event_id, "membership cannot be activated from its current status"));
        };
        // A charge inside the trial window is not a prior charge, so the
        // post-trial charge still counts as the first one.
        let (transition, kind) = match decision {
            InvoicePaidDecision::WithinTrial => (None, PaymentKind::TrialCharge),
            InvoicePaidDecision::Apply(transition) => (Some(transition), charge_kind),
        };

        // 2 + 3. State change, payment record, tracker cleanup
        let record = PaymentRecord {
            user_id: Some(user_id.clone()),
            external_invoice_id: Some(e.invoice_id.clone()),
            external_subscription_id: Some(subscription_id.clone()),
            ..payment(kind, &club_id, e.amount.clone(), now)
        };
        let mut batch = stage_payment(WriteBatch::new(), &key, &record)?
            .delete(failure_path(&subscription_id));
        if let Some(transition) = &transition {
            batch = stage_transition(batch, &user, &club_id, &user_id, transition)?;
        }
        self.store.commit(batch).await?;

        tracing::info!(
            event_id = %e.event_id,
            club_id = %club_id,
            user_id = %user_id,
            invoice_id = %e.invoice_id,
            amount = e.amount.amount,
            first_charge,
            within_trial = transition.is_none(),
            "Membership invoice paid"
        );

        // 4. Analytics
        let converted = transition.as_ref().map(|t| t.was_trialing()).unwrap_or(false);
        // Only a charge that brings the member into the counted set is a new
        // active subscriber; a paid checkout already counted its member.
        let counts_active = first_charge
            && transition.as_ref().is_some_and(|t| t.member_delta() > 0);
        let event = AnalyticsEvent::new(
            AnalyticsEventType::SubscriptionCharged,
            club_id.clone(),
            e.amount.currency.clone(),
            e.occurred_at,
            key.document_id(),
        )
        .user(user_id.clone())
        .increment(AnalyticsCounter::TotalRevenue, e.amount.amount)
        .increment(AnalyticsCounter::ActiveSubscribers, i64::from(counts_active))
        .increment(
            AnalyticsCounter::TrialConversions,
            i64::from(counts_active && converted),
        );
        let mirrors = self.analytics.record_all(vec![event]).await?;

        // 5. Audit
        if let Some(transition) = &transition {
            self.audit_transition(
                &club_id,
                &user_id,
                transition,
                AuditReason::InvoicePaid,
                &e.invoice_id,
                now,
            )
            .await?;
        }

        Ok(IngestResult::processed(&e.event_id, "membership_invoice_paid").with_mirrors(mirrors))
    }

    async fn host_invoice_paid(
        &self,
        e: InvoiceEvent,
        key: IdempotencyKey,
        subscription_id: String,
        club_id: ClubId,
        host_id: UserId,
    ) -> Result<IngestResult, BillingError> {
        let now = Timestamp::now();
        let loaded = load_club(self.store.as_ref(), &club_id).await?;

        let record = PaymentRecord {
            host_id: Some(host_id.clone()),
            external_invoice_id: Some(e.invoice_id.clone()),
            external_subscription_id: Some(subscription_id),
            ..payment(PaymentKind::HostInvoice, &club_id, e.amount.clone(), now)
        };
        let batch = stage_payment(WriteBatch::new(), &key, &record)?;

        // The first charge after a host trial ends the trial.
        let trialing = loaded
            .club
            .billing
            .as_ref()
            .filter(|p| p.status == HostBillingStatus::Trialing);
        if let Some(profile) = trialing {
            let request = HostActivationRequest {
                club_id: club_id.clone(),
                host_id,
                change: HostBillingChange::Activate {
                    tier: profile.tier,
                    status: HostBillingStatus::Active,
                },
                external_customer_id: e.customer_id.clone(),
                external_subscription_id: None,
                event_type: BillingEventType::Activated,
                actor: BillingActor::Gateway,
                details: json!({"eventId": e.event_id, "invoiceId": e.invoice_id}),
            };
            if self.host.apply(request, batch, now).await?.is_none() {
                return Ok(IngestResult::ignored(&e.event_id, "host billing cannot activate from its current status"));
            }
        } else {
            self.store.commit(batch).await?;
        }

        tracing::info!(
            event_id = %e.event_id,
            club_id = %club_id,
            invoice_id = %e.invoice_id,
            amount = e.amount.amount,
            "Host invoice paid"
        );
        Ok(IngestResult::processed(&e.event_id, "host_invoice_paid"))
    }

    // ════════════════════════════════════════════════════════════════════════════
    // invoice.payment_failed
    // ════════════════════════════════════════════════════════════════════════════

    async fn invoice_payment_failed(&self, e: InvoiceEvent) -> Result<IngestResult, BillingError> {
        let key = IdempotencyKey::new(KeyNamespace::InvoiceFailed, &e.invoice_id);
        let Some(subscription_id) = e.subscription_id.clone() else {
            return Ok(IngestResult::ignored(&e.event_id, "invoice has no subscription"));
        };

        if self.is_recorded(&key).await? {
            // A cancellation that failed on an earlier delivery is retried.
            let (_, tracker) = load_failure_tracker(self.store.as_ref(), &subscription_id).await?;
            let pending = tracker.filter(|t| {
                t.last_invoice_id == e.invoice_id
                    && t.should_cancel(self.settings.max_failed_payments)
            });
            if let Some(tracker) = pending {
                self.cancel_for_nonpayment(&subscription_id, &tracker).await?;
                return Ok(IngestResult::processed(&e.event_id, "nonpayment_cancellation"));
            }
            return Ok(IngestResult::already_processed(&e.event_id, key));
        }
        if !e.billing_reason.applies_to_failed_invoice() {
            return Ok(IngestResult::ignored(&e.event_id, "billing reason does not affect membership"));
        }
        let Some(target) = self.resolve_target(&e.metadata, &subscription_id).await? else {
            return Ok(IngestResult::ignored(&e.event_id, "subscription carries no metadata"));
        };

        match target {
            SubscriptionTarget::Membership { club_id, user_id } => {
                self.membership_invoice_failed(e, key, subscription_id, club_id, user_id)
                    .await
            }
            SubscriptionTarget::HostBilling {
                club_id, host_id, ..
            } => {
                let now = Timestamp::now();
                load_club(self.store.as_ref(), &club_id).await?;
                let record = PaymentRecord {
                    host_id: Some(host_id),
                    external_invoice_id: Some(e.invoice_id.clone()),
                    external_subscription_id: Some(subscription_id),
                    ..payment(PaymentKind::PaymentFailed, &club_id, e.amount.clone(), now)
                };
                self.store
                    .commit(stage_payment(WriteBatch::new(), &key, &record)?)
                    .await?;
                tracing::warn!(
                    event_id = %e.event_id,
                    club_id = %club_id,
                    invoice_id = %e.invoice_id,
                    "Host invoice payment failed"
                );
                Ok(IngestResult::processed(&e.event_id, "host_invoice_failed"))
            }
        }
    }

    async fn membership_invoice_failed(
        &self,
        e: InvoiceEvent,
        key: IdempotencyKey,
        subscription_id: String,
        club_id: ClubId,
        user_id: UserId,
    ) -> Result<IngestResult, BillingError> {
        let now = Timestamp::now();
        load_club(self.store.as_ref(), &club_id).await?;
        let user = load_user(self.store.as_ref(), &user_id).await?;
        let Some(previous) = membership_of(&user, &club_id)? else {
            return Ok(IngestResult::ignored(&e.event_id, "no membership for subscription"));
        };
        if !previous.is_billed_by(&subscription_id) {
            return Ok(IngestResult::ignored(&e.event_id, "subscription is canceled or replaced"));
        }

        let (tracker_doc, tracker) =
            load_failure_tracker(self.store.as_ref(), &subscription_id).await?;
        let Some(tracker) = SubscriptionFailureTracker::record_failure(
            tracker.as_ref(),
            &e.invoice_id,
            club_id.clone(),
            user_id.clone(),
            e.occurred_at,
        ) else {
            return Ok(IngestResult::already_processed(&e.event_id, key));
        };
        let transition = MembershipTransition::payment_failed(&previous, now);

        // 2 + 3. Failure counter, tracker and payment record
        let record = PaymentRecord {
            user_id: Some(user_id.clone()),
            external_invoice_id: Some(e.invoice_id.clone()),
            external_subscription_id: Some(subscription_id.clone()),
            ..payment(PaymentKind::PaymentFailed, &club_id, e.amount.clone(), now)
        };
        let tracker_path = failure_path(&subscription_id);
        let batch = stage_payment(WriteBatch::new(), &key, &record)?;
        let batch = stage_transition(batch, &user, &club_id, &user_id, &transition)?
            .expect(&tracker_path, tracker_doc.as_ref())
            .merge(tracker_path, fields_patch(&to_value(&tracker)?)?);
        self.store.commit(batch).await?;

        tracing::warn!(
            event_id = %e.event_id,
            club_id = %club_id,
            user_id = %user_id,
            invoice_id = %e.invoice_id,
            failure_count = tracker.failure_count,
            "Membership invoice payment failed"
        );

        if tracker.should_cancel(self.settings.max_failed_payments) {
            self.cancel_for_nonpayment(&subscription_id, &tracker).await?;
        }
        Ok(IngestResult::processed(&e.event_id, "membership_invoice_failed"))
    }

    /// Cancels the gateway subscription, logs the billing event and drops
    /// the tracker. The membership itself changes when the gateway reports
    /// the deletion.
    async fn cancel_for_nonpayment(
        &self,
        subscription_id: &str,
        tracker: &SubscriptionFailureTracker,
    ) -> Result<(), BillingError> {
        match self.gateway.cancel_subscription(subscription_id).await {
            Ok(()) => {}
            Err(e) if e.code == PaymentErrorCode::NotFound => {
                tracing::info!(
                    subscription_id = %subscription_id,
                    "Subscription already gone at gateway"
                );
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    subscription_id = %subscription_id,
                    club_id = %tracker.club_id,
                    user_id = %tracker.user_id,
                    "Non-payment cancellation failed"
                );
                return Err(e.into());
            }
        }

        let now = Timestamp::now();
        let event = BillingEventRecord::builder(
            tracker.club_id.clone(),
            BillingEventType::SubscriptionCanceledForNonpayment,
        )
        .actor(BillingActor::System)
        .details(json!({
            "subscriptionId": subscription_id,
            "userId": tracker.user_id,
            "failureCount": tracker.failure_count,
            "lastInvoiceId": tracker.last_invoice_id,
        }))
        .build(now);
        let batch = WriteBatch::new()
            .create(
                DocumentPath::new(collections::BILLING_EVENTS, Uuid::new_v4().simple().to_string()),
                to_value(&event)?,
            )
            .delete(failure_path(subscription_id));
        self.store.commit(batch).await?;

        tracing::warn!(
            subscription_id = %subscription_id,
            club_id = %tracker.club_id,
            user_id = %tracker.user_id,
            failure_count = tracker.failure_count,
            "Subscription canceled for non-payment"
        );
        Ok(())
    }

    // ════════════════════════════════════════════════════════════════════════════
    // customer.subscription.deleted
    // ════════════════════════════════════════════════════════════════════════════

    async fn subscription_deleted(&self, e: SubscriptionDeleted) -> Result<IngestResult, BillingError> {
        let Some(target) = self.resolve_target(&e.metadata, &e.subscription_id).await? else {
            return Ok(IngestResult::ignored(&e.event_id, "subscription carries no metadata"));
        };
        let key = IdempotencyKey::new(KeyNamespace::Subscription, &e.subscription_id);

        match target {
            SubscriptionTarget::Membership { club_id, user_id } => {
                self.membership_canceled(e, key, club_id, user_id).await
            }
            SubscriptionTarget::HostBilling {
                club_id, host_id, ..
            } => self.host_canceled(e, key, club_id, host_id).await,
        }
    }

    async fn membership_canceled(
        &self,
        e: SubscriptionDeleted,
        key: IdempotencyKey,
        club_id: ClubId,
        user_id: UserId,
    ) -> Result<IngestResult, BillingError> {
        let now = Timestamp::now();
        let loaded = load_club(self.store.as_ref(), &club_id).await?;
        let user = load_user(self.store.as_ref(), &user_id).await?;
        let Some(previous) = membership_of(&user, &club_id)? else {
            // Deletion overtook its checkout; redelivery applies it afterwards.
            tracing::warn!(
                event_id = %e.event_id,
                club_id = %club_id,
                user_id = %user_id,
                subscription_id = %e.subscription_id,
                "Subscription deleted before membership exists"
            );
            return Err(BillingError::Conflict(format!(
                "no membership yet for subscription {}",
                e.subscription_id
            )));
        };
        if previous
            .external_subscription_id
            .as_deref()
            .is_some_and(|id| id != e.subscription_id)
        {
            return Ok(IngestResult::ignored(&e.event_id, "subscription was replaced"));
        }

        let transition = match allowed(MembershipTransition::cancel(&previous, now), &e.event_id)? {
            None => {
                return Ok(IngestResult::ignored(&e.event_id, "membership cannot be canceled from its current status"))
            }
            Some(None) => return Ok(IngestResult::already_processed(&e.event_id, key)),
            Some(Some(transition)) => transition,
        };

        // 2. State change and tracker cleanup
        let batch = stage_transition(WriteBatch::new(), &user, &club_id, &user_id, &transition)?
            .delete(failure_path(&e.subscription_id));
        self.store.commit(batch).await?;

        tracing::info!(
            event_id = %e.event_id,
            club_id = %club_id,
            user_id = %user_id,
            subscription_id = %e.subscription_id,
            "Membership canceled"
        );

        // 4. Analytics, only for members who were counted as active
        let mut events = Vec::new();
        if previous.is_counted_member() {
            let currency = loaded.club.info.currency();
            let make = || {
                AnalyticsEvent::new(
                    AnalyticsEventType::SubscriptionCanceled,
                    club_id.clone(),
                    currency.clone(),
                    e.occurred_at,
                    key.document_id(),
                )
                .user(user_id.clone())
            };
            events.push(
                make()
                    .increment(AnalyticsCounter::ActiveSubscribers, 1)
                    .mode(AnalyticsMode::Subtract),
            );
            events.push(make().increment(AnalyticsCounter::Cancellations, 1));
        }
        let mirrors = self.analytics.record_all(events).await?;

        // 5. Audit
        self.audit_transition(
            &club_id,
            &user_id,
            &transition,
            AuditReason::SubscriptionCanceled,
            &e.subscription_id,
            now,
        )
        .await?;

        Ok(IngestResult::processed(&e.event_id, "membership_canceled").with_mirrors(mirrors))
    }

    async fn host_canceled(
        &self,
        e: SubscriptionDeleted,
        key: IdempotencyKey,
        club_id: ClubId,
        host_id: UserId,
    ) -> Result<IngestResult, BillingError> {
        let now = Timestamp::now();
        let loaded = load_club(self.store.as_ref(), &club_id).await?;
        let Some(profile) = loaded.club.billing.as_ref() else {
            return Ok(IngestResult::ignored(&e.event_id, "club has no billing profile"));
        };
        if profile.status == HostBillingStatus::Canceled {
            return Ok(IngestResult::already_processed(&e.event_id, key));
        }
        if profile.external_subscription_id.as_deref() != Some(e.subscription_id.as_str()) {
            return Ok(IngestResult::ignored(&e.event_id, "subscription was replaced"));
        }

        let request = HostActivationRequest {
            club_id,
            host_id,
            change: HostBillingChange::Cancel,
            external_customer_id: None,
            external_subscription_id: None,
            event_type: BillingEventType::Canceled,
            actor: BillingActor::Gateway,
            details: json!({"eventId": e.event_id, "subscriptionId": e.subscription_id}),
        };
        match self.host.apply(request, WriteBatch::new(), now).await? {
            Some(_) => Ok(IngestResult::processed(&e.event_id, "host_canceled")),
            None => Ok(IngestResult::already_processed(&e.event_id, key)),
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Helpers
    // ════════════════════════════════════════════════════════════════════════════

    async fn is_recorded(&self, key: &IdempotencyKey) -> Result<bool, BillingError> {
        Ok(self.store.get(&payment_path(key)).await?.is_some())
    }

    /// Metadata on the event, else the metadata on the gateway subscription.
    async fn resolve_target(
        &self,
        metadata: &SubscriptionMetadata,
        subscription_id: &str,
    ) -> Result<Option<SubscriptionTarget>, BillingError> {
        if let Some(target) = metadata.target() {
            return Ok(Some(target));
        }
        let subscription = self.gateway.get_subscription(subscription_id).await?;
        Ok(target_of(metadata, subscription.as_ref()))
    }

    /// True if any membership charge is already recorded for the subscription.
    async fn has_prior_charge(&self, subscription_id: &str) -> Result<bool, BillingError> {
        let kinds = [
            PaymentKind::Subscription,
            PaymentKind::SubscriptionFirstCharge,
            PaymentKind::SubscriptionRenewal,
        ];
        for kind in kinds {
            let page = self
                .store
                .query(
                    Query::collection(collections::PAYMENTS)
                        .where_eq("externalSubscriptionId", subscription_id)
                        .where_eq("kind", kind.as_str())
                        .limit(1),
                )
                .await?;
            if !page.documents.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn audit_transition(
        &self,
        club_id: &ClubId,
        user_id: &UserId,
        transition: &MembershipTransition,
        reason: AuditReason,
        detail: &str,
        now: Timestamp,
    ) -> Result<(), BillingError> {
        if let Some(entry) = audit_entry(club_id, user_id, transition, ChangedBy::System, reason, now)
        {
            self.audit.append(&entry.with_detail(detail)).await?;
        }
        Ok(())
    }
}

fn target_of(
    metadata: &SubscriptionMetadata,
    subscription: Option<&GatewaySubscription>,
) -> Option<SubscriptionTarget> {
    metadata
        .target()
        .or_else(|| subscription.and_then(|s| s.metadata.target()))
}

/// Turns a disallowed status move into `None` so the event is acknowledged.
fn allowed<T>(result: Result<T, DomainError>, event_id: &str) -> Result<Option<T>, BillingError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.code == ErrorCode::InvalidStateTransition => {
            tracing::warn!(error = %e, event_id = %event_id, "Membership transition not allowed");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn payment(kind: PaymentKind, club_id: &ClubId, money: Money, now: Timestamp) -> PaymentRecord {
    PaymentRecord {
        kind,
        club_id: club_id.clone(),
        user_id: None,
        host_id: None,
        money,
        external_session_id: None,
        external_invoice_id: None,
        external_subscription_id: None,
        created_at: now,
    }
}

/// Adds the payment record under `key`, which must not exist yet.
fn stage_payment(
    batch: WriteBatch,
    key: &IdempotencyKey,
    record: &PaymentRecord,
) -> Result<WriteBatch, BillingError> {
    let path = payment_path(key);
    Ok(batch.expect_missing(&path).create(path, to_value(record)?))
}
