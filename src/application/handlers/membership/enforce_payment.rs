//! EnforcePaymentHandler - Moves a club's free members to `payment_required`.
//!
//! Runs when a club's price goes from free to paid. Work is split into
//! pages of free members; each page commits in one atomic batch. The job
//! watches a wall-clock budget and stops between pages with
//! `partial = true` rather than running past it. Processed members no
//! longer match the free-member filter, so a re-invocation picks up
//! where the last one stopped.

use std::sync::Arc;

use tokio::time::Instant;

use crate::application::audit_log::AuditLogWriter;
use crate::application::documents::{
    club_path, collections, load_club, membership_field, user_path,
};
use crate::application::membership_writes::{audit_entry, record_patch, CounterChanges};
use crate::application::{BillingError, BillingSettings};
use crate::domain::audit::{AuditReason, ChangedBy};
use crate::domain::foundation::{ClubId, Timestamp, UserId};
use crate::domain::membership::{LastPaymentType, MembershipRecord, MembershipTransition};
use crate::ports::{Document, DocumentStore, Patch, Query, WriteBatch};

/// Command to enforce payment for a club's free members.
#[derive(Debug, Clone)]
pub struct EnforcePaymentCommand {
    pub club_id: ClubId,
    /// Caller; must be the club's host.
    pub host_id: UserId,
}

/// Result of one enforcement invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnforcePaymentResult {
    pub updated_members: usize,
    pub batches_processed: usize,
    /// True when the time budget ran out before every page was processed.
    pub partial: bool,
}

pub struct EnforcePaymentHandler {
    store: Arc<dyn DocumentStore>,
    settings: Arc<BillingSettings>,
    audit: AuditLogWriter,
}

impl EnforcePaymentHandler {
    pub fn new(store: Arc<dyn DocumentStore>, settings: Arc<BillingSettings>) -> Self {
        Self {
            audit: AuditLogWriter::new(Arc::clone(&store)),
            store,
            settings,
        }
    }

    pub async fn handle(
        &self,
        cmd: EnforcePaymentCommand,
    ) -> Result<EnforcePaymentResult, BillingError> {
        let started = Instant::now();
        let deadline = self.settings.enforcement.deadline();

        // 1. Authorize and check the price
        let loaded = load_club(self.store.as_ref(), &cmd.club_id).await?;
        if !loaded.club.is_host(&cmd.host_id) {
            return Err(BillingError::forbidden(format!(
                "user {} is not the host of club {}",
                cmd.host_id, cmd.club_id
            )));
        }
        if loaded.club.info.is_free() {
            return Err(BillingError::validation(
                "price",
                "club price must be above 0 before enforcing payment",
            ));
        }

        // 2. Page through free members
        let filter = membership_field(&cmd.club_id).child("lastPaymentType");
        let mut result = EnforcePaymentResult {
            updated_members: 0,
            batches_processed: 0,
            partial: false,
        };
        let mut cursor = None;

        loop {
            let page = self
                .store
                .query(
                    Query::collection(collections::USERS)
                        .where_eq(filter.clone(), LastPaymentType::Free.as_str())
                        .start_after(cursor.take())
                        .limit(self.settings.enforcement.page_size),
                )
                .await?;

            if !page.documents.is_empty() {
                result.updated_members += self.process_page(&cmd, &page.documents).await?;
                result.batches_processed += 1;
            }

            match page.next_cursor {
                None => break,
                Some(next) => cursor = Some(next),
            }

            if started.elapsed() >= deadline {
                result.partial = true;
                tracing::warn!(
                    club_id = %cmd.club_id,
                    updated_members = result.updated_members,
                    batches_processed = result.batches_processed,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Payment enforcement stopped at time budget"
                );
                return Ok(result);
            }
        }

        // 3. Lock pricing once every free member is handled
        if !loaded.club.info.pricing_locked {
            self.store
                .set_merge(
                    &club_path(&cmd.club_id),
                    Patch::new().set("info.pricingLocked", true),
                )
                .await?;
        }

        tracing::info!(
            club_id = %cmd.club_id,
            updated_members = result.updated_members,
            batches_processed = result.batches_processed,
            "Payment enforcement completed"
        );
        Ok(result)
    }

    async fn process_page(
        &self,
        cmd: &EnforcePaymentCommand,
        documents: &[Document],
    ) -> Result<usize, BillingError> {
        let now = Timestamp::now();
        let field = membership_field(&cmd.club_id);

        let mut batch = WriteBatch::new();
        let mut counters = CounterChanges::default();
        let mut audit = Vec::new();
        let mut updated = 0;

        for doc in documents {
            let Some(record) = doc.decode_field::<MembershipRecord>(&field)? else {
                continue;
            };
            let Some(transition) = MembershipTransition::require_payment(&record, now)? else {
                continue;
            };
            let user_id = UserId::new(doc.id())?;
            let path = user_path(&user_id);

            batch = batch
                .expect(&path, Some(doc))
                .merge(path, record_patch(&cmd.club_id, &transition)?);
            counters.add(&user_id, &transition);
            audit.extend(
                audit_entry(
                    &cmd.club_id,
                    &user_id,
                    &transition,
                    ChangedBy::Host,
                    AuditReason::PaymentRequired,
                    now,
                )
                .map(|entry| entry.with_detail("club moved from free to paid")),
            );
            updated += 1;
        }

        if batch.is_empty() {
            return Ok(0);
        }
        let batch = counters.stage(batch, &cmd.club_id);

        // Field paths are checked before anything is sent to the store.
        batch.validate()?;
        self.store.commit(batch).await?;
        self.audit.append_all(&audit).await?;

        tracing::info!(
            club_id = %cmd.club_id,
            members = updated,
            "Free members moved to payment_required"
        );
        Ok(updated)
    }
}
