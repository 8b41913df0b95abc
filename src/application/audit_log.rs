//! Audit Log Writer - append-only membership status history.

use std::sync::Arc;

use uuid::Uuid;

use super::documents::{collections, to_value};
use super::BillingError;
use crate::domain::audit::AuditEntry;
use crate::ports::{DocumentPath, DocumentStore, WriteBatch};

/// Appends immutable entries to `membershipAuditLogs`.
///
/// Entries are only ever created; nothing here updates or deletes them.
pub struct AuditLogWriter {
    store: Arc<dyn DocumentStore>,
}

impl AuditLogWriter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Appends one entry under a fresh id.
    pub async fn append(&self, entry: &AuditEntry) -> Result<DocumentPath, BillingError> {
        let path = self.store.add(collections::AUDIT_LOGS, to_value(entry)?).await?;

        tracing::info!(
            club_id = %entry.club_id,
            user_id = %entry.user_id,
            old_status = ?entry.old_status,
            new_status = %entry.new_status,
            reason = entry.reason.as_str(),
            "Membership status changed"
        );
        Ok(path)
    }

    /// Appends several entries in one atomic batch.
    pub async fn append_all(&self, entries: &[AuditEntry]) -> Result<usize, BillingError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut batch = WriteBatch::new();
        for entry in entries {
            let path = DocumentPath::new(collections::AUDIT_LOGS, Uuid::new_v4().simple().to_string());
            batch = batch.expect_missing(&path).create(path, to_value(entry)?);
        }
        self.store.commit(batch).await?;

        tracing::info!(count = entries.len(), "Membership audit entries appended");
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::document_store::InMemoryDocumentStore;
    use crate::domain::audit::{AuditReason, ChangedBy};
    use crate::domain::foundation::{ClubId, Timestamp, UserId};
    use crate::domain::membership::{MembershipStatus, StatusChange};

    fn entry(user: &str) -> AuditEntry {
        AuditEntry::for_change(
            ClubId::new("club-1").unwrap(),
            UserId::new(user).unwrap(),
            StatusChange {
                from: Some(MembershipStatus::Active),
                to: MembershipStatus::PaymentRequired,
            },
            ChangedBy::Host,
            AuditReason::PaymentRequired,
            Timestamp::now(),
        )
    }

    #[tokio::test]
    async fn append_creates_document() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let writer = AuditLogWriter::new(store.clone());

        let path = writer.append(&entry("user-1")).await.unwrap();

        let docs = store.documents(collections::AUDIT_LOGS).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path, path);
        assert_eq!(docs[0].data["oldStatus"], "active");
        assert_eq!(docs[0].data["changedBy"], "host");
    }

    #[tokio::test]
    async fn append_all_writes_every_entry() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let writer = AuditLogWriter::new(store.clone());

        let written = writer
            .append_all(&[entry("user-1"), entry("user-2")])
            .await
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(store.count(collections::AUDIT_LOGS).await, 2);
    }

    #[tokio::test]
    async fn append_all_of_nothing_skips_the_store() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let writer = AuditLogWriter::new(store.clone());

        assert_eq!(writer.append_all(&[]).await.unwrap(), 0);
        assert_eq!(store.commit_count().await, 0);
    }
}
