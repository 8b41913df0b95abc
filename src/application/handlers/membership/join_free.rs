//! JoinFreeHandler - Command handler for joining a free club.

use std::sync::Arc;

use crate::application::audit_log::AuditLogWriter;
use crate::application::documents::{load_club, load_user, membership_of};
use crate::application::membership_writes::{audit_entry, stage_transition};
use crate::application::BillingError;
use crate::domain::audit::{AuditReason, ChangedBy};
use crate::domain::foundation::{ClubId, Timestamp, UserId};
use crate::domain::membership::{JoinFreeDecision, MembershipStatus, MembershipTransition};
use crate::ports::{DocumentStore, WriteBatch};

/// Command to join a club whose price is 0.
#[derive(Debug, Clone)]
pub struct JoinFreeCommand {
    pub club_id: ClubId,
    pub user_id: UserId,
}

/// Result of a free join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinFreeOutcome {
    pub status: MembershipStatus,
    /// True when the user already had access and nothing was written.
    pub already_member: bool,
}

/// Handler for free joins.
pub struct JoinFreeHandler {
    store: Arc<dyn DocumentStore>,
    audit: AuditLogWriter,
}

impl JoinFreeHandler {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            audit: AuditLogWriter::new(Arc::clone(&store)),
            store,
        }
    }

    pub async fn handle(&self, cmd: JoinFreeCommand) -> Result<JoinFreeOutcome, BillingError> {
        let now = Timestamp::now();

        // 1. Club must exist and be free
        let loaded = load_club(self.store.as_ref(), &cmd.club_id).await?;
        if !loaded.club.info.is_free() {
            return Err(BillingError::validation(
                "club_id",
                "club requires a paid membership",
            ));
        }

        // 2. Read the user and their current record
        let user = load_user(self.store.as_ref(), &cmd.user_id).await?;
        let previous = membership_of(&user, &cmd.club_id)?;

        // 3. Decide
        let transition = match MembershipTransition::join_free(previous.as_ref(), now)? {
            JoinFreeDecision::AlreadyMember(status) => {
                tracing::debug!(
                    club_id = %cmd.club_id,
                    user_id = %cmd.user_id,
                    status = %status,
                    "Free join skipped: already a member"
                );
                return Ok(JoinFreeOutcome {
                    status,
                    already_member: true,
                });
            }
            JoinFreeDecision::Join(transition) => transition,
        };

        // 4. Commit record and counters together
        let batch = stage_transition(
            WriteBatch::new(),
            &user,
            &cmd.club_id,
            &cmd.user_id,
            &transition,
        )?;
        self.store.commit(batch).await?;

        tracing::info!(
            club_id = %cmd.club_id,
            user_id = %cmd.user_id,
            "Member joined free club"
        );

        // 5. Audit
        if let Some(entry) = audit_entry(
            &cmd.club_id,
            &cmd.user_id,
            &transition,
            ChangedBy::System,
            AuditReason::FreeJoin,
            now,
        ) {
            self.audit.append(&entry).await?;
        }

        Ok(JoinFreeOutcome {
            status: transition.next.status,
            already_member: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::document_store::InMemoryDocumentStore;
    use crate::application::documents::collections;
    use crate::ports::{DocumentPath, StoreError};
    use serde_json::json;

    async fn setup(price: i64) -> (Arc<InMemoryDocumentStore>, JoinFreeHandler) {
        let store = Arc::new(InMemoryDocumentStore::new());
        store
            .insert(
                DocumentPath::new(collections::CLUBS, "club-1"),
                json!({"hostId": "host-1", "info": {"price": price}, "members": [], "membersCount": 0}),
            )
            .await;
        store
            .insert(DocumentPath::new(collections::USERS, "user-a"), json!({"name": "A"}))
            .await;
        let handler = JoinFreeHandler::new(store.clone());
        (store, handler)
    }

    fn cmd() -> JoinFreeCommand {
        JoinFreeCommand {
            club_id: ClubId::new("club-1").unwrap(),
            user_id: UserId::new("user-a").unwrap(),
        }
    }

    async fn club(store: &InMemoryDocumentStore) -> serde_json::Value {
        store
            .get(&DocumentPath::new(collections::CLUBS, "club-1"))
            .await
            .unwrap()
            .unwrap()
            .data
    }

    #[tokio::test]
    async fn join_free_activates_and_counts_member() {
        let (store, handler) = setup(0).await;

        let outcome = handler.handle(cmd()).await.unwrap();

        assert_eq!(
            outcome,
            JoinFreeOutcome {
                status: MembershipStatus::Active,
                already_member: false
            }
        );
        let club = club(&store).await;
        assert_eq!(club["membersCount"], 1);
        assert_eq!(club["members"], json!(["user-a"]));

        let user = store
            .get(&DocumentPath::new(collections::USERS, "user-a"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.data["memberships"]["club-1"]["lastPaymentType"], "free");
        assert_eq!(user.data["joinedClubs"], json!(["club-1"]));

        let audit = store.documents(collections::AUDIT_LOGS).await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].data["reason"], "free_join");
        assert!(audit[0].data["oldStatus"].is_null());
    }

    #[tokio::test]
    async fn second_join_is_reported_not_repeated() {
        let (store, handler) = setup(0).await;
        handler.handle(cmd()).await.unwrap();

        let outcome = handler.handle(cmd()).await.unwrap();

        assert!(outcome.already_member);
        assert_eq!(club(&store).await["membersCount"], 1);
        assert_eq!(store.count(collections::AUDIT_LOGS).await, 1);
    }

    #[tokio::test]
    async fn paid_club_is_rejected_before_any_write() {
        let (store, handler) = setup(500).await;

        let result = handler.handle(cmd()).await;

        assert!(matches!(result, Err(BillingError::Validation { .. })));
        assert_eq!(store.commit_count().await, 0);
    }

    #[tokio::test]
    async fn missing_user_is_not_found() {
        let (_store, handler) = setup(0).await;
        let mut command = cmd();
        command.user_id = UserId::new("ghost").unwrap();

        let result = handler.handle(command).await;

        assert!(matches!(result, Err(BillingError::NotFound { .. })));
    }

    #[tokio::test]
    async fn missing_club_is_not_found() {
        let (_store, handler) = setup(0).await;
        let mut command = cmd();
        command.club_id = ClubId::new("nope").unwrap();

        assert!(matches!(
            handler.handle(command).await,
            Err(BillingError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn conflict_is_surfaced_and_nothing_is_audited() {
        let (store, handler) = setup(0).await;
        store
            .fail_next_commit(StoreError::Conflict {
                path: "users/user-a".into(),
            })
            .await;

        let result = handler.handle(cmd()).await;

        let err = result.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.code(), "CONFLICT");
        assert_eq!(store.count(collections::AUDIT_LOGS).await, 0);
        assert_eq!(club(&store).await["membersCount"], 0);
    }
}
