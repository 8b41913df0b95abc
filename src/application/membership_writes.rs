//! Staging membership transitions into a write batch.
//!
//! A transition touches the user document (the record) and the club
//! document (member array and counters). The user document is pinned to
//! the version that was read. Club counters change only through atomic
//! increments and array union/remove, so concurrent pairs in one club
//! never conflict on the club document.

use serde_json::Value;

use super::documents::{club_path, membership_field, to_value, user_path};
use super::BillingError;
use crate::domain::audit::{AuditEntry, AuditReason, ChangedBy};
use crate::domain::foundation::{ClubId, Timestamp, UserId};
use crate::domain::membership::MembershipTransition;
use crate::ports::{Document, Patch, WriteBatch};

/// Patch writing `transition.next` into `memberships.<clubId>`.
pub fn record_patch(
    club_id: &ClubId,
    transition: &MembershipTransition,
) -> Result<Patch, BillingError> {
    let mut patch = Patch::new().set(membership_field(club_id), to_value(&transition.next)?);
    if transition.previous.is_none() {
        patch = patch.array_union("joinedClubs", vec![Value::from(club_id.as_str())]);
    }
    Ok(patch)
}

/// Accumulated club-side effects of one or more transitions.
#[derive(Debug, Default)]
pub struct CounterChanges {
    joined: Vec<Value>,
    left: Vec<Value>,
    members: i64,
    paying: i64,
}

impl CounterChanges {
    pub fn add(&mut self, user_id: &UserId, transition: &MembershipTransition) {
        match transition.member_delta() {
            1 => self.joined.push(Value::from(user_id.as_str())),
            -1 => self.left.push(Value::from(user_id.as_str())),
            _ => {}
        }
        self.members += transition.member_delta();
        self.paying += transition.paying_delta();
    }

    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty() && self.members == 0 && self.paying == 0
    }

    /// Club patches in apply order. A patch holds one op per field, so a
    /// union and a removal on `members` need separate patches.
    pub fn into_patches(self) -> Vec<Patch> {
        let mut patches = Vec::new();
        if !self.joined.is_empty() {
            patches.push(Patch::new().array_union("members", self.joined));
        }
        let mut patch = Patch::new();
        if !self.left.is_empty() {
            patch = patch.array_remove("members", self.left);
        }
        if self.members != 0 {
            patch = patch.increment("membersCount", self.members);
        }
        if self.paying != 0 {
            patch = patch.increment("payingMembersCount", self.paying);
        }
        if !patch.is_empty() {
            patches.push(patch);
        }
        patches
    }

    /// Adds the club merges to `batch` when there is anything to change.
    pub fn stage(self, batch: WriteBatch, club_id: &ClubId) -> WriteBatch {
        let path = club_path(club_id);
        self.into_patches()
            .into_iter()
            .fold(batch, |batch, patch| batch.merge(path.clone(), patch))
    }
}

/// Stages one transition: the pinned user record plus club counters.
pub fn stage_transition(
    batch: WriteBatch,
    user: &Document,
    club_id: &ClubId,
    user_id: &UserId,
    transition: &MembershipTransition,
) -> Result<WriteBatch, BillingError> {
    let path = user_path(user_id);
    let batch = batch
        .expect(&path, Some(user))
        .merge(path, record_patch(club_id, transition)?);

    let mut counters = CounterChanges::default();
    counters.add(user_id, transition);
    Ok(counters.stage(batch, club_id))
}

/// The audit entry for `transition`, if it changes status.
pub fn audit_entry(
    club_id: &ClubId,
    user_id: &UserId,
    transition: &MembershipTransition,
    changed_by: ChangedBy,
    reason: AuditReason,
    now: Timestamp,
) -> Option<AuditEntry> {
    transition.status_change().map(|change| {
        AuditEntry::for_change(
            club_id.clone(),
            user_id.clone(),
            change,
            changed_by,
            reason,
            now,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::membership::{JoinFreeDecision, LastPaymentType, MembershipStatus};
    use crate::ports::{PatchValue, WriteOp};

    fn now() -> Timestamp {
        Timestamp::from_unix_secs(1_717_200_000).unwrap()
    }

    fn first_join() -> MembershipTransition {
        match MembershipTransition::join_free(None, now()).unwrap() {
            JoinFreeDecision::Join(t) => t,
            other => panic!("expected join, got {:?}", other),
        }
    }

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    #[test]
    fn first_join_adds_club_to_joined_clubs() {
        let club = ClubId::new("club-1").unwrap();
        let patch = record_patch(&club, &first_join()).unwrap();
        assert_eq!(patch.len(), 2);
    }

    #[test]
    fn counters_net_out_across_members() {
        let joined = first_join();
        let left = MembershipTransition::require_payment(&joined.next, now())
            .unwrap()
            .unwrap();

        let mut counters = CounterChanges::default();
        counters.add(&user("u1"), &joined);
        counters.add(&user("u2"), &left);
        counters.add(&user("u3"), &left);

        let patches = counters.into_patches();
        assert_eq!(patches.len(), 2);
        let ops: Vec<_> = patches[1].iter().collect();
        assert!(ops.iter().any(|(path, value)| path.to_string() == "membersCount"
            && **value == PatchValue::Increment(-1)));
        assert!(!ops.iter().any(|(path, _)| path.to_string() == "payingMembersCount"));
    }

    #[test]
    fn trial_start_leaves_club_untouched() {
        let club = ClubId::new("club-1").unwrap();
        let trial =
            MembershipTransition::start_trial(None, "sub_1", now().add_days(7), now()).unwrap();
        let user_doc = Document {
            path: crate::ports::DocumentPath::new("users", "u1"),
            data: serde_json::json!({}),
            version: 1,
        };

        let batch = stage_transition(WriteBatch::new(), &user_doc, &club, &user("u1"), &trial)
            .unwrap();

        assert_eq!(batch.ops().len(), 1);
        assert!(matches!(&batch.ops()[0], WriteOp::Merge { .. }));
    }

    #[test]
    fn paid_activation_counts_member_and_payer() {
        let paid = MembershipTransition::activate_paid(
            None,
            Some("sub_1".into()),
            LastPaymentType::Subscription,
            now(),
        )
        .unwrap();
        let mut counters = CounterChanges::default();
        counters.add(&user("u1"), &paid);
        let patches = counters.into_patches();
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[1].len(), 2);
    }

    #[test]
    fn audit_entry_only_for_status_changes() {
        let club = ClubId::new("club-1").unwrap();
        let joined = first_join();
        let entry = audit_entry(
            &club,
            &user("u1"),
            &joined,
            ChangedBy::System,
            AuditReason::FreeJoin,
            now(),
        )
        .unwrap();
        assert_eq!(entry.old_status, None);
        assert_eq!(entry.new_status, MembershipStatus::Active);

        let failed = MembershipTransition::payment_failed(&joined.next, now());
        assert!(audit_entry(
            &club,
            &user("u1"),
            &failed,
            ChangedBy::System,
            AuditReason::InvoicePaid,
            now()
        )
        .is_none());
    }
}
