//! In-memory document store for tests and single-process development.
//!
//! Collections are `BTreeMap`s keyed by document id, so queries come back
//! ordered by id exactly like the production backend. Every commit takes
//! the write lock once, checks all preconditions, stages the writes and
//! swaps them in, which gives the same all-or-nothing behaviour.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::domain::foundation::Timestamp;
use crate::ports::{
    Document, DocumentPath, DocumentStore, Page, Precondition, Query, StoreError, WriteBatch,
    WriteOp,
};

#[derive(Debug, Clone)]
struct StoredDocument {
    data: Value,
    version: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    collections: BTreeMap<String, BTreeMap<String, StoredDocument>>,
    next_version: u64,
    commits: u64,
    injected_failures: VecDeque<StoreError>,
}

impl StoreState {
    fn lookup(&self, path: &DocumentPath) -> Option<&StoredDocument> {
        self.collections.get(path.collection())?.get(path.id())
    }

    fn bump_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }
}

/// In-memory implementation of the `DocumentStore` port.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    // === Test Helpers ===

    /// Seeds a document, replacing any existing one.
    pub async fn insert(&self, path: DocumentPath, data: Value) {
        let mut state = self.state.write().await;
        let version = state.bump_version();
        state
            .collections
            .entry(path.collection().to_string())
            .or_default()
            .insert(path.id().to_string(), StoredDocument { data, version });
    }

    /// Returns every document in a collection, ordered by id.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        let state = self.state.read().await;
        state
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, stored)| to_document(collection, id, stored))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of documents in a collection.
    pub async fn count(&self, collection: &str) -> usize {
        let state = self.state.read().await;
        state.collections.get(collection).map_or(0, BTreeMap::len)
    }

    /// Makes the next commit fail with `error` without applying anything.
    pub async fn fail_next_commit(&self, error: StoreError) {
        self.state.write().await.injected_failures.push_back(error);
    }

    /// Number of successful commits so far.
    pub async fn commit_count(&self) -> u64 {
        self.state.read().await.commits
    }
}

fn to_document(collection: &str, id: &str, stored: &StoredDocument) -> Document {
    Document {
        path: DocumentPath::new(collection, id),
        data: stored.data.clone(),
        version: stored.version,
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        path.validate()?;
        let state = self.state.read().await;
        Ok(state
            .lookup(path)
            .map(|stored| to_document(path.collection(), path.id(), stored)))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        batch.validate()?;
        let mut state = self.state.write().await;

        if let Some(error) = state.injected_failures.pop_front() {
            return Err(error);
        }

        for (path, condition) in batch.preconditions() {
            let current = state.lookup(path).map(|d| d.version);
            let holds = match (condition, current) {
                (Precondition::Version(expected), Some(actual)) => *expected == actual,
                (Precondition::Missing, None) => true,
                _ => false,
            };
            if !holds {
                return Err(StoreError::Conflict {
                    path: path.to_string(),
                });
            }
        }

        // Stage every touched document so a failing op leaves nothing behind.
        let server_time = Timestamp::now();
        let mut staged: HashMap<DocumentPath, Option<Value>> = HashMap::new();
        for op in batch.ops() {
            let path = op.path().clone();
            let current = match staged.get(&path) {
                Some(value) => value.clone(),
                None => state.lookup(&path).map(|d| d.data.clone()),
            };
            let next = match op {
                WriteOp::Merge { patch, .. } => {
                    let mut data = current.unwrap_or(Value::Null);
                    patch.apply_to(&mut data, &server_time);
                    Some(data)
                }
                WriteOp::Create { data, .. } => {
                    if current.is_some() {
                        return Err(StoreError::AlreadyExists {
                            path: path.to_string(),
                        });
                    }
                    Some(data.clone())
                }
                WriteOp::Delete { .. } => None,
            };
            staged.insert(path, next);
        }

        for (path, data) in staged {
            match data {
                Some(data) => {
                    let version = state.bump_version();
                    state
                        .collections
                        .entry(path.collection().to_string())
                        .or_default()
                        .insert(path.id().to_string(), StoredDocument { data, version });
                }
                None => {
                    if let Some(docs) = state.collections.get_mut(path.collection()) {
                        docs.remove(path.id());
                    }
                }
            }
        }
        state.commits += 1;
        Ok(())
    }

    async fn query(&self, query: Query) -> Result<Page, StoreError> {
        for (path, _) in &query.filters {
            path.validate()?;
        }
        let state = self.state.read().await;
        let Some(docs) = state.collections.get(&query.collection) else {
            return Ok(Page::default());
        };

        let documents: Vec<Document> = docs
            .iter()
            .filter(|(id, _)| {
                query
                    .start_after
                    .as_deref()
                    .map_or(true, |cursor| id.as_str() > cursor)
            })
            .filter(|(_, stored)| query.matches(&stored.data))
            .take(query.limit)
            .map(|(id, stored)| to_document(&query.collection, id, stored))
            .collect();

        Ok(Page::from_documents(documents, query.limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::Patch;
    use serde_json::json;

    fn path(collection: &str, id: &str) -> DocumentPath {
        DocumentPath::new(collection, id)
    }

    #[tokio::test]
    async fn get_returns_none_for_missing_document() {
        let store = InMemoryDocumentStore::new();
        assert!(store.get(&path("clubs", "c1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_merge_creates_and_bumps_version() {
        let store = InMemoryDocumentStore::new();
        let p = path("clubs", "c1");

        store.set_merge(&p, Patch::new().set("name", "Chess")).await.unwrap();
        let first = store.get(&p).await.unwrap().unwrap();

        store.set_merge(&p, Patch::new().increment("membersCount", 1)).await.unwrap();
        let second = store.get(&p).await.unwrap().unwrap();

        assert!(second.version > first.version);
        assert_eq!(second.data, json!({"name": "Chess", "membersCount": 1}));
    }

    #[tokio::test]
    async fn commit_fails_on_stale_version_and_applies_nothing() {
        let store = InMemoryDocumentStore::new();
        let club = path("clubs", "c1");
        let user = path("users", "u1");
        store.insert(club.clone(), json!({"membersCount": 0})).await;

        let stale = store.get(&club).await.unwrap();
        store.set_merge(&club, Patch::new().increment("membersCount", 1)).await.unwrap();

        let batch = WriteBatch::new()
            .expect(&club, stale.as_ref())
            .merge(club.clone(), Patch::new().increment("membersCount", 1))
            .merge(user.clone(), Patch::new().set("joined", true));

        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert!(store.get(&user).await.unwrap().is_none());
        assert_eq!(store.get(&club).await.unwrap().unwrap().data["membersCount"], 1);
    }

    #[tokio::test]
    async fn create_rejects_existing_document_atomically() {
        let store = InMemoryDocumentStore::new();
        let payment = path("payments", "invoice_in_1");
        store.insert(payment.clone(), json!({"amount": 100})).await;

        let batch = WriteBatch::new()
            .merge(path("users", "u1"), Patch::new().set("x", 1))
            .create(payment, json!({"amount": 200}));

        assert!(matches!(
            store.commit(batch).await,
            Err(StoreError::AlreadyExists { .. })
        ));
        assert!(store.get(&path("users", "u1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_precondition_detects_concurrent_create() {
        let store = InMemoryDocumentStore::new();
        let p = path("payments", "checkout_cs_1");
        let read = store.get(&p).await.unwrap();
        store.insert(p.clone(), json!({})).await;

        let batch = WriteBatch::new()
            .expect(&p, read.as_ref())
            .create(p.clone(), json!({}));
        assert!(matches!(store.commit(batch).await, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn delete_removes_document() {
        let store = InMemoryDocumentStore::new();
        let p = path("subscriptionFailures", "sub_1");
        store.insert(p.clone(), json!({"failureCount": 2})).await;

        store.commit(WriteBatch::new().delete(p.clone())).await.unwrap();
        assert!(store.get(&p).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn query_pages_in_id_order_with_filters() {
        let store = InMemoryDocumentStore::new();
        for id in ["u3", "u1", "u4", "u2"] {
            let kind = if id == "u4" { "subscription" } else { "free" };
            store.insert(path("users", id), json!({"kind": kind})).await;
        }

        let first = store
            .query(Query::collection("users").where_eq("kind", "free").limit(2))
            .await
            .unwrap();
        let ids: Vec<_> = first.documents.iter().map(|d| d.id().to_string()).collect();
        assert_eq!(ids, vec!["u1", "u2"]);
        assert_eq!(first.next_cursor.as_deref(), Some("u2"));

        let second = store
            .query(
                Query::collection("users")
                    .where_eq("kind", "free")
                    .start_after(first.next_cursor)
                    .limit(2),
            )
            .await
            .unwrap();
        let ids: Vec<_> = second.documents.iter().map(|d| d.id().to_string()).collect();
        assert_eq!(ids, vec!["u3"]);
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn injected_failure_is_returned_once() {
        let store = InMemoryDocumentStore::new();
        store
            .fail_next_commit(StoreError::Backend("unavailable".into()))
            .await;
        let p = path("clubs", "c1");

        assert!(store.set_merge(&p, Patch::new().set("a", 1)).await.is_err());
        assert!(store.set_merge(&p, Patch::new().set("a", 1)).await.is_ok());
        assert_eq!(store.commit_count().await, 1);
    }

    #[tokio::test]
    async fn add_assigns_unique_ids() {
        let store = InMemoryDocumentStore::new();
        let a = store.add("membershipAuditLogs", json!({"n": 1})).await.unwrap();
        let b = store.add("membershipAuditLogs", json!({"n": 2})).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(store.count("membershipAuditLogs").await, 2);
    }
}
