//! DocumentStore port - document database primitives.
//!
//! The billing engine persists everything as JSON documents grouped in
//! collections. Multi-field invariants are kept with optimistic
//! transactions: read the documents (capturing their versions), build a
//! [`WriteBatch`] whose preconditions pin those versions, and commit. A
//! concurrent write to any pinned document fails the whole batch with
//! [`StoreError::Conflict`]; callers retry the entire operation.
//!
//! Partial updates are expressed as a [`Patch`]: a map from [`FieldPath`]
//! to a [`PatchValue`] (set, delete, increment, array union/remove or
//! server timestamp), applied atomically to one document.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode, Timestamp};

// ════════════════════════════════════════════════════════════════════════════════
// Errors
// ════════════════════════════════════════════════════════════════════════════════

/// Errors raised by document store adapters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A precondition in the batch no longer holds (concurrent write).
    #[error("Write conflict on {path}")]
    Conflict { path: String },

    /// A create targeted a document that already exists.
    #[error("Document already exists: {path}")]
    AlreadyExists { path: String },

    /// A field path or document path is malformed.
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Stored data could not be decoded into the expected shape.
    #[error("Invalid document {path}: {reason}")]
    InvalidDocument { path: String, reason: String },

    /// The storage backend failed.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns true if retrying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict { .. } | StoreError::Backend(_))
    }
}

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        let code = match err {
            StoreError::Conflict { .. } | StoreError::AlreadyExists { .. } => ErrorCode::Conflict,
            StoreError::InvalidPath { .. } => ErrorCode::ValidationFailed,
            StoreError::InvalidDocument { .. } | StoreError::Backend(_) => ErrorCode::DatabaseError,
        };
        DomainError::new(code, err.to_string())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Paths
// ════════════════════════════════════════════════════════════════════════════════

/// Location of a document: `<collection>/<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath {
    collection: String,
    id: String,
}

impl DocumentPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Rejects empty components and embedded `/`.
    pub fn validate(&self) -> Result<(), StoreError> {
        for part in [&self.collection, &self.id] {
            if part.is_empty() || part.contains('/') {
                return Err(StoreError::InvalidPath {
                    path: self.to_string(),
                    reason: "collection and id must be non-empty and free of '/'".to_string(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Dotted path to a field inside a document, e.g. `memberships.club_1.status`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Builds a path from explicit segments (segments are not split).
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parses a dotted path.
    pub fn parse(dotted: &str) -> Self {
        Self(dotted.split('.').map(str::to_string).collect())
    }

    /// Appends a segment, returning the extended path.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Rejects empty segments and segments carrying a separator.
    ///
    /// A segment containing `.` or `/` would address a different field
    /// than the one the caller built, so batches refuse to commit it.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.0.is_empty() {
            return Err(self.invalid("path has no segments"));
        }
        for segment in &self.0 {
            if segment.is_empty() {
                return Err(self.invalid("empty segment"));
            }
            if segment.contains('/') || segment.contains('.') {
                return Err(self.invalid("segment contains an illegal separator"));
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> StoreError {
        StoreError::InvalidPath {
            path: self.0.join("."),
            reason: reason.to_string(),
        }
    }

    /// Looks the path up inside a JSON value.
    pub fn lookup<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.0
            .iter()
            .try_fold(root, |node, segment| node.as_object()?.get(segment))
    }
}

impl From<&str> for FieldPath {
    fn from(dotted: &str) -> Self {
        Self::parse(dotted)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Documents
// ════════════════════════════════════════════════════════════════════════════════

/// A stored document and the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: DocumentPath,
    pub data: Value,
    pub version: u64,
}

impl Document {
    pub fn id(&self) -> &str {
        self.path.id()
    }

    pub fn field(&self, path: &FieldPath) -> Option<&Value> {
        path.lookup(&self.data)
    }

    /// Deserializes the whole document.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.data.clone()).map_err(|e| StoreError::InvalidDocument {
            path: self.path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Deserializes one field, treating missing and `null` as absent.
    pub fn decode_field<T: DeserializeOwned>(&self, path: &FieldPath) -> Result<Option<T>, StoreError> {
        match self.field(path) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| StoreError::InvalidDocument {
                    path: format!("{}#{}", self.path, path),
                    reason: e.to_string(),
                }),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Patches
// ════════════════════════════════════════════════════════════════════════════════

/// Operation applied to a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchValue {
    /// Replace the field with a value.
    Set(Value),
    /// Remove the field.
    Delete,
    /// Add to a numeric field (missing or non-numeric counts as 0).
    Increment(i64),
    /// Append values not already present in the array.
    ArrayUnion(Vec<Value>),
    /// Remove every element equal to one of the values.
    ArrayRemove(Vec<Value>),
    /// Set to the commit time assigned by the store.
    ServerTimestamp,
}

/// A set of field operations applied atomically to one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    ops: BTreeMap<FieldPath, PatchValue>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op(mut self, path: impl Into<FieldPath>, value: PatchValue) -> Self {
        self.ops.insert(path.into(), value);
        self
    }

    pub fn set(self, path: impl Into<FieldPath>, value: impl Into<Value>) -> Self {
        self.op(path, PatchValue::Set(value.into()))
    }

    pub fn delete(self, path: impl Into<FieldPath>) -> Self {
        self.op(path, PatchValue::Delete)
    }

    pub fn increment(self, path: impl Into<FieldPath>, by: i64) -> Self {
        self.op(path, PatchValue::Increment(by))
    }

    pub fn array_union(self, path: impl Into<FieldPath>, values: Vec<Value>) -> Self {
        self.op(path, PatchValue::ArrayUnion(values))
    }

    pub fn array_remove(self, path: impl Into<FieldPath>, values: Vec<Value>) -> Self {
        self.op(path, PatchValue::ArrayRemove(values))
    }

    pub fn server_timestamp(self, path: impl Into<FieldPath>) -> Self {
        self.op(path, PatchValue::ServerTimestamp)
    }

    /// Sets `value` or deletes the field when `None`.
    pub fn set_or_delete(self, path: impl Into<FieldPath>, value: Option<Value>) -> Self {
        match value {
            Some(v) => self.op(path, PatchValue::Set(v)),
            None => self.op(path, PatchValue::Delete),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldPath, &PatchValue)> {
        self.ops.iter()
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        self.ops.keys().try_for_each(FieldPath::validate)
    }

    /// Applies every operation to `target`, creating intermediate maps.
    pub fn apply_to(&self, target: &mut Value, server_time: &Timestamp) {
        if !target.is_object() {
            *target = Value::Object(Map::new());
        }
        for (path, op) in &self.ops {
            apply_op(target, path.segments(), op, server_time);
        }
    }
}

fn apply_op(node: &mut Value, segments: &[String], op: &PatchValue, server_time: &Timestamp) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut cursor = node;
    for segment in parents {
        if !cursor.is_object() {
            *cursor = Value::Object(Map::new());
        }
        let Some(map) = cursor.as_object_mut() else { return };
        cursor = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !cursor.is_object() {
        *cursor = Value::Object(Map::new());
    }
    let Some(map) = cursor.as_object_mut() else { return };

    match op {
        PatchValue::Set(value) => {
            map.insert(last.clone(), value.clone());
        }
        PatchValue::Delete => {
            map.remove(last);
        }
        PatchValue::Increment(by) => {
            let next = match map.get(last) {
                Some(Value::Number(n)) if n.is_i64() => {
                    Value::from(n.as_i64().unwrap_or_default().saturating_add(*by))
                }
                Some(Value::Number(n)) => Value::from(n.as_f64().unwrap_or_default() + *by as f64),
                _ => Value::from(*by),
            };
            map.insert(last.clone(), next);
        }
        PatchValue::ArrayUnion(values) => {
            let entry = map.entry(last.clone()).or_insert_with(|| Value::Array(Vec::new()));
            if !entry.is_array() {
                *entry = Value::Array(Vec::new());
            }
            if let Value::Array(items) = entry {
                for value in values {
                    if !items.contains(value) {
                        items.push(value.clone());
                    }
                }
            }
        }
        PatchValue::ArrayRemove(values) => match map.get_mut(last) {
            Some(Value::Array(items)) => items.retain(|item| !values.contains(item)),
            _ => {
                map.insert(last.clone(), Value::Array(Vec::new()));
            }
        },
        PatchValue::ServerTimestamp => {
            let stamp = serde_json::to_value(server_time).unwrap_or(Value::Null);
            map.insert(last.clone(), stamp);
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Batches
// ════════════════════════════════════════════════════════════════════════════════

/// Condition a document must satisfy for a batch to commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Document exists at exactly this version.
    Version(u64),
    /// Document does not exist.
    Missing,
}

/// A single write inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Merge a patch, creating the document if needed.
    Merge { path: DocumentPath, patch: Patch },
    /// Create a document, failing if it exists.
    Create { path: DocumentPath, data: Value },
    /// Delete a document (no-op when missing).
    Delete { path: DocumentPath },
}

impl WriteOp {
    pub fn path(&self) -> &DocumentPath {
        match self {
            WriteOp::Merge { path, .. } | WriteOp::Create { path, .. } | WriteOp::Delete { path } => path,
        }
    }
}

/// An atomic group of writes guarded by preconditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    preconditions: Vec<(DocumentPath, Precondition)>,
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the state a document was read in (present at a version, or absent).
    pub fn expect(mut self, path: &DocumentPath, snapshot: Option<&Document>) -> Self {
        let condition = match snapshot {
            Some(doc) => Precondition::Version(doc.version),
            None => Precondition::Missing,
        };
        self.preconditions.push((path.clone(), condition));
        self
    }

    pub fn expect_missing(mut self, path: &DocumentPath) -> Self {
        self.preconditions.push((path.clone(), Precondition::Missing));
        self
    }

    pub fn merge(mut self, path: DocumentPath, patch: Patch) -> Self {
        self.ops.push(WriteOp::Merge { path, patch });
        self
    }

    pub fn create(mut self, path: DocumentPath, data: Value) -> Self {
        self.ops.push(WriteOp::Create { path, data });
        self
    }

    pub fn delete(mut self, path: DocumentPath) -> Self {
        self.ops.push(WriteOp::Delete { path });
        self
    }

    /// Appends a write in place.
    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn preconditions(&self) -> &[(DocumentPath, Precondition)] {
        &self.preconditions
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Checks every document path and field path before anything is written.
    pub fn validate(&self) -> Result<(), StoreError> {
        for (path, _) in &self.preconditions {
            path.validate()?;
        }
        for op in &self.ops {
            op.path().validate()?;
            if let WriteOp::Merge { patch, .. } = op {
                patch.validate()?;
            }
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Queries
// ════════════════════════════════════════════════════════════════════════════════

/// Equality query over one collection, ordered by document id.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<(FieldPath, Value)>,
    pub start_after: Option<String>,
    pub limit: usize,
}

impl Query {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            start_after: None,
            limit: 100,
        }
    }

    pub fn where_eq(mut self, path: impl Into<FieldPath>, value: impl Into<Value>) -> Self {
        self.filters.push((path.into(), value.into()));
        self
    }

    pub fn start_after(mut self, cursor: Option<String>) -> Self {
        self.start_after = cursor;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// True if `data` satisfies every filter.
    pub fn matches(&self, data: &Value) -> bool {
        self.filters
            .iter()
            .all(|(path, expected)| path.lookup(data) == Some(expected))
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub documents: Vec<Document>,
    /// Id to pass as `start_after` for the next page; `None` when exhausted.
    pub next_cursor: Option<String>,
}

impl Page {
    /// Builds a page, deriving the cursor from a full page.
    pub fn from_documents(documents: Vec<Document>, limit: usize) -> Self {
        let next_cursor = if documents.len() >= limit {
            documents.last().map(|d| d.id().to_string())
        } else {
            None
        };
        Self {
            documents,
            next_cursor,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Port
// ════════════════════════════════════════════════════════════════════════════════

/// Port for document persistence.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads a document with its current version.
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError>;

    /// Atomically commits a batch, or fails without applying anything.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Runs an equality query ordered by document id.
    async fn query(&self, query: Query) -> Result<Page, StoreError>;

    /// Merges a patch into one document without preconditions.
    async fn set_merge(&self, path: &DocumentPath, patch: Patch) -> Result<(), StoreError> {
        self.commit(WriteBatch::new().merge(path.clone(), patch)).await
    }

    /// Adds a document with a store-assigned id.
    async fn add(&self, collection: &str, data: Value) -> Result<DocumentPath, StoreError> {
        let path = DocumentPath::new(collection, uuid::Uuid::new_v4().simple().to_string());
        self.commit(WriteBatch::new().create(path.clone(), data)).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn now() -> Timestamp {
        Timestamp::from_unix_secs(1_704_067_200).unwrap()
    }

    #[test]
    fn field_path_parses_and_displays() {
        let path = FieldPath::parse("memberships.club_1.status");
        assert_eq!(path.segments().len(), 3);
        assert_eq!(path.to_string(), "memberships.club_1.status");
    }

    #[test]
    fn field_path_rejects_separators_inside_segments() {
        let path = FieldPath::from_segments(["memberships", "clubs/1", "status"]);
        assert!(matches!(path.validate(), Err(StoreError::InvalidPath { .. })));

        let dotted = FieldPath::from_segments(["memberships", "a.b"]);
        assert!(dotted.validate().is_err());

        assert!(FieldPath::parse("a..b").validate().is_err());
    }

    #[test]
    fn patch_sets_nested_fields_and_creates_parents() {
        let mut doc = json!({"name": "Club"});
        Patch::new()
            .set("billing.tier", "tier_b")
            .set("billing.usage.payingMembers", 12)
            .apply_to(&mut doc, &now());

        assert_eq!(doc["billing"]["tier"], "tier_b");
        assert_eq!(doc["billing"]["usage"]["payingMembers"], 12);
        assert_eq!(doc["name"], "Club");
    }

    #[test]
    fn patch_delete_removes_field() {
        let mut doc = json!({"billing": {"upgradeScheduledFor": "x", "tier": "tier_a"}});
        Patch::new()
            .delete("billing.upgradeScheduledFor")
            .apply_to(&mut doc, &now());

        assert!(doc["billing"].get("upgradeScheduledFor").is_none());
        assert_eq!(doc["billing"]["tier"], "tier_a");
    }

    #[test]
    fn patch_increment_treats_missing_as_zero() {
        let mut doc = json!({"membersCount": 4});
        Patch::new()
            .increment("membersCount", 1)
            .increment("payingMembersCount", -1)
            .apply_to(&mut doc, &now());

        assert_eq!(doc["membersCount"], 5);
        assert_eq!(doc["payingMembersCount"], -1);
    }

    #[test]
    fn patch_array_union_and_remove() {
        let mut doc = json!({"members": ["a", "b"]});
        Patch::new()
            .array_union("members", vec![json!("b"), json!("c")])
            .apply_to(&mut doc, &now());
        assert_eq!(doc["members"], json!(["a", "b", "c"]));

        Patch::new()
            .array_remove("members", vec![json!("a")])
            .apply_to(&mut doc, &now());
        assert_eq!(doc["members"], json!(["b", "c"]));
    }

    #[test]
    fn patch_server_timestamp_uses_commit_time() {
        let mut doc = Value::Null;
        Patch::new()
            .server_timestamp("updatedAt")
            .apply_to(&mut doc, &now());
        assert_eq!(doc["updatedAt"], serde_json::to_value(now()).unwrap());
    }

    #[test]
    fn batch_validation_rejects_bad_field_paths() {
        let batch = WriteBatch::new().merge(
            DocumentPath::new("users", "u1"),
            Patch::new().set(FieldPath::from_segments(["memberships", "c/1"]), 1),
        );
        assert!(batch.validate().is_err());
    }

    #[test]
    fn batch_expect_maps_snapshot_to_precondition() {
        let path = DocumentPath::new("clubs", "c1");
        let doc = Document {
            path: path.clone(),
            data: json!({}),
            version: 7,
        };
        let batch = WriteBatch::new()
            .expect(&path, Some(&doc))
            .expect(&DocumentPath::new("payments", "p1"), None);

        assert_eq!(batch.preconditions()[0].1, Precondition::Version(7));
        assert_eq!(batch.preconditions()[1].1, Precondition::Missing);
    }

    #[test]
    fn query_matches_nested_equality() {
        let query = Query::collection("users").where_eq("memberships.c1.lastPaymentType", "free");
        assert!(query.matches(&json!({"memberships": {"c1": {"lastPaymentType": "free"}}})));
        assert!(!query.matches(&json!({"memberships": {"c1": {"lastPaymentType": "subscription"}}})));
        assert!(!query.matches(&json!({})));
    }

    #[test]
    fn page_cursor_only_when_full() {
        let docs: Vec<Document> = (0..2)
            .map(|i| Document {
                path: DocumentPath::new("users", format!("u{}", i)),
                data: json!({}),
                version: 1,
            })
            .collect();
        assert_eq!(Page::from_documents(docs.clone(), 2).next_cursor, Some("u1".to_string()));
        assert_eq!(Page::from_documents(docs, 3).next_cursor, None);
    }

    #[test]
    fn store_errors_report_retryability() {
        assert!(StoreError::Conflict { path: "x".into() }.is_retryable());
        assert!(StoreError::Backend("down".into()).is_retryable());
        assert!(!StoreError::AlreadyExists { path: "x".into() }.is_retryable());
    }

    proptest! {
        #[test]
        fn increment_then_decrement_restores_value(start in -1_000_000i64..1_000_000, delta in -10_000i64..10_000) {
            let mut doc = json!({"counter": start});
            Patch::new().increment("counter", delta).apply_to(&mut doc, &now());
            Patch::new().increment("counter", -delta).apply_to(&mut doc, &now());
            prop_assert_eq!(doc["counter"].as_i64(), Some(start));
        }
    }
}
