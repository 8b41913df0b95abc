//! PostgreSQL implementation of the DocumentStore port.
//!
//! Documents live in a single `documents` table keyed by
//! `(collection, id)` with a JSONB body and a version drawn from a
//! sequence. A commit runs in one SQL transaction: every touched row is
//! locked with `SELECT ... FOR UPDATE`, preconditions are checked against
//! the locked versions, patches are applied in Rust and the rows are
//! written back. Rows that did not exist are inserted without
//! `ON CONFLICT`, so a concurrent create surfaces as a unique violation
//! and maps to `StoreError::Conflict`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use crate::domain::foundation::Timestamp;
use crate::ports::{
    Document, DocumentPath, DocumentStore, Page, Patch, Precondition, Query, StoreError,
    WriteBatch, WriteOp,
};

/// PostgreSQL-backed document store.
#[derive(Clone)]
pub struct PostgresDocumentStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    id: String,
    data: Json<Value>,
    version: i64,
}

struct StagedWrite {
    existed: bool,
    data: Option<Value>,
}

impl PostgresDocumentStore {
    /// Creates a new store over the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies pending migrations from `migrations/`.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Migration failed: {}", e)))
    }

    async fn lock_row(
        tx: &mut Transaction<'_, Postgres>,
        path: &DocumentPath,
    ) -> Result<Option<(Value, u64)>, StoreError> {
        let row: Option<DocumentRow> = sqlx::query_as(
            r#"
            SELECT id, data, version FROM documents
            WHERE collection = $1 AND id = $2
            FOR UPDATE
            "#,
        )
        .bind(path.collection())
        .bind(path.id())
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|r| (r.data.0, r.version as u64)))
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        // unique_violation / serialization_failure
        if matches!(db_err.code().as_deref(), Some("23505") | Some("40001")) {
            return StoreError::Conflict {
                path: db_err.constraint().unwrap_or("documents").to_string(),
            };
        }
    }
    StoreError::Backend(err.to_string())
}

/// Builds a containment filter (`data @> filter`) from equality filters.
fn containment_filter(query: &Query) -> Value {
    let patch = query
        .filters
        .iter()
        .fold(Patch::new(), |patch, (path, value)| {
            patch.set(path.clone(), value.clone())
        });
    let mut filter = Value::Object(serde_json::Map::new());
    patch.apply_to(&mut filter, &Timestamp::now());
    filter
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        path.validate()?;
        let row: Option<DocumentRow> = sqlx::query_as(
            "SELECT id, data, version FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(path.collection())
        .bind(path.id())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|r| Document {
            path: path.clone(),
            data: r.data.0,
            version: r.version as u64,
        }))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        batch.validate()?;
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        for (path, condition) in batch.preconditions() {
            let current = Self::lock_row(&mut tx, path).await?.map(|(_, v)| v);
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

        let server_time = Timestamp::now();
        let mut staged: HashMap<DocumentPath, StagedWrite> = HashMap::new();
        let mut order: Vec<DocumentPath> = Vec::new();

        for op in batch.ops() {
            let path = op.path().clone();
            if !staged.contains_key(&path) {
                let locked = Self::lock_row(&mut tx, &path).await?;
                staged.insert(
                    path.clone(),
                    StagedWrite {
                        existed: locked.is_some(),
                        data: locked.map(|(data, _)| data),
                    },
                );
                order.push(path.clone());
            }
            let Some(entry) = staged.get_mut(&path) else {
                continue;
            };
            match op {
                WriteOp::Merge { patch, .. } => {
                    let mut data = entry.data.take().unwrap_or(Value::Null);
                    patch.apply_to(&mut data, &server_time);
                    entry.data = Some(data);
                }
                WriteOp::Create { data, .. } => {
                    if entry.data.is_some() {
                        return Err(StoreError::AlreadyExists {
                            path: path.to_string(),
                        });
                    }
                    entry.data = Some(data.clone());
                }
                WriteOp::Delete { .. } => entry.data = None,
            }
        }

        for path in order {
            let Some(write) = staged.remove(&path) else {
                continue;
            };
            match (write.existed, write.data) {
                (true, Some(data)) => {
                    sqlx::query(
                        r#"
                        UPDATE documents
                        SET data = $3, version = nextval('document_versions'), updated_at = now()
                        WHERE collection = $1 AND id = $2
                        "#,
                    )
                    .bind(path.collection())
                    .bind(path.id())
                    .bind(Json(data))
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;
                }
                (false, Some(data)) => {
                    sqlx::query(
                        r#"
                        INSERT INTO documents (collection, id, data, version)
                        VALUES ($1, $2, $3, nextval('document_versions'))
                        "#,
                    )
                    .bind(path.collection())
                    .bind(path.id())
                    .bind(Json(data))
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;
                }
                (true, None) => {
                    sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
                        .bind(path.collection())
                        .bind(path.id())
                        .execute(&mut *tx)
                        .await
                        .map_err(map_sqlx_error)?;
                }
                (false, None) => {}
            }
        }

        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn query(&self, query: Query) -> Result<Page, StoreError> {
        for (path, _) in &query.filters {
            path.validate()?;
        }
        let filter = containment_filter(&query);

        let rows: Vec<DocumentRow> = sqlx::query_as(
            r#"
            SELECT id, data, version FROM documents
            WHERE collection = $1
              AND ($2::text IS NULL OR id COLLATE "C" > $2)
              AND data @> $3
            ORDER BY id COLLATE "C"
            LIMIT $4
            "#,
        )
        .bind(&query.collection)
        .bind(query.start_after.as_deref())
        .bind(Json(filter))
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let documents = rows
            .into_iter()
            .map(|r| Document {
                path: DocumentPath::new(query.collection.clone(), r.id),
                data: r.data.0,
                version: r.version as u64,
            })
            .collect();

        Ok(Page::from_documents(documents, query.limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn containment_filter_nests_field_paths() {
        let query = Query::collection("users")
            .where_eq("memberships.c1.lastPaymentType", "free")
            .where_eq("active", true);

        assert_eq!(
            containment_filter(&query),
            json!({"memberships": {"c1": {"lastPaymentType": "free"}}, "active": true})
        );
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert_eq!(containment_filter(&Query::collection("clubs")), json!({}));
    }
}
