//! Postgres-backed document store over a single `documents` table.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use super::{DocumentStore, Page, StoreError};

pub async fn connect(url: &str) -> anyhow::Result<PgPool> {
    let pool = Pool::<Postgres>::connect(url).await?;
    // crate-relative path for sqlx migrations
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn store_err(collection: &str, e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        // unique_violation
        if db.code().as_deref() == Some("23505") {
            return StoreError::Duplicate {
                collection: collection.to_string(),
            };
        }
    }
    tracing::error!(collection, error = %e, "document store error");
    StoreError::Unavailable(e.to_string())
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn insert(
        &self,
        collection: &str,
        id: Uuid,
        body: Value,
        // enforced by the partial unique indexes in the migrations
        _unique: &[&str],
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO documents (collection, id, body) VALUES ($1, $2, $3)")
            .bind(collection)
            .bind(id)
            .bind(Json(body))
            .execute(&self.pool)
            .await
            .map_err(|e| store_err(collection, e))?;
        Ok(())
    }

    async fn get(&self, collection: &str, id: Uuid) -> Result<Option<Value>, StoreError> {
        let body: Option<Json<Value>> =
            sqlx::query_scalar("SELECT body FROM documents WHERE collection = $1 AND id = $2")
                .bind(collection)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| store_err(collection, e))?;
        Ok(body.map(|b| b.0))
    }

    async fn replace(&self, collection: &str, id: Uuid, body: Value) -> Result<bool, StoreError> {
        let res = sqlx::query(
            "UPDATE documents SET body = $3, updated_at = now() WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .bind(Json(body))
        .execute(&self.pool)
        .await
        .map_err(|e| store_err(collection, e))?;
        Ok(res.rows_affected() > 0)
    }

    async fn delete(&self, collection: &str, id: Uuid) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| store_err(collection, e))?;
        Ok(res.rows_affected() > 0)
    }

    async fn delete_many(&self, collection: &str, filter: &Value) -> Result<u64, StoreError> {
        let res = sqlx::query("DELETE FROM documents WHERE collection = $1 AND body @> $2")
            .bind(collection)
            .bind(Json(filter))
            .execute(&self.pool)
            .await
            .map_err(|e| store_err(collection, e))?;
        Ok(res.rows_affected())
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Value,
        page: Option<Page>,
    ) -> Result<Vec<Value>, StoreError> {
        // LIMIT NULL means no limit
        let (limit, offset) = match page {
            Some(p) => (Some(p.limit as i64), p.offset as i64),
            None => (None, 0),
        };
        let rows: Vec<Json<Value>> = sqlx::query_scalar(
            r#"
            SELECT body FROM documents
            WHERE collection = $1 AND body @> $2
            ORDER BY created_at DESC, id
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(collection)
        .bind(Json(filter))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err(collection, e))?;
        Ok(rows.into_iter().map(|b| b.0).collect())
    }

    async fn count(&self, collection: &str, filter: &Value) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents WHERE collection = $1 AND body @> $2",
        )
        .bind(collection)
        .bind(Json(filter))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_err(collection, e))?;
        Ok(n as u64)
    }

    async fn add_to_set(
        &self,
        collection: &str,
        id: Uuid,
        additions: &[(&str, Value)],
    ) -> Result<Option<Value>, StoreError> {
        // One nested jsonb_set per field; the row lock of the UPDATE makes the
        // union atomic against concurrent writers.
        let mut expr = String::from("body");
        for i in 0..additions.len() {
            let field = 3 + i * 2;
            let values = field + 1;
            expr = format!(
                "jsonb_set({expr}, ARRAY[${field}::text], \
                 COALESCE(body->(${field}::text), '[]'::jsonb) || COALESCE(( \
                   SELECT jsonb_agg(v.elem) FROM jsonb_array_elements(${values}::jsonb) AS v(elem) \
                   WHERE NOT COALESCE(body->(${field}::text), '[]'::jsonb) @> jsonb_build_array(v.elem) \
                 ), '[]'::jsonb))"
            );
        }
        let sql = format!(
            "UPDATE documents SET body = {expr}, updated_at = now() \
             WHERE collection = $1 AND id = $2 RETURNING body"
        );

        let mut query = sqlx::query_scalar::<_, Json<Value>>(&sql)
            .bind(collection)
            .bind(id);
        for (field, values) in additions {
            query = query.bind(field.to_string()).bind(Json(values.clone()));
        }
        let body = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_err(collection, e))?;
        Ok(body.map(|b| b.0))
    }

    async fn increment(
        &self,
        collection: &str,
        id: Uuid,
        field: &str,
        by: i64,
    ) -> Result<Option<Value>, StoreError> {
        let body: Option<Json<Value>> = sqlx::query_scalar(
            r#"
            UPDATE documents
            SET body = jsonb_set(body, ARRAY[$3::text],
                    to_jsonb(COALESCE((body->>($3::text))::bigint, 0) + $4)),
                updated_at = now()
            WHERE collection = $1 AND id = $2
            RETURNING body
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(field)
        .bind(by)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_err(collection, e))?;
        Ok(body.map(|b| b.0))
    }

    async fn set_fields(
        &self,
        collection: &str,
        id: Uuid,
        fields: &Value,
    ) -> Result<Option<Value>, StoreError> {
        let body: Option<Json<Value>> = sqlx::query_scalar(
            r#"
            UPDATE documents SET body = body || $3, updated_at = now()
            WHERE collection = $1 AND id = $2
            RETURNING body
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(Json(fields))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_err(collection, e))?;
        Ok(body.map(|b| b.0))
    }

    async fn set_fields_if(
        &self,
        collection: &str,
        id: Uuid,
        guard: &Value,
        fields: &Value,
    ) -> Result<Option<Value>, StoreError> {
        // the guard is re-evaluated under the row lock, so concurrent callers
        // cannot both pass it
        let body: Option<Json<Value>> = sqlx::query_scalar(
            r#"
            UPDATE documents SET body = body || $4, updated_at = now()
            WHERE collection = $1 AND id = $2 AND body @> $3
            RETURNING body
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(Json(guard))
        .bind(Json(fields))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_err(collection, e))?;
        Ok(body.map(|b| b.0))
    }
}
