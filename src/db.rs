use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::store::{Collection, DocumentStore};

/// Documents kept as JSONB rows in `sla_reconciliation.documents`.
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let url = config.database_url.as_deref().ok_or_else(|| {
            StoreError::NotConfigured("DATABASE_URL must be set to a Postgres instance".to_string())
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await
            .map_err(map_sqlx)?;
        Ok(Self { pool })
    }

    pub async fn init_db(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn put(&self, collection: Collection, key: &str, doc: &Value) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sla_reconciliation.documents (collection, key, body, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (collection, key) DO UPDATE
            SET body = EXCLUDED.body, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(collection.as_str())
        .bind(key)
        .bind(Json(doc))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn get(&self, collection: Collection, key: &str) -> StoreResult<Option<Value>> {
        let row = sqlx::query(
            "SELECT body FROM sla_reconciliation.documents WHERE collection = $1 AND key = $2",
        )
        .bind(collection.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.map(|row| row.try_get::<Json<Value>, _>("body").map(|body| body.0))
            .transpose()
            .map_err(map_sqlx)
    }

    async fn list(&self, collection: Collection) -> StoreResult<Vec<(String, Value)>> {
        let rows = sqlx::query(
            r#"
            SELECT key, body FROM sla_reconciliation.documents
            WHERE collection = $1
            ORDER BY updated_at, key
            "#,
        )
        .bind(collection.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("key").map_err(map_sqlx)?;
            let body: Json<Value> = row.try_get("body").map_err(map_sqlx)?;
            documents.push((key, body.0));
        }
        Ok(documents)
    }
}

/// Connection-level failures are "unavailable"; everything else is a backend error.
fn map_sqlx(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
        other => StoreError::Backend(other.to_string()),
    }
}
