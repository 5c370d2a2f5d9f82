use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::{
    db::{error::DbResult, repos::PendingRequestRepo},
    models::PendingRequest,
};

pub struct PostgresPendingRequestRepo {
    write_pool: PgPool,
}

impl PostgresPendingRequestRepo {
    pub fn new(write_pool: PgPool, _read_pool: Option<PgPool>) -> Self {
        Self { write_pool }
    }
}

#[async_trait]
impl PendingRequestRepo for PostgresPendingRequestRepo {
    async fn upsert(&self, pending: &PendingRequest) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_requests (request_id, org_id, payload, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (request_id) DO UPDATE SET
                org_id = EXCLUDED.org_id,
                payload = EXCLUDED.payload,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(&pending.request_id)
        .bind(&pending.org_id)
        .bind(&pending.payload)
        .bind(pending.expires_at)
        .execute(&self.write_pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, request_id: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM pending_requests WHERE request_id = $1")
            .bind(request_id)
            .execute(&self.write_pool)
            .await?;
        Ok(())
    }

    async fn list_expired(
        &self,
        as_of: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<PendingRequest>> {
        // Read from the primary: rows are deleted right after being swept
        let rows = sqlx::query(
            r#"
            SELECT request_id, org_id, payload, expires_at
            FROM pending_requests
            WHERE expires_at <= $1
            ORDER BY expires_at ASC
            LIMIT $2
            "#,
        )
        .bind(as_of)
        .bind(limit as i64)
        .fetch_all(&self.write_pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| PendingRequest {
                request_id: row.get("request_id"),
                org_id: row.get("org_id"),
                payload: row.get("payload"),
                expires_at: row.get("expires_at"),
            })
            .collect())
    }
}
