use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::{
    db::{error::DbResult, repos::PendingRequestRepo},
    models::PendingRequest,
};

pub struct SqlitePendingRequestRepo {
    pool: SqlitePool,
}

impl SqlitePendingRequestRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PendingRequestRepo for SqlitePendingRequestRepo {
    async fn upsert(&self, pending: &PendingRequest) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_requests (request_id, org_id, payload, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (request_id) DO UPDATE SET
                org_id = excluded.org_id,
                payload = excluded.payload,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&pending.request_id)
        .bind(&pending.org_id)
        .bind(&pending.payload)
        .bind(pending.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, request_id: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM pending_requests WHERE request_id = ?")
            .bind(request_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_expired(
        &self,
        as_of: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<PendingRequest>> {
        let rows = sqlx::query(
            r#"
            SELECT request_id, org_id, payload, expires_at
            FROM pending_requests
            WHERE expires_at <= ?
            ORDER BY expires_at ASC
            LIMIT ?
            "#,
        )
        .bind(as_of)
        .bind(limit as i64)
        .fetch_all(&self.pool)
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
