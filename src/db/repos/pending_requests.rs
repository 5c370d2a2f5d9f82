use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{db::error::DbResult, models::PendingRequest};

#[async_trait]
pub trait PendingRequestRepo: Send + Sync {
    /// Insert or replace by `request_id`.
    async fn upsert(&self, pending: &PendingRequest) -> DbResult<()>;

    async fn delete(&self, request_id: &str) -> DbResult<()>;

    /// Rows with `expires_at <= as_of`, oldest first.
    async fn list_expired(&self, as_of: DateTime<Utc>, limit: u32)
    -> DbResult<Vec<PendingRequest>>;
}
