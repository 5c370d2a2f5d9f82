use async_trait::async_trait;

use super::TimeRange;
use crate::{
    db::error::DbResult,
    models::{UsageGroup, UsageRecord},
};

#[async_trait]
pub trait UsageRepo: Send + Sync {
    /// Insert a record unless one with the same `request_id` exists.
    ///
    /// Returns `false` when the record was already present; the stored row is
    /// left untouched.
    async fn insert_once(&self, record: &UsageRecord) -> DbResult<bool>;

    async fn get(&self, request_id: &str) -> DbResult<Option<UsageRecord>>;

    /// Totals of complete records in `range`, grouped by
    /// (org, assistant, user, project).
    ///
    /// With `billable_only`, records with no tokens are left out.
    async fn usage_groups(&self, range: TimeRange, billable_only: bool)
    -> DbResult<Vec<UsageGroup>>;

    /// Tokens of complete records in `range` for an organization, optionally
    /// narrowed to one user.
    async fn sum_tokens(
        &self,
        org_id: &str,
        user_id: Option<&str>,
        range: TimeRange,
    ) -> DbResult<i64>;
}
