use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    db::error::DbResult,
    models::{DailyRollup, MonthlyRollup},
};

#[async_trait]
pub trait RollupRepo: Send + Sync {
    /// Insert or replace the rollup for (org, date). `created_at` of an
    /// existing row is kept.
    async fn upsert_daily(&self, rollup: &DailyRollup) -> DbResult<()>;

    /// Insert or replace the rollup for (org, month).
    async fn upsert_monthly(&self, rollup: &MonthlyRollup) -> DbResult<()>;

    async fn get_daily(&self, org_id: &str, date: NaiveDate) -> DbResult<Option<DailyRollup>>;

    async fn get_monthly(&self, org_id: &str, month: &str) -> DbResult<Option<MonthlyRollup>>;
}
