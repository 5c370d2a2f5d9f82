use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};

use crate::{
    db::{error::DbResult, repos::RollupRepo},
    models::{DailyRollup, MonthlyRollup},
};

pub struct SqliteRollupRepo {
    pool: SqlitePool,
}

impl SqliteRollupRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RollupRepo for SqliteRollupRepo {
    async fn upsert_daily(&self, rollup: &DailyRollup) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_consumption (
                org_id, date, total_tokens, total_cost, request_count, breakdown,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (org_id, date) DO UPDATE SET
                total_tokens = excluded.total_tokens,
                total_cost = excluded.total_cost,
                request_count = excluded.request_count,
                breakdown = excluded.breakdown,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&rollup.org_id)
        .bind(rollup.date)
        .bind(rollup.total_tokens)
        .bind(rollup.total_cost)
        .bind(rollup.request_count)
        .bind(serde_json::to_string(&rollup.breakdown)?)
        .bind(rollup.created_at)
        .bind(rollup.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_monthly(&self, rollup: &MonthlyRollup) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO monthly_consumption (
                org_id, month, total_tokens, total_cost, request_count, breakdown,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (org_id, month) DO UPDATE SET
                total_tokens = excluded.total_tokens,
                total_cost = excluded.total_cost,
                request_count = excluded.request_count,
                breakdown = excluded.breakdown,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&rollup.org_id)
        .bind(&rollup.month)
        .bind(rollup.total_tokens)
        .bind(rollup.total_cost)
        .bind(rollup.request_count)
        .bind(serde_json::to_string(&rollup.breakdown)?)
        .bind(rollup.created_at)
        .bind(rollup.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_daily(&self, org_id: &str, date: NaiveDate) -> DbResult<Option<DailyRollup>> {
        let row = sqlx::query(
            r#"
            SELECT org_id, date, total_tokens, total_cost, request_count, breakdown,
                   created_at, updated_at
            FROM daily_consumption
            WHERE org_id = ? AND date = ?
            "#,
        )
        .bind(org_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(DailyRollup {
                org_id: row.get("org_id"),
                date: row.get("date"),
                total_tokens: row.get("total_tokens"),
                total_cost: row.get("total_cost"),
                request_count: row.get("request_count"),
                breakdown: serde_json::from_str(&row.get::<String, _>("breakdown"))?,
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
        })
        .transpose()
    }

    async fn get_monthly(&self, org_id: &str, month: &str) -> DbResult<Option<MonthlyRollup>> {
        let row = sqlx::query(
            r#"
            SELECT org_id, month, total_tokens, total_cost, request_count, breakdown,
                   created_at, updated_at
            FROM monthly_consumption
            WHERE org_id = ? AND month = ?
            "#,
        )
        .bind(org_id)
        .bind(month)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(MonthlyRollup {
                org_id: row.get("org_id"),
                month: row.get("month"),
                total_tokens: row.get("total_tokens"),
                total_cost: row.get("total_cost"),
                request_count: row.get("request_count"),
                breakdown: serde_json::from_str(&row.get::<String, _>("breakdown"))?,
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
        })
        .transpose()
    }
}
