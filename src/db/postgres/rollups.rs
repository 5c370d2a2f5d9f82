use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Row, types::Json};

use crate::{
    db::{error::DbResult, repos::RollupRepo},
    models::{DailyRollup, MonthlyRollup, RollupBreakdown},
};

pub struct PostgresRollupRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresRollupRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }
}

#[async_trait]
impl RollupRepo for PostgresRollupRepo {
    async fn upsert_daily(&self, rollup: &DailyRollup) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_consumption (
                org_id, date, total_tokens, total_cost, request_count, breakdown,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (org_id, date) DO UPDATE SET
                total_tokens = EXCLUDED.total_tokens,
                total_cost = EXCLUDED.total_cost,
                request_count = EXCLUDED.request_count,
                breakdown = EXCLUDED.breakdown,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&rollup.org_id)
        .bind(rollup.date)
        .bind(rollup.total_tokens)
        .bind(rollup.total_cost)
        .bind(rollup.request_count)
        .bind(Json(&rollup.breakdown))
        .bind(rollup.created_at)
        .bind(rollup.updated_at)
        .execute(&self.write_pool)
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (org_id, month) DO UPDATE SET
                total_tokens = EXCLUDED.total_tokens,
                total_cost = EXCLUDED.total_cost,
                request_count = EXCLUDED.request_count,
                breakdown = EXCLUDED.breakdown,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&rollup.org_id)
        .bind(&rollup.month)
        .bind(rollup.total_tokens)
        .bind(rollup.total_cost)
        .bind(rollup.request_count)
        .bind(Json(&rollup.breakdown))
        .bind(rollup.created_at)
        .bind(rollup.updated_at)
        .execute(&self.write_pool)
        .await?;

        Ok(())
    }

    async fn get_daily(&self, org_id: &str, date: NaiveDate) -> DbResult<Option<DailyRollup>> {
        let row = sqlx::query(
            r#"
            SELECT org_id, date, total_tokens, total_cost, request_count, breakdown,
                   created_at, updated_at
            FROM daily_consumption
            WHERE org_id = $1 AND date = $2
            "#,
        )
        .bind(org_id)
        .bind(date)
        .fetch_optional(&self.read_pool)
        .await?;

        Ok(row.map(|row| DailyRollup {
            org_id: row.get("org_id"),
            date: row.get("date"),
            total_tokens: row.get("total_tokens"),
            total_cost: row.get("total_cost"),
            request_count: row.get("request_count"),
            breakdown: row.get::<Json<RollupBreakdown>, _>("breakdown").0,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn get_monthly(&self, org_id: &str, month: &str) -> DbResult<Option<MonthlyRollup>> {
        let row = sqlx::query(
            r#"
            SELECT org_id, month, total_tokens, total_cost, request_count, breakdown,
                   created_at, updated_at
            FROM monthly_consumption
            WHERE org_id = $1 AND month = $2
            "#,
        )
        .bind(org_id)
        .bind(month)
        .fetch_optional(&self.read_pool)
        .await?;

        Ok(row.map(|row| MonthlyRollup {
            org_id: row.get("org_id"),
            month: row.get("month"),
            total_tokens: row.get("total_tokens"),
            total_cost: row.get("total_cost"),
            request_count: row.get("request_count"),
            breakdown: row.get::<Json<RollupBreakdown>, _>("breakdown").0,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }
}
