use async_trait::async_trait;
use sqlx::{PgPool, Row, types::Json};

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{BillingRepo, SettleOutcome, TimeRange},
    },
    models::{BillingBreakdown, BillingHistoryEntry, BillingStatus},
};

pub struct PostgresBillingRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresBillingRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }
}

#[async_trait]
impl BillingRepo for PostgresBillingRepo {
    async fn exists_for_period(&self, org_id: &str, period: TimeRange) -> DbResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM billing_history
                WHERE org_id = $1 AND period_start = $2 AND period_end = $3
            ) as found
            "#,
        )
        .bind(org_id)
        .bind(period.start)
        .bind(period.end)
        .fetch_one(&self.write_pool)
        .await?;

        Ok(row.get("found"))
    }

    async fn settle(
        &self,
        entry: &BillingHistoryEntry,
        expected_version: i64,
    ) -> DbResult<SettleOutcome> {
        let mut tx = self.write_pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE organizations
            SET wallet_balance = $1, version = version + 1, updated_at = $2
            WHERE org_id = $3 AND version = $4
            "#,
        )
        .bind(entry.wallet_balance_after)
        .bind(entry.billing_date)
        .bind(&entry.org_id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(SettleOutcome::VersionConflict);
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO billing_history (
                id, org_id, billing_date, period_start, period_end,
                total_tokens, total_cost, amount_deducted, breakdown,
                wallet_balance_before, wallet_balance_after, status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.org_id)
        .bind(entry.billing_date)
        .bind(entry.period_start)
        .bind(entry.period_end)
        .bind(entry.total_tokens)
        .bind(entry.total_cost)
        .bind(entry.amount_deducted)
        .bind(Json(&entry.breakdown))
        .bind(entry.wallet_balance_before)
        .bind(entry.wallet_balance_after)
        .bind(entry.status.as_str())
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {
                tx.commit().await?;
                Ok(SettleOutcome::Applied)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await?;
                Ok(SettleOutcome::AlreadyBilled)
            }
            Err(e) => Err(DbError::from(e)),
        }
    }

    async fn list_for_org(&self, org_id: &str, limit: i64) -> DbResult<Vec<BillingHistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, org_id, billing_date, period_start, period_end,
                   total_tokens, total_cost, amount_deducted, breakdown,
                   wallet_balance_before, wallet_balance_after, status, created_at
            FROM billing_history
            WHERE org_id = $1
            ORDER BY period_start DESC
            LIMIT $2
            "#,
        )
        .bind(org_id)
        .bind(limit)
        .fetch_all(&self.read_pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let status: String = row.get("status");
                Ok(BillingHistoryEntry {
                    id: row.get("id"),
                    org_id: row.get("org_id"),
                    billing_date: row.get("billing_date"),
                    period_start: row.get("period_start"),
                    period_end: row.get("period_end"),
                    total_tokens: row.get("total_tokens"),
                    total_cost: row.get("total_cost"),
                    amount_deducted: row.get("amount_deducted"),
                    breakdown: row.get::<Json<BillingBreakdown>, _>("breakdown").0,
                    wallet_balance_before: row.get("wallet_balance_before"),
                    wallet_balance_after: row.get("wallet_balance_after"),
                    status: status.parse::<BillingStatus>().map_err(DbError::Internal)?,
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }
}
