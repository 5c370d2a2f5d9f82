use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::common::{parse_label, parse_uuid};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{BillingRepo, SettleOutcome, TimeRange},
    },
    models::{BillingHistoryEntry, BillingStatus},
};

pub struct SqliteBillingRepo {
    pool: SqlitePool,
}

impl SqliteBillingRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingRepo for SqliteBillingRepo {
    async fn exists_for_period(&self, org_id: &str, period: TimeRange) -> DbResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as count FROM billing_history
            WHERE org_id = ? AND period_start = ? AND period_end = ?
            "#,
        )
        .bind(org_id)
        .bind(period.start)
        .bind(period.end)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("count") > 0)
    }

    async fn settle(
        &self,
        entry: &BillingHistoryEntry,
        expected_version: i64,
    ) -> DbResult<SettleOutcome> {
        let breakdown = serde_json::to_string(&entry.breakdown)?;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE organizations
            SET wallet_balance = ?, version = version + 1, updated_at = ?
            WHERE org_id = ? AND version = ?
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
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.org_id)
        .bind(entry.billing_date)
        .bind(entry.period_start)
        .bind(entry.period_end)
        .bind(entry.total_tokens)
        .bind(entry.total_cost)
        .bind(entry.amount_deducted)
        .bind(&breakdown)
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
            WHERE org_id = ?
            ORDER BY period_start DESC
            LIMIT ?
            "#,
        )
        .bind(org_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(BillingHistoryEntry {
                    id: parse_uuid(&row.get::<String, _>("id"))?,
                    org_id: row.get("org_id"),
                    billing_date: row.get("billing_date"),
                    period_start: row.get("period_start"),
                    period_end: row.get("period_end"),
                    total_tokens: row.get("total_tokens"),
                    total_cost: row.get("total_cost"),
                    amount_deducted: row.get("amount_deducted"),
                    breakdown: serde_json::from_str(&row.get::<String, _>("breakdown"))?,
                    wallet_balance_before: row.get("wallet_balance_before"),
                    wallet_balance_after: row.get("wallet_balance_after"),
                    status: parse_label::<BillingStatus>(&row.get::<String, _>("status"))?,
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }
}
