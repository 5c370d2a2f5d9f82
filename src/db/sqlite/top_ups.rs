use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{parse_label, parse_uuid};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{CreditOutcome, CreditTarget, NewTopUp, TopUpRepo},
    },
    models::{TopUpSource, TopUpStatus, TopUpTransaction},
};

const TOP_UP_COLUMNS: &str = "\
    id, org_id, amount, payment_reference, source, status, failure_reason, \
    created_at, completed_at";

pub struct SqliteTopUpRepo {
    pool: SqlitePool,
}

impl SqliteTopUpRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn transaction_from_row(row: &SqliteRow) -> DbResult<TopUpTransaction> {
        Ok(TopUpTransaction {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            org_id: row.get("org_id"),
            amount: row.get("amount"),
            payment_reference: row.get("payment_reference"),
            source: parse_label::<TopUpSource>(&row.get::<String, _>("source"))?,
            status: parse_label::<TopUpStatus>(&row.get::<String, _>("status"))?,
            failure_reason: row.get("failure_reason"),
            created_at: row.get("created_at"),
            completed_at: row.get("completed_at"),
        })
    }

    /// Settle the target transaction as succeeded inside `tx`.
    ///
    /// Returns `None` when it had already succeeded.
    async fn settle_target(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        org_id: &str,
        amount: i64,
        target: &CreditTarget,
        now: DateTime<Utc>,
    ) -> DbResult<Option<Uuid>> {
        match target {
            CreditTarget::Existing {
                id,
                payment_reference,
            } => {
                let updated = sqlx::query(
                    r#"
                    UPDATE top_up_transactions
                    SET status = 'succeeded',
                        failure_reason = NULL,
                        completed_at = ?,
                        payment_reference = COALESCE(?, payment_reference)
                    WHERE id = ? AND org_id = ? AND status != 'succeeded'
                    "#,
                )
                .bind(now)
                .bind(payment_reference.as_deref())
                .bind(id.to_string())
                .bind(org_id)
                .execute(&mut **tx)
                .await?;

                if updated.rows_affected() > 0 {
                    return Ok(Some(*id));
                }

                let exists =
                    sqlx::query("SELECT status FROM top_up_transactions WHERE id = ? AND org_id = ?")
                        .bind(id.to_string())
                        .bind(org_id)
                        .fetch_optional(&mut **tx)
                        .await?;
                match exists {
                    Some(_) => Ok(None),
                    None => Err(DbError::NotFound),
                }
            }
            CreditTarget::New {
                source,
                payment_reference,
            } => {
                if let Some(reference) = payment_reference {
                    let existing = sqlx::query(
                        "SELECT id, status FROM top_up_transactions WHERE payment_reference = ?",
                    )
                    .bind(reference)
                    .fetch_optional(&mut **tx)
                    .await?;

                    if let Some(row) = existing {
                        let id = parse_uuid(&row.get::<String, _>("id"))?;
                        let status = parse_label::<TopUpStatus>(&row.get::<String, _>("status"))?;
                        if status == TopUpStatus::Succeeded {
                            return Ok(None);
                        }
                        sqlx::query(
                            r#"
                            UPDATE top_up_transactions
                            SET status = 'succeeded', failure_reason = NULL,
                                amount = ?, completed_at = ?
                            WHERE id = ?
                            "#,
                        )
                        .bind(amount)
                        .bind(now)
                        .bind(id.to_string())
                        .execute(&mut **tx)
                        .await?;
                        return Ok(Some(id));
                    }
                }

                let id = Uuid::new_v4();
                let inserted = sqlx::query(&format!(
                    r#"
                    INSERT INTO top_up_transactions ({TOP_UP_COLUMNS})
                    VALUES (?, ?, ?, ?, ?, 'succeeded', NULL, ?, ?)
                    "#
                ))
                .bind(id.to_string())
                .bind(org_id)
                .bind(amount)
                .bind(payment_reference.as_deref())
                .bind(source.as_str())
                .bind(now)
                .bind(now)
                .execute(&mut **tx)
                .await;

                match inserted {
                    Ok(_) => Ok(Some(id)),
                    Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(None),
                    Err(e) => Err(DbError::from(e)),
                }
            }
        }
    }
}

#[async_trait]
impl TopUpRepo for SqliteTopUpRepo {
    async fn create_pending(&self, input: NewTopUp) -> DbResult<TopUpTransaction> {
        let id = Uuid::new_v4();
        let now = input.created_at;

        sqlx::query(&format!(
            r#"
            INSERT INTO top_up_transactions ({TOP_UP_COLUMNS})
            VALUES (?, ?, ?, NULL, ?, 'pending', NULL, ?, NULL)
            "#
        ))
        .bind(id.to_string())
        .bind(&input.org_id)
        .bind(input.amount)
        .bind(input.source.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(TopUpTransaction {
            id,
            org_id: input.org_id,
            amount: input.amount,
            payment_reference: None,
            source: input.source,
            status: TopUpStatus::Pending,
            failure_reason: None,
            created_at: now,
            completed_at: None,
        })
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<TopUpTransaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TOP_UP_COLUMNS} FROM top_up_transactions WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::transaction_from_row).transpose()
    }

    async fn find_by_reference(&self, reference: &str) -> DbResult<Option<TopUpTransaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TOP_UP_COLUMNS} FROM top_up_transactions WHERE payment_reference = ?"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::transaction_from_row).transpose()
    }

    async fn mark_failed(&self, id: Uuid, reason: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE top_up_transactions
            SET status = 'failed', failure_reason = ?, completed_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed_by_reference(
        &self,
        reference: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE top_up_transactions
            SET status = 'failed', failure_reason = ?, completed_at = ?
            WHERE payment_reference = ? AND status = 'pending'
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(reference)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn apply_credit(
        &self,
        org_id: &str,
        amount: i64,
        target: &CreditTarget,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> DbResult<CreditOutcome> {
        let mut tx = self.pool.begin().await?;

        let Some(transaction_id) = Self::settle_target(&mut tx, org_id, amount, target, now).await?
        else {
            tx.rollback().await?;
            return Ok(CreditOutcome::AlreadyApplied);
        };

        let updated = sqlx::query(
            r#"
            UPDATE organizations
            SET wallet_balance = wallet_balance + ?, version = version + 1, updated_at = ?
            WHERE org_id = ? AND version = ?
            "#,
        )
        .bind(amount)
        .bind(now)
        .bind(org_id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CreditOutcome::VersionConflict);
        }

        tx.commit().await?;
        Ok(CreditOutcome::Applied { transaction_id })
    }
}
